//! Request/response over the connection
//!
//! In act mode (the default) every in-flight request of the same act is
//! answered by the next inbound envelope carrying that act. In request-id
//! mode each request carries a fresh UUID and only the envelope echoing it
//! resolves the caller. Waiters live on the connection, so any number of
//! clients may share one.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::CorrelationMode;
use crate::connection::ConnectionManager;
use crate::error::{Result, StoreError};
use crate::protocol::Envelope;
use crate::response::StoreResponse;

/// Issues requests through a [`ConnectionManager`] and awaits the correlated
/// response.
#[derive(Clone)]
pub struct ActClient {
    connection: ConnectionManager,
    correlation: CorrelationMode,
    timeout: Option<Duration>,
}

impl ActClient {
    /// Client using the connection's configured correlation mode and timeout
    pub fn new(connection: ConnectionManager) -> Self {
        let correlation = connection.config().correlation;
        let timeout = connection.config().request_timeout();
        Self {
            connection,
            correlation,
            timeout,
        }
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn correlation(&self) -> CorrelationMode {
        self.correlation
    }

    /// Send `act` with `payload` and wait for its response
    pub async fn request(&self, act: &str, payload: Value) -> Result<StoreResponse> {
        self.request_with_timeout(act, payload, self.timeout).await
    }

    /// Like [`request`](Self::request) with an explicit deadline.
    ///
    /// `Err(Transport)` when the connection is not open or closes before the
    /// response; `Err(Protocol)` when the deadline passes.
    pub async fn request_with_timeout(
        &self,
        act: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<StoreResponse> {
        if !self.connection.is_open() {
            return Err(StoreError::Transport(format!(
                "cannot send {}: connection is {}",
                act,
                self.connection.state()
            )));
        }

        let payload = match self.correlation {
            CorrelationMode::Act => self.request_by_act(act, payload, timeout).await?,
            CorrelationMode::RequestId => self.request_by_id(act, payload, timeout).await?,
        };
        Ok(StoreResponse::from_payload(payload))
    }

    async fn request_by_act(
        &self,
        act: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        if self.connection.in_flight(act) > 0 {
            debug!(act, "request shares the response of an in-flight request");
        }
        let (ticket, rx) = self.connection.register_act(act);

        if !self.connection.send(&Envelope::new(act, payload)) {
            self.connection.cancel_act(act, ticket);
            return Err(StoreError::Transport(format!("failed to send {}", act)));
        }

        match await_response(rx, timeout).await {
            Ok(value) => Ok(value),
            Err(err) => {
                self.connection.cancel_act(act, ticket);
                Err(err.into_error(act))
            }
        }
    }

    async fn request_by_id(
        &self,
        act: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let id = Uuid::new_v4().to_string();
        let rx = self.connection.register_request(&id);

        if !self.connection.send(&Envelope::new(act, payload).with_id(id.clone())) {
            self.connection.cancel_request(&id);
            return Err(StoreError::Transport(format!("failed to send {}", act)));
        }

        match await_response(rx, timeout).await {
            Ok(value) => Ok(value),
            Err(err) => {
                self.connection.cancel_request(&id);
                Err(err.into_error(act))
            }
        }
    }

    /// Requests of `act` currently awaiting a response (act mode)
    pub fn in_flight(&self, act: &str) -> usize {
        self.connection.in_flight(act)
    }
}

enum WaitError {
    Closed,
    TimedOut(Duration),
}

impl WaitError {
    fn into_error(self, act: &str) -> StoreError {
        match self {
            WaitError::Closed => {
                StoreError::Transport(format!("connection closed before {} was answered", act))
            }
            WaitError::TimedOut(after) => {
                warn!(act, "no response after {:?}", after);
                StoreError::Protocol(format!("{} timed out after {:?}", act, after))
            }
        }
    }
}

async fn await_response(
    rx: oneshot::Receiver<Value>,
    timeout: Option<Duration>,
) -> std::result::Result<Value, WaitError> {
    match timeout {
        Some(after) => match tokio::time::timeout(after, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(WaitError::Closed),
            Err(_) => Err(WaitError::TimedOut(after)),
        },
        None => rx.await.map_err(|_| WaitError::Closed),
    }
}
