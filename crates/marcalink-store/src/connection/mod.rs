//! Lifecycle of the WebSocket connection to the remote authority
//!
//! [`ConnectionManager`] owns the transport: it connects, reconnects with
//! exponential backoff after every close, reports its state, dispatches
//! inbound envelopes to per-act handlers and sends outbound envelopes. It
//! never queues: sending while not open fails immediately.

mod address;
mod backoff;
mod oplog;

pub use address::{build_ws_url, DEFAULT_PORT, DEFAULT_URL};
pub use backoff::Backoff;
pub use oplog::{LogEntry, OperationLog};

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::ConnectionConfig;
use crate::local::LocalStore;
use crate::lock;
use crate::protocol::{Envelope, Items};

/// Local-store key mirroring the human-readable connection status
pub const STATUS_KEY: &str = "server_status";
/// Local-store key holding the configured server address
pub const SERVER_URL_KEY: &str = "server_url";
/// Local-store key holding the configured server port
pub const SERVER_PORT_KEY: &str = "server_port";

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
    Error,
}

impl ConnectionState {
    /// Status text shown to the user
    pub fn status_text(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting...",
            ConnectionState::Open => "Connected",
            ConnectionState::Closing => "Closing",
            ConnectionState::Error => "Error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.status_text())
    }
}

/// Callback fired each time the connection opens
pub type OpenCallback = Arc<dyn Fn() + Send + Sync>;

/// Handler invoked with the payload of an inbound envelope
pub type ResponseHandler = Arc<dyn Fn(Value) + Send + Sync>;

type ActWaiters = HashMap<String, Vec<(u64, oneshot::Sender<Value>)>>;

/// Owner of the connection to the remote authority.
///
/// Cheap to clone; all clones share one connection. Methods that start a
/// connection must be called from within a Tokio runtime.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: ConnectionConfig,
    state: Mutex<ConnectionState>,
    backoff: Mutex<Backoff>,
    address: Mutex<Option<String>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    open_callbacks: Mutex<Vec<OpenCallback>>,
    handlers: Mutex<HashMap<String, ResponseHandler>>,
    pending: Mutex<HashMap<String, oneshot::Sender<Value>>>,
    /// Requests awaiting the next envelope of their act, shared by every
    /// client of this connection
    act_waiters: Mutex<ActWaiters>,
    next_ticket: AtomicU64,
    log: Mutex<OperationLog>,
    session: Mutex<Option<JoinHandle<()>>>,
    reconnect: Mutex<Option<JoinHandle<()>>>,
    /// Set by an explicit disconnect; suppresses automatic reconnection
    stopped: AtomicBool,
    /// Bumped for every connection attempt so stale sessions stay silent
    epoch: AtomicU64,
    status_store: Option<Arc<dyn LocalStore>>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        Self::build(config, None)
    }

    /// Mirror status into `store` and read the server address from it
    pub fn with_status_store(config: ConnectionConfig, store: Arc<dyn LocalStore>) -> Self {
        Self::build(config, Some(store))
    }

    fn build(config: ConnectionConfig, status_store: Option<Arc<dyn LocalStore>>) -> Self {
        let backoff = Backoff::new(config.base_backoff(), config.max_backoff());
        let log = OperationLog::new(config.log_capacity);
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(ConnectionState::Disconnected),
                backoff: Mutex::new(backoff),
                address: Mutex::new(None),
                outbound: Mutex::new(None),
                open_callbacks: Mutex::new(Vec::new()),
                handlers: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                act_waiters: Mutex::new(HashMap::new()),
                next_ticket: AtomicU64::new(0),
                log: Mutex::new(log),
                session: Mutex::new(None),
                reconnect: Mutex::new(None),
                stopped: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                status_store,
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.inner.state)
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Address of the current or most recent connection attempt
    pub fn address(&self) -> Option<String> {
        lock(&self.inner.address).clone()
    }

    /// Delay the next scheduled reconnect will wait
    pub fn next_backoff(&self) -> std::time::Duration {
        lock(&self.inner.backoff).current()
    }

    /// Snapshot of the operational log, oldest first
    pub fn operation_log(&self) -> Vec<LogEntry> {
        lock(&self.inner.log).entries()
    }

    /// Connect to `url`, appending `port` when the address has none.
    ///
    /// A no-op while already open. A malformed address moves to
    /// [`ConnectionState::Error`] without scheduling a reconnect; a
    /// connection that fails or drops later is retried indefinitely.
    pub fn connect(&self, url: &str, port: &str) {
        if self.is_open() {
            info!("connect ignored: already connected");
            self.append_log("Already connected.");
            return;
        }
        self.inner.stopped.store(false, Ordering::SeqCst);
        self.begin(build_ws_url(url, port));
    }

    /// Connect using the address kept in the status store, writing the
    /// defaults back when none is stored. Without a status store the
    /// configured address is used.
    pub fn auto_connect(&self) {
        let (url, port) = self.stored_address();
        self.connect(&url, &port);
    }

    /// Close the connection and cancel any pending reconnect.
    ///
    /// No automatic reconnection happens until `connect` is called again.
    pub fn disconnect(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(timer) = lock(&self.inner.reconnect).take() {
            timer.abort();
        }

        self.set_state(ConnectionState::Closing);
        if let Some(outbound) = lock(&self.inner.outbound).take() {
            // The session flushes the close frame and then ends on its own
            let _ = outbound.send(Message::Close(None));
        } else if let Some(session) = lock(&self.inner.session).take() {
            session.abort();
        }
        self.drop_waiters();

        self.set_state(ConnectionState::Disconnected);
        self.append_log("🔌 Disconnected");
        info!("disconnected");
    }

    /// Serialize and transmit an envelope.
    ///
    /// Returns `false` without queuing when the connection is not open.
    pub fn send(&self, envelope: &Envelope) -> bool {
        if !self.is_open() {
            warn!(act = %envelope.act, "send refused: connection is {}", self.state());
            return false;
        }
        let text = match envelope.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!("failed to encode envelope: {}", e);
                return false;
            }
        };
        let outbound = lock(&self.inner.outbound).clone();
        match outbound {
            Some(tx) if tx.send(Message::text(text.clone())).is_ok() => {
                self.append_log(format!("➡️ {}", text));
                true
            }
            _ => false,
        }
    }

    /// Register a callback for every open event.
    ///
    /// Fires immediately when the connection is already open.
    pub fn on_open<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let callback: OpenCallback = Arc::new(callback);
        let fire_now = {
            let mut callbacks = lock(&self.inner.open_callbacks);
            callbacks.push(Arc::clone(&callback));
            self.is_open()
        };
        if fire_now {
            invoke_open_callback(&callback);
        }
    }

    /// Route inbound envelopes with this act to `handler`; replaces any
    /// previous handler for the act.
    pub fn set_response_handler<F>(&self, act: &str, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        lock(&self.inner.handlers).insert(act.to_string(), Arc::new(handler));
    }

    pub fn remove_response_handler(&self, act: &str) {
        lock(&self.inner.handlers).remove(act);
    }

    pub fn has_response_handler(&self, act: &str) -> bool {
        lock(&self.inner.handlers).contains_key(act)
    }

    /// Await the envelope whose `id` matches; takes precedence over act handlers
    pub fn register_request(&self, id: &str) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        lock(&self.inner.pending).insert(id.to_string(), tx);
        rx
    }

    pub fn cancel_request(&self, id: &str) {
        lock(&self.inner.pending).remove(id);
    }

    /// Await the next envelope carrying `act`.
    ///
    /// Every waiter of the act is answered by that one envelope. Waiters are
    /// dropped when the connection closes, so receivers then see an error.
    pub fn register_act(&self, act: &str) -> (u64, oneshot::Receiver<Value>) {
        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.inner.act_waiters)
            .entry(act.to_string())
            .or_default()
            .push((ticket, tx));
        (ticket, rx)
    }

    pub fn cancel_act(&self, act: &str, ticket: u64) {
        let mut waiters = lock(&self.inner.act_waiters);
        if let Some(entry) = waiters.get_mut(act) {
            entry.retain(|(t, _)| *t != ticket);
            if entry.is_empty() {
                waiters.remove(act);
            }
        }
    }

    /// Requests of `act` currently awaiting a response
    pub fn in_flight(&self, act: &str) -> usize {
        lock(&self.inner.act_waiters).get(act).map_or(0, Vec::len)
    }

    fn drop_waiters(&self) {
        lock(&self.inner.pending).clear();
        lock(&self.inner.act_waiters).clear();
    }

    fn begin(&self, address: String) {
        match Url::parse(&address) {
            Ok(url) if matches!(url.scheme(), "ws" | "wss") => {}
            Ok(url) => {
                self.fail_to_start(&address, &format!("unsupported scheme {}", url.scheme()));
                return;
            }
            Err(e) => {
                self.fail_to_start(&address, &e.to_string());
                return;
            }
        }

        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        *lock(&self.inner.address) = Some(address.clone());
        if let Some(timer) = lock(&self.inner.reconnect).take() {
            timer.abort();
        }
        self.set_state(ConnectionState::Connecting);
        self.append_log(format!("Connecting to {}", address));
        info!("connecting to {}", address);

        let manager = self.clone();
        let session = tokio::spawn(async move { manager.run_session(address, epoch).await });
        if let Some(previous) = lock(&self.inner.session).replace(session) {
            previous.abort();
        }
    }

    fn fail_to_start(&self, address: &str, reason: &str) {
        error!("cannot create WebSocket for {}: {}", address, reason);
        *lock(&self.inner.address) = Some(address.to_string());
        self.set_state(ConnectionState::Error);
        self.append_log(format!("Error creating WebSocket: {}", reason));
    }

    async fn run_session(self, address: String, epoch: u64) {
        let stream = match connect_async(address.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(e) => {
                warn!("connection to {} failed: {}", address, e);
                if self.is_current(epoch) {
                    self.set_state(ConnectionState::Error);
                    self.append_log("❌ Connection error");
                }
                self.handle_close(epoch);
                return;
            }
        };
        if !self.is_current(epoch) {
            debug!("dropping superseded connection to {}", address);
            return;
        }

        let (mut write, mut read) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        *lock(&self.inner.outbound) = Some(tx);
        self.handle_open();

        loop {
            tokio::select! {
                outgoing = rx.recv() => match outgoing {
                    Some(message) => {
                        let closing = matches!(message, Message::Close(_));
                        if let Err(e) = write.send(message).await {
                            warn!("send failed: {}", e);
                            break;
                        }
                        if closing {
                            break;
                        }
                    }
                    None => break,
                },
                incoming = read.next() => match incoming {
                    Some(Ok(Message::Text(text))) => self.dispatch(text.as_str()),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("connection error: {}", e);
                        if self.is_current(epoch) {
                            self.set_state(ConnectionState::Error);
                            self.append_log("❌ Connection error");
                        }
                        break;
                    }
                },
            }
        }

        self.handle_close(epoch);
    }

    fn handle_open(&self) {
        let callbacks = {
            let callbacks = lock(&self.inner.open_callbacks);
            self.set_state(ConnectionState::Open);
            callbacks.clone()
        };
        lock(&self.inner.backoff).reset();
        self.append_log("✅ Connected");
        info!("connected to {}", self.address().unwrap_or_default());

        for callback in &callbacks {
            invoke_open_callback(callback);
        }
    }

    fn handle_close(&self, epoch: u64) {
        if !self.is_current(epoch) {
            return;
        }
        lock(&self.inner.outbound).take();
        // Responses never cross connections
        self.drop_waiters();
        self.set_state(ConnectionState::Disconnected);
        self.append_log("🔌 Connection closed");

        if self.inner.stopped.load(Ordering::SeqCst) {
            return;
        }
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&self) {
        let delay = lock(&self.inner.backoff).next_delay();
        info!("reconnecting in {:?}", delay);

        let manager = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            lock(&manager.inner.reconnect).take();
            if manager.inner.stopped.load(Ordering::SeqCst) {
                return;
            }
            manager.reconnect_now();
        });
        if let Some(previous) = lock(&self.inner.reconnect).replace(timer) {
            previous.abort();
        }
    }

    fn reconnect_now(&self) {
        if self.inner.status_store.is_some() {
            self.auto_connect();
        } else if let Some(address) = self.address() {
            self.begin(address);
        } else {
            self.auto_connect();
        }
    }

    pub(crate) fn dispatch(&self, text: &str) {
        self.append_log(format!("⬅️ {}", text));
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("undeliverable message ({}): {}", e, text);
                return;
            }
        };

        if let Some(id) = envelope.id.as_deref() {
            if let Some(waiter) = lock(&self.inner.pending).remove(id) {
                let _ = waiter.send(envelope.payload);
                return;
            }
        }

        let waiters = lock(&self.inner.act_waiters)
            .remove(&envelope.act)
            .unwrap_or_default();
        let handler = lock(&self.inner.handlers).get(&envelope.act).cloned();
        if waiters.is_empty() && handler.is_none() {
            debug!(act = %envelope.act, "no handler for message");
            return;
        }
        for (_, tx) in waiters {
            let _ = tx.send(envelope.payload.clone());
        }
        if let Some(handler) = handler {
            handler(envelope.payload);
        }
    }

    fn stored_address(&self) -> (String, String) {
        let config = &self.inner.config;
        let Some(store) = &self.inner.status_store else {
            return (config.url.clone(), config.port.clone());
        };

        let keys = [SERVER_URL_KEY.to_string(), SERVER_PORT_KEY.to_string()];
        let stored = store.get(&keys).unwrap_or_else(|e| {
            warn!("cannot read server address: {}", e);
            Items::new()
        });
        let url = stored.get(SERVER_URL_KEY).and_then(Value::as_str);
        let port = stored.get(SERVER_PORT_KEY).and_then(Value::as_str);
        match url {
            Some(url) if !url.is_empty() => (url.to_string(), port.unwrap_or_default().to_string()),
            _ => {
                let mut defaults = Items::new();
                defaults.insert(SERVER_URL_KEY.to_string(), json!(config.url));
                defaults.insert(SERVER_PORT_KEY.to_string(), json!(config.port));
                if let Err(e) = store.set(defaults) {
                    warn!("cannot store default server address: {}", e);
                }
                (config.url.clone(), config.port.clone())
            }
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.inner.epoch.load(Ordering::SeqCst) == epoch
    }

    fn set_state(&self, state: ConnectionState) {
        *lock(&self.inner.state) = state;
        if let Some(store) = &self.inner.status_store {
            let mut items = Items::new();
            items.insert(STATUS_KEY.to_string(), json!(state.status_text()));
            if let Err(e) = store.set(items) {
                warn!("cannot record connection status: {}", e);
            }
        }
    }

    fn append_log(&self, data: impl Into<String>) {
        lock(&self.inner.log).push(data);
    }

    #[cfg(test)]
    pub(crate) fn force_state(&self, state: ConnectionState) {
        self.set_state(state);
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("address", &self.address())
            .finish()
    }
}

fn invoke_open_callback(callback: &OpenCallback) {
    if catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
        error!("open callback panicked");
    }
}
