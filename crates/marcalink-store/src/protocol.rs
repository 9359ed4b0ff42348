//! Wire envelope exchanged with the remote authority
//!
//! Every message is a JSON object `{"act": <string>, "payload": <value>}`.
//! Responses echo the act of the request they answer. An `id` field is only
//! present when per-request correlation is enabled.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Flat key/value items as used by `storage_get` / `storage_set`
pub type Items = Map<String, Value>;

/// Recognized act names
pub mod act {
    pub const NEW_PROJECT: &str = "new_project";
    pub const OPEN_PROJECT: &str = "open_project";
    pub const LIST_PROJECT: &str = "list_project";
    pub const DELETE_PROJECT: &str = "delete_project";
    pub const ARCHIVE_PROJECT: &str = "archive_project";
    pub const SAVE_PAPER: &str = "save_paper";
    pub const LOAD_PAPER: &str = "load_paper";
    pub const DELETE_PAPER: &str = "delete_paper";
    pub const LIST_PAPERS: &str = "list_papers";
    pub const SAVE_PROJECT: &str = "save_project";
    pub const LOAD_PROJECT: &str = "load_project";
    pub const STORAGE_GET: &str = "storage_get";
    pub const STORAGE_SET: &str = "storage_set";
    pub const STORAGE_REMOVE: &str = "storage_remove";

    /// Greeting sent by the authority when a client connects
    pub const CONNECTED: &str = "connected";
    /// Undecodable message or missing act
    pub const ERROR: &str = "error";
    /// Act without a handler
    pub const UNKNOWN: &str = "unknown";
}

/// `{act, payload, id?}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub act: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Envelope {
    pub fn new(act: impl Into<String>, payload: Value) -> Self {
        Self {
            act: act.into(),
            payload,
            id: None,
        }
    }

    /// Builder method to attach a correlation id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Response envelope for this request, echoing act and id
    pub fn reply(&self, payload: Value) -> Self {
        Self {
            act: self.act.clone(),
            payload,
            id: self.id.clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decode an inbound message.
    ///
    /// Fails on invalid JSON and on objects without a string `act`.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| EnvelopeError::InvalidJson(e.to_string()))?;
        match value.get("act") {
            Some(Value::String(act)) if !act.is_empty() => {}
            _ => return Err(EnvelopeError::MissingAct),
        }
        serde_json::from_value(value).map_err(|e| EnvelopeError::InvalidJson(e.to_string()))
    }

    /// String field of an object payload
    pub fn payload_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(Value::as_str)
    }
}

/// Why an inbound message could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Missing act attribute")]
    MissingAct,
}
