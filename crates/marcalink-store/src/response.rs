//! Status-tagged results returned by every store operation

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Outcome tag carried by every response
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// `{status, message?, data?}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoreResponse {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl StoreResponse {
    pub fn ok() -> Self {
        Self {
            status: Status::Ok,
            message: None,
            data: None,
        }
    }

    pub fn ok_with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::ok()
        }
    }

    pub fn ok_with_data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::ok()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Interpret a response payload received over the wire.
    ///
    /// Status-tagged objects decode as-is; bare values (the name array that
    /// `list_project` answers with) are wrapped as successful data.
    pub fn from_payload(payload: Value) -> Self {
        if payload.get("status").is_some() {
            if let Ok(response) = serde_json::from_value::<StoreResponse>(payload.clone()) {
                return response;
            }
        }
        Self::ok_with_data(payload)
    }

    /// Decode `data` into a typed value; `None` when absent or null
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match &self.data {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
        }
    }

    /// Message text, or an empty string
    pub fn message_or_default(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }
}
