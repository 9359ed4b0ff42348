//! Act dispatcher
//!
//! Turns one inbound envelope into one reply envelope. The reply echoes the
//! request's act and id; its payload is a status-tagged response, except for
//! `list_project`, which answers with the bare array of names.

use std::sync::Arc;

use marcalink_domain::validate_project_name;
use marcalink_store::{
    act, Envelope, EnvelopeError, FilesystemBackend, Items, RemoteStoreBackend, Result,
    StoreResponse,
};
use serde_json::{json, Value};
use tracing::{debug, error, warn};

const MISSING_NAME: &str = "Missing project name. Please provide a name with variable 'name'.";

/// Per-connection dispatcher; remembers the project opened last
pub struct Dispatcher {
    backend: Arc<FilesystemBackend>,
    active_project: Option<String>,
}

impl Dispatcher {
    pub fn new(backend: Arc<FilesystemBackend>) -> Self {
        Self {
            backend,
            active_project: None,
        }
    }

    /// Project set by the last successful `open_project`
    pub fn active_project(&self) -> Option<&str> {
        self.active_project.as_deref()
    }

    /// Notice sent to every client right after it connects
    pub fn greeting() -> Envelope {
        Envelope::new(
            act::CONNECTED,
            json!({ "status": "ok", "message": "Connection established" }),
        )
    }

    /// Decode and handle one text frame
    pub async fn handle_text(&mut self, text: &str) -> Envelope {
        match Envelope::parse(text) {
            Ok(request) => self.handle(&request).await,
            Err(e) => {
                warn!("rejected message: {}", e);
                let message = match e {
                    EnvelopeError::InvalidJson(_) => "Invalid JSON",
                    EnvelopeError::MissingAct => "Missing act attribute",
                };
                Envelope::new(act::ERROR, json!(StoreResponse::error(message)))
            }
        }
    }

    pub async fn handle(&mut self, request: &Envelope) -> Envelope {
        debug!(act = %request.act, "handling request");
        match self.dispatch(request).await {
            Ok(Some(payload)) => request.reply(payload),
            Ok(None) => {
                warn!(act = %request.act, "unknown act");
                let mut reply = request.reply(json!(StoreResponse::error("Unknown act")));
                reply.act = act::UNKNOWN.to_string();
                reply
            }
            Err(e) => {
                error!(act = %request.act, "request failed: {}", e);
                request.reply(json!(StoreResponse::error(e.to_string())))
            }
        }
    }

    async fn dispatch(&mut self, request: &Envelope) -> Result<Option<Value>> {
        let backend = Arc::clone(&self.backend);
        let response = match request.act.as_str() {
            act::NEW_PROJECT => match name_field(request) {
                Ok(name) => backend.create_project(name).await?,
                Err(rejected) => rejected,
            },
            act::OPEN_PROJECT => match name_field(request) {
                Ok(name) => {
                    let response = backend.load_project(name).await?;
                    if response.is_ok() {
                        self.active_project = Some(name.to_string());
                    }
                    response
                }
                Err(rejected) => rejected,
            },
            act::LIST_PROJECT => {
                let response = backend.list_projects().await?;
                if response.is_ok() {
                    return Ok(Some(response.data.unwrap_or_else(|| json!([]))));
                }
                response
            }
            act::DELETE_PROJECT => match name_field(request) {
                Ok(name) => {
                    let response = backend.delete_project(name).await?;
                    if self.active_project.as_deref() == Some(name) {
                        self.active_project = None;
                    }
                    response
                }
                Err(rejected) => rejected,
            },
            act::ARCHIVE_PROJECT => match name_field(request) {
                Ok(name) => backend.archive_project(name).await?,
                Err(rejected) => rejected,
            },
            act::SAVE_PROJECT => match (self.project_field(request), data_field(request)) {
                (Ok(project), Ok(data)) => backend.save_project(&project, data).await?,
                (Err(rejected), _) | (_, Err(rejected)) => rejected,
            },
            act::LOAD_PROJECT => match self.project_field(request) {
                Ok(project) => backend.load_project(&project).await?,
                Err(rejected) => rejected,
            },
            act::SAVE_PAPER => {
                match (
                    self.project_field(request),
                    paper_field(request),
                    data_field(request),
                ) {
                    (Ok(project), Ok(paper), Ok(data)) => {
                        backend.save_paper(&project, paper, data).await?
                    }
                    (Err(rejected), _, _) | (_, Err(rejected), _) | (_, _, Err(rejected)) => {
                        rejected
                    }
                }
            }
            act::LOAD_PAPER => match (self.project_field(request), paper_field(request)) {
                (Ok(project), Ok(paper)) => backend.load_paper(&project, paper).await?,
                (Err(rejected), _) | (_, Err(rejected)) => rejected,
            },
            act::DELETE_PAPER => match (self.project_field(request), paper_field(request)) {
                (Ok(project), Ok(paper)) => backend.delete_paper(&project, paper).await?,
                (Err(rejected), _) | (_, Err(rejected)) => rejected,
            },
            act::LIST_PAPERS => match self.project_field(request) {
                Ok(project) => backend.list_papers(&project).await?,
                Err(rejected) => rejected,
            },
            act::STORAGE_GET => backend.get(&keys_field(request)).await?,
            act::STORAGE_SET => match items_field(request) {
                Some(items) => backend.set(items).await?,
                None => StoreResponse::error("Missing items."),
            },
            act::STORAGE_REMOVE => backend.remove(&keys_field(request)).await?,
            _ => return Ok(None),
        };
        Ok(Some(serde_json::to_value(response)?))
    }

    /// `projectName`, falling back to the active project
    fn project_field(&self, request: &Envelope) -> std::result::Result<String, StoreResponse> {
        let name = match request.payload_str("projectName") {
            Some(name) => name,
            None => match self.active_project.as_deref() {
                Some(active) => active,
                None => return Err(StoreResponse::error("Missing project name.")),
            },
        };
        validate_project_name(name)
            .map(str::to_string)
            .map_err(|e| StoreResponse::error(e.to_string()))
    }
}

fn name_field(request: &Envelope) -> std::result::Result<&str, StoreResponse> {
    match request.payload_str("name") {
        Some(name) if !name.is_empty() => {
            validate_project_name(name).map_err(|e| StoreResponse::error(e.to_string()))
        }
        _ => Err(StoreResponse::error(MISSING_NAME)),
    }
}

fn paper_field(request: &Envelope) -> std::result::Result<&str, StoreResponse> {
    request
        .payload_str("paperId")
        .ok_or_else(|| StoreResponse::error("Missing paperId."))
}

fn data_field(request: &Envelope) -> std::result::Result<Value, StoreResponse> {
    match request.payload.get("data") {
        Some(Value::Null) | None => Err(StoreResponse::error("Missing data.")),
        Some(data) => Ok(data.clone()),
    }
}

/// `keys` as an array of strings or a single string; absent means all keys
fn keys_field(request: &Envelope) -> Vec<String> {
    match request.payload.get("keys") {
        Some(Value::String(key)) => vec![key.clone()],
        Some(Value::Array(keys)) => keys
            .iter()
            .filter_map(|key| key.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

fn items_field(request: &Envelope) -> Option<Items> {
    request.payload.get("items").and_then(Value::as_object).cloned()
}
