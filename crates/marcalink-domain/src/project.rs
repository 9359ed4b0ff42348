//! Project and iteration records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Iteration every fresh project starts in
pub const INITIAL_ITERATION_ID: &str = "I1";

/// One logical research project
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub researcher: String,
    #[serde(default = "crate::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_iteration_id")]
    pub current_iteration_id: String,
}

fn default_iteration_id() -> String {
    INITIAL_ITERATION_ID.to_string()
}

impl ProjectRecord {
    /// Create the record used the first time a project id is seen
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            title: id.clone(),
            id,
            researcher: String::new(),
            created_at: crate::now(),
            current_iteration_id: default_iteration_id(),
        }
    }

    /// Builder method to set the title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Builder method to set the researcher
    pub fn with_researcher(mut self, researcher: impl Into<String>) -> Self {
        self.researcher = researcher.into();
        self
    }

    pub fn rename(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    /// Move the project to another snowballing iteration
    pub fn advance_iteration(&mut self, iteration_id: impl Into<String>) {
        self.current_iteration_id = iteration_id.into();
    }
}

/// Kind of snowballing iteration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IterationKind {
    Seed,
    Backward,
    Forward,
}

/// One snowballing iteration within a project
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: IterationKind,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default = "crate::now")]
    pub created_at: DateTime<Utc>,
}

impl IterationRecord {
    /// The seed iteration a fresh project starts with
    pub fn seed() -> Self {
        Self {
            id: INITIAL_ITERATION_ID.to_string(),
            kind: IterationKind::Seed,
            mode: Some("seed".to_string()),
            created_at: crate::now(),
        }
    }
}
