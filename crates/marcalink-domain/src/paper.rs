//! Paper records and their audit history

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};

use crate::category::infer_from_category;
use crate::fingerprint::{canonical_url, paper_fingerprint};

/// Maximum number of history entries kept per paper
pub const HISTORY_CAP: usize = 200;

/// Screening status of a paper
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaperStatus {
    #[default]
    Pending,
    Included,
    Excluded,
    Duplicate,
}

impl fmt::Display for PaperStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaperStatus::Pending => "pending",
            PaperStatus::Included => "included",
            PaperStatus::Excluded => "excluded",
            PaperStatus::Duplicate => "duplicate",
        };
        f.write_str(s)
    }
}

/// How a paper entered the snowballing set
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaperOrigin {
    Seed,
    Backward,
    Forward,
    #[default]
    Unknown,
}

/// One audit log entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(alias = "ts")]
    pub timestamp: DateTime<Utc>,
    pub action: String,
    #[serde(default)]
    pub details: Value,
}

/// Metadata scraped from the page around a marked link
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LinkMetadata {
    pub title: Option<String>,
    pub authors_raw: Option<String>,
    pub year: Option<i32>,
}

/// A marked paper
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaperRecord {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub authors_raw: String,
    #[serde(default, deserialize_with = "lenient_year")]
    pub year: Option<i32>,
    #[serde(default)]
    pub origin: PaperOrigin,
    #[serde(default)]
    pub status: PaperStatus,
    #[serde(default)]
    pub iteration_id: Option<String>,
    #[serde(default)]
    pub criteria_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub visited: bool,
    #[serde(default = "crate::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "crate::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,

    /// Fields written by older versions (e.g. `legacyColor`), kept verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PaperRecord {
    /// Create a paper for a URL; the id is the URL fingerprint
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let now = crate::now();
        Self {
            id: paper_fingerprint(&url),
            title: url.clone(),
            url,
            authors: Vec::new(),
            authors_raw: String::new(),
            year: None,
            origin: PaperOrigin::Unknown,
            status: PaperStatus::Pending,
            iteration_id: None,
            criteria_id: None,
            tags: Vec::new(),
            visited: false,
            created_at: now,
            updated_at: now,
            history: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Append an audit entry, bump `updated_at` and evict the oldest entries
    /// beyond [`HISTORY_CAP`].
    pub fn record(&mut self, action: impl Into<String>, details: Value) {
        let now = crate::now();
        self.history.push(HistoryEntry {
            timestamp: now,
            action: action.into(),
            details,
        });
        self.touch_at(now);
        self.trim_history();
    }

    /// Set `updated_at`, never letting it fall behind `created_at`
    pub fn touch_at(&mut self, at: DateTime<Utc>) {
        self.updated_at = at.max(self.created_at);
    }

    /// Drop the oldest entries until the history fits the cap
    pub fn trim_history(&mut self) {
        if self.history.len() > HISTORY_CAP {
            let excess = self.history.len() - HISTORY_CAP;
            self.history.drain(..excess);
        }
    }

    /// Repair timestamps and history of records read from storage
    pub fn normalize(&mut self) {
        if self.updated_at < self.created_at {
            self.updated_at = self.created_at;
        }
        self.trim_history();
    }

    /// First-time mark of a link under a highlight category
    pub fn from_mark(
        url: &str,
        category: &str,
        iteration_id: &str,
        meta: &LinkMetadata,
    ) -> Self {
        let mut paper = PaperRecord::new(canonical_url(url));
        paper.apply_mark(category, iteration_id, meta, "new");
        paper
    }

    /// Re-mark an existing paper under a (possibly different) category
    pub fn mark(&mut self, category: &str, iteration_id: &str, meta: &LinkMetadata) {
        let prev = self.status.to_string();
        self.apply_mark(category, iteration_id, meta, &prev);
    }

    fn apply_mark(
        &mut self,
        category: &str,
        iteration_id: &str,
        meta: &LinkMetadata,
        prev_status: &str,
    ) {
        let (origin, status) = infer_from_category(category);
        self.title = meta.title.clone().unwrap_or_else(|| self.url.clone());
        self.authors_raw = meta.authors_raw.clone().unwrap_or_default();
        self.year = meta.year;
        self.origin = origin;
        self.status = status;
        self.iteration_id = Some(iteration_id.to_string());
        self.tags = vec![category.to_string()];
        self.visited = true;
        self.record(
            "mark",
            json!({
                "category": category,
                "origin": origin,
                "status": status,
                "prevStatus": prev_status,
            }),
        );
    }

    /// Remove the highlight but keep the paper for the audit trail
    pub fn unmark(&mut self) {
        self.visited = false;
        self.record("unmark", json!({ "visited": false }));
    }
}

/// Accept `2021`, `"2021"`, `""` and `null` for the year
fn lenient_year<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}
