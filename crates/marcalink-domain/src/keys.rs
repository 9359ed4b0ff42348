//! Per-project key namespace
//!
//! All per-project data shares one flat key/value space. Keys are qualified as
//! `<base>__<projectId>` so two projects never collide.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Separator between the base name and the project id
pub const KEY_SEPARATOR: &str = "__";

/// Closed set of base names that may be namespaced by project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyBase {
    Project,
    Papers,
    Iterations,
    Citations,
    Criteria,
    Categories,
    HighlightedLinks,
}

impl KeyBase {
    /// Every base, in a stable order
    pub const ALL: [KeyBase; 7] = [
        KeyBase::Project,
        KeyBase::Papers,
        KeyBase::Iterations,
        KeyBase::Citations,
        KeyBase::Criteria,
        KeyBase::Categories,
        KeyBase::HighlightedLinks,
    ];

    /// Wire name of the base
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyBase::Project => "project",
            KeyBase::Papers => "papers",
            KeyBase::Iterations => "iterations",
            KeyBase::Citations => "citations",
            KeyBase::Criteria => "criteria",
            KeyBase::Categories => "categories",
            KeyBase::HighlightedLinks => "highlightedLinks",
        }
    }

    /// Qualify this base with a project id
    pub fn key_for(&self, project_id: &str) -> String {
        namespaced_key(*self, project_id)
    }
}

impl fmt::Display for KeyBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyBase {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KeyBase::ALL
            .iter()
            .copied()
            .find(|base| base.as_str() == s)
            .ok_or_else(|| DomainError::UnknownKeyBase(s.to_string()))
    }
}

/// Build the namespaced key `<base>__<projectId>`
pub fn namespaced_key(base: KeyBase, project_id: &str) -> String {
    format!("{}{}{}", base.as_str(), KEY_SEPARATOR, project_id)
}

/// All namespaced keys tied to a project id
pub fn project_keys(project_id: &str) -> Vec<String> {
    KeyBase::ALL
        .iter()
        .map(|base| namespaced_key(*base, project_id))
        .collect()
}

/// Split a namespaced key back into its base and project id.
///
/// Returns `None` for keys whose base is not part of the namespace or that
/// carry no project id.
pub fn parse_namespaced_key(key: &str) -> Option<(KeyBase, &str)> {
    let (base, project_id) = key.split_once(KEY_SEPARATOR)?;
    if project_id.is_empty() {
        return None;
    }
    let base = base.parse().ok()?;
    Some((base, project_id))
}
