//! Whole-project state kept under the namespaced keys
//!
//! A snapshot gathers the seven per-project keys into typed records. Missing
//! or unreadable values fall back to the defaults a fresh project starts
//! with, so callers can always load, modify and save.

use marcalink_domain::{
    canonical_url, namespaced_key, paper_fingerprint, project_keys, IterationRecord, KeyBase,
    LinkMetadata, PaperRecord, ProjectRecord,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::facade::PersistenceFacade;
use crate::protocol::Items;
use crate::response::StoreResponse;

/// Highlight color used when a category has none
pub const DEFAULT_HIGHLIGHT_COLOR: &str = "yellow";

#[derive(Clone, Debug, PartialEq)]
pub struct ProjectSnapshot {
    pub project: ProjectRecord,
    pub papers: Vec<PaperRecord>,
    pub iterations: Vec<IterationRecord>,
    pub citations: Vec<Value>,
    pub criteria: Map<String, Value>,
    /// Category name to highlight color
    pub categories: Map<String, Value>,
    /// Canonical URL to highlight color
    pub highlighted_links: Map<String, Value>,
}

impl ProjectSnapshot {
    /// The state of a project nothing has been stored for yet
    pub fn new(project_id: &str) -> Self {
        Self {
            project: ProjectRecord::new(project_id),
            papers: Vec::new(),
            iterations: vec![IterationRecord::seed()],
            citations: Vec::new(),
            criteria: Map::new(),
            categories: Map::new(),
            highlighted_links: Map::new(),
        }
    }

    /// Build from stored items, normalizing every paper
    pub fn from_items(project_id: &str, items: &Items) -> Self {
        let defaults = Self::new(project_id);
        let key = |base: KeyBase| namespaced_key(base, project_id);

        let papers = match items.get(&key(KeyBase::Papers)) {
            Some(Value::Array(values)) => values
                .iter()
                .filter_map(|value| match serde_json::from_value::<PaperRecord>(value.clone()) {
                    Ok(mut paper) => {
                        paper.normalize();
                        Some(paper)
                    }
                    Err(e) => {
                        warn!(project = project_id, "skipping unreadable paper: {}", e);
                        None
                    }
                })
                .collect(),
            _ => defaults.papers,
        };

        Self {
            project: decode_or(items.get(&key(KeyBase::Project)), defaults.project),
            papers,
            iterations: decode_or(items.get(&key(KeyBase::Iterations)), defaults.iterations),
            citations: decode_or(items.get(&key(KeyBase::Citations)), defaults.citations),
            criteria: decode_or(items.get(&key(KeyBase::Criteria)), defaults.criteria),
            categories: decode_or(items.get(&key(KeyBase::Categories)), defaults.categories),
            highlighted_links: decode_or(
                items.get(&key(KeyBase::HighlightedLinks)),
                defaults.highlighted_links,
            ),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project.id
    }

    /// All seven keys, ready for one `set`
    pub fn to_items(&self) -> Result<Items> {
        let id = self.project_id();
        let mut items = Items::new();
        items.insert(namespaced_key(KeyBase::Project, id), serde_json::to_value(&self.project)?);
        items.insert(namespaced_key(KeyBase::Papers, id), serde_json::to_value(&self.papers)?);
        items.insert(
            namespaced_key(KeyBase::Iterations, id),
            serde_json::to_value(&self.iterations)?,
        );
        items.insert(namespaced_key(KeyBase::Citations, id), json!(self.citations));
        items.insert(namespaced_key(KeyBase::Criteria, id), json!(self.criteria));
        items.insert(namespaced_key(KeyBase::Categories, id), json!(self.categories));
        items.insert(
            namespaced_key(KeyBase::HighlightedLinks, id),
            json!(self.highlighted_links),
        );
        Ok(items)
    }

    pub fn paper(&self, paper_id: &str) -> Option<&PaperRecord> {
        self.papers.iter().find(|paper| paper.id == paper_id)
    }

    fn paper_index(&self, paper_id: &str) -> Option<usize> {
        self.papers.iter().position(|paper| paper.id == paper_id)
    }

    /// Highlight color configured for `category`
    pub fn color_for(&self, category: &str) -> String {
        self.categories
            .get(category)
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_HIGHLIGHT_COLOR)
            .to_string()
    }

    /// Insert a paper or merge it over the stored one with the same id.
    ///
    /// A merge keeps the stored `created_at`, and keeps the stored history
    /// when the incoming paper carries none.
    pub fn upsert_paper(&mut self, mut paper: PaperRecord) {
        let now = marcalink_domain::now();
        match self.paper_index(&paper.id) {
            Some(index) => {
                let existing = &mut self.papers[index];
                paper.created_at = existing.created_at;
                if paper.history.is_empty() {
                    paper.history = std::mem::take(&mut existing.history);
                }
                paper.touch_at(now);
                paper.trim_history();
                *existing = paper;
            }
            None => {
                paper.touch_at(now);
                paper.trim_history();
                self.papers.push(paper);
            }
        }
    }
}

fn decode_or<T: DeserializeOwned>(value: Option<&Value>, default: T) -> T {
    match value {
        None | Some(Value::Null) => default,
        Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|e| {
            warn!("ignoring unreadable stored value: {}", e);
            default
        }),
    }
}

impl PersistenceFacade {
    /// Read every namespaced key of `project_id` into a snapshot
    pub async fn load_snapshot(&self, project_id: &str) -> Result<ProjectSnapshot> {
        let response = self.get(&project_keys(project_id)).await?;
        if !response.is_ok() {
            return Err(StoreError::Protocol(format!(
                "cannot load project {}: {}",
                project_id,
                response.message_or_default()
            )));
        }
        let items = match response.data {
            Some(Value::Object(items)) => items,
            _ => Items::new(),
        };
        Ok(ProjectSnapshot::from_items(project_id, &items))
    }

    /// Write all keys of the snapshot in one `set`
    pub async fn save_snapshot(&self, snapshot: &ProjectSnapshot) -> Result<StoreResponse> {
        self.set(snapshot.to_items()?).await
    }

    /// Insert or merge one paper and store the project's paper list
    pub async fn upsert_paper(
        &self,
        project_id: &str,
        paper: PaperRecord,
    ) -> Result<StoreResponse> {
        let mut snapshot = self.load_snapshot(project_id).await?;
        snapshot.upsert_paper(paper);
        let mut items = Items::new();
        items.insert(
            namespaced_key(KeyBase::Papers, project_id),
            serde_json::to_value(&snapshot.papers)?,
        );
        self.set(items).await
    }

    /// Highlight `url` under `category` and mark its paper in the current
    /// iteration, creating the paper on first mark
    pub async fn mark_link(
        &self,
        project_id: &str,
        url: &str,
        category: &str,
        meta: &LinkMetadata,
    ) -> Result<PaperRecord> {
        let mut snapshot = self.load_snapshot(project_id).await?;
        let url = canonical_url(url);
        let color = snapshot.color_for(category);
        snapshot.highlighted_links.insert(url.clone(), json!(color));

        let iteration = snapshot.project.current_iteration_id.clone();
        let id = paper_fingerprint(&url);
        let paper = match snapshot.paper_index(&id) {
            Some(index) => {
                let paper = &mut snapshot.papers[index];
                paper.mark(category, &iteration, meta);
                paper.clone()
            }
            None => {
                let paper = PaperRecord::from_mark(&url, category, &iteration, meta);
                snapshot.papers.push(paper.clone());
                paper
            }
        };
        debug!(project = project_id, paper = %paper.id, category, "link marked");

        let mut items = Items::new();
        items.insert(
            namespaced_key(KeyBase::Project, project_id),
            serde_json::to_value(&snapshot.project)?,
        );
        items.insert(
            namespaced_key(KeyBase::Papers, project_id),
            serde_json::to_value(&snapshot.papers)?,
        );
        items.insert(
            namespaced_key(KeyBase::HighlightedLinks, project_id),
            json!(snapshot.highlighted_links),
        );
        self.ensure_written(self.set(items).await?)?;
        Ok(paper)
    }

    /// Remove the highlight of `url`; its paper stays, marked not visited
    pub async fn unmark_link(&self, project_id: &str, url: &str) -> Result<Option<PaperRecord>> {
        let mut snapshot = self.load_snapshot(project_id).await?;
        let canonical = canonical_url(url);
        snapshot.highlighted_links.shift_remove(url);
        snapshot.highlighted_links.shift_remove(&canonical);

        let id = paper_fingerprint(&canonical);
        let paper = snapshot.paper_index(&id).map(|index| {
            let paper = &mut snapshot.papers[index];
            paper.unmark();
            paper.clone()
        });

        let mut items = Items::new();
        items.insert(
            namespaced_key(KeyBase::HighlightedLinks, project_id),
            json!(snapshot.highlighted_links),
        );
        if paper.is_some() {
            items.insert(
                namespaced_key(KeyBase::Papers, project_id),
                serde_json::to_value(&snapshot.papers)?,
            );
        }
        self.ensure_written(self.set(items).await?)?;
        Ok(paper)
    }

    fn ensure_written(&self, response: StoreResponse) -> Result<()> {
        if response.is_ok() {
            Ok(())
        } else {
            Err(StoreError::Protocol(response.message_or_default().to_string()))
        }
    }
}
