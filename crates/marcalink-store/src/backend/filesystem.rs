//! Directory-tree backend
//!
//! ```text
//! <base>/config.json                   flat key/value blob
//! <base>/archived.json                 names hidden from listings
//! <base>/<project>/project.json
//! <base>/<project>/papers/<id>.json
//! ```
//!
//! I/O is synchronous; project and paper files are small.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use marcalink_domain::{project_keys, validate_paper_id, validate_project_name, ProjectRecord};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{BackendKind, RemoteStoreBackend};
use crate::error::{Result, StoreError};
use crate::local::{read_json, write_json_atomic};
use crate::lock;
use crate::protocol::Items;
use crate::response::StoreResponse;

const CONFIG_FILE: &str = "config.json";
const ARCHIVE_FILE: &str = "archived.json";
const PROJECT_FILE: &str = "project.json";
const PAPERS_DIR: &str = "papers";

/// Validate a name or bail out of the calling method with an error response
macro_rules! valid {
    ($check:expr) => {
        match $check {
            Ok(value) => value,
            Err(e) => return Ok(StoreResponse::error(e.to_string())),
        }
    };
}

/// Backend rooted at a base directory; always active
#[derive(Debug)]
pub struct FilesystemBackend {
    base: PathBuf,
    /// Serializes read-modify-write of the shared JSON files
    write_lock: Mutex<()>,
}

impl FilesystemBackend {
    /// Open the backend, creating the base directory if needed
    pub fn open(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        std::fs::create_dir_all(&base).map_err(|e| StoreError::io(&base, e))?;
        info!("filesystem store at {:?}", base);
        Ok(Self {
            base,
            write_lock: Mutex::new(()),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    fn project_dir(&self, project: &str) -> PathBuf {
        self.base.join(project)
    }

    fn project_file(&self, project: &str) -> PathBuf {
        self.project_dir(project).join(PROJECT_FILE)
    }

    fn paper_file(&self, project: &str, paper_id: &str) -> PathBuf {
        self.project_dir(project)
            .join(PAPERS_DIR)
            .join(format!("{}.json", paper_id))
    }

    fn read_config(&self) -> Result<Items> {
        Ok(match read_json(&self.base.join(CONFIG_FILE))? {
            Some(Value::Object(items)) => items,
            _ => Items::new(),
        })
    }

    fn write_config(&self, config: Items) -> Result<()> {
        write_json_atomic(&self.base.join(CONFIG_FILE), &Value::Object(config))
    }

    /// Drop `keys` from `config.json`; returns how many were present
    fn remove_config_keys(&self, keys: &[String]) -> Result<usize> {
        let _guard = lock(&self.write_lock);
        let mut config = self.read_config()?;
        let before = config.len();
        for key in keys {
            config.shift_remove(key);
        }
        let removed = before - config.len();
        if removed > 0 {
            self.write_config(config)?;
        }
        Ok(removed)
    }

    fn archived(&self) -> Result<BTreeSet<String>> {
        let names = read_json(&self.base.join(ARCHIVE_FILE))?
            .and_then(|value| serde_json::from_value::<BTreeSet<String>>(value).ok())
            .unwrap_or_default();
        Ok(names)
    }

    fn set_archived(&self, name: &str, archived: bool) -> Result<()> {
        let _guard = lock(&self.write_lock);
        let mut names = self.archived()?;
        let changed = if archived {
            names.insert(name.to_string())
        } else {
            names.remove(name)
        };
        if changed {
            write_json_atomic(&self.base.join(ARCHIVE_FILE), &json!(names))?;
        }
        Ok(())
    }

    /// Project names that are archived but still on disk
    pub fn archived_projects(&self) -> Result<Vec<String>> {
        Ok(self.archived()?.into_iter().collect())
    }

    /// Whether a project record exists for `name`
    pub fn project_exists(&self, name: &str) -> bool {
        validate_project_name(name)
            .map(|name| self.project_file(name).is_file())
            .unwrap_or(false)
    }
}

#[async_trait]
impl RemoteStoreBackend for FilesystemBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Filesystem
    }

    fn is_active(&self) -> bool {
        true
    }

    async fn save_project(&self, name: &str, data: Value) -> Result<StoreResponse> {
        let name = valid!(validate_project_name(name));
        write_json_atomic(&self.project_file(name), &data)?;
        self.set_archived(name, false)?;
        debug!(project = name, "project saved");
        Ok(StoreResponse::ok_with_message("Project saved."))
    }

    async fn load_project(&self, name: &str) -> Result<StoreResponse> {
        let name = valid!(validate_project_name(name));
        match read_json(&self.project_file(name))? {
            Some(data) => Ok(StoreResponse::ok_with_data(data)),
            None => Ok(StoreResponse::error("Project not found.")),
        }
    }

    async fn create_project(&self, name: &str) -> Result<StoreResponse> {
        let name = valid!(validate_project_name(name));
        let path = self.project_file(name);
        if path.exists() {
            return Ok(StoreResponse::error(format!(
                "Project '{}' already exists.",
                name
            )));
        }
        std::fs::create_dir_all(self.project_dir(name).join(PAPERS_DIR))
            .map_err(|e| StoreError::io(self.project_dir(name), e))?;
        let record = serde_json::to_value(ProjectRecord::new(name))?;
        write_json_atomic(&path, &record)?;
        self.set_archived(name, false)?;
        info!(project = name, "project created");
        Ok(StoreResponse {
            message: Some("Project created.".to_string()),
            ..StoreResponse::ok_with_data(record)
        })
    }

    async fn delete_project(&self, name: &str) -> Result<StoreResponse> {
        let name = valid!(validate_project_name(name));
        let dir = self.project_dir(name);
        let had_dir = dir.is_dir();
        if had_dir {
            std::fs::remove_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        }
        // Per-project keys in the flat blob belong to the project too
        let removed = self.remove_config_keys(&project_keys(name))?;
        if !had_dir && removed == 0 {
            return Ok(StoreResponse::error("Project not found."));
        }
        self.set_archived(name, false)?;
        info!(project = name, keys = removed, "project deleted");
        Ok(StoreResponse::ok_with_message("Project deleted."))
    }

    async fn archive_project(&self, name: &str) -> Result<StoreResponse> {
        let name = valid!(validate_project_name(name));
        if !self.project_dir(name).is_dir() {
            return Ok(StoreResponse::error("Project not found."));
        }
        self.set_archived(name, true)?;
        info!(project = name, "project archived");
        Ok(StoreResponse::ok_with_message("Project archived."))
    }

    async fn list_projects(&self) -> Result<StoreResponse> {
        let archived = self.archived()?;
        let entries = std::fs::read_dir(&self.base).map_err(|e| StoreError::io(&self.base, e))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.base, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !archived.contains(name) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(StoreResponse::ok_with_data(json!(names)))
    }

    async fn save_paper(
        &self,
        project: &str,
        paper_id: &str,
        data: Value,
    ) -> Result<StoreResponse> {
        let project = valid!(validate_project_name(project));
        let paper_id = valid!(validate_paper_id(paper_id));
        write_json_atomic(&self.paper_file(project, paper_id), &data)?;
        debug!(project, paper = paper_id, "paper saved");
        Ok(StoreResponse::ok_with_message("Paper saved."))
    }

    async fn load_paper(&self, project: &str, paper_id: &str) -> Result<StoreResponse> {
        let project = valid!(validate_project_name(project));
        let paper_id = valid!(validate_paper_id(paper_id));
        match read_json(&self.paper_file(project, paper_id))? {
            Some(data) => Ok(StoreResponse::ok_with_data(data)),
            None => Ok(StoreResponse::error("Paper not found.")),
        }
    }

    async fn delete_paper(&self, project: &str, paper_id: &str) -> Result<StoreResponse> {
        let project = valid!(validate_project_name(project));
        let paper_id = valid!(validate_paper_id(paper_id));
        let path = self.paper_file(project, paper_id);
        if !path.is_file() {
            return Ok(StoreResponse::error("Paper not found."));
        }
        std::fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
        Ok(StoreResponse::ok_with_message("Paper deleted."))
    }

    async fn list_papers(&self, project: &str) -> Result<StoreResponse> {
        let project = valid!(validate_project_name(project));
        let dir = self.project_dir(project).join(PAPERS_DIR);
        if !dir.is_dir() {
            return Ok(StoreResponse::ok_with_data(json!([])));
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))? {
            let path = entry.map_err(|e| StoreError::io(&dir, e))?.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                files.push(path);
            }
        }
        files.sort();

        let mut papers = Vec::with_capacity(files.len());
        for path in files {
            let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let mut paper = Items::new();
            paper.insert("id".to_string(), json!(id));
            if let Some(Value::Object(data)) = read_json(&path)? {
                paper.extend(data);
            }
            papers.push(Value::Object(paper));
        }
        Ok(StoreResponse::ok_with_data(Value::Array(papers)))
    }

    async fn get(&self, keys: &[String]) -> Result<StoreResponse> {
        let config = self.read_config()?;
        if keys.is_empty() {
            return Ok(StoreResponse::ok_with_data(Value::Object(config)));
        }
        let selected: Items = keys
            .iter()
            .filter_map(|key| config.get(key).map(|value| (key.clone(), value.clone())))
            .collect();
        Ok(StoreResponse::ok_with_data(Value::Object(selected)))
    }

    async fn set(&self, items: Items) -> Result<StoreResponse> {
        let _guard = lock(&self.write_lock);
        let mut config = self.read_config()?;
        config.extend(items);
        self.write_config(config)?;
        Ok(StoreResponse::ok_with_message("Data saved."))
    }

    async fn remove(&self, keys: &[String]) -> Result<StoreResponse> {
        self.remove_config_keys(keys)?;
        Ok(StoreResponse::ok_with_message("Data removed."))
    }
}
