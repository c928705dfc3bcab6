//! Reuse of SNMP walk results
//!
//! Walks of columns flagged `save_to_cache` are kept in one JSON file per
//! host and reused in checking mode. Other modes start from a cleared cache.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::backend::WalkRows;
use super::tree::BackendSnmpTree;
use super::SnmpError;
use crate::types::HostName;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CachedWalk {
    save_to_cache: bool,
    rows: WalkRows,
}

#[derive(Debug, Clone)]
pub struct WalkCache {
    path: Option<PathBuf>,
    walks: BTreeMap<String, CachedWalk>,
}

impl WalkCache {
    pub fn new(dir: &Path, hostname: &HostName) -> Self {
        Self {
            path: Some(dir.join(format!("{}.json", hostname.as_str()))),
            walks: BTreeMap::new(),
        }
    }

    /// Never touches the filesystem.
    pub fn in_memory() -> Self {
        Self { path: None, walks: BTreeMap::new() }
    }

    /// Loads stored walks, keeping only OIDs still flagged for caching in `trees`.
    pub fn load<'a>(&mut self, trees: impl IntoIterator<Item = &'a BackendSnmpTree>) {
        let Some(path) = &self.path else { return };
        let wanted: BTreeSet<String> = trees
            .into_iter()
            .flat_map(|tree| tree.fetch_oids().filter(|(_, spec)| spec.save_to_cache).map(|(oid, _)| oid).collect::<Vec<_>>())
            .collect();

        let stored: BTreeMap<String, CachedWalk> = match fs::read(path) {
            Ok(raw) => match serde_json::from_slice(&raw) {
                Ok(stored) => stored,
                Err(e) => {
                    warn!("Ignoring corrupted walk cache {}: {}", path.display(), e);
                    return;
                }
            },
            Err(_) => return,
        };
        for (oid, walk) in stored {
            if wanted.contains(&oid) {
                debug!("Using cached walk of {}", oid);
                self.walks.insert(oid, walk);
            }
        }
    }

    /// Forgets everything, on disk as well.
    pub fn clear(&mut self) {
        self.walks.clear();
        if let Some(path) = &self.path {
            match fs::remove_file(path) {
                Ok(()) => debug!("Cleared walk cache {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Cannot clear walk cache {}: {}", path.display(), e),
            }
        }
    }

    pub fn get(&self, oid: &str) -> Option<&WalkRows> {
        self.walks.get(oid).map(|walk| &walk.rows)
    }

    pub fn insert(&mut self, oid: String, save_to_cache: bool, rows: WalkRows) {
        self.walks.insert(oid, CachedWalk { save_to_cache, rows });
    }

    pub fn contains(&self, oid: &str) -> bool {
        self.walks.contains_key(oid)
    }

    /// Persists the walks flagged for caching.
    pub fn save(&self) -> Result<(), SnmpError> {
        let Some(path) = &self.path else { return Ok(()) };
        let to_save: BTreeMap<&String, &CachedWalk> = self.walks.iter().filter(|(_, walk)| walk.save_to_cache).collect();
        if to_save.is_empty() {
            return Ok(());
        }
        let encoded = serde_json::to_vec(&to_save).map_err(|e| SnmpError::WalkCache(e.to_string()))?;
        crate::cache::write_atomic(path, &encoded).map_err(|e| SnmpError::WalkCache(e.to_string()))
    }
}
