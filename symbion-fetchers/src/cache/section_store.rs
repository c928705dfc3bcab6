//! Persisted sections with a validity window
//!
//! Sections fetched less often than the check interval are stored together
//! with the time they were fetched and the time until which they stay valid.
//! A corrupted store is treated as empty; it is rewritten on the next update.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{write_atomic, CacheError};
use crate::types::SectionName;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSection<T> {
    pub fetched_at: i64,
    pub valid_until: i64,
    pub payload: T,
}

impl<T> PersistedSection<T> {
    pub fn covers(&self, now: i64) -> bool {
        self.fetched_at <= now && now <= self.valid_until
    }
}

pub type PersistedSections<T> = BTreeMap<SectionName, PersistedSection<T>>;

/// JSON file holding [`PersistedSection`]s of one host.
#[derive(Debug, Clone)]
pub struct SectionStore<T> {
    path: PathBuf,
    _payload: PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned> SectionStore<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _payload: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> PersistedSections<T> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(e) => {
                warn!("Cannot read persisted sections {}: {}", self.path.display(), e);
                return BTreeMap::new();
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(sections) => sections,
            Err(e) => {
                warn!("Ignoring corrupted persisted sections {}: {}", self.path.display(), e);
                BTreeMap::new()
            }
        }
    }

    pub fn store(&self, sections: &PersistedSections<T>) -> Result<(), CacheError> {
        let encoded = serde_json::to_vec(sections).map_err(|source| CacheError::Encode {
            path: self.path.clone(),
            source,
        })?;
        debug!("Storing {} persisted sections in {}", sections.len(), self.path.display());
        write_atomic(&self.path, &encoded)
    }

    /// Merges `fresh` into the stored sections, dropping expired ones.
    pub fn update(&self, fresh: PersistedSections<T>, now: i64) -> Result<(), CacheError> {
        let mut sections = self.load();
        sections.retain(|_, section| section.valid_until >= now);
        sections.extend(fresh);
        self.store(&sections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_inclusive() {
        let section = PersistedSection { fetched_at: 100, valid_until: 200, payload: () };
        assert!(!section.covers(99));
        assert!(section.covers(100));
        assert!(section.covers(200));
        assert!(!section.covers(201));
    }

    #[test]
    fn update_merges_and_drops_expired() {
        let dir = tempfile::tempdir().unwrap();
        let store: SectionStore<Vec<String>> = SectionStore::new(dir.path().join("host"));
        let mut first = BTreeMap::new();
        first.insert(SectionName::new("old"), PersistedSection { fetched_at: 0, valid_until: 10, payload: vec!["a".into()] });
        first.insert(SectionName::new("kept"), PersistedSection { fetched_at: 0, valid_until: 100, payload: vec!["b".into()] });
        store.store(&first).unwrap();

        let mut fresh = BTreeMap::new();
        fresh.insert(SectionName::new("new"), PersistedSection { fetched_at: 50, valid_until: 150, payload: vec!["c".into()] });
        store.update(fresh, 50).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.keys().map(|k| k.as_str()).collect::<Vec<_>>(), vec!["kept", "new"]);
    }

    #[test]
    fn corrupted_store_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host");
        fs::write(&path, b"{not json").unwrap();
        let store: SectionStore<Vec<String>> = SectionStore::new(path);
        assert!(store.load().is_empty());
    }
}
