//! Local caching of fetched data
//!
//! - [`file_cache`]: per-host, per-mode raw data cache in front of every fetcher
//! - [`section_store`]: persisted SNMP sections with an explicit validity window

pub mod file_cache;
pub mod section_store;

pub use file_cache::{CacheKind, FileCache, FileCacheMode, MaxAge, RawDataCache};
pub use section_store::{PersistedSection, SectionStore};

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error on {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("Cannot decode cache file {}: {source}", .path.display())]
    Decode { path: PathBuf, source: serde_json::Error },
    #[error("Cannot encode data for {}: {source}", .path.display())]
    Encode { path: PathBuf, source: serde_json::Error },
    #[error("{kind:?} cache cannot store {found} data")]
    KindMismatch { kind: CacheKind, found: &'static str },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CacheError::Io { path: path.into(), source }
    }
}

/// Writes `data` next to `path` then renames it into place.
pub(crate) fn write_atomic(path: &std::path::Path, data: &[u8]) -> Result<(), CacheError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".new.{}", std::process::id()));
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, data).map_err(|e| CacheError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| CacheError::io(path, e))
}
