//! Per-host file cache of raw fetcher data
//!
//! Each mode gets its own file, derived from a path template containing
//! `{mode}` and `{hostname}`. Whether the cache may be read or written is
//! controlled by [`FileCacheMode`]; how old an entry may be by [`MaxAge`].

use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::BitOr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use super::{write_atomic, CacheError};
use crate::mode::Mode;
use crate::types::{HostName, RawData};

/// Read and write permission bits of a file cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileCacheMode(u8);

impl FileCacheMode {
    pub const DISABLED: FileCacheMode = FileCacheMode(0);
    pub const READ: FileCacheMode = FileCacheMode(1);
    pub const WRITE: FileCacheMode = FileCacheMode(2);
    pub const READ_WRITE: FileCacheMode = FileCacheMode(3);

    pub fn contains(self, other: FileCacheMode) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for FileCacheMode {
    type Output = FileCacheMode;

    fn bitor(self, rhs: Self) -> Self::Output {
        FileCacheMode(self.0 | rhs.0)
    }
}

impl Default for FileCacheMode {
    fn default() -> Self {
        FileCacheMode::READ_WRITE
    }
}

/// Maximum usable age of a cache entry, by mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaxAge {
    pub checking: Duration,
    pub discovery: Duration,
    pub inventory: Duration,
}

impl MaxAge {
    pub fn new(checking: Duration, discovery: Duration, inventory: Duration) -> Self {
        Self { checking, discovery, inventory }
    }

    /// Never serve from cache.
    pub fn zero() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, Duration::ZERO)
    }

    /// Any entry is fresh enough.
    pub fn unlimited() -> Self {
        Self::new(Duration::MAX, Duration::MAX, Duration::MAX)
    }

    pub fn get(&self, mode: Mode) -> Duration {
        match mode {
            Mode::Discovery => self.discovery,
            Mode::Inventory => self.inventory,
            _ => self.checking,
        }
    }
}

/// Shape of the data a cache holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    /// Raw agent bytes, stored as-is.
    Agent,
    /// SNMP sections, stored as JSON.
    Snmp,
    /// Never reads, never writes.
    NoCache,
}

/// Cache consulted by [`crate::get_raw_data`] around every fetch.
pub trait RawDataCache {
    /// `Ok(None)` is a miss: disabled, absent or too old.
    fn read(&self, mode: Mode) -> Result<Option<RawData>, CacheError>;
    fn write(&self, raw_data: &RawData, mode: Mode) -> Result<(), CacheError>;
    /// Only cached data may be used; a miss is a failure.
    fn simulation(&self) -> bool;
    fn use_only_cache(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileCache {
    pub kind: CacheKind,
    pub hostname: HostName,
    pub path_template: String,
    pub max_age: MaxAge,
    pub simulation: bool,
    pub use_only_cache: bool,
    pub file_cache_mode: FileCacheMode,
    /// Existing entries are evicted on read.
    #[serde(default)]
    pub force_refresh: bool,
}

impl FileCache {
    pub fn new(kind: CacheKind, hostname: HostName, path_template: impl Into<String>) -> Self {
        Self {
            kind,
            hostname,
            path_template: path_template.into(),
            max_age: MaxAge::zero(),
            simulation: false,
            use_only_cache: false,
            file_cache_mode: FileCacheMode::READ_WRITE,
            force_refresh: false,
        }
    }

    pub fn no_cache(hostname: HostName) -> Self {
        let mut cache = Self::new(CacheKind::NoCache, hostname, String::new());
        cache.file_cache_mode = FileCacheMode::DISABLED;
        cache
    }

    pub fn with_max_age(mut self, max_age: MaxAge) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_mode(mut self, file_cache_mode: FileCacheMode) -> Self {
        self.file_cache_mode = file_cache_mode;
        self
    }

    pub fn with_simulation(mut self, simulation: bool) -> Self {
        self.simulation = simulation;
        self
    }

    pub fn with_use_only_cache(mut self, use_only_cache: bool) -> Self {
        self.use_only_cache = use_only_cache;
        self
    }

    /// Evicts existing entries when read; new data is still written back.
    pub fn force_refresh(mut self) -> Self {
        self.max_age = MaxAge::zero();
        self.use_only_cache = false;
        self.force_refresh = true;
        self
    }

    pub fn make_path(&self, mode: Mode) -> PathBuf {
        PathBuf::from(
            self.path_template
                .replace("{mode}", mode.as_str())
                .replace("{hostname}", self.hostname.as_str()),
        )
    }

    /// Drops the entry for `mode`, if any.
    pub fn invalidate(&self, mode: Mode) -> Result<(), CacheError> {
        if self.kind == CacheKind::NoCache {
            return Ok(());
        }
        let path = self.make_path(mode);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed cache file {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    fn may_use_outdated(&self) -> bool {
        self.simulation || self.use_only_cache
    }

    fn decode(&self, path: PathBuf, raw: Vec<u8>) -> Result<RawData, CacheError> {
        match self.kind {
            CacheKind::Agent => Ok(RawData::Agent(raw)),
            _ => serde_json::from_slice(&raw)
                .map(RawData::Snmp)
                .map_err(|source| CacheError::Decode { path, source }),
        }
    }

    fn encode(&self, raw_data: &RawData, path: &PathBuf) -> Result<Vec<u8>, CacheError> {
        match (self.kind, raw_data) {
            (CacheKind::Agent, RawData::Agent(data)) => Ok(data.clone()),
            (CacheKind::Snmp, RawData::Snmp(sections)) => serde_json::to_vec(sections)
                .map_err(|source| CacheError::Encode { path: path.clone(), source }),
            (kind, RawData::Agent(_)) => Err(CacheError::KindMismatch { kind, found: "agent" }),
            (kind, RawData::Snmp(_)) => Err(CacheError::KindMismatch { kind, found: "snmp" }),
        }
    }
}

impl RawDataCache for FileCache {
    fn read(&self, mode: Mode) -> Result<Option<RawData>, CacheError> {
        if self.force_refresh {
            debug!("Not using cache for {} (force refresh)", self.hostname);
            self.invalidate(mode)?;
            return Ok(None);
        }
        if self.kind == CacheKind::NoCache || !self.file_cache_mode.contains(FileCacheMode::READ) {
            debug!("Not using cache for {} (read disabled)", self.hostname);
            return Ok(None);
        }

        let path = self.make_path(mode);
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Not using cache (does not exist): {}", path.display());
                return Ok(None);
            }
            Err(e) => return Err(CacheError::io(path, e)),
        };

        if !self.may_use_outdated() {
            let max_age = self.max_age.get(mode);
            let age = metadata
                .modified()
                .ok()
                .and_then(|mtime| mtime.elapsed().ok())
                .unwrap_or(Duration::ZERO);
            if max_age.is_zero() || age > max_age {
                debug!(
                    "Not using cache (too old, age {}, max {}): {}",
                    humantime::format_duration(Duration::from_secs(age.as_secs())),
                    humantime::format_duration(Duration::from_secs(max_age.as_secs())),
                    path.display()
                );
                return Ok(None);
            }
        }

        let raw = fs::read(&path).map_err(|e| CacheError::io(&path, e))?;
        if raw.is_empty() {
            debug!("Not using cache (empty): {}", path.display());
            return Ok(None);
        }
        debug!("Using data from cache file {}", path.display());
        self.decode(path, raw).map(Some)
    }

    fn write(&self, raw_data: &RawData, mode: Mode) -> Result<(), CacheError> {
        if self.kind == CacheKind::NoCache || !self.file_cache_mode.contains(FileCacheMode::WRITE) {
            debug!("Not writing data to cache file for {} (write disabled)", self.hostname);
            return Ok(());
        }
        let path = self.make_path(mode);
        let encoded = self.encode(raw_data, &path)?;
        debug!("Write data to cache file {}", path.display());
        write_atomic(&path, &encoded)
    }

    fn simulation(&self) -> bool {
        self.simulation
    }

    fn use_only_cache(&self) -> bool {
        self.use_only_cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_cache(dir: &std::path::Path) -> FileCache {
        FileCache::new(
            CacheKind::Agent,
            HostName::new("heute"),
            format!("{}/{{mode}}/{{hostname}}", dir.display()),
        )
        .with_max_age(MaxAge::unlimited())
    }

    #[test]
    fn max_age_selects_by_mode() {
        let max_age = MaxAge::new(Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(3));
        assert_eq!(max_age.get(Mode::Checking), Duration::from_secs(1));
        assert_eq!(max_age.get(Mode::Discovery), Duration::from_secs(2));
        assert_eq!(max_age.get(Mode::Inventory), Duration::from_secs(3));
        assert_eq!(max_age.get(Mode::RealTime), Duration::from_secs(1));
        assert_eq!(max_age.get(Mode::ForceSections), Duration::from_secs(1));
    }

    #[test]
    fn path_template_expands_mode_and_host() {
        let cache = agent_cache(std::path::Path::new("/var/cache"));
        assert_eq!(cache.make_path(Mode::Discovery), PathBuf::from("/var/cache/discovery/heute"));
    }

    #[test]
    fn file_cache_mode_bits() {
        assert!(FileCacheMode::READ_WRITE.contains(FileCacheMode::READ));
        assert!(FileCacheMode::READ_WRITE.contains(FileCacheMode::WRITE));
        assert!(!FileCacheMode::READ.contains(FileCacheMode::WRITE));
        assert_eq!(FileCacheMode::READ | FileCacheMode::WRITE, FileCacheMode::READ_WRITE);
    }

    #[test]
    fn agent_kind_refuses_snmp_data() {
        let dir = tempfile::tempdir().unwrap();
        let cache = agent_cache(dir.path());
        let err = cache.write(&RawData::Snmp(Default::default()), Mode::Checking).unwrap_err();
        assert!(matches!(err, CacheError::KindMismatch { .. }));
    }

    #[test]
    fn invalidate_removes_only_that_mode() {
        let dir = tempfile::tempdir().unwrap();
        let cache = agent_cache(dir.path());
        let data = RawData::Agent(b"<<<check_mk>>>\nVersion: 2.2\n".to_vec());
        cache.write(&data, Mode::Checking).unwrap();
        cache.write(&data, Mode::Discovery).unwrap();
        cache.invalidate(Mode::Checking).unwrap();
        assert_eq!(cache.read(Mode::Checking).unwrap(), None);
        assert_eq!(cache.read(Mode::Discovery).unwrap(), Some(data));
    }

    #[test]
    fn force_refresh_evicts_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let cache = agent_cache(dir.path()).with_simulation(true);
        cache.write(&RawData::Agent(b"<<<check_mk>>>\n".to_vec()), Mode::Checking).unwrap();

        let refreshing = cache.clone().force_refresh();
        assert!(refreshing.force_refresh);
        assert_eq!(refreshing.read(Mode::Checking).unwrap(), None);
        assert!(!cache.make_path(Mode::Checking).exists());
        assert_eq!(cache.read(Mode::Checking).unwrap(), None);
    }

    #[test]
    fn documents_without_force_refresh_decode() {
        let cache = FileCache::new(CacheKind::Agent, HostName::new("heute"), "/tmp/{mode}/{hostname}");
        let mut json = serde_json::to_value(&cache).unwrap();
        json.as_object_mut().unwrap().remove("force_refresh");
        assert_eq!(serde_json::from_value::<FileCache>(json).unwrap(), cache);
    }
}
