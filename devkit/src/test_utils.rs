/*!
Harness de test pour les fetchers Symbion

- Répertoire temporaire isolé par test (caches, sections persistées, walks)
- Caches fichier et contextes SNMP pointant dans ce répertoire
- `StubFileCache` : cache en mémoire qui note lectures et écritures
*/

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use symbion_fetchers::cache::{CacheError, CacheKind, FileCache, MaxAge, RawDataCache};
use symbion_fetchers::fetchers::SnmpContext;
use symbion_fetchers::snmp::SnmpPluginStore;
use symbion_fetchers::{HostName, Mode, RawData};
use tempfile::TempDir;

/// Harness de test : tout ce qu'un fetcher écrit reste dans `dir`
pub struct TestHarness {
    dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        env_logger::try_init().ok();
        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => panic!("cannot create test directory: {e}"),
        };
        log::debug!("🧪 Test directory {}", dir.path().display());
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Cache agent avec un âge maximal commun à tous les modes
    pub fn agent_cache(&self, host: &str, max_age: MaxAge) -> FileCache {
        self.file_cache(CacheKind::Agent, host, max_age)
    }

    pub fn snmp_cache(&self, host: &str, max_age: MaxAge) -> FileCache {
        self.file_cache(CacheKind::Snmp, host, max_age)
    }

    fn file_cache(&self, kind: CacheKind, host: &str, max_age: MaxAge) -> FileCache {
        let subdir = match kind {
            CacheKind::Agent => "tcp",
            CacheKind::Snmp => "snmp",
            CacheKind::NoCache => "none",
        };
        let template = self.dir.path().join("cache/{mode}").join(subdir).join("{hostname}");
        FileCache::new(kind, HostName::new(host), template.to_string_lossy().into_owned()).with_max_age(max_age)
    }

    pub fn snmp_context(&self, plugin_store: SnmpPluginStore) -> SnmpContext {
        SnmpContext {
            plugin_store: Arc::new(plugin_store),
            use_stored_walks: false,
            walk_cache_dir: self.dir.path().join("snmp_walk_cache"),
            stored_walk_dir: self.dir.path().join("snmpwalks"),
        }
    }

    pub fn section_store_path(&self, host: &str) -> PathBuf {
        self.dir.path().join("persisted_sections").join(host)
    }

    /// Écrit un fichier relatif au répertoire de test
    pub fn write_file(&self, relative: &str, content: &[u8]) -> PathBuf {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        if let Err(e) = std::fs::write(&path, content) {
            panic!("cannot write {}: {e}", path.display());
        }
        path
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache en mémoire pour observer `get_raw_data`
#[derive(Default)]
pub struct StubFileCache {
    entries: Mutex<HashMap<Mode, RawData>>,
    pub simulation: bool,
    pub use_only_cache: bool,
    reads: Mutex<Vec<Mode>>,
    writes: Mutex<Vec<Mode>>,
}

impl StubFileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(self, mode: Mode, raw_data: RawData) -> Self {
        self.entries.lock().insert(mode, raw_data);
        self
    }

    pub fn simulating(mut self) -> Self {
        self.simulation = true;
        self
    }

    pub fn only_cache(mut self) -> Self {
        self.use_only_cache = true;
        self
    }

    pub fn entry(&self, mode: Mode) -> Option<RawData> {
        self.entries.lock().get(&mode).cloned()
    }

    pub fn reads(&self) -> Vec<Mode> {
        self.reads.lock().clone()
    }

    pub fn writes(&self) -> Vec<Mode> {
        self.writes.lock().clone()
    }
}

impl RawDataCache for StubFileCache {
    fn read(&self, mode: Mode) -> Result<Option<RawData>, CacheError> {
        self.reads.lock().push(mode);
        Ok(self.entry(mode))
    }

    fn write(&self, raw_data: &RawData, mode: Mode) -> Result<(), CacheError> {
        self.writes.lock().push(mode);
        self.entries.lock().insert(mode, raw_data.clone());
        Ok(())
    }

    fn simulation(&self) -> bool {
        self.simulation
    }

    fn use_only_cache(&self) -> bool {
        self.use_only_cache
    }
}
