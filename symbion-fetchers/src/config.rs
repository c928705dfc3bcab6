use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::cache::{CacheKind, FileCache, FileCacheMode, MaxAge};
use crate::fetchers::tcp::{KeepAlive, TcpParams, TlsClientSettings};
use crate::fetchers::SnmpContext;
use crate::snmp::SnmpPluginStore;
use crate::types::HostName;
use crate::worker::WorkerPool;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct FetchersConfig {
    pub cache_dir: PathBuf,
    /// Relative to `cache_dir`; `{mode}` and `{hostname}` are expanded.
    pub agent_cache_template: String,
    pub snmp_cache_template: String,
    pub section_store_dir: PathBuf,
    pub walk_cache_dir: PathBuf,
    pub stored_walk_dir: PathBuf,
    pub piggyback_dir: PathBuf,
    pub piggyback_source_status_dir: PathBuf,
    pub max_age: MaxAgeConf,
    pub file_cache_mode: FileCacheMode,
    pub tcp: TcpConf,
    pub tls: Option<TlsClientSettings>,
    pub worker: WorkerConf,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct MaxAgeConf {
    pub checking: u64,
    pub discovery: u64,
    pub inventory: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct TcpConf {
    pub connect_timeout_secs: f64,
    pub keepalive: KeepAliveConf,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct KeepAliveConf {
    pub idle_secs: u64,
    pub interval_secs: u64,
    pub count: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WorkerConf {
    pub binary: PathBuf,
    pub timeout_secs: u64,
    pub max_parallel: usize,
}

impl Default for FetchersConfig {
    fn default() -> Self {
        Self {
            cache_dir: "var/symbion/cache".into(),
            agent_cache_template: "{mode}/tcp/{hostname}".into(),
            snmp_cache_template: "{mode}/snmp/{hostname}".into(),
            section_store_dir: "var/symbion/persisted_sections".into(),
            walk_cache_dir: "var/symbion/snmp_walk_cache".into(),
            stored_walk_dir: "var/symbion/snmpwalks".into(),
            piggyback_dir: "tmp/symbion/piggyback".into(),
            piggyback_source_status_dir: "tmp/symbion/piggyback_sources".into(),
            max_age: MaxAgeConf::default(),
            file_cache_mode: FileCacheMode::READ_WRITE,
            tcp: TcpConf::default(),
            tls: None,
            worker: WorkerConf::default(),
        }
    }
}

impl Default for MaxAgeConf {
    fn default() -> Self {
        Self { checking: 0, discovery: 120, inventory: 120 }
    }
}

impl Default for TcpConf {
    fn default() -> Self {
        Self { connect_timeout_secs: 5.0, keepalive: KeepAliveConf::default() }
    }
}

impl Default for KeepAliveConf {
    fn default() -> Self {
        let keepalive = KeepAlive::default();
        Self {
            idle_secs: keepalive.idle.as_secs(),
            interval_secs: keepalive.interval.as_secs(),
            count: keepalive.count,
        }
    }
}

impl Default for WorkerConf {
    fn default() -> Self {
        Self { binary: "symbion-fetch-worker".into(), timeout_secs: 300, max_parallel: 16 }
    }
}

impl FetchersConfig {
    pub fn max_age(&self) -> MaxAge {
        MaxAge::new(
            Duration::from_secs(self.max_age.checking),
            Duration::from_secs(self.max_age.discovery),
            Duration::from_secs(self.max_age.inventory),
        )
    }

    pub fn keepalive(&self) -> KeepAlive {
        KeepAlive {
            idle: Duration::from_secs(self.tcp.keepalive.idle_secs),
            interval: Duration::from_secs(self.tcp.keepalive.interval_secs),
            count: self.tcp.keepalive.count,
        }
    }

    fn file_cache(&self, kind: CacheKind, hostname: HostName, template: &str) -> FileCache {
        let template = self.cache_dir.join(template).to_string_lossy().into_owned();
        FileCache::new(kind, hostname, template)
            .with_max_age(self.max_age())
            .with_mode(self.file_cache_mode)
    }

    pub fn agent_file_cache(&self, hostname: HostName) -> FileCache {
        self.file_cache(CacheKind::Agent, hostname, &self.agent_cache_template)
    }

    pub fn snmp_file_cache(&self, hostname: HostName) -> FileCache {
        self.file_cache(CacheKind::Snmp, hostname, &self.snmp_cache_template)
    }

    pub fn section_store_path(&self, hostname: &HostName) -> PathBuf {
        self.section_store_dir.join(hostname.as_str())
    }

    pub fn snmp_context(&self, plugin_store: Arc<SnmpPluginStore>) -> SnmpContext {
        SnmpContext {
            plugin_store,
            use_stored_walks: false,
            walk_cache_dir: self.walk_cache_dir.clone(),
            stored_walk_dir: self.stored_walk_dir.clone(),
        }
    }

    /// TCP parameters with the site-wide timeout, keepalive and TLS settings.
    pub fn tcp_params(&self, host_name: HostName, address: impl Into<String>) -> TcpParams {
        let mut params = TcpParams::new(host_name, address, Duration::from_secs_f64(self.tcp.connect_timeout_secs.max(0.0)));
        params.keepalive = self.keepalive();
        params.tls = self.tls.clone();
        params
    }

    pub fn worker_pool(&self) -> WorkerPool {
        WorkerPool::new(
            self.worker.binary.clone(),
            Duration::from_secs(self.worker.timeout_secs),
            self.worker.max_parallel,
        )
    }
}

pub fn load_config() -> FetchersConfig {
    let path = std::env::var("SYMBION_FETCHERS_CONFIG").unwrap_or_else(|_| "fetchers.yaml".into());
    load_config_from(Path::new(&path))
}

pub fn load_config_from(path: &Path) -> FetchersConfig {
    if !path.exists() {
        warn!("No {}, using default fetcher configuration", path.display());
        return FetchersConfig::default();
    }
    let txt = std::fs::read_to_string(path).unwrap_or_default();
    if txt.trim().is_empty() {
        return FetchersConfig::default();
    }
    serde_yaml::from_str(&txt).unwrap_or_else(|e| {
        warn!("Invalid fetcher configuration {}: {}", path.display(), e);
        FetchersConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fetchers.yaml");
        std::fs::write(
            &path,
            "cache_dir: /srv/cache\nmax_age:\n  checking: 60\ntcp:\n  keepalive:\n    idle_secs: 30\nworker:\n  max_parallel: 4\n",
        )
        .unwrap();
        let config = load_config_from(&path);
        assert_eq!(config.cache_dir, PathBuf::from("/srv/cache"));
        assert_eq!(config.max_age().checking, Duration::from_secs(60));
        assert_eq!(config.max_age().discovery, Duration::from_secs(120));
        assert_eq!(config.keepalive().idle, Duration::from_secs(30));
        assert_eq!(config.keepalive().count, 3);
        assert_eq!(config.worker.max_parallel, 4);
        assert_eq!(config.worker.timeout_secs, 300);
    }

    #[test]
    fn invalid_or_missing_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fetchers.yaml");
        assert_eq!(load_config_from(&path), FetchersConfig::default());
        std::fs::write(&path, "tcp: [not, a, map]\n").unwrap();
        assert_eq!(load_config_from(&path), FetchersConfig::default());
    }

    #[test]
    fn caches_expand_under_cache_dir() {
        let mut config = FetchersConfig::default();
        config.cache_dir = "/srv/cache".into();
        let cache = config.agent_file_cache(HostName::new("heute"));
        assert_eq!(
            cache.make_path(crate::Mode::Checking),
            PathBuf::from("/srv/cache/checking/tcp/heute")
        );
        assert_eq!(cache.file_cache_mode, FileCacheMode::READ_WRITE);
    }
}
