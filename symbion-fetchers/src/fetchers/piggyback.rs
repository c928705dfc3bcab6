//! Piggyback fetcher
//!
//! Other hosts' agents may deliver data on behalf of this host. Those
//! payloads are stored as `<piggyback_dir>/<hostname>/<source host>`. A
//! payload is used when it is young enough and its source has not
//! reported since (the source status file would then be newer).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::debug;

use super::RawFetcher;
use crate::error::FetchFailure;
use crate::mode::Mode;
use crate::types::{HostName, RawData};

pub const DEFAULT_MAX_CACHE_AGE: Duration = Duration::from_secs(3600);

/// Max age of piggyback files, globally or for one source host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiggybackTimeSetting {
    pub source: Option<HostName>,
    pub max_cache_age: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiggybackParams {
    pub hostname: HostName,
    pub address: Option<String>,
    pub time_settings: Vec<PiggybackTimeSetting>,
    pub piggyback_dir: PathBuf,
    pub source_status_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PiggybackSource {
    source: String,
    payload: Vec<u8>,
}

pub struct PiggybackFetcher {
    params: PiggybackParams,
    sources: Vec<PiggybackSource>,
}

impl PiggybackFetcher {
    pub fn new(params: PiggybackParams) -> Self {
        Self { params, sources: Vec::new() }
    }

    pub fn params(&self) -> &PiggybackParams {
        &self.params
    }

    fn max_cache_age(&self, source: &str) -> Duration {
        let specific = self
            .params
            .time_settings
            .iter()
            .find(|s| s.source.as_ref().is_some_and(|h| h.as_str() == source));
        let global = self.params.time_settings.iter().find(|s| s.source.is_none());
        specific
            .or(global)
            .map(|s| s.max_cache_age)
            .unwrap_or(DEFAULT_MAX_CACHE_AGE)
    }

    fn is_outdated(&self, source: &str, file_mtime: SystemTime) -> bool {
        fs::metadata(self.params.source_status_dir.join(source))
            .and_then(|m| m.modified())
            .map(|status_mtime| status_mtime > file_mtime)
            .unwrap_or(false)
    }

    fn read_dir(&self, dir: &Path) -> Result<Vec<PiggybackSource>, FetchFailure> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(FetchFailure::transport(format!("Cannot read {}: {}", dir.display(), e))),
        };

        let mut sources = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| FetchFailure::transport(format!("Cannot read {}: {}", dir.display(), e)))?;
            let source = entry.file_name().to_string_lossy().into_owned();
            // half-written files
            if source.starts_with('.') {
                continue;
            }
            let path = entry.path();
            let Ok(mtime) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            let age = mtime.elapsed().unwrap_or(Duration::ZERO);
            let max_age = self.max_cache_age(&source);
            if age > max_age {
                debug!("Piggyback file {} is too old ({:?} > {:?})", path.display(), age, max_age);
                continue;
            }
            if self.is_outdated(&source, mtime) {
                debug!("Piggyback file {} is outdated by its source status", path.display());
                continue;
            }
            let payload = fs::read(&path).map_err(|e| FetchFailure::transport(format!("Cannot read {}: {}", path.display(), e)))?;
            sources.push(PiggybackSource { source, payload });
        }
        sources.sort_by(|a, b| a.source.cmp(&b.source));
        Ok(sources)
    }
}

impl RawFetcher for PiggybackFetcher {
    fn open(&mut self) -> Result<(), FetchFailure> {
        let mut sources = self.read_dir(&self.params.piggyback_dir.join(self.params.hostname.as_str()))?;
        if let Some(address) = &self.params.address {
            sources.extend(self.read_dir(&self.params.piggyback_dir.join(address))?);
        }
        self.sources = sources;
        Ok(())
    }

    fn close(&mut self) {
        self.sources.clear();
    }

    fn fetch_raw(&mut self, _mode: Mode) -> Result<RawData, FetchFailure> {
        let mut output = Vec::new();
        let mut labels = BTreeMap::new();
        for source in &self.sources {
            output.extend_from_slice(&source.payload);
            if !source.payload.ends_with(b"\n") && !source.payload.is_empty() {
                output.push(b'\n');
            }
            labels.insert(format!("cmk/piggyback_source_{}", source.source), "yes");
        }
        if !labels.is_empty() {
            let labels = serde_json::to_string(&labels)
                .map_err(|e| FetchFailure::transport(format!("Cannot encode piggyback labels: {e}")))?;
            output.extend_from_slice(b"<<<labels:sep(0)>>>\n");
            output.extend_from_slice(labels.as_bytes());
            output.push(b'\n');
        }
        Ok(RawData::Agent(output))
    }
}

impl fmt::Display for PiggybackFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PiggybackFetcher(host={})", self.params.hostname)
    }
}
