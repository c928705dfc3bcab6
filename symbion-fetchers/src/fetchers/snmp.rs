//! SNMP fetcher
//!
//! Which sections to fetch depends on the mode:
//! - checking: configured checking sections are taken as-is, except those
//!   flagged for re-detection (and, with status data inventory, the inventory
//!   sections) which must pass detection first
//! - discovery / inventory: every known / inventory section is detected
//! - force sections: all checking sections, no detection
//!
//! Disabled sections are never detected. Sections are fetched CPU-related
//! first so that CPU utilization is measured before the walks load the device.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::RawFetcher;
use crate::cache::{PersistedSection, SectionStore};
use crate::error::FetchFailure;
use crate::mode::Mode;
use crate::snmp::{
    get_snmp_table, BackendFactory, DefaultBackendFactory, OnError, SectionDetector, SnmpBackend, SnmpDetectSpec,
    SnmpHostConfig, SnmpPluginStore, SnmpPluginStoreItem, SnmpScan, SnmpSectionMeta, SnmpTable, WalkCache,
};
use crate::types::{RawData, SectionName, SnmpRawData};

const CPU_SECTIONS_WITHOUT_CPU_IN_NAME: [&str; 2] = ["brocade_sys", "bvip_util"];

/// Process-wide SNMP settings, handed to each fetcher explicitly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnmpContext {
    pub plugin_store: Arc<SnmpPluginStore>,
    #[serde(default)]
    pub use_stored_walks: bool,
    pub walk_cache_dir: PathBuf,
    pub stored_walk_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagementBoardPrecedence {
    /// Fall back to the board when the host itself returns nothing.
    HostFirst,
    HostOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagementBoard {
    pub snmp_config: SnmpHostConfig,
    pub precedence: ManagementBoardPrecedence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnmpParams {
    pub sections: BTreeMap<SectionName, SnmpSectionMeta>,
    pub on_error: OnError,
    pub missing_sys_description: bool,
    pub do_status_data_inventory: bool,
    pub section_store_path: PathBuf,
    pub snmp_config: SnmpHostConfig,
    #[serde(default)]
    pub management_board: Option<ManagementBoard>,
}

pub struct SnmpFetcher {
    params: SnmpParams,
    context: SnmpContext,
    detector: Arc<dyn SectionDetector>,
    backends: Arc<dyn BackendFactory>,
    backend: Option<Box<dyn SnmpBackend>>,
    board_backend: Option<Box<dyn SnmpBackend>>,
}

impl SnmpFetcher {
    pub fn new(params: SnmpParams, context: SnmpContext) -> Self {
        let backends = Arc::new(DefaultBackendFactory {
            use_stored_walks: context.use_stored_walks,
            stored_walk_dir: context.stored_walk_dir.clone(),
        });
        Self {
            params,
            context,
            detector: Arc::new(SnmpScan),
            backends,
            backend: None,
            board_backend: None,
        }
    }

    pub fn with_detector(mut self, detector: Arc<dyn SectionDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_backend_factory(mut self, backends: Arc<dyn BackendFactory>) -> Self {
        self.backends = backends;
        self
    }

    pub fn params(&self) -> &SnmpParams {
        &self.params
    }

    pub fn plugin_store(&self) -> &SnmpPluginStore {
        &self.context.plugin_store
    }

    pub fn disabled_sections(&self) -> BTreeSet<SectionName> {
        self.sections_where(|meta| meta.disabled)
    }

    pub fn checking_sections(&self) -> BTreeSet<SectionName> {
        self.sections_where(|meta| meta.checking)
    }

    pub fn inventory_sections(&self) -> BTreeSet<SectionName> {
        self.context.plugin_store.inventory_sections()
    }

    fn sections_where(&self, predicate: impl Fn(&SnmpSectionMeta) -> bool) -> BTreeSet<SectionName> {
        self.params
            .sections
            .iter()
            .filter(|(_, meta)| predicate(meta))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Sections fetched without detection.
    pub fn selected_sections(&self, mode: Mode) -> BTreeSet<SectionName> {
        match mode {
            Mode::Checking => {
                let disabled = self.disabled_sections();
                self.sections_where(|meta| meta.checking && !meta.redetect)
                    .difference(&disabled)
                    .cloned()
                    .collect()
            }
            // disabled sections are fetched too when forced
            Mode::ForceSections => self.checking_sections(),
            _ => BTreeSet::new(),
        }
    }

    /// Sections that are fetched only if detection finds them.
    pub fn detection_candidates(&self, mode: Mode) -> BTreeSet<SectionName> {
        let candidates = match mode {
            Mode::Checking => {
                let mut candidates = self.sections_where(|meta| meta.checking && meta.redetect);
                if self.params.do_status_data_inventory {
                    candidates.extend(self.inventory_sections());
                }
                candidates
            }
            Mode::Inventory => self.inventory_sections(),
            Mode::Discovery => self.context.plugin_store.names(),
            _ => return BTreeSet::new(),
        };
        candidates.difference(&self.disabled_sections()).cloned().collect()
    }

    fn detect(&mut self, candidates: BTreeSet<SectionName>) -> Result<BTreeSet<SectionName>, FetchFailure> {
        let specs: Vec<(SectionName, SnmpDetectSpec)> = candidates
            .into_iter()
            .filter_map(|name| {
                let spec = self.context.plugin_store.get(&name)?.detect_spec.clone();
                Some((name, spec))
            })
            .collect();
        if specs.is_empty() {
            return Ok(BTreeSet::new());
        }
        let backend = self
            .backend
            .as_deref_mut()
            .ok_or_else(|| FetchFailure::transport("SNMP fetcher is not open"))?;
        Ok(self
            .detector
            .detect(&specs, self.params.on_error, self.params.missing_sys_description, backend)?)
    }

    fn section_store(&self) -> SectionStore<Vec<SnmpTable>> {
        SectionStore::new(self.params.section_store_path.clone())
    }
}

/// CPU sections go first, then alphabetical.
pub fn sort_section_names(names: impl IntoIterator<Item = SectionName>) -> Vec<SectionName> {
    let mut names: Vec<SectionName> = names.into_iter().collect();
    names.sort_by_cached_key(|name| (!is_cpu_section(name), name.clone()));
    names
}

fn is_cpu_section(name: &SectionName) -> bool {
    name.as_str().contains("cpu") || CPU_SECTIONS_WITHOUT_CPU_IN_NAME.contains(&name.as_str())
}

fn fetch_tables(
    item: &SnmpPluginStoreItem,
    walk_cache: &mut WalkCache,
    backend: &mut dyn SnmpBackend,
    character_encoding: Option<&str>,
) -> Result<Vec<SnmpTable>, FetchFailure> {
    item.trees
        .iter()
        .map(|tree| get_snmp_table(tree, walk_cache, backend, character_encoding).map_err(FetchFailure::from))
        .collect()
}

fn now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

fn interval_secs(interval: Duration) -> i64 {
    i64::try_from(interval.as_secs()).unwrap_or(i64::MAX)
}

impl RawFetcher for SnmpFetcher {
    fn open(&mut self) -> Result<(), FetchFailure> {
        self.backend = Some(self.backends.make(&self.params.snmp_config)?);
        if let Some(board) = &self.params.management_board {
            if board.precedence == ManagementBoardPrecedence::HostFirst {
                self.board_backend = Some(self.backends.make(&board.snmp_config)?);
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.backend.take().is_some() {
            debug!("Closed SNMP session to {}", self.params.snmp_config.hostname);
        }
        self.board_backend = None;
    }

    fn fetch_raw(&mut self, mode: Mode) -> Result<RawData, FetchFailure> {
        let mut section_names = self.selected_sections(mode);
        let candidates: BTreeSet<SectionName> = self
            .detection_candidates(mode)
            .difference(&section_names)
            .cloned()
            .collect();
        section_names.extend(self.detect(candidates)?);

        let config = &self.params.snmp_config;
        let store = Arc::clone(&self.context.plugin_store);

        let mut walk_cache = WalkCache::new(&self.context.walk_cache_dir, &config.hostname);
        if mode == Mode::Checking {
            walk_cache.load(section_names.iter().filter_map(|name| store.get(name)).flat_map(|item| &item.trees));
        } else {
            walk_cache.clear();
        }
        let mut board_walk_cache = WalkCache::in_memory();

        let section_store = self.section_store();
        let persisted = section_store.load();
        let now = now();

        let backend = self
            .backend
            .as_deref_mut()
            .ok_or_else(|| FetchFailure::transport("SNMP fetcher is not open"))?;
        let encoding = config.character_encoding.as_deref();

        let mut fetched: SnmpRawData = BTreeMap::new();
        let mut fresh = BTreeMap::new();
        for name in sort_section_names(section_names) {
            if mode == Mode::Checking && persisted.get(&name).is_some_and(|section| section.covers(now)) {
                debug!("{}: using persisted section, skipping fetch", name);
                continue;
            }
            let Some(item) = store.get(&name) else {
                debug!("{}: no plugin known, skipping", name);
                continue;
            };

            let mut tables = fetch_tables(item, &mut walk_cache, backend, encoding)?;
            if tables.iter().all(|table| table.is_empty()) {
                if let (Some(board), Some(board_backend)) = (&self.params.management_board, self.board_backend.as_deref_mut()) {
                    debug!("{}: no data from host, asking management board {}", name, board.snmp_config.hostname);
                    tables = fetch_tables(item, &mut board_walk_cache, board_backend, board.snmp_config.character_encoding.as_deref())?;
                }
            }

            if let Some(interval) = self.params.sections.get(&name).and_then(|meta| meta.fetch_interval) {
                fresh.insert(
                    name.clone(),
                    PersistedSection {
                        fetched_at: now,
                        valid_until: now.saturating_add(interval_secs(interval)),
                        payload: tables.clone(),
                    },
                );
            }
            fetched.insert(name, tables);
        }

        if let Err(e) = walk_cache.save() {
            warn!("Cannot save walk cache for {}: {}", config.hostname, e);
        }
        if !fresh.is_empty() {
            if let Err(e) = section_store.update(fresh, now) {
                warn!("Cannot persist sections for {}: {}", config.hostname, e);
            }
        }
        Ok(RawData::Snmp(fetched))
    }
}

impl fmt::Display for SnmpFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let config = &self.params.snmp_config;
        write!(f, "SnmpFetcher({}, host={})", config.agent_address(), config.hostname)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_sections_come_first() {
        let names = ["uptime", "hr_cpu", "if64", "bvip_util", "brocade_sys", "cisco_cpu"].map(SectionName::from);
        let sorted: Vec<String> = sort_section_names(names).into_iter().map(|n| n.to_string()).collect();
        assert_eq!(sorted, vec!["brocade_sys", "bvip_util", "cisco_cpu", "hr_cpu", "if64", "uptime"]);
    }
}
