//! SNMP data acquisition
//!
//! - [`host_config`]: how to talk to one SNMP agent
//! - [`tree`]: OID trees requested by section plugins, and the resulting tables
//! - [`plugin_store`]: per-section trees and detection rules, shipped to fetch workers
//! - [`detect`]: evaluation of detection rules against live data
//! - [`walk_cache`]: reuse of walk results across fetches
//! - [`table`]: assembly of walk results into tables
//! - [`backend`]: the actual SNMP client (net-snmp command line, stored walks)

pub mod backend;
pub mod detect;
pub mod host_config;
pub mod plugin_store;
pub mod table;
pub mod tree;
pub mod walk_cache;

pub use backend::{BackendFactory, ClassicBackend, DefaultBackendFactory, SnmpBackend, StoredWalkBackend, WalkRows};
pub use detect::{gather_available_raw_section_names, DetectAtom, OnError, SectionDetector, SnmpDetectSpec, SnmpScan};
pub use host_config::{SnmpBackendKind, SnmpCredentials, SnmpHostConfig, SnmpTiming};
pub use plugin_store::{SnmpPluginStore, SnmpPluginStoreItem, SnmpSectionMeta};
pub use table::get_snmp_table;
pub use tree::{BackendOidSpec, BackendSnmpTree, OidColumn, OidEncoding, SnmpTable, SnmpValue};
pub use walk_cache::WalkCache;

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnmpError {
    #[error("{0}")]
    Timeout(String),
    #[error("SNMP error on {host}: {message}")]
    Backend { host: String, message: String },
    #[error("Cannot fetch {name} OID {oid}. Please check your SNMP configuration. Possible reason might be: Wrong credentials, wrong SNMP version, firewall rules, etc.")]
    MissingSysDescription { name: &'static str, oid: String },
    #[error("Invalid detection pattern {pattern:?}: {source}")]
    Pattern { pattern: String, source: regex::Error },
    #[error("Detection of {section} failed: {message}")]
    Detection { section: String, message: String },
    #[error("Cannot read stored walk {path}: {source}")]
    StoredWalk { path: String, source: io::Error },
    #[error("Walk cache error: {0}")]
    WalkCache(String),
}
