//! Symbion fetchers: data acquisition layer of the monitoring core
//!
//! Pulls raw monitoring data from remote hosts and hands it to the parsers:
//! - TCP agent protocol (TLS envelope, zlib, legacy symmetric decryption)
//! - SNMP section selection, detection and table assembly
//! - IPMI sensors, external programs and piggyback files
//! - Per-mode local file cache in front of every fetcher
//! - Isolated fetch worker (one process per job) and its async pool
//!
//! Only two failure kinds leave this crate: [`Timeout`] and [`FetcherError`].

pub mod cache;
pub mod config;
pub mod error;
pub mod fetchers;
pub mod mode;
pub mod process;
pub mod protocol;
pub mod snmp;
pub mod types;
pub mod worker;

pub use cache::{CacheKind, FileCache, FileCacheMode, MaxAge, RawDataCache};
pub use error::{FetchError, FetchFailure, FetcherError, Timeout};
pub use fetchers::{get_raw_data, Fetcher, FetcherSession, FetcherState, FetcherType, RawFetcher};
pub use mode::Mode;
pub use types::{AgentRawData, HostName, RawData, SectionName, SnmpRawData};
