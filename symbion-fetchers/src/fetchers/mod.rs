//! Fetchers: one per data source kind
//!
//! Every fetcher follows the same lifecycle:
//! - `open`: acquire the session resource (socket, SNMP client, subprocess...)
//! - `fetch_raw`: pull raw data for a [`Mode`]
//! - `close`: release the resource, never failing
//!
//! [`FetcherSession`] ties the three together so a session is closed on every
//! exit path. [`get_raw_data`] puts the file cache in front and reduces all
//! failures to [`FetchError`].

pub mod ipmi;
pub mod piggyback;
pub mod program;
pub mod snmp;
pub mod tcp;

pub use ipmi::{IpmiFetcher, IpmiParams};
pub use piggyback::{PiggybackFetcher, PiggybackParams};
pub use program::{ProgramFetcher, ProgramParams};
pub use snmp::{SnmpContext, SnmpFetcher, SnmpParams};
pub use tcp::{TcpFetcher, TcpParams};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Deref, DerefMut};
use tracing::{debug, warn};

use crate::cache::RawDataCache;
use crate::error::{FetchError, FetchFailure, FetcherError};
use crate::mode::Mode;
use crate::types::RawData;

pub trait RawFetcher {
    fn open(&mut self) -> Result<(), FetchFailure>;
    /// Idempotent; problems are logged, not reported.
    fn close(&mut self);
    fn fetch_raw(&mut self, mode: Mode) -> Result<RawData, FetchFailure>;

    /// Opens a session that is closed when dropped.
    fn session(&mut self) -> Result<FetcherSession<'_, Self>, FetchError>
    where
        Self: Sized,
    {
        FetcherSession::open(self)
    }
}

/// An open fetcher; closes it on drop.
pub struct FetcherSession<'a, F: RawFetcher + ?Sized> {
    fetcher: &'a mut F,
}

impl<'a, F: RawFetcher + ?Sized> FetcherSession<'a, F> {
    pub fn open(fetcher: &'a mut F) -> Result<Self, FetchError> {
        if let Err(failure) = fetcher.open() {
            fetcher.close();
            return Err(failure.into());
        }
        Ok(Self { fetcher })
    }

    pub fn fetch(&mut self, mode: Mode) -> Result<RawData, FetchError> {
        self.fetcher.fetch_raw(mode).map_err(FetchError::from)
    }
}

impl<F: RawFetcher + ?Sized> Deref for FetcherSession<'_, F> {
    type Target = F;

    fn deref(&self) -> &F {
        self.fetcher
    }
}

impl<F: RawFetcher + ?Sized> DerefMut for FetcherSession<'_, F> {
    fn deref_mut(&mut self) -> &mut F {
        self.fetcher
    }
}

impl<F: RawFetcher + ?Sized> Drop for FetcherSession<'_, F> {
    fn drop(&mut self) {
        self.fetcher.close();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetcherType {
    Tcp,
    Snmp,
    Ipmi,
    Program,
    Piggyback,
}

/// Serializable construction parameters of any fetcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "fetcher_type", content = "fetcher_params", rename_all = "snake_case")]
pub enum FetcherState {
    Tcp(TcpParams),
    Snmp(SnmpParams),
    Ipmi(IpmiParams),
    Program(ProgramParams),
    Piggyback(PiggybackParams),
}

impl FetcherState {
    pub fn fetcher_type(&self) -> FetcherType {
        match self {
            FetcherState::Tcp(_) => FetcherType::Tcp,
            FetcherState::Snmp(_) => FetcherType::Snmp,
            FetcherState::Ipmi(_) => FetcherType::Ipmi,
            FetcherState::Program(_) => FetcherType::Program,
            FetcherState::Piggyback(_) => FetcherType::Piggyback,
        }
    }
}

/// The closed set of fetchers.
pub enum Fetcher {
    Tcp(TcpFetcher),
    Snmp(SnmpFetcher),
    Ipmi(IpmiFetcher),
    Program(ProgramFetcher),
    Piggyback(PiggybackFetcher),
}

impl Fetcher {
    /// Rebuilds a fetcher from its transport state, with default collaborators.
    pub fn from_transport_state(state: FetcherState, snmp_context: &SnmpContext) -> Self {
        match state {
            FetcherState::Tcp(params) => Fetcher::Tcp(TcpFetcher::new(params)),
            FetcherState::Snmp(params) => Fetcher::Snmp(SnmpFetcher::new(params, snmp_context.clone())),
            FetcherState::Ipmi(params) => Fetcher::Ipmi(IpmiFetcher::new(params)),
            FetcherState::Program(params) => Fetcher::Program(ProgramFetcher::new(params)),
            FetcherState::Piggyback(params) => Fetcher::Piggyback(PiggybackFetcher::new(params)),
        }
    }

    pub fn to_transport_state(&self) -> FetcherState {
        match self {
            Fetcher::Tcp(f) => FetcherState::Tcp(f.params().clone()),
            Fetcher::Snmp(f) => FetcherState::Snmp(f.params().clone()),
            Fetcher::Ipmi(f) => FetcherState::Ipmi(f.params().clone()),
            Fetcher::Program(f) => FetcherState::Program(f.params().clone()),
            Fetcher::Piggyback(f) => FetcherState::Piggyback(f.params().clone()),
        }
    }

    pub fn fetcher_type(&self) -> FetcherType {
        match self {
            Fetcher::Tcp(_) => FetcherType::Tcp,
            Fetcher::Snmp(_) => FetcherType::Snmp,
            Fetcher::Ipmi(_) => FetcherType::Ipmi,
            Fetcher::Program(_) => FetcherType::Program,
            Fetcher::Piggyback(_) => FetcherType::Piggyback,
        }
    }

    fn inner(&mut self) -> &mut dyn RawFetcher {
        match self {
            Fetcher::Tcp(f) => f,
            Fetcher::Snmp(f) => f,
            Fetcher::Ipmi(f) => f,
            Fetcher::Program(f) => f,
            Fetcher::Piggyback(f) => f,
        }
    }
}

impl RawFetcher for Fetcher {
    fn open(&mut self) -> Result<(), FetchFailure> {
        self.inner().open()
    }

    fn close(&mut self) {
        self.inner().close()
    }

    fn fetch_raw(&mut self, mode: Mode) -> Result<RawData, FetchFailure> {
        self.inner().fetch_raw(mode)
    }
}

impl fmt::Display for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fetcher::Tcp(inner) => fmt::Display::fmt(inner, f),
            Fetcher::Snmp(inner) => fmt::Display::fmt(inner, f),
            Fetcher::Ipmi(inner) => fmt::Display::fmt(inner, f),
            Fetcher::Program(inner) => fmt::Display::fmt(inner, f),
            Fetcher::Piggyback(inner) => fmt::Display::fmt(inner, f),
        }
    }
}

/// Cache-aware fetch: the only entry point callers need.
///
/// A cache hit never opens the fetcher. In simulation or cache-only setups
/// a miss is an error. Fresh data is written back to the cache.
pub fn get_raw_data<F>(file_cache: &dyn RawDataCache, fetcher: &mut F, mode: Mode) -> Result<RawData, FetchError>
where
    F: RawFetcher + fmt::Display,
{
    match file_cache.read(mode) {
        Ok(Some(cached)) => return Ok(cached),
        Ok(None) => {}
        Err(e) => return Err(FetchError::Fetcher(FetcherError::new(e.to_string()))),
    }
    if file_cache.simulation() {
        return Err(FetchError::Fetcher(FetcherError::new(format!("{fetcher}: data unavailable in simulation mode"))));
    }
    if file_cache.use_only_cache() {
        return Err(FetchError::Fetcher(FetcherError::new(format!("{fetcher}: cache miss (use only cache)"))));
    }

    debug!("[{}] Fetching data in mode {}", fetcher, mode);
    let raw_data = {
        let mut session = FetcherSession::open(fetcher)?;
        session.fetch(mode)?
    };

    if let Err(e) = file_cache.write(&raw_data, mode) {
        warn!("Cannot write fetched data to cache: {}", e);
    }
    Ok(raw_data)
}
