use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

use crate::snmp::SnmpTable;

/// Name of a monitored host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostName(String);

impl HostName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HostName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Name of a raw data section (`<<<name>>>` in agent output, plugin name for SNMP).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SectionName(String);

impl SectionName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SectionName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl Borrow<str> for SectionName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Raw agent output as received on the wire (after decryption).
pub type AgentRawData = Vec<u8>;

/// One list of tables per fetched SNMP section.
pub type SnmpRawData = BTreeMap<SectionName, Vec<SnmpTable>>;

/// Payload produced by a fetcher and stored in the file cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum RawData {
    Agent(AgentRawData),
    Snmp(SnmpRawData),
}

impl RawData {
    pub fn as_agent(&self) -> Option<&[u8]> {
        match self {
            RawData::Agent(data) => Some(data),
            RawData::Snmp(_) => None,
        }
    }

    pub fn as_snmp(&self) -> Option<&SnmpRawData> {
        match self {
            RawData::Snmp(data) => Some(data),
            RawData::Agent(_) => None,
        }
    }
}
