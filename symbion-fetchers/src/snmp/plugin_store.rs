use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use super::detect::SnmpDetectSpec;
use super::tree::BackendSnmpTree;
use crate::types::SectionName;

/// What the fetcher needs to know about one SNMP section plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnmpPluginStoreItem {
    pub trees: Vec<BackendSnmpTree>,
    pub detect_spec: SnmpDetectSpec,
    pub inventory: bool,
}

/// All known SNMP section plugins, by section name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnmpPluginStore(BTreeMap<SectionName, SnmpPluginStoreItem>);

impl SnmpPluginStore {
    pub fn new(items: BTreeMap<SectionName, SnmpPluginStoreItem>) -> Self {
        Self(items)
    }

    pub fn get(&self, name: &SectionName) -> Option<&SnmpPluginStoreItem> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SectionName, &SnmpPluginStoreItem)> {
        self.0.iter()
    }

    pub fn names(&self) -> BTreeSet<SectionName> {
        self.0.keys().cloned().collect()
    }

    /// Sections relevant to the hardware/software inventory.
    pub fn inventory_sections(&self) -> BTreeSet<SectionName> {
        self.0
            .iter()
            .filter(|(_, item)| item.inventory)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    pub fn from_value(value: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}

/// Per-host selection flags of one SNMP section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnmpSectionMeta {
    pub checking: bool,
    pub disabled: bool,
    pub redetect: bool,
    /// Sections fetched less often are persisted for this long.
    #[serde(default)]
    pub fetch_interval: Option<Duration>,
}

impl SnmpSectionMeta {
    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    pub fn from_value(value: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}
