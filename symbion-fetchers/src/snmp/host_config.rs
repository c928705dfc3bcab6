use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::HostName;

/// Community string (v1/v2c) or the v3 security tuple.
///
/// The v3 tuple is `[level, user]`, `[level, auth_proto, user, auth_pass]`
/// or `[level, auth_proto, user, auth_pass, priv_proto, priv_pass]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SnmpCredentials {
    Community(String),
    V3(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnmpBackendKind {
    /// net-snmp command line tools
    Classic,
    /// Recorded walk files, for simulation
    StoredWalk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnmpTiming {
    pub timeout: Duration,
    pub retries: u32,
}

impl Default for SnmpTiming {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(1), retries: 5 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnmpHostConfig {
    pub is_ipv6_primary: bool,
    pub hostname: HostName,
    pub ipaddress: String,
    pub credentials: SnmpCredentials,
    pub port: u16,
    pub is_bulkwalk_host: bool,
    pub is_snmpv2or3_without_bulkwalk_host: bool,
    pub bulk_walk_size_of: u32,
    #[serde(default)]
    pub timing: SnmpTiming,
    #[serde(default)]
    pub character_encoding: Option<String>,
    pub snmp_backend: SnmpBackendKind,
}

impl SnmpHostConfig {
    pub fn new(hostname: HostName, ipaddress: impl Into<String>, credentials: SnmpCredentials) -> Self {
        Self {
            is_ipv6_primary: false,
            hostname,
            ipaddress: ipaddress.into(),
            credentials,
            port: 161,
            is_bulkwalk_host: false,
            is_snmpv2or3_without_bulkwalk_host: false,
            bulk_walk_size_of: 10,
            timing: SnmpTiming::default(),
            character_encoding: None,
            snmp_backend: SnmpBackendKind::Classic,
        }
    }

    pub fn is_snmpv3(&self) -> bool {
        matches!(self.credentials, SnmpCredentials::V3(_))
    }

    /// Address in net-snmp notation (`udp6:[addr]:port` for IPv6).
    pub fn agent_address(&self) -> String {
        if self.is_ipv6_primary {
            format!("udp6:[{}]:{}", self.ipaddress, self.port)
        } else {
            format!("{}:{}", self.ipaddress, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v3_credentials_roundtrip_through_json() {
        let mut config = SnmpHostConfig::new(
            HostName::new("switch"),
            "10.0.0.2",
            SnmpCredentials::V3(vec!["authPriv".into(), "SHA".into(), "user".into(), "pw".into(), "AES".into(), "secret".into()]),
        );
        config.is_ipv6_primary = true;
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(serde_json::from_str::<SnmpHostConfig>(&json).unwrap(), config);
        assert!(config.is_snmpv3());
        assert_eq!(config.agent_address(), "udp6:[10.0.0.2]:161");
    }

    #[test]
    fn community_is_a_plain_string() {
        let json = serde_json::to_value(SnmpCredentials::Community("public".into())).unwrap();
        assert_eq!(json, serde_json::json!("public"));
    }
}
