//! SNMP clients
//!
//! [`ClassicBackend`] drives the net-snmp command line tools, one process per
//! request. [`StoredWalkBackend`] answers from a recorded walk file and is
//! used for simulation.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use tracing::debug;

use super::host_config::{SnmpBackendKind, SnmpCredentials, SnmpHostConfig};
use super::SnmpError;
use crate::process::{self, CommandError};
use crate::types::HostName;

/// `(oid, raw value)` pairs in walk order.
pub type WalkRows = Vec<(String, Vec<u8>)>;

pub trait SnmpBackend: Send {
    fn hostname(&self) -> &HostName;
    /// `Ok(None)` when the agent has no such object.
    fn get(&mut self, oid: &str) -> Result<Option<String>, SnmpError>;
    fn walk(&mut self, oid: &str) -> Result<WalkRows, SnmpError>;
}

/// Creates backends for a host config; swapped out in tests.
pub trait BackendFactory: Send + Sync {
    fn make(&self, config: &SnmpHostConfig) -> Result<Box<dyn SnmpBackend>, SnmpError>;
}

#[derive(Debug, Clone, Default)]
pub struct DefaultBackendFactory {
    pub use_stored_walks: bool,
    pub stored_walk_dir: PathBuf,
}

impl BackendFactory for DefaultBackendFactory {
    fn make(&self, config: &SnmpHostConfig) -> Result<Box<dyn SnmpBackend>, SnmpError> {
        if self.use_stored_walks || config.snmp_backend == SnmpBackendKind::StoredWalk {
            let path = self.stored_walk_dir.join(config.hostname.as_str());
            return Ok(Box::new(StoredWalkBackend::load(config.hostname.clone(), path)?));
        }
        Ok(Box::new(ClassicBackend::new(config.clone())))
    }
}

const NO_VALUE_MARKERS: [&str; 3] = [
    "No Such Object available",
    "No Such Instance currently exists",
    "No more variables left",
];

pub struct ClassicBackend {
    config: SnmpHostConfig,
}

impl ClassicBackend {
    pub fn new(config: SnmpHostConfig) -> Self {
        Self { config }
    }

    fn base_args(&self) -> Result<Vec<String>, SnmpError> {
        let mut args: Vec<String> = Vec::new();
        match &self.config.credentials {
            SnmpCredentials::Community(community) => {
                let v2 = self.config.is_bulkwalk_host || self.config.is_snmpv2or3_without_bulkwalk_host;
                args.push(if v2 { "-v2c" } else { "-v1" }.into());
                args.extend(["-c".into(), community.clone()]);
            }
            SnmpCredentials::V3(parts) => {
                args.push("-v3".into());
                args.extend(v3_args(parts).ok_or_else(|| self.backend_error("invalid SNMPv3 credentials"))?);
            }
        }
        let timing = self.config.timing;
        args.extend([
            "-On".into(),
            "-OQ".into(),
            "-Oe".into(),
            "-Ot".into(),
            "-t".into(),
            format!("{:.2}", timing.timeout.as_secs_f64()),
            "-r".into(),
            timing.retries.to_string(),
        ]);
        Ok(args)
    }

    fn time_limit(&self) -> Duration {
        let timing = self.config.timing;
        timing.timeout * (timing.retries + 1) + Duration::from_secs(5)
    }

    fn backend_error(&self, message: impl Into<String>) -> SnmpError {
        SnmpError::Backend {
            host: self.config.hostname.to_string(),
            message: message.into(),
        }
    }

    fn run(&self, program: &str, extra: &[String], oid: &str) -> Result<Vec<(String, String)>, SnmpError> {
        let mut command = Command::new(program);
        command
            .args(self.base_args()?)
            .args(extra)
            .arg(self.config.agent_address())
            .arg(oid);
        debug!("Running '{}' for {} on {}", program, oid, self.config.hostname);

        let output = process::run(command, program, None, Some(self.time_limit())).map_err(|e| match e {
            CommandError::TimedOut { .. } => SnmpError::Timeout(format!("{} on {}: {}", program, self.config.hostname, e)),
            other => self.backend_error(other.to_string()),
        })?;

        let stderr = output.stderr_lossy();
        if stderr.contains("Timeout") {
            return Err(SnmpError::Timeout(format!(
                "SNMP request to {} timed out: {}",
                self.config.hostname, stderr
            )));
        }
        if !output.success() {
            return Err(self.backend_error(format!("{program} failed: {stderr}")));
        }
        Ok(parse_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

impl SnmpBackend for ClassicBackend {
    fn hostname(&self) -> &HostName {
        &self.config.hostname
    }

    fn get(&mut self, oid: &str) -> Result<Option<String>, SnmpError> {
        let rows = self.run("snmpget", &[], oid)?;
        Ok(rows.into_iter().find(|(found, _)| found == oid).map(|(_, value)| value))
    }

    fn walk(&mut self, oid: &str) -> Result<WalkRows, SnmpError> {
        let rows = if self.config.is_bulkwalk_host {
            let size = format!("-Cr{}", self.config.bulk_walk_size_of);
            self.run("snmpbulkwalk", &["-Cc".into(), size], oid)?
        } else {
            self.run("snmpwalk", &["-Cc".into()], oid)?
        };
        Ok(rows.into_iter().map(|(oid, value)| (oid, value.into_bytes())).collect())
    }
}

fn v3_args(parts: &[String]) -> Option<Vec<String>> {
    let flag = |f: &str, v: &String| [f.to_string(), v.clone()];
    match parts {
        [level, user] => Some([flag("-l", level), flag("-u", user)].concat()),
        [level, auth_proto, user, auth_pass] => Some(
            [flag("-l", level), flag("-a", auth_proto), flag("-u", user), flag("-A", auth_pass)].concat(),
        ),
        [level, auth_proto, user, auth_pass, priv_proto, priv_pass] => Some(
            [
                flag("-l", level),
                flag("-a", auth_proto),
                flag("-u", user),
                flag("-A", auth_pass),
                flag("-x", priv_proto),
                flag("-X", priv_pass),
            ]
            .concat(),
        ),
        _ => None,
    }
}

/// Parses `-OQ` output (`.oid = value`), joining continuation lines.
fn parse_output(stdout: &str) -> Vec<(String, String)> {
    let mut rows: Vec<(String, String)> = Vec::new();
    for line in stdout.lines() {
        match line.split_once(" = ") {
            Some((oid, value)) if oid.starts_with('.') => {
                if NO_VALUE_MARKERS.iter().any(|marker| value.starts_with(marker)) {
                    continue;
                }
                rows.push((oid.to_string(), value.to_string()));
            }
            _ => {
                if let Some((_, value)) = rows.last_mut() {
                    value.push('\n');
                    value.push_str(line);
                }
            }
        }
    }
    rows.into_iter().map(|(oid, value)| (oid, strip_quotes(&value))).collect()
}

fn strip_quotes(value: &str) -> String {
    let value = value.trim();
    match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(inner) => inner.to_string(),
        None => value.to_string(),
    }
}

/// Answers requests from a recorded walk (`<oid> <value>` per line).
pub struct StoredWalkBackend {
    hostname: HostName,
    values: BTreeMap<Vec<u32>, (String, String)>,
}

impl StoredWalkBackend {
    pub fn load(hostname: HostName, path: PathBuf) -> Result<Self, SnmpError> {
        let content = fs::read_to_string(&path).map_err(|source| SnmpError::StoredWalk {
            path: path.display().to_string(),
            source,
        })?;
        debug!("Loaded stored walk {} for {}", path.display(), hostname);
        Ok(Self::from_lines(hostname, &content))
    }

    pub fn from_lines(hostname: HostName, content: &str) -> Self {
        let mut values = BTreeMap::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let (oid, value) = line.split_once(' ').unwrap_or((line, ""));
            let oid = normalize_oid(oid);
            values.insert(oid_key(&oid), (oid, strip_quotes(value)));
        }
        Self { hostname, values }
    }
}

impl SnmpBackend for StoredWalkBackend {
    fn hostname(&self) -> &HostName {
        &self.hostname
    }

    fn get(&mut self, oid: &str) -> Result<Option<String>, SnmpError> {
        Ok(self.values.get(&oid_key(&normalize_oid(oid))).map(|(_, value)| value.clone()))
    }

    fn walk(&mut self, oid: &str) -> Result<WalkRows, SnmpError> {
        let prefix = oid_key(&normalize_oid(oid));
        Ok(self
            .values
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(_, (oid, value))| (oid.clone(), value.clone().into_bytes()))
            .collect())
    }
}

fn normalize_oid(oid: &str) -> String {
    if oid.starts_with('.') {
        oid.to_string()
    } else {
        format!(".{oid}")
    }
}

/// Numeric OID components, for ordering and prefix checks.
pub(crate) fn oid_key(oid: &str) -> Vec<u32> {
    oid.split('.').filter(|part| !part.is_empty()).filter_map(|part| part.parse().ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_and_multiline_values() {
        let out = ".1.3.6.1.2.1.1.1.0 = \"Linux box\nsecond line\"\n.1.3.6.1.2.1.1.2.0 = .1.3.6.1.4.1.8072.3.2.10\n.1.3.6.1.2.1.1.9.0 = No Such Object available on this agent at this OID\n";
        let rows = parse_output(out);
        assert_eq!(
            rows,
            vec![
                (".1.3.6.1.2.1.1.1.0".to_string(), "Linux box\nsecond line".to_string()),
                (".1.3.6.1.2.1.1.2.0".to_string(), ".1.3.6.1.4.1.8072.3.2.10".to_string()),
            ]
        );
    }

    #[test]
    fn v3_argument_shapes() {
        let parts: Vec<String> = ["authNoPriv", "md5", "user", "pass"].iter().map(|s| s.to_string()).collect();
        assert_eq!(v3_args(&parts).unwrap(), vec!["-l", "authNoPriv", "-a", "md5", "-u", "user", "-A", "pass"]);
        assert!(v3_args(&parts[..3]).is_none());
    }

    #[test]
    fn stored_walk_walks_numerically_ordered_subtree() {
        let walk = ".1.3.6.1.2.1.2.2.1.2.10 \"eth10\"\n.1.3.6.1.2.1.2.2.1.2.2 \"eth2\"\n.1.3.6.1.2.1.2.2.1.20.1 5\n1.3.6.1.2.1.1.1.0 Linux\n";
        let mut backend = StoredWalkBackend::from_lines(HostName::new("sim"), walk);
        let rows = backend.walk(".1.3.6.1.2.1.2.2.1.2").unwrap();
        assert_eq!(
            rows,
            vec![
                (".1.3.6.1.2.1.2.2.1.2.2".to_string(), b"eth2".to_vec()),
                (".1.3.6.1.2.1.2.2.1.2.10".to_string(), b"eth10".to_vec()),
            ]
        );
        assert_eq!(backend.get(".1.3.6.1.2.1.1.1.0").unwrap(), Some("Linux".to_string()));
        assert_eq!(backend.get(".1.3.6.1.2.1.1.5.0").unwrap(), None);
    }
}
