//! Detection of SNMP sections
//!
//! A detection rule is a disjunction of conjunctions of atoms. Each atom
//! fetches one OID and full-matches its value against a case-insensitive
//! pattern (`.` matches newlines), expecting a match or a non-match.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

use super::backend::SnmpBackend;
use super::SnmpError;
use crate::types::SectionName;

pub const OID_SYS_DESCR: &str = ".1.3.6.1.2.1.1.1.0";
pub const OID_SYS_OBJ: &str = ".1.3.6.1.2.1.1.2.0";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DetectAtom {
    pub oid: String,
    pub pattern: String,
    pub expected: bool,
}

impl DetectAtom {
    pub fn new(oid: impl Into<String>, pattern: impl Into<String>, expected: bool) -> Self {
        Self { oid: oid.into(), pattern: pattern.into(), expected }
    }

    /// Matches when the value is absent too.
    fn accepts_missing(&self) -> bool {
        self.pattern == ".*" && !self.expected
    }
}

/// Disjunctive normal form: any branch whose atoms all hold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnmpDetectSpec(pub Vec<Vec<DetectAtom>>);

impl SnmpDetectSpec {
    pub fn new(branches: Vec<Vec<DetectAtom>>) -> Self {
        Self(branches)
    }

    /// A rule that never matches.
    pub fn never() -> Self {
        Self(Vec::new())
    }
}

/// What to do when detection itself fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    Raise,
    Warn,
    Ignore,
}

fn compile(pattern: &str) -> Result<Regex, SnmpError> {
    RegexBuilder::new(&format!("^(?:{pattern})$"))
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .map_err(|source| SnmpError::Pattern { pattern: pattern.to_string(), source })
}

/// Evaluates `spec`, fetching values lazily through `get`.
pub fn evaluate_snmp_detection<F>(spec: &SnmpDetectSpec, mut get: F) -> Result<bool, SnmpError>
where
    F: FnMut(&str) -> Result<Option<String>, SnmpError>,
{
    'branches: for branch in &spec.0 {
        for atom in branch {
            let holds = match get(&atom.oid)? {
                None => atom.accepts_missing(),
                Some(value) => compile(&atom.pattern)?.is_match(&value) == atom.expected,
            };
            if !holds {
                continue 'branches;
            }
        }
        return Ok(true);
    }
    Ok(false)
}

/// Decides which candidate sections are present on a device.
pub trait SectionDetector: Send + Sync {
    fn detect(
        &self,
        candidates: &[(SectionName, SnmpDetectSpec)],
        on_error: OnError,
        missing_sys_description: bool,
        backend: &mut dyn SnmpBackend,
    ) -> Result<BTreeSet<SectionName>, SnmpError>;
}

/// Live scan against the device.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnmpScan;

impl SectionDetector for SnmpScan {
    fn detect(
        &self,
        candidates: &[(SectionName, SnmpDetectSpec)],
        on_error: OnError,
        missing_sys_description: bool,
        backend: &mut dyn SnmpBackend,
    ) -> Result<BTreeSet<SectionName>, SnmpError> {
        gather_available_raw_section_names(candidates, on_error, missing_sys_description, backend)
    }
}

/// Single-OID values fetched during one scan.
struct OidCache<'a> {
    backend: &'a mut dyn SnmpBackend,
    values: HashMap<String, Option<String>>,
}

impl<'a> OidCache<'a> {
    fn get(&mut self, oid: &str) -> Result<Option<String>, SnmpError> {
        if let Some(value) = self.values.get(oid) {
            return Ok(value.clone());
        }
        let value = self.backend.get(oid)?;
        self.values.insert(oid.to_string(), value.clone());
        Ok(value)
    }
}

/// Runs every candidate's detection rule, returning the matching sections.
pub fn gather_available_raw_section_names(
    candidates: &[(SectionName, SnmpDetectSpec)],
    on_error: OnError,
    missing_sys_description: bool,
    backend: &mut dyn SnmpBackend,
) -> Result<BTreeSet<SectionName>, SnmpError> {
    if candidates.is_empty() {
        return Ok(BTreeSet::new());
    }
    match scan(candidates, on_error, missing_sys_description, backend) {
        Ok(found) => Ok(found),
        Err(e @ SnmpError::Timeout(_)) => Err(e),
        Err(e) => match on_error {
            OnError::Raise => Err(e),
            OnError::Warn => {
                warn!("SNMP scan failed: {}", e);
                Ok(BTreeSet::new())
            }
            OnError::Ignore => Ok(BTreeSet::new()),
        },
    }
}

fn scan(
    candidates: &[(SectionName, SnmpDetectSpec)],
    on_error: OnError,
    missing_sys_description: bool,
    backend: &mut dyn SnmpBackend,
) -> Result<BTreeSet<SectionName>, SnmpError> {
    let mut cache = OidCache { backend, values: HashMap::new() };

    if !missing_sys_description {
        for (name, oid) in [("system description", OID_SYS_DESCR), ("system object", OID_SYS_OBJ)] {
            if cache.get(oid)?.is_none() {
                return Err(SnmpError::MissingSysDescription { name, oid: oid.to_string() });
            }
        }
    }

    let mut found = BTreeSet::new();
    for (name, spec) in candidates {
        match evaluate_snmp_detection(spec, |oid| cache.get(oid)) {
            Ok(true) => {
                debug!("Detected section {}", name);
                found.insert(name.clone());
            }
            Ok(false) => {}
            Err(e @ SnmpError::Timeout(_)) => return Err(e),
            Err(e) => match on_error {
                OnError::Raise => {
                    return Err(SnmpError::Detection { section: name.to_string(), message: e.to_string() })
                }
                OnError::Warn => warn!("Detection of {} failed: {}", name, e),
                OnError::Ignore => {}
            },
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(spec: &SnmpDetectSpec, values: &[(&str, &str)]) -> bool {
        let map: HashMap<&str, &str> = values.iter().copied().collect();
        evaluate_snmp_detection(spec, |oid| Ok(map.get(oid).map(|v| v.to_string()))).unwrap()
    }

    #[test]
    fn matches_case_insensitively_and_fully() {
        let spec = SnmpDetectSpec::new(vec![vec![DetectAtom::new(OID_SYS_DESCR, "linux.*", true)]]);
        assert!(eval(&spec, &[(OID_SYS_DESCR, "Linux box 5.10")]));
        assert!(!eval(&spec, &[(OID_SYS_DESCR, "GNU Linux")]));
    }

    #[test]
    fn dot_matches_newlines() {
        let spec = SnmpDetectSpec::new(vec![vec![DetectAtom::new(OID_SYS_DESCR, "cisco.*ios", true)]]);
        assert!(eval(&spec, &[(OID_SYS_DESCR, "Cisco Systems\nIOS")]));
    }

    #[test]
    fn missing_value_only_matches_negated_wildcard() {
        let negated = SnmpDetectSpec::new(vec![vec![DetectAtom::new(".1.2.3", ".*", false)]]);
        let positive = SnmpDetectSpec::new(vec![vec![DetectAtom::new(".1.2.3", ".*", true)]]);
        assert!(eval(&negated, &[]));
        assert!(!eval(&positive, &[]));
    }

    #[test]
    fn empty_conjunction_matches_and_empty_disjunction_does_not() {
        assert!(eval(&SnmpDetectSpec::new(vec![vec![]]), &[]));
        assert!(!eval(&SnmpDetectSpec::never(), &[]));
    }

    #[test]
    fn any_branch_suffices() {
        let spec = SnmpDetectSpec::new(vec![
            vec![DetectAtom::new(".1.1", "a", true)],
            vec![DetectAtom::new(".1.2", "b", true), DetectAtom::new(".1.3", "c", false)],
        ]);
        assert!(eval(&spec, &[(".1.1", "x"), (".1.2", "B"), (".1.3", "d")]));
        assert!(!eval(&spec, &[(".1.1", "x"), (".1.2", "b"), (".1.3", "c")]));
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        let spec = SnmpDetectSpec::new(vec![vec![DetectAtom::new(".1.1", "(", true)]]);
        let result = evaluate_snmp_detection(&spec, |_| Ok(Some("x".into())));
        assert!(matches!(result, Err(SnmpError::Pattern { .. })));
    }
}
