/*!
Backends SNMP simulés

- `MockSnmpBackend` : valeurs et walks scriptés, journal des requêtes
- `MockBackendFactory` : fournit un backend simulé par hôte
- `StubDetector` : détection simulée (toutes les candidates ou une liste fixe)
*/

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use symbion_fetchers::snmp::{
    BackendFactory, OnError, SectionDetector, SnmpBackend, SnmpDetectSpec, SnmpError, SnmpHostConfig, WalkRows,
};
use symbion_fetchers::{HostName, SectionName};

/// Backend SNMP scripté, clonable (le journal est partagé)
#[derive(Clone)]
pub struct MockSnmpBackend {
    hostname: HostName,
    values: BTreeMap<String, String>,
    walks: BTreeMap<String, WalkRows>,
    timeout: bool,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockSnmpBackend {
    pub fn new(hostname: &str) -> Self {
        Self {
            hostname: HostName::new(hostname),
            values: BTreeMap::new(),
            walks: BTreeMap::new(),
            timeout: false,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Ajoute sysDescr et sysObjectID (requis par la détection)
    pub fn with_system_info(self, descr: &str) -> Self {
        self.with_value(".1.3.6.1.2.1.1.1.0", descr)
            .with_value(".1.3.6.1.2.1.1.2.0", ".1.3.6.1.4.1.8072.3.2.10")
    }

    pub fn with_value(mut self, oid: &str, value: &str) -> Self {
        self.values.insert(oid.to_string(), value.to_string());
        self
    }

    /// Walk d'une colonne : `(suffixe, valeur)` sous `oid`
    pub fn with_walk(mut self, oid: &str, rows: &[(&str, &str)]) -> Self {
        let rows = rows
            .iter()
            .map(|(suffix, value)| (format!("{oid}.{suffix}"), value.as_bytes().to_vec()))
            .collect();
        self.walks.insert(oid.to_string(), rows);
        self
    }

    /// Toute requête échoue par timeout
    pub fn timing_out(mut self) -> Self {
        self.timeout = true;
        self
    }

    /// Requêtes reçues, dans l'ordre (`get <oid>` / `walk <oid>`)
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    pub fn walked(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter_map(|r| r.strip_prefix("walk ").map(str::to_string))
            .collect()
    }

    fn record(&self, request: String) -> Result<(), SnmpError> {
        log::debug!("📡 [MOCK] {} {}", self.hostname, request);
        self.requests.lock().push(request);
        if self.timeout {
            return Err(SnmpError::Timeout(format!("No response from {}", self.hostname)));
        }
        Ok(())
    }
}

impl SnmpBackend for MockSnmpBackend {
    fn hostname(&self) -> &HostName {
        &self.hostname
    }

    fn get(&mut self, oid: &str) -> Result<Option<String>, SnmpError> {
        self.record(format!("get {oid}"))?;
        Ok(self.values.get(oid).cloned())
    }

    fn walk(&mut self, oid: &str) -> Result<WalkRows, SnmpError> {
        self.record(format!("walk {oid}"))?;
        Ok(self.walks.get(oid).cloned().unwrap_or_default())
    }
}

/// Fabrique de backends simulés, indexée par nom d'hôte
#[derive(Default)]
pub struct MockBackendFactory {
    backends: Mutex<HashMap<HostName, MockSnmpBackend>>,
}

impl MockBackendFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(self, backend: MockSnmpBackend) -> Self {
        self.backends.lock().insert(backend.hostname.clone(), backend);
        self
    }
}

impl BackendFactory for MockBackendFactory {
    fn make(&self, config: &SnmpHostConfig) -> Result<Box<dyn SnmpBackend>, SnmpError> {
        self.backends
            .lock()
            .get(&config.hostname)
            .cloned()
            .map(|backend| Box::new(backend) as Box<dyn SnmpBackend>)
            .ok_or_else(|| SnmpError::Backend {
                host: config.hostname.to_string(),
                message: "no mock backend configured".into(),
            })
    }
}

/// Détecteur simulé
pub struct StubDetector {
    found: Option<BTreeSet<SectionName>>,
    calls: Mutex<Vec<BTreeSet<SectionName>>>,
}

impl StubDetector {
    /// Détecte toutes les sections candidates
    pub fn all() -> Self {
        Self { found: None, calls: Mutex::new(Vec::new()) }
    }

    /// Détecte seulement les sections listées (parmi les candidates)
    pub fn only(names: &[&str]) -> Self {
        Self {
            found: Some(names.iter().map(|n| SectionName::new(*n)).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Candidates reçues à chaque appel
    pub fn calls(&self) -> Vec<BTreeSet<SectionName>> {
        self.calls.lock().clone()
    }
}

impl SectionDetector for StubDetector {
    fn detect(
        &self,
        candidates: &[(SectionName, SnmpDetectSpec)],
        _on_error: OnError,
        _missing_sys_description: bool,
        _backend: &mut dyn SnmpBackend,
    ) -> Result<BTreeSet<SectionName>, SnmpError> {
        let names: BTreeSet<SectionName> = candidates.iter().map(|(name, _)| name.clone()).collect();
        self.calls.lock().push(names.clone());
        Ok(match &self.found {
            None => names,
            Some(found) => names.intersection(found).cloned().collect(),
        })
    }
}
