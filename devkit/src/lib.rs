/*!
# Symbion DevKit - Stubs et utilitaires pour tester les fetchers

Bibliothèque facilitant les tests des fetchers Symbion avec:
- Sockets et connecteurs simulés (délais de connexion et de données)
- Backends SNMP scriptés et détecteur simulé
- Trames d'agent (clair, chiffré, TLS) et vecteurs de référence
- Harness avec répertoire temporaire et cache en mémoire
*/

pub mod frame_helpers;
pub mod snmp_stub;
pub mod socket_stub;
pub mod test_utils;

pub use snmp_stub::{MockBackendFactory, MockSnmpBackend, StubDetector};
pub use socket_stub::{FakeConnector, PassthroughTls, RefusingConnector, SocketLog};
pub use test_utils::{StubFileCache, TestHarness};
