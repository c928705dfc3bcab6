use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::TransportProtocol;

/// Site-wide rule for which transports a host may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TcpEncryptionHandling {
    TlsEncryptedOnly,
    AnyEncrypted,
    AnyAndPlain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PolicyRejection {
    #[error("Refused: Host is registered for TLS but not using it")]
    RegisteredWithoutTls,
    #[error("Refused: TLS is enforced but host is not using it")]
    TlsEnforced,
    #[error("Refused: Encryption is enforced but agent output is plaintext")]
    PlaintextRefused,
}

/// Decides whether a response in `protocol` may be processed.
///
/// TLS is always accepted. A host registered with the agent controller must
/// use TLS whatever the configured handling.
pub fn validate_agent_protocol(
    protocol: TransportProtocol,
    handling: TcpEncryptionHandling,
    is_registered: bool,
) -> Result<(), PolicyRejection> {
    if protocol == TransportProtocol::Tls {
        return Ok(());
    }
    if is_registered {
        return Err(PolicyRejection::RegisteredWithoutTls);
    }
    match handling {
        TcpEncryptionHandling::TlsEncryptedOnly => Err(PolicyRejection::TlsEnforced),
        TcpEncryptionHandling::AnyEncrypted if protocol == TransportProtocol::Plain => {
            Err(PolicyRejection::PlaintextRefused)
        }
        TcpEncryptionHandling::AnyEncrypted | TcpEncryptionHandling::AnyAndPlain => Ok(()),
    }
}
