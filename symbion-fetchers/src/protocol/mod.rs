//! Agent wire protocol
//!
//! - [`transport`]: the 2-byte transport marker opening every agent response
//! - [`agent_ctl`]: versioned, optionally compressed envelope inside TLS
//! - [`encryption`]: legacy symmetric decryption of pre-shared-secret output
//! - [`policy`]: which transports the monitoring site accepts for a host

pub mod agent_ctl;
pub mod encryption;
pub mod policy;
pub mod transport;

pub use agent_ctl::{AgentCtlMessage, CompressionType, HeaderV1, MessageV1, Version};
pub use encryption::{decrypt_by_agent_protocol, DecryptError};
pub use policy::{validate_agent_protocol, PolicyRejection, TcpEncryptionHandling};
pub use transport::TransportProtocol;

use thiserror::Error;

/// Wire bytes that cannot be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Unknown transport protocol: {}", escape_bytes(.0))]
    UnknownProtocol(Vec<u8>),
    #[error("{0}")]
    EmptyOutput(String),
    #[error("Unsupported agent control version: {0}")]
    UnknownVersion(u16),
    #[error("Unknown compression type: {0}")]
    UnknownCompression(u8),
    #[error("Truncated agent control message: missing {0}")]
    Truncated(&'static str),
    #[error("Failed to decompress agent control payload: {0}")]
    Decompress(String),
    #[error("Too short payload from agent at {address}: {}", escape_bytes(.payload))]
    TooShort { address: String, payload: Vec<u8> },
}

/// `b'...'` rendering of raw bytes for error messages.
pub fn escape_bytes(bytes: &[u8]) -> String {
    let escaped: String = bytes
        .iter()
        .flat_map(|b| std::ascii::escape_default(*b))
        .map(char::from)
        .collect();
    format!("b'{escaped}'")
}
