use serde::{Deserialize, Serialize};

use super::ParseError;

/// First two bytes of an agent response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportProtocol {
    Plain,
    Md5,
    Sha256,
    Pbkdf2,
    Tls,
    None,
}

impl TransportProtocol {
    pub const ALL: [TransportProtocol; 6] = [
        TransportProtocol::Plain,
        TransportProtocol::Md5,
        TransportProtocol::Sha256,
        TransportProtocol::Pbkdf2,
        TransportProtocol::Tls,
        TransportProtocol::None,
    ];

    pub fn marker(&self) -> &'static [u8; 2] {
        match self {
            TransportProtocol::Plain => b"<<",
            TransportProtocol::Md5 => b"00",
            TransportProtocol::Sha256 => b"02",
            TransportProtocol::Pbkdf2 => b"03",
            TransportProtocol::Tls => b"16",
            TransportProtocol::None => b"99",
        }
    }

    pub fn from_marker(raw: &[u8]) -> Result<Self, ParseError> {
        Self::ALL
            .into_iter()
            .find(|p| p.marker().as_slice() == raw)
            .ok_or_else(|| ParseError::UnknownProtocol(raw.to_vec()))
    }

    /// Legacy symmetric encryption with the pre-shared secret.
    pub fn is_legacy_encrypted(&self) -> bool {
        matches!(self, TransportProtocol::Md5 | TransportProtocol::Sha256 | TransportProtocol::Pbkdf2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_are_unique_and_parse_back() {
        for protocol in TransportProtocol::ALL {
            assert_eq!(TransportProtocol::from_marker(protocol.marker()), Ok(protocol));
        }
    }

    #[test]
    fn only_secret_based_schemes_are_legacy_encrypted() {
        let legacy: Vec<_> = TransportProtocol::ALL.into_iter().filter(|p| p.is_legacy_encrypted()).collect();
        assert_eq!(legacy.len(), 3);
        assert!(!TransportProtocol::Plain.is_legacy_encrypted());
        assert!(!TransportProtocol::Tls.is_legacy_encrypted());
        assert!(!TransportProtocol::None.is_legacy_encrypted());
    }

    #[test]
    fn unknown_marker_is_a_parse_error() {
        let err = TransportProtocol::from_marker(b"abc").unwrap_err();
        assert_eq!(err.to_string(), "Unknown transport protocol: b'abc'");
    }
}
