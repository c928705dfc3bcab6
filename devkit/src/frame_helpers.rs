/*!
Trames d'agent prêtes à l'emploi

Construit les réponses telles qu'un agent les envoie sur le port 6556 :
sortie en clair, sortie chiffrée (ancien schéma), enveloppe TLS.
Les vecteurs chiffrés ont été produits avec `openssl enc` (phrase "cmk").
*/

use anyhow::{Context, Result};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;
use symbion_fetchers::protocol::{AgentCtlMessage, CompressionType, TransportProtocol, Version};

/// Phrase secrète des vecteurs ci-dessous
pub const SECRET: &str = "cmk";

/// Sortie d'agent de référence (au moins 16 octets)
pub const AGENT_OUTPUT: &[u8] = b"<<<check_mk>>>\nVersion: 2.2.0p1\nAgentOS: linux\n";

/// `AGENT_OUTPUT` chiffré en PBKDF2 (sel 0f1e2d3c4b5a6978), en hexadécimal
const PBKDF2_HEX: &str = "53616c7465645f5f0f1e2d3c4b5a6978b78c9081a35ae106d65bfc79a5d9a92e734f71ba5596e2b1afd3ee2288569639e0ee6eae787197bd41a0499ecbde998e";

/// `AGENT_OUTPUT` chiffré avec la dérivation SHA256 sans sel
const SHA256_HEX: &str = "b4268e61159e485bbde14192f580aa0f1e4e88686c2e6f5676d2edb5ee311ad1a2f493a8a6540a8209a34346b74c3602";

pub fn pbkdf2_ciphertext() -> Result<Vec<u8>> {
    hex::decode(PBKDF2_HEX).context("PBKDF2 vector")
}

pub fn sha256_ciphertext() -> Result<Vec<u8>> {
    hex::decode(SHA256_HEX).context("SHA256 vector")
}

/// Sortie en clair : elle commence déjà par `<<`
pub fn plain_frame(output: &[u8]) -> Vec<u8> {
    output.to_vec()
}

/// Marqueur de transport suivi de la charge utile
pub fn frame(protocol: TransportProtocol, payload: &[u8]) -> Vec<u8> {
    let mut out = protocol.marker().to_vec();
    out.extend_from_slice(payload);
    out
}

/// Réponse TLS : `16` puis l'enveloppe versionnée contenant `inner_protocol` + `output`
pub fn tls_frame(compression: CompressionType, inner_protocol: TransportProtocol, output: &[u8]) -> Result<Vec<u8>> {
    let inner = match inner_protocol {
        // la sortie en clair porte déjà son marqueur
        TransportProtocol::Plain => output.to_vec(),
        other => frame(other, output),
    };
    let envelope = AgentCtlMessage::encode(Version::V1, compression, &inner).context("agent control envelope")?;
    Ok(frame(TransportProtocol::Tls, &envelope))
}

/// Flux zlib brut, pour fabriquer des enveloppes à la main
pub fn zlib(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish().context("zlib stream")
}

/// Réponse TLS construite octet par octet (version et compression arbitraires)
pub fn raw_tls_frame(version: u16, compression: u8, body: &[u8]) -> Vec<u8> {
    let mut envelope = version.to_be_bytes().to_vec();
    envelope.push(compression);
    envelope.extend_from_slice(body);
    frame(TransportProtocol::Tls, &envelope)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_frame_starts_with_marker_and_version() {
        let frame = tls_frame(CompressionType::Uncompressed, TransportProtocol::Plain, AGENT_OUTPUT).unwrap();
        assert_eq!(&frame[..2], b"16");
        assert_eq!(&frame[2..4], &[0, 0]);
        assert_eq!(frame[4], 0);
        assert_eq!(&frame[5..], AGENT_OUTPUT);
    }

    #[test]
    fn vectors_decode() {
        assert_eq!(&pbkdf2_ciphertext().unwrap()[..8], b"Salted__");
        assert_eq!(sha256_ciphertext().unwrap().len() % 16, 0);
    }
}
