//! Versioned envelope sent by the agent controller inside the TLS channel
//!
//! Layout: `version: u16 (big endian) | compression: u8 | payload`.
//! Version 0 is the only one known. The decompressed payload starts with a
//! transport marker of its own.

use flate2::read::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use std::io::{self, Read};

use super::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    V1,
}

impl Version {
    pub const SIZE: usize = 2;

    pub fn from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        let raw = data.get(..Self::SIZE).ok_or(ParseError::Truncated("version"))?;
        match u16::from_be_bytes([raw[0], raw[1]]) {
            0 => Ok(Version::V1),
            other => Err(ParseError::UnknownVersion(other)),
        }
    }

    pub fn to_bytes(self) -> [u8; 2] {
        match self {
            Version::V1 => 0u16.to_be_bytes(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    Uncompressed,
    Zlib,
}

impl CompressionType {
    pub fn from_byte(byte: u8) -> Result<Self, ParseError> {
        match byte {
            0 => Ok(CompressionType::Uncompressed),
            1 => Ok(CompressionType::Zlib),
            other => Err(ParseError::UnknownCompression(other)),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            CompressionType::Uncompressed => 0,
            CompressionType::Zlib => 1,
        }
    }

    fn decompress(self, data: &[u8]) -> Result<Vec<u8>, ParseError> {
        match self {
            CompressionType::Uncompressed => Ok(data.to_vec()),
            CompressionType::Zlib => {
                let mut out = Vec::new();
                ZlibDecoder::new(data)
                    .read_to_end(&mut out)
                    .map_err(|e| ParseError::Decompress(e.to_string()))?;
                Ok(out)
            }
        }
    }

    fn compress(self, data: &[u8]) -> io::Result<Vec<u8>> {
        match self {
            CompressionType::Uncompressed => Ok(data.to_vec()),
            CompressionType::Zlib => {
                let mut out = Vec::new();
                ZlibEncoder::new(data, Compression::default()).read_to_end(&mut out)?;
                Ok(out)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderV1 {
    pub compression_type: CompressionType,
}

impl HeaderV1 {
    pub const SIZE: usize = 1;

    pub fn from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        let byte = data.first().ok_or(ParseError::Truncated("compression header"))?;
        Ok(Self {
            compression_type: CompressionType::from_byte(*byte)?,
        })
    }
}

/// Version 1 body: header plus decompressed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageV1 {
    pub header: HeaderV1,
    pub payload: Vec<u8>,
}

impl MessageV1 {
    pub fn from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        let header = HeaderV1::from_bytes(data)?;
        let payload = header.compression_type.decompress(&data[HeaderV1::SIZE..])?;
        Ok(Self { header, payload })
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut out = vec![self.header.compression_type.to_byte()];
        out.extend(self.header.compression_type.compress(&self.payload)?);
        Ok(out)
    }
}

/// Full envelope as read from the TLS stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCtlMessage {
    pub version: Version,
    pub payload: Vec<u8>,
}

impl AgentCtlMessage {
    pub fn from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        let version = Version::from_bytes(data)?;
        let payload = match version {
            Version::V1 => MessageV1::from_bytes(&data[Version::SIZE..])?.payload,
        };
        Ok(Self { version, payload })
    }

    /// Encodes `payload` the way the agent controller sends it.
    pub fn encode(version: Version, compression_type: CompressionType, payload: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = version.to_bytes().to_vec();
        match version {
            Version::V1 => out.extend(
                MessageV1 {
                    header: HeaderV1 { compression_type },
                    payload: payload.to_vec(),
                }
                .to_bytes()?,
            ),
        }
        Ok(out)
    }
}
