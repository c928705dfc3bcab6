//! TCP agent fetcher
//!
//! Connects to the agent port and reads until EOF:
//! - the first two bytes name the transport (plain, legacy encrypted, TLS)
//! - the encryption policy decides whether that transport is acceptable
//! - TLS responses carry a versioned, possibly compressed envelope
//! - legacy encrypted responses are decrypted with the pre-shared secret
//!
//! Connecting is bounded by the configured timeout; reading is not. A dead
//! peer is detected by TCP keepalive instead.

use rustls::pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::RawFetcher;
use crate::error::FetchFailure;
use crate::mode::Mode;
use crate::protocol::{
    decrypt_by_agent_protocol, validate_agent_protocol, AgentCtlMessage, DecryptError, ParseError,
    TcpEncryptionHandling, TransportProtocol,
};
use crate::types::{HostName, RawData};

pub const DEFAULT_AGENT_PORT: u16 = 6556;
const MIN_PAYLOAD_LEN: usize = 16;
/// Upper bound on what one agent may send.
pub const MAX_AGENT_OUTPUT: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressFamily {
    Inet,
    Inet6,
}

/// TCP keepalive: probes start after `idle`, then every `interval`, `count` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepAlive {
    pub idle: Duration,
    pub interval: Duration,
    pub count: u32,
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(120),
            interval: Duration::from_secs(10),
            count: 3,
        }
    }
}

impl KeepAlive {
    /// Silence after which the peer is declared dead.
    pub fn dead_peer_after(&self) -> Duration {
        self.idle + self.interval * self.count
    }
}

/// Client credentials for the TLS channel to the agent controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsClientSettings {
    pub ca_file: PathBuf,
    pub client_cert_file: PathBuf,
    #[serde(default)]
    pub client_key_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpParams {
    pub family: AddressFamily,
    pub address: (String, u16),
    pub host_name: HostName,
    pub timeout: Duration,
    pub encryption_handling: TcpEncryptionHandling,
    pub pre_shared_secret: Option<String>,
    /// Set once the host is registered with the agent controller.
    #[serde(default)]
    pub controller_uuid: Option<Uuid>,
    #[serde(default)]
    pub keepalive: KeepAlive,
    #[serde(default)]
    pub tls: Option<TlsClientSettings>,
}

impl TcpParams {
    pub fn new(host_name: HostName, address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            family: AddressFamily::Inet,
            address: (address.into(), DEFAULT_AGENT_PORT),
            host_name,
            timeout,
            encryption_handling: TcpEncryptionHandling::AnyAndPlain,
            pre_shared_secret: None,
            controller_uuid: None,
            keepalive: KeepAlive::default(),
            tls: None,
        }
    }

    fn address_display(&self) -> String {
        format!("{}:{}", self.address.0, self.address.1)
    }
}

/// Connected socket as seen by the fetcher.
pub trait AgentSocket: Read + Write + Send {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
    fn set_keepalive(&mut self, keepalive: &KeepAlive) -> io::Result<()>;
    fn shutdown(&mut self) -> io::Result<()>;
}

pub trait Connector: Send + Sync {
    fn connect(&self, addr: SocketAddr, timeout: Duration) -> io::Result<Box<dyn AgentSocket>>;
}

/// Wraps a connected socket into a TLS client stream.
pub trait TlsWrapper: Send + Sync {
    fn wrap(&self, socket: Box<dyn AgentSocket>, server_name: &str) -> Result<Box<dyn Read + Send>, FetchFailure>;
}

impl AgentSocket for TcpStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn set_keepalive(&mut self, keepalive: &KeepAlive) -> io::Result<()> {
        use nix::sys::socket::{setsockopt, sockopt};
        let secs = |d: Duration| u32::try_from(d.as_secs()).unwrap_or(u32::MAX);
        setsockopt(&*self, sockopt::KeepAlive, &true)?;
        setsockopt(&*self, sockopt::TcpKeepIdle, &secs(keepalive.idle))?;
        setsockopt(&*self, sockopt::TcpKeepInterval, &secs(keepalive.interval))?;
        setsockopt(&*self, sockopt::TcpKeepCount, &keepalive.count)?;
        Ok(())
    }

    #[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
    fn set_keepalive(&mut self, _keepalive: &KeepAlive) -> io::Result<()> {
        use nix::sys::socket::{setsockopt, sockopt};
        setsockopt(&*self, sockopt::KeepAlive, &true)?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn set_keepalive(&mut self, _keepalive: &KeepAlive) -> io::Result<()> {
        Ok(())
    }

    fn shutdown(&mut self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

/// Plain OS sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(&self, addr: SocketAddr, timeout: Duration) -> io::Result<Box<dyn AgentSocket>> {
        let stream = if timeout.is_zero() {
            TcpStream::connect(addr)?
        } else {
            TcpStream::connect_timeout(&addr, timeout)?
        };
        Ok(Box::new(stream))
    }
}

/// rustls client authenticating against the site CA.
#[derive(Debug, Clone, Default)]
pub struct RustlsWrapper {
    settings: Option<TlsClientSettings>,
}

impl RustlsWrapper {
    pub fn new(settings: Option<TlsClientSettings>) -> Self {
        Self { settings }
    }

    fn client_config(&self) -> Result<ClientConfig, FetchFailure> {
        let settings = self
            .settings
            .as_ref()
            .ok_or_else(|| FetchFailure::transport("TLS requested but no client certificate is configured"))?;
        let tls_error = |what: &str, e: &dyn fmt::Display| FetchFailure::transport(format!("TLS setup failed ({what}): {e}"));

        let mut roots = RootCertStore::empty();
        for cert in CertificateDer::pem_file_iter(&settings.ca_file).map_err(|e| tls_error("CA file", &e))? {
            let cert = cert.map_err(|e| tls_error("CA file", &e))?;
            roots.add(cert).map_err(|e| tls_error("CA certificate", &e))?;
        }

        let chain = CertificateDer::pem_file_iter(&settings.client_cert_file)
            .map_err(|e| tls_error("client certificate", &e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| tls_error("client certificate", &e))?;
        let key_file = settings.client_key_file.as_ref().unwrap_or(&settings.client_cert_file);
        let key = PrivateKeyDer::from_pem_file(key_file).map_err(|e| tls_error("client key", &e))?;

        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| tls_error("protocol versions", &e))?
            .with_root_certificates(roots)
            .with_client_auth_cert(chain, key)
            .map_err(|e| tls_error("client auth", &e))
    }
}

impl TlsWrapper for RustlsWrapper {
    fn wrap(&self, socket: Box<dyn AgentSocket>, server_name: &str) -> Result<Box<dyn Read + Send>, FetchFailure> {
        let config = self.client_config()?;
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|e| FetchFailure::transport(format!("Invalid TLS server name {server_name:?}: {e}")))?;
        let connection = ClientConnection::new(Arc::new(config), name)
            .map_err(|e| FetchFailure::transport(format!("TLS setup failed: {e}")))?;
        Ok(Box::new(StreamOwned::new(connection, socket)))
    }
}

pub struct TcpFetcher {
    params: TcpParams,
    connector: Arc<dyn Connector>,
    tls: Arc<dyn TlsWrapper>,
    socket: Option<Box<dyn AgentSocket>>,
}

impl TcpFetcher {
    pub fn new(params: TcpParams) -> Self {
        let tls = Arc::new(RustlsWrapper::new(params.tls.clone()));
        Self {
            params,
            connector: Arc::new(TcpConnector),
            tls,
            socket: None,
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_tls(mut self, tls: Arc<dyn TlsWrapper>) -> Self {
        self.tls = tls;
        self
    }

    pub fn params(&self) -> &TcpParams {
        &self.params
    }

    fn resolve(&self) -> Result<SocketAddr, FetchFailure> {
        let (host, port) = &self.params.address;
        let wanted_v6 = self.params.family == AddressFamily::Inet6;
        (host.as_str(), *port)
            .to_socket_addrs()
            .map_err(|e| FetchFailure::transport(format!("Cannot resolve {}: {}", self.params.address_display(), e)))?
            .find(|addr| addr.is_ipv6() == wanted_v6)
            .ok_or_else(|| FetchFailure::transport(format!("No address of the configured family for {}", self.params.address_display())))
    }

    fn connected(&mut self) -> Result<&mut Box<dyn AgentSocket>, FetchFailure> {
        self.socket.as_mut().ok_or_else(|| FetchFailure::transport("Not connected"))
    }

    fn empty_output(&self) -> ParseError {
        ParseError::EmptyOutput(format!("Empty output from host {}", self.params.address_display()))
    }

    fn get_agent_data(&mut self) -> Result<(Vec<u8>, TransportProtocol), FetchFailure> {
        let marker = {
            let socket = self.connected()?;
            read_up_to(socket, 2).map_err(|e| FetchFailure::from_io("Communication failed", e))?
        };
        if marker.is_empty() {
            return Err(self.empty_output().into());
        }
        let protocol = TransportProtocol::from_marker(&marker)?;
        validate_agent_protocol(
            protocol,
            self.params.encryption_handling,
            self.params.controller_uuid.is_some(),
        )?;

        if protocol != TransportProtocol::Tls {
            let data = recvall(self.connected()?, MAX_AGENT_OUTPUT)
                .map_err(|e| FetchFailure::from_io("Communication failed", e))?;
            return Ok((data, protocol));
        }

        let controller_uuid = self
            .params
            .controller_uuid
            .ok_or_else(|| FetchFailure::transport("Agent controller not registered"))?;
        let socket = self
            .socket
            .take()
            .ok_or_else(|| FetchFailure::transport("Not connected"))?;
        debug!("Reading data from agent via TLS socket");
        let mut stream = self.tls.wrap(socket, &controller_uuid.to_string())?;
        let raw = recvall(&mut stream, MAX_AGENT_OUTPUT)
            .map_err(|e| FetchFailure::from_io("TLS communication failed", e))?;
        let payload = AgentCtlMessage::from_bytes(&raw)?.payload;
        if payload.len() <= 2 {
            return Err(self.empty_output().into());
        }
        let inner = TransportProtocol::from_marker(&payload[..2])?;
        Ok((payload[2..].to_vec(), inner))
    }

    fn decrypt(&self, protocol: TransportProtocol, output: Vec<u8>) -> Result<Vec<u8>, FetchFailure> {
        if output.is_empty() {
            return Ok(output);
        }
        if protocol == TransportProtocol::Plain {
            let mut plain = protocol.marker().to_vec();
            plain.extend(output);
            return Ok(plain);
        }
        if !protocol.is_legacy_encrypted() {
            return Err(DecryptError::Unsupported(protocol).into());
        }
        let secret = self.params.pre_shared_secret.as_deref().ok_or_else(|| {
            FetchFailure::transport("Agent output is encrypted but no secret for decryption is configured")
        })?;
        Ok(decrypt_by_agent_protocol(secret, protocol, &output)?)
    }

    fn validate_decrypted_data(&self, output: Vec<u8>) -> Result<Vec<u8>, FetchFailure> {
        if output.len() < MIN_PAYLOAD_LEN {
            return Err(ParseError::TooShort {
                address: self.params.address_display(),
                payload: output,
            }
            .into());
        }
        Ok(output)
    }
}

impl RawFetcher for TcpFetcher {
    fn open(&mut self) -> Result<(), FetchFailure> {
        let addr = self.resolve()?;
        debug!("Connecting to {} (timeout {:?})", addr, self.params.timeout);
        let mut socket = self
            .connector
            .connect(addr, self.params.timeout)
            .map_err(|e| FetchFailure::from_io(&format!("Connecting to {addr} failed"), e))?;
        // reads are unbounded; keepalive detects dead peers
        socket
            .set_read_timeout(None)
            .map_err(|e| FetchFailure::from_io("Configuring socket failed", e))?;
        socket
            .set_keepalive(&self.params.keepalive)
            .map_err(|e| FetchFailure::from_io("Configuring keepalive failed", e))?;
        self.socket = Some(socket);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            debug!("Closing TCP connection to {}", self.params.address_display());
            if let Err(e) = socket.shutdown() {
                if e.kind() != io::ErrorKind::NotConnected {
                    warn!("Shutting down connection to {} failed: {}", self.params.address_display(), e);
                }
            }
        }
    }

    fn fetch_raw(&mut self, _mode: Mode) -> Result<RawData, FetchFailure> {
        let (output, protocol) = self.get_agent_data()?;
        let output = self.decrypt(protocol, output)?;
        Ok(RawData::Agent(self.validate_decrypted_data(output)?))
    }
}

impl fmt::Display for TcpFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TcpFetcher({}, host={})", self.params.address_display(), self.params.host_name)
    }
}

fn read_up_to(reader: &mut dyn Read, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(len);
    reader.take(len as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Reads until EOF; a TLS peer closing without close_notify counts as EOF.
fn recvall(reader: &mut dyn Read, limit: usize) -> io::Result<Vec<u8>> {
    let mut data = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) if data.len() + n > limit => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("agent output exceeds {limit} bytes"),
                ))
            }
            Ok(n) => data.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_timeout_kind;

    #[test]
    fn default_keepalive_declares_peer_dead_after_150s() {
        assert_eq!(KeepAlive::default().dead_peer_after(), Duration::from_secs(150));
    }

    #[test]
    fn read_up_to_stops_at_eof() {
        let mut data: &[u8] = b"<";
        assert_eq!(read_up_to(&mut data, 2).unwrap(), b"<");
    }

    #[test]
    fn recvall_refuses_oversized_output() {
        let mut data: &[u8] = &[b'x'; 100];
        assert_eq!(recvall(&mut data, 100).unwrap().len(), 100);

        let mut data: &[u8] = &[b'x'; 101];
        let err = recvall(&mut data, 100).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(!is_timeout_kind(err.kind()));
    }

    #[test]
    fn params_roundtrip_through_json() {
        let mut params = TcpParams::new(HostName::new("heute"), "1.2.3.4", Duration::from_secs_f64(0.1));
        params.encryption_handling = TcpEncryptionHandling::AnyEncrypted;
        params.pre_shared_secret = Some("secret".into());
        params.controller_uuid = Some(Uuid::new_v4());
        let json = serde_json::to_string(&params).unwrap();
        assert_eq!(serde_json::from_str::<TcpParams>(&json).unwrap(), params);
    }
}
