/*!
Sockets simulés pour tester le fetcher TCP sans agent réel

- `FakeConnector` : connexion avec délai simulé (timeout de connexion)
- `FakeSocket` : délai avant les données, respecte read timeout et keepalive
- `RefusingConnector` : connexion toujours refusée
- `PassthroughTls` : "TLS" transparent qui note le nom de serveur demandé

Aucune attente réelle : les délais sont comparés arithmétiquement.
*/

use parking_lot::Mutex;
use std::io::{self, Cursor, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use symbion_fetchers::error::FetchFailure;
use symbion_fetchers::fetchers::tcp::{AgentSocket, Connector, KeepAlive, TlsWrapper};

/// Ce que le fetcher a fait avec le socket
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SocketLog {
    pub connected_to: Vec<SocketAddr>,
    pub read_timeout_cleared: bool,
    pub keepalive: Option<KeepAlive>,
    pub shutdowns: usize,
    pub tls_server_names: Vec<String>,
}

pub struct FakeSocket {
    data: Cursor<Vec<u8>>,
    data_wait: Duration,
    read_timeout: Option<Duration>,
    keepalive: Option<KeepAlive>,
    waited: bool,
    log: Arc<Mutex<SocketLog>>,
}

impl FakeSocket {
    /// Vérifie si l'attente simulée des données dépasse une limite active
    fn wait_for_data(&mut self) -> io::Result<()> {
        if self.waited {
            return Ok(());
        }
        self.waited = true;
        if let Some(timeout) = self.read_timeout {
            if self.data_wait > timeout {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "timed out"));
            }
        }
        if let Some(keepalive) = self.keepalive {
            if self.data_wait > keepalive.dead_peer_after() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "connection timed out"));
            }
        }
        Ok(())
    }
}

impl Read for FakeSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.wait_for_data()?;
        self.data.read(buf)
    }
}

impl Write for FakeSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AgentSocket for FakeSocket {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.read_timeout = timeout;
        self.log.lock().read_timeout_cleared = timeout.is_none();
        Ok(())
    }

    fn set_keepalive(&mut self, keepalive: &KeepAlive) -> io::Result<()> {
        self.keepalive = Some(*keepalive);
        self.log.lock().keepalive = Some(*keepalive);
        Ok(())
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.log.lock().shutdowns += 1;
        Ok(())
    }
}

/// Connecteur simulé : délai de connexion, délai des données, contenu
#[derive(Clone)]
pub struct FakeConnector {
    pub data: Vec<u8>,
    pub connect_wait: Duration,
    pub data_wait: Duration,
    log: Arc<Mutex<SocketLog>>,
}

impl FakeConnector {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            connect_wait: Duration::ZERO,
            data_wait: Duration::ZERO,
            log: Arc::new(Mutex::new(SocketLog::default())),
        }
    }

    pub fn with_waits(mut self, connect_wait: Duration, data_wait: Duration) -> Self {
        self.connect_wait = connect_wait;
        self.data_wait = data_wait;
        self
    }

    /// Journal partagé (valable aussi après consommation du connecteur)
    pub fn log(&self) -> Arc<Mutex<SocketLog>> {
        Arc::clone(&self.log)
    }
}

impl Connector for FakeConnector {
    fn connect(&self, addr: SocketAddr, timeout: Duration) -> io::Result<Box<dyn AgentSocket>> {
        if !timeout.is_zero() && self.connect_wait > timeout {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "connection timed out"));
        }
        self.log.lock().connected_to.push(addr);
        log::info!("🔌 [MOCK] Connected to {} ({} bytes ready)", addr, self.data.len());
        Ok(Box::new(FakeSocket {
            data: Cursor::new(self.data.clone()),
            data_wait: self.data_wait,
            // like a real socket: the connect timeout sticks until cleared
            read_timeout: (!timeout.is_zero()).then_some(timeout),
            keepalive: None,
            waited: false,
            log: Arc::clone(&self.log),
        }))
    }
}

/// Connecteur qui refuse toujours
#[derive(Debug, Clone, Copy, Default)]
pub struct RefusingConnector;

impl Connector for RefusingConnector {
    fn connect(&self, _addr: SocketAddr, _timeout: Duration) -> io::Result<Box<dyn AgentSocket>> {
        Err(io::Error::new(io::ErrorKind::ConnectionRefused, "Connection refused"))
    }
}

/// TLS transparent : le flux reste en clair, seul le nom de serveur est noté
#[derive(Clone)]
pub struct PassthroughTls {
    log: Arc<Mutex<SocketLog>>,
}

impl PassthroughTls {
    pub fn new(log: Arc<Mutex<SocketLog>>) -> Self {
        Self { log }
    }
}

impl TlsWrapper for PassthroughTls {
    fn wrap(&self, socket: Box<dyn AgentSocket>, server_name: &str) -> Result<Box<dyn Read + Send>, FetchFailure> {
        self.log.lock().tls_server_names.push(server_name.to_string());
        Ok(Box::new(socket))
    }
}
