use std::net::{SocketAddr, ToSocketAddrs};
#[cfg(unix)]
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use hurpc_transport::{IpcStream, TcpTransport};
#[cfg(unix)]
use hurpc_transport::UnixDomainSocket;

use crate::config::MuxConfig;
use crate::error::Result;
use crate::mux::Multiplexer;

enum Transport {
    Tcp(TcpTransport),
    #[cfg(unix)]
    Unix(UnixDomainSocket),
}

/// Accepts connections and binds each to a fresh [`Multiplexer`].
///
/// The dispatch loop of an accepted multiplexer is not started; the caller
/// registers handlers first and then runs or spawns it.
pub struct MuxListener {
    transport: Transport,
    config: MuxConfig,
    next_peer_id: AtomicU64,
}

impl MuxListener {
    /// Listen on a TCP address.
    pub fn bind_tcp(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<Self> {
        Ok(Self::new(Transport::Tcp(TcpTransport::bind(addr)?)))
    }

    /// Listen on a Unix domain socket path.
    #[cfg(unix)]
    pub fn bind_unix(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Transport::Unix(UnixDomainSocket::bind(path)?)))
    }

    fn new(transport: Transport) -> Self {
        Self {
            transport,
            config: MuxConfig::default(),
            next_peer_id: AtomicU64::new(1),
        }
    }

    /// Override the configuration applied to accepted connections.
    pub fn with_config(mut self, config: MuxConfig) -> Self {
        self.config = config;
        self
    }

    /// Accept the next connection, assigning an id of the form `peer-N`.
    pub fn accept(&self) -> Result<Multiplexer> {
        let stream = self.accept_stream()?;
        let id = self.next_peer_id.fetch_add(1, Ordering::Relaxed);
        Multiplexer::with_id(format!("peer-{id}"), stream, self.config.clone())
    }

    fn accept_stream(&self) -> Result<IpcStream> {
        let stream = match &self.transport {
            Transport::Tcp(tcp) => tcp.accept()?.0,
            #[cfg(unix)]
            Transport::Unix(uds) => uds.accept()?,
        };
        Ok(stream)
    }

    /// Bound TCP address, if listening on TCP.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.transport {
            Transport::Tcp(tcp) => Some(tcp.local_addr()),
            #[cfg(unix)]
            Transport::Unix(_) => None,
        }
    }

    /// Bound socket path, if listening on a Unix domain socket.
    #[cfg(unix)]
    pub fn path(&self) -> Option<&Path> {
        match &self.transport {
            Transport::Tcp(_) => None,
            Transport::Unix(uds) => Some(uds.path()),
        }
    }

    pub fn config(&self) -> &MuxConfig {
        &self.config
    }
}
