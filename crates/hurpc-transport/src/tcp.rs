use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::IpcStream;

/// TCP listener transport.
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpTransport {
    /// Bind and listen on a TCP address (e.g. `0.0.0.0:7080`, `127.0.0.1:0`).
    pub fn bind(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<Self> {
        let listener = TcpListener::bind(&addr).map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let local_addr = listener.local_addr()?;

        info!(%local_addr, "listening on tcp");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept an incoming connection (blocking).
    ///
    /// Returns the stream together with the remote address.
    pub fn accept(&self) -> Result<(IpcStream, SocketAddr)> {
        let (stream, remote) = self.listener.accept().map_err(TransportError::Accept)?;
        stream.set_nodelay(true)?;
        debug!(%remote, "accepted tcp connection");
        Ok((stream.into(), remote))
    }

    /// Dial a TCP address, giving up after `timeout` per resolved address.
    pub fn connect(
        addr: impl ToSocketAddrs + std::fmt::Display,
        timeout: Duration,
    ) -> Result<IpcStream> {
        let target = addr.to_string();
        let connect_err = |source: std::io::Error| TransportError::Connect {
            addr: target.clone(),
            source,
        };

        let mut last_err = None;
        for resolved in addr.to_socket_addrs().map_err(connect_err)? {
            match TcpStream::connect_timeout(&resolved, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    debug!(%resolved, "connected over tcp");
                    return Ok(stream.into());
                }
                Err(err) => last_err = Some(err),
            }
        }

        Err(match last_err {
            Some(source) => connect_err(source),
            None => TransportError::Unresolved(addr.to_string()),
        })
    }

    /// The locally bound address (useful after binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
