use std::net::ToSocketAddrs;
#[cfg(unix)]
use std::path::Path;
use std::time::Duration;

use hurpc_transport::TcpTransport;
#[cfg(unix)]
use hurpc_transport::UnixDomainSocket;

use crate::config::MuxConfig;
use crate::error::Result;
use crate::mux::Multiplexer;

/// Dial timeout used by [`connect`].
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Dial a TCP peer with default settings.
pub fn connect(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<Multiplexer> {
    connect_tcp(addr, DEFAULT_DIAL_TIMEOUT, MuxConfig::default())
}

/// Dial a TCP peer and bind the connection to a new multiplexer.
///
/// The dispatch loop is not started.
pub fn connect_tcp(
    addr: impl ToSocketAddrs + std::fmt::Display,
    dial_timeout: Duration,
    config: MuxConfig,
) -> Result<Multiplexer> {
    let id = addr.to_string();
    let stream = TcpTransport::connect(addr, dial_timeout)?;
    Multiplexer::with_id(id, stream, config)
}

/// Connect to a Unix domain socket and bind it to a new multiplexer.
#[cfg(unix)]
pub fn connect_unix(path: impl AsRef<Path>, config: MuxConfig) -> Result<Multiplexer> {
    let path = path.as_ref();
    let stream = UnixDomainSocket::connect(path)?;
    Multiplexer::with_id(path.display().to_string(), stream, config)
}
