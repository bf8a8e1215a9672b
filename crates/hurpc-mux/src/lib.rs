//! Bidirectional call multiplexing over one duplex connection.
//!
//! Both ends of a connection are symmetric: each can invoke methods the
//! other has registered while serving the other's calls, all over a single
//! stream. Responses are matched to waiting callers by token, so any number
//! of calls can be in flight in either direction.

pub mod config;
pub mod connector;
pub mod correlation;
pub mod error;
pub mod gate;
pub mod listener;
pub mod mux;
pub mod peers;
pub mod registry;

pub use config::MuxConfig;
#[cfg(unix)]
pub use connector::connect_unix;
pub use connector::{connect, connect_tcp, DEFAULT_DIAL_TIMEOUT};
pub use correlation::CorrelationTable;
pub use error::{MuxError, Result, METHOD_NOT_FOUND_PREFIX};
pub use gate::WriteGate;
pub use listener::MuxListener;
pub use mux::Multiplexer;
pub use peers::PeerTable;
pub use registry::{Handler, HandlerError, HandlerRegistry, HandlerResult};
