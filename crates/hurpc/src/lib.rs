//! Bidirectional RPC over a single duplex connection.
//!
//! Two peers share one stream; each registers methods the other may call
//! and both call concurrently in either direction.
//!
//! # Crate Structure
//!
//! - [`transport`]: Duplex byte streams over Unix sockets and TCP
//! - [`envelope`]: Self-delimiting call envelopes and their codec
//! - [`mux`]: The call multiplexer, listener, connector and peer table
//! - [`logging`]: `tracing` subscriber setup for binaries (behind `logging` feature)

/// Re-export transport types.
pub mod transport {
    pub use hurpc_transport::*;
}

/// Re-export envelope types.
pub mod envelope {
    pub use hurpc_envelope::*;
}

/// Re-export multiplexer types.
pub mod mux {
    pub use hurpc_mux::*;
}

#[cfg(feature = "logging")]
pub mod logging;

pub use bytes::Bytes;
pub use hurpc_mux::{Multiplexer, MuxConfig, MuxError, MuxListener, PeerTable};
