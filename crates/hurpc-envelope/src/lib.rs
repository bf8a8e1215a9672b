//! Self-delimiting call envelopes over a byte stream.
//!
//! Every call request and response travels as one envelope:
//! - A 2-byte magic number ("HR") for stream synchronization
//! - A 4-byte little-endian body length
//! - A body carrying token, completion flag, method, error text and payload
//!
//! Consecutive envelopes decode one after another with no outer framing.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_envelope, encode_envelope, EnvelopeConfig, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_ENVELOPE,
    HEADER_SIZE,
};
pub use envelope::Envelope;
pub use error::{EnvelopeError, Result};
pub use reader::EnvelopeReader;
pub use writer::EnvelopeWriter;

fn transport_to_envelope_error(err: hurpc_transport::TransportError) -> EnvelopeError {
    match err {
        hurpc_transport::TransportError::Io(io) | hurpc_transport::TransportError::Accept(io) => {
            EnvelopeError::Io(io)
        }
        hurpc_transport::TransportError::Bind { source, .. }
        | hurpc_transport::TransportError::Connect { source, .. } => EnvelopeError::Io(source),
        other => EnvelopeError::Io(std::io::Error::other(other.to_string())),
    }
}
