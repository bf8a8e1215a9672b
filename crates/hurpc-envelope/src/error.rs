/// Errors that can occur during envelope encoding/decoding.
///
/// Any of these raised while reading is fatal for the connection.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The envelope header contains an invalid magic number.
    #[error("invalid envelope magic (expected 0x4852 \"HR\")")]
    InvalidMagic,

    /// The encoded body exceeds the configured maximum size.
    #[error("envelope too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The body is inconsistent with its own field lengths or flags.
    #[error("malformed envelope: {0}")]
    Malformed(&'static str),

    /// A method name does not fit the wire's 16-bit length field.
    #[error("method name too long ({0} bytes)")]
    MethodTooLong(usize),

    /// An I/O error occurred while reading or writing envelopes.
    #[error("envelope I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed cleanly, between envelopes.
    #[error("connection closed")]
    ConnectionClosed,

    /// The connection was closed partway through an envelope.
    #[error("connection closed mid-envelope ({buffered} bytes buffered)")]
    Truncated { buffered: usize },

    /// An earlier write failed and may have left a partial envelope on the
    /// stream; nothing more can be written.
    #[error("writer unusable after an earlier failed write")]
    WriterBroken,
}

impl EnvelopeError {
    /// Whether this error came from a read or write deadline expiring.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            EnvelopeError::Io(err)
                if matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut)
        )
    }
}

pub type Result<T> = std::result::Result<T, EnvelopeError>;
