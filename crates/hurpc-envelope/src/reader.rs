use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use hurpc_transport::IpcStream;
use tracing::debug;

use crate::codec::{decode_envelope, EnvelopeConfig};
use crate::envelope::Envelope;
use crate::error::{EnvelopeError, Result};

/// Reads complete envelopes from any `Read` stream.
///
/// Reads are buffered in `read_buffer_size` chunks; callers always get
/// whole envelopes, one after another, with no external framing.
pub struct EnvelopeReader<T> {
    inner: T,
    buf: BytesMut,
    chunk: Vec<u8>,
    config: EnvelopeConfig,
}

impl<T: Read> EnvelopeReader<T> {
    /// Create a new envelope reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, EnvelopeConfig::default())
    }

    /// Create a new envelope reader with explicit configuration.
    pub fn with_config(inner: T, config: EnvelopeConfig) -> Self {
        let size = config.read_buffer_size.max(1);
        Self {
            inner,
            buf: BytesMut::with_capacity(size),
            chunk: vec![0u8; size],
            config,
        }
    }

    /// Read the next complete envelope (blocking).
    ///
    /// Returns `Err(EnvelopeError::ConnectionClosed)` when end-of-stream is
    /// reached between envelopes and `Err(EnvelopeError::Truncated)` when it
    /// cuts one off.
    pub fn read_envelope(&mut self) -> Result<Envelope> {
        loop {
            if let Some(envelope) = decode_envelope(&mut self.buf, self.config.max_envelope_size)? {
                return Ok(envelope);
            }

            let read = match self.inner.read(&mut self.chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(EnvelopeError::Io(err)),
            };

            if read == 0 {
                if self.buf.is_empty() {
                    return Err(EnvelopeError::ConnectionClosed);
                }
                let buffered = self.buf.len();
                debug!(buffered, "stream closed mid-envelope");
                return Err(EnvelopeError::Truncated { buffered });
            }

            self.buf.extend_from_slice(&self.chunk[..read]);
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current reader configuration.
    pub fn config(&self) -> &EnvelopeConfig {
        &self.config
    }
}

impl EnvelopeReader<IpcStream> {
    /// Create a reader for `IpcStream` and apply the read deadline from config.
    pub fn with_config_ipc(inner: IpcStream, config: EnvelopeConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(crate::transport_to_envelope_error)?;
        Ok(Self::with_config(inner, config))
    }
}
