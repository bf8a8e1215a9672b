use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use hurpc_transport::IpcStream;

use crate::codec::{body_size, encode_envelope, EnvelopeConfig};
use crate::envelope::Envelope;
use crate::error::{EnvelopeError, Result};

/// Writes complete envelopes to any `Write` stream.
///
/// Each envelope is encoded into an internal buffer, written out in full and
/// flushed. A write deadline on the stream surfaces as `Io(WouldBlock)` or
/// `Io(TimedOut)`; it is not retried.
///
/// A failed write may leave part of an envelope on the stream, after which
/// the peer can no longer find envelope boundaries. The writer therefore
/// refuses every later write with [`EnvelopeError::WriterBroken`].
pub struct EnvelopeWriter<T> {
    inner: T,
    buf: BytesMut,
    config: EnvelopeConfig,
    broken: bool,
}

impl<T: Write> EnvelopeWriter<T> {
    /// Create a new envelope writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, EnvelopeConfig::default())
    }

    /// Create a new envelope writer with explicit configuration.
    pub fn with_config(inner: T, config: EnvelopeConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(config.write_buffer_size),
            config,
            broken: false,
        }
    }

    /// Encode, write and flush one envelope (blocking).
    pub fn write_envelope(&mut self, envelope: &Envelope) -> Result<()> {
        if self.broken {
            return Err(EnvelopeError::WriterBroken);
        }

        let size = body_size(envelope);
        if size > self.config.max_envelope_size {
            return Err(EnvelopeError::PayloadTooLarge {
                size,
                max: self.config.max_envelope_size,
            });
        }

        self.buf.clear();
        encode_envelope(envelope, &mut self.buf)?;

        let outcome = self.write_buffered();

        // Don't let one oversized envelope pin a huge buffer for the connection.
        if self.buf.capacity() > self.config.write_buffer_size.saturating_mul(4) {
            self.buf = BytesMut::with_capacity(self.config.write_buffer_size);
        }

        if outcome.is_err() {
            self.broken = true;
        }
        outcome
    }

    fn write_buffered(&mut self) -> Result<()> {
        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(EnvelopeError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(EnvelopeError::Io(err)),
            }
        }
        self.flush()
    }

    /// Whether an earlier write failed, leaving the writer unusable.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(EnvelopeError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current writer configuration.
    pub fn config(&self) -> &EnvelopeConfig {
        &self.config
    }
}

impl EnvelopeWriter<IpcStream> {
    /// Create a writer for `IpcStream` and apply the write deadline from config.
    pub fn with_config_ipc(inner: IpcStream, config: EnvelopeConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(crate::transport_to_envelope_error)?;
        Ok(Self::with_config(inner, config))
    }
}
