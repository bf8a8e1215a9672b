use std::time::Duration;

use hurpc_envelope::{EnvelopeConfig, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_ENVELOPE};

use crate::error::{MuxError, Result};

/// Per-connection multiplexer settings.
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Call timeout, also used as the write deadline.
    pub timeout: Duration,
    /// Read deadline for the dispatch loop. `None` lets a link sit idle forever.
    pub read_timeout: Option<Duration>,
    /// Reader buffer size in bytes.
    pub read_buffer_size: usize,
    /// Writer buffer size in bytes.
    pub write_buffer_size: usize,
    /// Maximum encoded envelope body size in bytes.
    pub max_envelope_size: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        let timeout = Duration::from_secs(10);
        Self {
            timeout,
            read_timeout: Some(timeout),
            read_buffer_size: DEFAULT_BUFFER_SIZE,
            write_buffer_size: DEFAULT_BUFFER_SIZE,
            max_envelope_size: DEFAULT_MAX_ENVELOPE,
        }
    }
}

impl MuxConfig {
    /// Timeout in whole seconds plus buffer sizes; reads share the call timeout.
    pub fn from_seconds(
        timeout_secs: u64,
        read_buffer_size: usize,
        write_buffer_size: usize,
    ) -> Self {
        Self::with_timeout(Duration::from_secs(timeout_secs))
            .buffers(read_buffer_size, write_buffer_size)
    }

    /// Defaults with both the call timeout and read deadline set to `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            read_timeout: Some(timeout),
            ..Self::default()
        }
    }

    /// Override the read deadline independently of the call timeout.
    pub fn read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Override reader and writer buffer sizes.
    pub fn buffers(mut self, read_buffer_size: usize, write_buffer_size: usize) -> Self {
        self.read_buffer_size = read_buffer_size;
        self.write_buffer_size = write_buffer_size;
        self
    }

    /// Reject settings the socket layer would refuse.
    pub fn validate(&self) -> Result<()> {
        // Sockets reject a zero timeout.
        if self.timeout.is_zero() {
            return Err(MuxError::InvalidConfig("timeout must be non-zero"));
        }
        if self.read_timeout.is_some_and(|t| t.is_zero()) {
            return Err(MuxError::InvalidConfig("read timeout must be non-zero"));
        }
        if self.read_buffer_size == 0 || self.write_buffer_size == 0 {
            return Err(MuxError::InvalidConfig("buffer sizes must be non-zero"));
        }
        Ok(())
    }

    pub(crate) fn envelope_config(&self) -> EnvelopeConfig {
        EnvelopeConfig {
            max_envelope_size: self.max_envelope_size,
            read_buffer_size: self.read_buffer_size,
            write_buffer_size: self.write_buffer_size,
            read_timeout: self.read_timeout,
            write_timeout: Some(self.timeout),
        }
    }
}
