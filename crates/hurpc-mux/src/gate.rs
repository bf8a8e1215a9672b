use std::io::Write;
use std::sync::{Mutex, PoisonError};

use hurpc_envelope::{Envelope, EnvelopeWriter, Result};

/// Serializes all writers onto one outbound stream.
///
/// Every `send` encodes, writes and flushes a whole envelope while holding
/// the lock, so envelopes from concurrent threads never interleave on the
/// wire. The write deadline lives on the stream itself. Once a send fails
/// the gate stays failed, since the stream may end in a torn envelope.
pub struct WriteGate<W> {
    writer: Mutex<EnvelopeWriter<W>>,
}

impl<W: Write> WriteGate<W> {
    pub fn new(writer: EnvelopeWriter<W>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Write one envelope atomically with respect to other senders.
    pub fn send(&self, envelope: &Envelope) -> Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_envelope(envelope)
    }

    /// Whether an earlier send failed and the gate refuses further sends.
    pub fn is_broken(&self) -> bool {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_broken()
    }

    /// Recover the writer, e.g. to inspect what was sent.
    pub fn into_inner(self) -> EnvelopeWriter<W> {
        self.writer
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;

    use hurpc_envelope::{EnvelopeError, EnvelopeReader};

    use super::*;

    #[test]
    fn concurrent_senders_never_interleave() {
        let gate = Arc::new(WriteGate::new(EnvelopeWriter::new(Vec::<u8>::new())));

        let senders: Vec<_> = (0..8i64)
            .map(|lane| {
                let gate = Arc::clone(&gate);
                std::thread::spawn(move || {
                    for i in 0..50i64 {
                        let token = lane * 1000 + i;
                        // Large enough that a torn write would be visible.
                        let payload = vec![lane as u8; 4096];
                        gate.send(&Envelope::request(token, format!("lane-{lane}"), payload))
                            .unwrap();
                    }
                })
            })
            .collect();
        for sender in senders {
            sender.join().unwrap();
        }

        let gate = Arc::into_inner(gate).expect("all senders joined");
        let wire = gate.into_inner().into_inner();
        let mut reader = EnvelopeReader::new(Cursor::new(wire));

        let mut seen = 0;
        loop {
            match reader.read_envelope() {
                Ok(envelope) => {
                    let lane = envelope.token / 1000;
                    assert_eq!(envelope.method, format!("lane-{lane}"));
                    assert!(envelope.payload.iter().all(|b| *b == lane as u8));
                    seen += 1;
                }
                Err(EnvelopeError::ConnectionClosed) => break,
                Err(err) => panic!("corrupted stream: {err}"),
            }
        }
        assert_eq!(seen, 8 * 50);
    }

    #[test]
    fn write_failure_is_returned_to_sender() {
        struct Broken;

        impl Write for Broken {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let gate = WriteGate::new(EnvelopeWriter::new(Broken));
        let err = gate
            .send(&Envelope::response(1, &b"x"[..]))
            .unwrap_err();
        assert!(matches!(err, EnvelopeError::Io(e) if e.kind() == std::io::ErrorKind::BrokenPipe));
    }

    #[test]
    fn torn_send_blocks_later_sends() {
        /// Takes 30 bytes, stalls once, then takes everything.
        struct Stalling {
            data: Vec<u8>,
            stalled: bool,
        }

        impl Write for Stalling {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                if !self.stalled {
                    if self.data.len() >= 30 {
                        self.stalled = true;
                        return Err(std::io::Error::from(std::io::ErrorKind::WouldBlock));
                    }
                    let n = (30 - self.data.len()).min(buf.len());
                    self.data.extend_from_slice(&buf[..n]);
                    return Ok(n);
                }
                self.data.extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let gate = WriteGate::new(EnvelopeWriter::new(Stalling {
            data: Vec::new(),
            stalled: false,
        }));

        let first = gate.send(&Envelope::response(1, vec![b'A'; 64]));
        assert!(first.unwrap_err().is_timeout());
        assert!(gate.is_broken());

        let second = gate.send(&Envelope::response(2, vec![b'B'; 64]));
        assert!(matches!(second, Err(EnvelopeError::WriterBroken)));

        // The peer sees a cut-off envelope, never a spliced completion.
        let wire = gate.into_inner().into_inner().data;
        let mut reader = EnvelopeReader::new(Cursor::new(wire));
        assert!(matches!(
            reader.read_envelope(),
            Err(EnvelopeError::Truncated { buffered: 30 })
        ));
    }
}
