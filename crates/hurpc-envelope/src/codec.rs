use bytes::{Buf, BufMut, BytesMut};

use crate::envelope::Envelope;
use crate::error::{EnvelopeError, Result};

/// Envelope header: magic (2) + body length (4) = 6 bytes.
pub const HEADER_SIZE: usize = 6;

/// Magic bytes: "HR" (0x48 0x52).
pub const MAGIC: [u8; 2] = [0x48, 0x52];

/// Default maximum encoded body size: 16 MiB.
pub const DEFAULT_MAX_ENVELOPE: usize = 16 * 1024 * 1024;

/// Fixed part of the body: token (8) + flags (1) + method len (2) + error len (4).
const FIXED_BODY_SIZE: usize = 8 + 1 + 2 + 4;

const FLAG_COMPLETED: u8 = 0x01;

/// Encode an envelope into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────────┬────────────┬────────────┬───────┬──────────────┬──────────────┬─────────┐
/// │ Magic (2B) │ Body len   │ Token      │ Flags │ Method len + │ Error len +  │ Payload │
/// │ "HR"       │ (4B LE)    │ (8B LE)    │ (1B)  │ UTF-8 (2B LE)│ UTF-8 (4B LE)│ (rest)  │
/// └────────────┴────────────┴────────────┴───────┴──────────────┴──────────────┴─────────┘
/// ```
pub fn encode_envelope(envelope: &Envelope, dst: &mut BytesMut) -> Result<()> {
    let method = envelope.method.as_bytes();
    let error = envelope.error.as_bytes();

    if method.len() > u16::MAX as usize {
        return Err(EnvelopeError::MethodTooLong(method.len()));
    }
    let body_len = body_size(envelope);
    if body_len > u32::MAX as usize {
        return Err(EnvelopeError::PayloadTooLarge {
            size: body_len,
            max: u32::MAX as usize,
        });
    }

    dst.reserve(HEADER_SIZE + body_len);
    dst.put_slice(&MAGIC);
    dst.put_u32_le(body_len as u32);
    dst.put_i64_le(envelope.token);
    dst.put_u8(if envelope.completed { FLAG_COMPLETED } else { 0 });
    dst.put_u16_le(method.len() as u16);
    dst.put_slice(method);
    dst.put_u32_le(error.len() as u32);
    dst.put_slice(error);
    dst.put_slice(&envelope.payload);
    Ok(())
}

/// Size of the encoded body (everything after the header).
pub fn body_size(envelope: &Envelope) -> usize {
    FIXED_BODY_SIZE + envelope.method.len() + envelope.error.len() + envelope.payload.len()
}

/// Decode an envelope from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete envelope yet.
/// On success, consumes the envelope bytes from the buffer.
pub fn decode_envelope(src: &mut BytesMut, max_body: usize) -> Result<Option<Envelope>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    if src[0..2] != MAGIC {
        return Err(EnvelopeError::InvalidMagic);
    }

    let body_len = u32::from_le_bytes([src[2], src[3], src[4], src[5]]) as usize;
    if body_len > max_body {
        return Err(EnvelopeError::PayloadTooLarge {
            size: body_len,
            max: max_body,
        });
    }
    if body_len < FIXED_BODY_SIZE {
        return Err(EnvelopeError::Malformed("body shorter than fixed fields"));
    }

    if src.len() < HEADER_SIZE + body_len {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let mut body = src.split_to(body_len).freeze();

    let token = body.get_i64_le();
    let flags = body.get_u8();
    if flags & !FLAG_COMPLETED != 0 {
        return Err(EnvelopeError::Malformed("reserved flag bits set"));
    }

    let method_len = body.get_u16_le() as usize;
    if body.remaining() < method_len + 4 {
        return Err(EnvelopeError::Malformed("method length exceeds body"));
    }
    let method = text(body.split_to(method_len).as_ref(), "method is not valid UTF-8")?;

    let error_len = body.get_u32_le() as usize;
    if body.remaining() < error_len {
        return Err(EnvelopeError::Malformed("error length exceeds body"));
    }
    let error = text(body.split_to(error_len).as_ref(), "error is not valid UTF-8")?;

    Ok(Some(Envelope {
        token,
        method,
        completed: flags & FLAG_COMPLETED != 0,
        error,
        payload: body,
    }))
}

fn text(bytes: &[u8], context: &'static str) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| EnvelopeError::Malformed(context))
}

/// Default reader/writer buffer size: 64 KiB.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Configuration for the envelope reader and writer.
#[derive(Debug, Clone)]
pub struct EnvelopeConfig {
    /// Maximum encoded body size in bytes. Default: 16 MiB.
    pub max_envelope_size: usize,
    /// Read buffer size in bytes. Default: 64 KiB.
    pub read_buffer_size: usize,
    /// Write buffer size in bytes. Default: 64 KiB.
    pub write_buffer_size: usize,
    /// Read deadline applied to the underlying stream.
    pub read_timeout: Option<std::time::Duration>,
    /// Write deadline applied to the underlying stream.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            max_envelope_size: DEFAULT_MAX_ENVELOPE,
            read_buffer_size: DEFAULT_BUFFER_SIZE,
            write_buffer_size: DEFAULT_BUFFER_SIZE,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn encoded(envelope: &Envelope) -> BytesMut {
        let mut buf = BytesMut::new();
        encode_envelope(envelope, &mut buf).unwrap();
        buf
    }

    #[test]
    fn request_survives_the_wire() {
        let env = Envelope::request(42, "getRemoteIp", &b"args"[..]);
        let mut buf = encoded(&env);
        assert_eq!(buf.len(), HEADER_SIZE + body_size(&env));

        let decoded = decode_envelope(&mut buf, DEFAULT_MAX_ENVELOPE)
            .unwrap()
            .unwrap();
        assert_eq!(decoded, env);
        assert!(buf.is_empty());
    }

    #[test]
    fn failure_keeps_error_text_and_negative_token() {
        let env = Envelope::failure(-5, "boom: ünïcode");
        let mut buf = encoded(&env);

        let decoded = decode_envelope(&mut buf, DEFAULT_MAX_ENVELOPE)
            .unwrap()
            .unwrap();
        assert_eq!(decoded.token, -5);
        assert!(decoded.completed);
        assert_eq!(decoded.error, "boom: ünïcode");
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn incomplete_header_needs_more() {
        let mut buf = BytesMut::from(&[0x48, 0x52, 0x00][..]);
        assert!(decode_envelope(&mut buf, DEFAULT_MAX_ENVELOPE)
            .unwrap()
            .is_none());
    }

    #[test]
    fn incomplete_body_needs_more() {
        let mut buf = encoded(&Envelope::response(1, Bytes::from_static(b"hello")));
        buf.truncate(buf.len() - 2);

        assert!(decode_envelope(&mut buf, DEFAULT_MAX_ENVELOPE)
            .unwrap()
            .is_none());
    }

    #[test]
    fn invalid_magic() {
        let mut buf = BytesMut::from(&[0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00][..]);
        let result = decode_envelope(&mut buf, DEFAULT_MAX_ENVELOPE);
        assert!(matches!(result, Err(EnvelopeError::InvalidMagic)));
    }

    #[test]
    fn oversized_body_rejected_from_header_alone() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(32 * 1024 * 1024);

        let result = decode_envelope(&mut buf, DEFAULT_MAX_ENVELOPE);
        assert!(matches!(result, Err(EnvelopeError::PayloadTooLarge { .. })));
    }

    #[test]
    fn body_shorter_than_fixed_fields() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(3);
        buf.put_slice(&[0, 0, 0]);

        let result = decode_envelope(&mut buf, DEFAULT_MAX_ENVELOPE);
        assert!(matches!(result, Err(EnvelopeError::Malformed(_))));
    }

    #[test]
    fn method_length_past_body_end() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(FIXED_BODY_SIZE as u32);
        buf.put_i64_le(1);
        buf.put_u8(0);
        buf.put_u16_le(500);
        buf.put_u32_le(0);

        let result = decode_envelope(&mut buf, DEFAULT_MAX_ENVELOPE);
        assert!(matches!(result, Err(EnvelopeError::Malformed(_))));
    }

    #[test]
    fn reserved_flags_rejected() {
        let mut buf = encoded(&Envelope::request(1, "x", Bytes::new()));
        buf[HEADER_SIZE + 8] = 0x80;

        let result = decode_envelope(&mut buf, DEFAULT_MAX_ENVELOPE);
        assert!(matches!(result, Err(EnvelopeError::Malformed(_))));
    }

    #[test]
    fn non_utf8_method_rejected() {
        let mut buf = encoded(&Envelope::request(1, "ab", Bytes::new()));
        // method bytes start after token, flags and method length
        buf[HEADER_SIZE + 8 + 1 + 2] = 0xFF;

        let result = decode_envelope(&mut buf, DEFAULT_MAX_ENVELOPE);
        assert!(matches!(result, Err(EnvelopeError::Malformed(_))));
    }

    #[test]
    fn method_name_too_long() {
        let env = Envelope::request(1, "m".repeat(u16::MAX as usize + 1), Bytes::new());
        let mut buf = BytesMut::new();
        let result = encode_envelope(&env, &mut buf);
        assert!(matches!(result, Err(EnvelopeError::MethodTooLong(_))));
        assert!(buf.is_empty());
    }

    #[test]
    fn consecutive_envelopes_split_cleanly() {
        let mut buf = BytesMut::new();
        encode_envelope(&Envelope::request(1, "first", &b"a"[..]), &mut buf).unwrap();
        encode_envelope(&Envelope::response(1, &b"second"[..]), &mut buf).unwrap();

        let first = decode_envelope(&mut buf, DEFAULT_MAX_ENVELOPE)
            .unwrap()
            .unwrap();
        let second = decode_envelope(&mut buf, DEFAULT_MAX_ENVELOPE)
            .unwrap()
            .unwrap();

        assert_eq!(first.method, "first");
        assert!(first.is_request());
        assert_eq!(second.payload.as_ref(), b"second");
        assert!(second.completed);
        assert!(buf.is_empty());
    }
}
