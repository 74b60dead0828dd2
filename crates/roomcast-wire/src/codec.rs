//! Streaming line codec for roomcast traffic.
//!
//! Peers speak newline-delimited UTF-8 text. The decoder works over an
//! accumulating [`BytesMut`] so partial reads and coalesced reads both
//! come out as whole lines, trailing newline included - the grammar's
//! literals carry their `\n` on the wire.

use bytes::BytesMut;
use thiserror::Error;

/// Default maximum accepted line length (64 KiB).
pub const DEFAULT_MAX_LINE: usize = 64 * 1024;

/// Errors that can occur while decoding a line.
#[derive(Debug, Error)]
pub enum WireError {
    /// Line exceeds the maximum length.
    #[error("line length {length} exceeds maximum {max}")]
    LineTooLong {
        /// Observed length in bytes (so far, for an unterminated line).
        length: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Line is not valid UTF-8.
    #[error("line is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

/// Try to decode one line from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(line))` with the trailing `\n` included when a
/// complete line is available, `Ok(None)` when more data is needed.
///
/// # Errors
///
/// Returns an error if the line (terminated or still accumulating)
/// exceeds `max_line`, or if it is not valid UTF-8.
pub fn decode_from(buf: &mut BytesMut, max_line: usize) -> Result<Option<String>, WireError> {
    match buf.iter().position(|&b| b == b'\n') {
        Some(idx) => {
            let end = idx + 1;
            if end > max_line {
                return Err(WireError::LineTooLong {
                    length: end,
                    max: max_line,
                });
            }
            let line = buf.split_to(end);
            let line = std::str::from_utf8(&line)?;
            Ok(Some(line.to_string()))
        }
        None => {
            if buf.len() >= max_line {
                return Err(WireError::LineTooLong {
                    length: buf.len(),
                    max: max_line,
                });
            }
            Ok(None)
        }
    }
}

/// Append a line to an outgoing buffer, adding the terminator if absent.
pub fn encode_into(line: &str, buf: &mut BytesMut) {
    buf.extend_from_slice(line.as_bytes());
    if !line.ends_with('\n') {
        buf.extend_from_slice(b"\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_complete_line() {
        let mut buf = BytesMut::from(&b"alice:hello\n"[..]);
        let line = decode_from(&mut buf, DEFAULT_MAX_LINE).unwrap().unwrap();
        assert_eq!(line, "alice:hello\n");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_partial_then_rest() {
        let mut buf = BytesMut::from(&b"alice:hel"[..]);
        assert!(decode_from(&mut buf, DEFAULT_MAX_LINE).unwrap().is_none());

        buf.extend_from_slice(b"lo\nbob:hi\n");
        assert_eq!(
            decode_from(&mut buf, DEFAULT_MAX_LINE).unwrap().unwrap(),
            "alice:hello\n"
        );
        assert_eq!(
            decode_from(&mut buf, DEFAULT_MAX_LINE).unwrap().unwrap(),
            "bob:hi\n"
        );
        assert!(decode_from(&mut buf, DEFAULT_MAX_LINE).unwrap().is_none());
    }

    #[test]
    fn test_decode_rejects_oversized_line() {
        let mut buf = BytesMut::from(vec![b'a'; 32].as_slice());
        match decode_from(&mut buf, 16) {
            Err(WireError::LineTooLong { length: 32, max: 16 }) => {}
            other => panic!("expected LineTooLong, got {other:?}"),
        }

        let mut buf = BytesMut::from(&b"short but terminated far too late\n"[..]);
        assert!(matches!(
            decode_from(&mut buf, 8),
            Err(WireError::LineTooLong { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        let mut buf = BytesMut::from(&[0xff, 0xfe, b'\n'][..]);
        assert!(matches!(
            decode_from(&mut buf, DEFAULT_MAX_LINE),
            Err(WireError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn test_encode_adds_missing_terminator() {
        let mut buf = BytesMut::new();
        encode_into("alice:hello", &mut buf);
        encode_into("bob:hi\n", &mut buf);
        assert_eq!(&buf[..], b"alice:hello\nbob:hi\n");
    }
}
