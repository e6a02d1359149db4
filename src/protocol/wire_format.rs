//! Wire format encoding.
//!
//! ```text
//! COMMAND\n
//! header-key: header-value\n
//! ...\n
//! content-length: <len>\n
//! content-type: text/plain; charset=UTF-8\n
//! \n
//! <body bytes>\0
//! ```
//!
//! Header keys and values are written verbatim. They must not contain a
//! newline, and keys must not contain a colon; this is not checked.

use bytes::{BufMut, BytesMut};

use super::frame::{header_names, Frame, Headers};

/// Frame terminator byte.
pub const TERMINATOR: u8 = 0;

/// Line delimiter.
pub const EOL: u8 = b'\n';

/// `content-type` value synthesized on every outbound frame.
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain; charset=UTF-8";

/// Encode a frame into a fresh buffer.
///
/// The synthesized `content-length` and `content-type` headers are appended
/// after the caller's headers. A caller-supplied header with either name is
/// skipped so the block never carries a duplicate key.
pub fn encode_frame(command: &str, headers: &Headers, body: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(encoded_len_hint(command, headers, body));
    encode_frame_into(&mut buf, command, headers, body);
    buf
}

/// Encode a frame, appending to an existing buffer.
pub fn encode_frame_into(buf: &mut BytesMut, command: &str, headers: &Headers, body: &[u8]) {
    buf.put_slice(command.as_bytes());
    buf.put_u8(EOL);

    for (key, value) in headers.iter() {
        if key == header_names::CONTENT_LENGTH || key == header_names::CONTENT_TYPE {
            continue;
        }
        put_header(buf, key, value);
    }
    put_header(buf, header_names::CONTENT_LENGTH, &body.len().to_string());
    put_header(buf, header_names::CONTENT_TYPE, DEFAULT_CONTENT_TYPE);

    buf.put_u8(EOL);
    buf.put_slice(body);
    buf.put_u8(TERMINATOR);
}

/// Encode an assembled [`Frame`].
pub fn encode(frame: &Frame) -> BytesMut {
    encode_frame(frame.command(), frame.headers(), frame.body())
}

fn put_header(buf: &mut BytesMut, key: &str, value: &str) {
    buf.put_slice(key.as_bytes());
    buf.put_slice(b": ");
    buf.put_slice(value.as_bytes());
    buf.put_u8(EOL);
}

fn encoded_len_hint(command: &str, headers: &Headers, body: &[u8]) -> usize {
    let header_bytes: usize = headers.iter().map(|(k, v)| k.len() + v.len() + 3).sum();
    // synthesized headers + blank line + terminator
    command.len() + 1 + header_bytes + 64 + body.len() + 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::commands;

    #[test]
    fn test_encode_layout() {
        let headers = Headers::new().with("destination", "/queue/a");
        let bytes = encode_frame(commands::SEND, &headers, b"hi");

        let expected = b"SEND\n\
destination: /queue/a\n\
content-length: 2\n\
content-type: text/plain; charset=UTF-8\n\
\n\
hi\0";
        assert_eq!(&bytes[..], &expected[..]);
    }

    #[test]
    fn test_encode_empty_body() {
        let bytes = encode_frame(commands::BEGIN, &Headers::new(), b"");
        let text = std::str::from_utf8(&bytes).unwrap();

        assert!(text.starts_with("BEGIN\n"));
        assert!(text.contains("content-length: 0\n"));
        assert!(text.ends_with("\n\n\0"));
    }

    #[test]
    fn test_encode_skips_caller_content_length() {
        let headers = Headers::new()
            .with("content-length", "999")
            .with("content-type", "application/json");
        let bytes = encode_frame(commands::SEND, &headers, b"abc");
        let text = std::str::from_utf8(&bytes).unwrap();

        assert_eq!(text.matches("content-length").count(), 1);
        assert!(text.contains("content-length: 3\n"));
        assert_eq!(text.matches("content-type").count(), 1);
    }

    #[test]
    fn test_encode_preserves_header_order() {
        let headers = Headers::new().with("b", "2").with("a", "1").with("c", "3");
        let bytes = encode_frame(commands::SEND, &headers, b"");
        let text = std::str::from_utf8(&bytes).unwrap();

        let b = text.find("b: 2").unwrap();
        let a = text.find("a: 1").unwrap();
        let c = text.find("c: 3").unwrap();
        assert!(b < a && a < c);
    }

    #[test]
    fn test_encode_binary_body_with_nul() {
        let body = [1u8, 0, 2, 0, 3];
        let bytes = encode_frame(commands::SEND, &Headers::new(), &body);

        assert!(bytes.ends_with(&[1, 0, 2, 0, 3, 0]));
        assert!(std::str::from_utf8(&bytes[..bytes.len() - 6])
            .unwrap()
            .contains("content-length: 5\n"));
    }

    #[test]
    fn test_encode_into_appends() {
        let mut buf = BytesMut::new();
        encode_frame_into(&mut buf, commands::BEGIN, &Headers::new(), b"");
        let first = buf.len();
        encode_frame_into(&mut buf, commands::COMMIT, &Headers::new(), b"");

        assert!(buf.len() > first);
        assert_eq!(buf[first - 1], TERMINATOR);
    }
}
