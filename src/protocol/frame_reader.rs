//! Frame decoding from a buffered byte stream.
//!
//! Decoding is pull-based: [`read_frame`] consumes exactly one frame from an
//! `AsyncBufRead` and leaves any following bytes in the reader's buffer.
//!
//! Body determination:
//! - With a `content-length` header: read exactly that many bytes, then one
//!   more byte which must be the NUL terminator.
//! - Without: read up to the first NUL terminator.
//!
//! # Example
//!
//! ```
//! # tokio_test_block_on(async {
//! use stomp_client::protocol::read_frame;
//!
//! let mut input: &[u8] = b"\nMESSAGE\ndestination: /queue/a\n\nhello\0";
//! let frame = read_frame(&mut input).await.unwrap().unwrap();
//!
//! assert_eq!(frame.command(), "MESSAGE");
//! assert_eq!(frame.body(), b"hello");
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use super::frame::{header_names, Frame, Headers};
use super::wire_format::{EOL, TERMINATOR};
use crate::error::{Result, StompError};

/// Upper bound on the buffer reserved up front for a sized body.
const MAX_BODY_PREALLOC: usize = 64 * 1024;

/// Read one frame.
///
/// Returns:
/// - `Ok(Some(frame))` when a complete frame was decoded
/// - `Ok(None)` when the stream ended cleanly before any command line
/// - `Err(NoData)` when the stream ended in the middle of a frame
/// - `Err(InvalidContentLength)` when the byte after a sized body is not NUL
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::with_capacity(64);

    // Skip blank lines left over from the previous frame or keep-alives.
    let command = loop {
        line.clear();
        if reader.read_until(EOL, &mut line).await? == 0 {
            return Ok(None);
        }
        let text = decode_line(&line)?;
        if !text.trim().is_empty() {
            break text.trim_end_matches(['\r', '\n']).to_string();
        }
    };

    let mut headers = Headers::new();
    loop {
        line.clear();
        if reader.read_until(EOL, &mut line).await? == 0 {
            return Err(StompError::NoData(format!(
                "stream closed inside the header block of a {} frame",
                command
            )));
        }
        let text = decode_line(&line)?;
        let text = text.trim_end_matches(['\r', '\n']);
        if text.is_empty() {
            break;
        }
        let (key, value) = parse_header_line(text)?;
        headers.insert(key, value);
    }

    let body = match headers.get(header_names::CONTENT_LENGTH) {
        Some(declared) => read_sized_body(reader, declared).await?,
        None => read_terminated_body(reader).await?,
    };

    Ok(Some(Frame::from_parts(command, headers, body)))
}

/// Split `key: value` on the first colon and trim both sides.
pub fn parse_header_line(line: &str) -> Result<(&str, &str)> {
    let trimmed = line.trim();
    let idx = trimmed
        .find(':')
        .ok_or_else(|| StompError::Protocol(format!("header line without colon: {:?}", line)))?;
    Ok((trimmed[..idx].trim(), trimmed[idx + 1..].trim()))
}

async fn read_sized_body<R>(reader: &mut R, declared: &str) -> Result<Bytes>
where
    R: AsyncBufRead + Unpin,
{
    let len: usize = declared
        .parse()
        .map_err(|_| StompError::Protocol(format!("invalid content-length: {:?}", declared)))?;

    // The declared length is untrusted; grow the buffer as bytes arrive.
    let mut body = Vec::with_capacity(len.min(MAX_BODY_PREALLOC));
    let read = (&mut *reader).take(len as u64).read_to_end(&mut body).await?;
    if read < len {
        return Err(StompError::NoData(format!(
            "stream closed after {} of {} body bytes",
            read, len
        )));
    }

    let terminator = reader.read_u8().await.map_err(eof_as_no_data)?;
    if terminator != TERMINATOR {
        return Err(StompError::InvalidContentLength { found: terminator });
    }
    Ok(Bytes::from(body))
}

async fn read_terminated_body<R>(reader: &mut R) -> Result<Bytes>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = Vec::new();
    reader.read_until(TERMINATOR, &mut body).await?;
    if body.pop() != Some(TERMINATOR) {
        return Err(StompError::NoData(
            "stream closed before frame terminator".to_string(),
        ));
    }
    Ok(Bytes::from(body))
}

fn decode_line(line: &[u8]) -> Result<String> {
    String::from_utf8(line.to_vec())
        .map_err(|_| StompError::Protocol("frame line is not valid UTF-8".to_string()))
}

fn eof_as_no_data(err: std::io::Error) -> StompError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        StompError::NoData("stream closed inside a frame body".to_string())
    } else {
        StompError::Io(err)
    }
}
