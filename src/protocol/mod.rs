//! Protocol module - frames, wire encoding and decoding.
//!
//! This module implements the text wire format:
//! - [`Frame`] and [`Headers`] value types
//! - [`encode_frame`] producing NUL-terminated frame bytes
//! - [`read_frame`] pulling one frame from a buffered byte stream

mod frame;
mod frame_reader;
mod wire_format;

pub use frame::{commands, header_names, Frame, Headers};
pub use frame_reader::{parse_header_line, read_frame};
pub use wire_format::{
    encode, encode_frame, encode_frame_into, DEFAULT_CONTENT_TYPE, EOL, TERMINATOR,
};
