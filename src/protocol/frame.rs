//! Frame struct with typed accessors.
//!
//! Represents one protocol message: a command, an ordered header block and a
//! body. Uses `bytes::Bytes` so frames can be cloned cheaply (the client keeps
//! acknowledged frames around for transaction replay).
//!
//! # Example
//!
//! ```
//! use stomp_client::protocol::{commands, Frame};
//!
//! let frame = Frame::new(commands::SEND)
//!     .header("destination", "/queue/a")
//!     .with_body("hello");
//!
//! assert_eq!(frame.command(), "SEND");
//! assert_eq!(frame.destination(), Some("/queue/a"));
//! assert_eq!(frame.body(), b"hello");
//! ```

use std::fmt;

use bytes::Bytes;

/// Command names used on the wire.
pub mod commands {
    pub const CONNECT: &str = "CONNECT";
    pub const CONNECTED: &str = "CONNECTED";
    pub const SEND: &str = "SEND";
    pub const SUBSCRIBE: &str = "SUBSCRIBE";
    pub const UNSUBSCRIBE: &str = "UNSUBSCRIBE";
    pub const ACK: &str = "ACK";
    pub const BEGIN: &str = "BEGIN";
    pub const COMMIT: &str = "COMMIT";
    pub const ABORT: &str = "ABORT";
    pub const DISCONNECT: &str = "DISCONNECT";
    pub const MESSAGE: &str = "MESSAGE";
    pub const RECEIPT: &str = "RECEIPT";
    pub const ERROR: &str = "ERROR";
}

/// Well-known header names.
pub mod header_names {
    pub const DESTINATION: &str = "destination";
    pub const MESSAGE_ID: &str = "message-id";
    pub const TRANSACTION: &str = "transaction";
    pub const RECEIPT: &str = "receipt";
    pub const RECEIPT_ID: &str = "receipt-id";
    pub const USER: &str = "user";
    pub const PASSWORD: &str = "password";
    pub const CLIENT_ID: &str = "client-id";
    pub const CONTENT_LENGTH: &str = "content-length";
    pub const CONTENT_TYPE: &str = "content-type";
}

/// Ordered header block with unique keys.
///
/// Insertion order is kept so that encoding is reproducible. Setting an
/// existing key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Create an empty header block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, replacing any previous value for the same key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Builder-style variant of [`Headers::insert`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Get a header value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Remove a header, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    /// Check whether a header is present.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Iterate headers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    command: String,
    headers: Headers,
    body: Bytes,
}

impl Frame {
    /// Create a frame with no headers and an empty body.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Create a frame from already-assembled parts.
    pub fn from_parts(command: impl Into<String>, headers: Headers, body: Bytes) -> Self {
        Self {
            command: command.into(),
            headers,
            body,
        }
    }

    /// Add or replace a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    /// Replace the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[inline]
    pub fn command(&self) -> &str {
        &self.command
    }

    #[inline]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Get a reference to the body bytes.
    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Get a clone of the body (cheap, zero-copy).
    #[inline]
    pub fn payload(&self) -> Bytes {
        self.body.clone()
    }

    /// Body as UTF-8 text, if it is valid UTF-8.
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Look up a single header.
    #[inline]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// The `destination` header.
    pub fn destination(&self) -> Option<&str> {
        self.get(header_names::DESTINATION)
    }

    /// The `message-id` header.
    pub fn message_id(&self) -> Option<&str> {
        self.get(header_names::MESSAGE_ID)
    }

    /// The `receipt-id` header.
    pub fn receipt_id(&self) -> Option<&str> {
        self.get(header_names::RECEIPT_ID)
    }

    /// Split the frame into its parts.
    pub fn into_parts(self) -> (String, Headers, Bytes) {
        (self.command, self.headers, self.body)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.command)?;
        for (k, v) in self.headers.iter() {
            writeln!(f, "{}: {}", k, v)?;
        }
        write!(f, "Body ({} bytes)", self.body.len())
    }
}
