//! Transport module - the byte channel under a connection.
//!
//! A [`Connector`] turns a host/port pair into an ordered, reliable,
//! bidirectional byte stream. [`TcpConnector`] is the production
//! implementation; tests plug in in-memory streams.

mod tcp;

pub use tcp::{BoxFuture, BoxedStream, ByteStream, Connector, TcpConnector};
