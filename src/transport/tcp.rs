//! TCP byte channel and the connector seam.
//!
//! # Example
//!
//! ```ignore
//! use stomp_client::transport::{Connector, TcpConnector};
//!
//! let stream = TcpConnector.connect("localhost", 61613).await?;
//! ```

use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Boxed future for connector results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Anything usable as the connection's byte channel.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Owned, type-erased byte channel.
pub type BoxedStream = Box<dyn ByteStream>;

/// Establishes byte channels to broker endpoints.
pub trait Connector: Send + Sync + 'static {
    /// Open a fresh channel to `host:port`.
    fn connect<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, std::io::Result<BoxedStream>>;
}

/// Plain TCP connector with Nagle disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, std::io::Result<BoxedStream>> {
        Box::pin(async move {
            let stream = TcpStream::connect((host, port)).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream) as BoxedStream)
        })
    }
}
