//! # stomp-client
//!
//! Async client for text-based STOMP message brokers.
//!
//! ## Architecture
//!
//! - **Protocol**: NUL-terminated text frames (command, headers, body)
//! - **Connection**: one byte channel with serialized writes and reads,
//!   primary/secondary failover, reconnect with subscription replay
//! - **Client**: background listener task dispatching MESSAGE and RECEIPT
//!   frames to callbacks, plus transaction-scoped replay of acknowledged
//!   messages on abort
//!
//! ## Example
//!
//! ```ignore
//! use stomp_client::{Client, ConnectionConfig, Frame, Headers};
//!
//! #[tokio::main]
//! async fn main() -> stomp_client::Result<()> {
//!     let config = ConnectionConfig::new()
//!         .host("broker-a")
//!         .secondary("broker-b", 61613)
//!         .reliable(true);
//!     let client = Client::open(config).await?;
//!
//!     client
//!         .subscribe("/queue/a", Headers::new(), |frame: &Frame| {
//!             println!("{:?}", frame.body_str());
//!         })
//!         .await?;
//!     client.send("/queue/a", "hello", Headers::new()).await?;
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod handler;
pub mod logging;
pub mod protocol;
pub mod transport;

mod client;
mod connection;

pub use client::Client;
pub use config::{ConnectionConfig, Endpoint, LogTarget};
pub use connection::{Connection, ConnectionState};
pub use error::{Result, StompError};
pub use handler::{Listener, SharedListener};
pub use protocol::{Frame, Headers};
