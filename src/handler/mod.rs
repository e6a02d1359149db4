//! Handler module - inbound frame dispatch.
//!
//! Provides:
//! - [`Listener`] - the callback capability invoked with inbound frames
//! - [`ListenerRegistry`] - maps destinations and receipt ids to listeners
//! - [`TransactionLog`] - acknowledged frames kept for replay on abort
//!
//! # Example
//!
//! ```
//! use stomp_client::handler::{Dispatch, ListenerRegistry};
//! use stomp_client::protocol::{commands, Frame};
//!
//! let registry = ListenerRegistry::new();
//! registry.register_destination("/queue/a", |frame: &Frame| {
//!     println!("got {:?}", frame.body_str());
//! });
//!
//! let frame = Frame::new(commands::MESSAGE).header("destination", "/queue/a");
//! assert_eq!(registry.dispatch(&frame), Dispatch::Delivered);
//! ```

mod registry;
mod transactions;

pub use registry::{Dispatch, Listener, ListenerRegistry, SharedListener};
pub use transactions::TransactionLog;
