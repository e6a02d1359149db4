//! Client with a background listener task.
//!
//! The [`Client`] wraps a [`Connection`] and starts one task that owns the
//! receive side for the client's lifetime:
//! 1. Receive a frame
//! 2. MESSAGE: invoke the listener registered for its destination
//! 3. RECEIPT: invoke (and forget) the listener registered for its receipt id
//! 4. Anything else is ignored
//!
//! All other client operations only transmit, from any task.
//!
//! # Example
//!
//! ```ignore
//! use stomp_client::{Client, ConnectionConfig, Frame, Headers};
//!
//! #[tokio::main]
//! async fn main() -> stomp_client::Result<()> {
//!     let client = Client::open(ConnectionConfig::from_uri("stomp://localhost:61613")?).await?;
//!
//!     client
//!         .subscribe("/queue/orders", Headers::new(), |frame: &Frame| {
//!             println!("order: {:?}", frame.body_str());
//!         })
//!         .await?;
//!
//!     client
//!         .send_with_receipt("/queue/orders", "42 widgets", Headers::new(), |_: &Frame| {
//!             println!("broker has it");
//!         })
//!         .await?;
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::error::{Result, StompError};
use crate::handler::{Dispatch, Listener, ListenerRegistry, SharedListener, TransactionLog};
use crate::protocol::{header_names, Frame, Headers};
use crate::transport::Connector;

/// First receipt id handed out.
pub const FIRST_RECEIPT_ID: u64 = 1;

/// State shared between the client handle and its listener task.
struct Inner {
    connection: Connection,
    listeners: ListenerRegistry,
    /// Frames acknowledged inside still-open transactions.
    transactions: TransactionLog,
    next_receipt: AtomicU64,
    running: AtomicBool,
}

/// A connected client.
///
/// Receives happen on a single background task, so keep listeners short if
/// message volume is high.
pub struct Client {
    inner: Arc<Inner>,
    listener_task: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Connect over TCP and start the listener task.
    pub async fn open(config: ConnectionConfig) -> Result<Self> {
        Ok(Self::with_connection(Connection::open(config).await?))
    }

    /// Connect to a `stomp://[user:password@]host:port` URI.
    pub async fn connect_uri(uri: &str) -> Result<Self> {
        Self::open(ConnectionConfig::from_uri(uri)?).await
    }

    /// Connect using a custom channel connector.
    pub async fn open_with(config: ConnectionConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        Ok(Self::with_connection(
            Connection::open_with(config, connector).await?,
        ))
    }

    /// Wrap an existing connection and start the listener task.
    ///
    /// Must be called within a tokio runtime.
    pub fn with_connection(connection: Connection) -> Self {
        let inner = Arc::new(Inner {
            connection,
            listeners: ListenerRegistry::new(),
            transactions: TransactionLog::new(),
            next_receipt: AtomicU64::new(FIRST_RECEIPT_ID),
            running: AtomicBool::new(true),
        });

        let task = tokio::spawn(Self::listen(inner.clone()));

        Self {
            inner,
            listener_task: Mutex::new(Some(task)),
        }
    }

    /// Main listener loop - receives frames and dispatches to listeners.
    async fn listen(inner: Arc<Inner>) {
        while inner.running.load(Ordering::Acquire) {
            let frame = match inner.connection.receive().await {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(StompError::InvalidContentLength { found }) if inner.connection.is_reliable() => {
                    tracing::error!(
                        "discarding desynchronized stream (found {:#04x} after body)",
                        found
                    );
                    continue;
                }
                Err(e) => {
                    tracing::error!("listener stopped: {}", e);
                    break;
                }
            };

            if inner.listeners.dispatch(&frame) == Dispatch::NoListener {
                tracing::debug!(
                    "dropping {} frame for {:?}: no listener",
                    frame.command(),
                    frame.destination().or(frame.receipt_id())
                );
            }
        }
        tracing::debug!("listener task finished");
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    /// Is this client open?
    pub fn is_open(&self) -> bool {
        self.inner.connection.is_open()
    }

    /// Begin a transaction.
    pub async fn begin(&self, name: &str, headers: Headers) -> Result<()> {
        self.inner.connection.begin(name, headers).await
    }

    /// Commit a transaction.
    ///
    /// Messages acknowledged in it are final and will never be replayed.
    pub async fn commit(&self, name: &str, headers: Headers) -> Result<()> {
        self.inner.connection.commit(name, headers).await?;
        self.inner.transactions.discard(name);
        Ok(())
    }

    /// Abort a transaction.
    ///
    /// Every message acknowledged in it is handed back to its destination's
    /// current listener, in acknowledgement order, before this returns.
    pub async fn abort(&self, name: &str, headers: Headers) -> Result<()> {
        self.inner.connection.abort(name, headers).await?;

        for frame in self.inner.transactions.take(name) {
            let listener = frame
                .destination()
                .and_then(|d| self.inner.listeners.destination(d));
            match listener {
                Some(listener) => listener.on_frame(&frame),
                None => tracing::debug!(
                    "not replaying {:?}: destination has no listener",
                    frame.message_id()
                ),
            }
        }
        Ok(())
    }

    /// Subscribe to a destination, delivering its messages to `listener`.
    ///
    /// Replaces any listener already registered for the destination.
    pub async fn subscribe<L: Listener>(&self, destination: &str, headers: Headers, listener: L) -> Result<()> {
        self.subscribe_with(destination, headers, Some(Arc::new(listener)))
            .await
    }

    /// Subscribe with an optional shared listener.
    ///
    /// Fails with [`StompError::NoListener`] when `listener` is `None`.
    pub async fn subscribe_with(
        &self,
        destination: &str,
        headers: Headers,
        listener: Option<SharedListener>,
    ) -> Result<()> {
        let listener = listener.ok_or_else(|| {
            tracing::warn!("subscribe to {} without a listener", destination);
            StompError::NoListener
        })?;
        // Registered first so a message arriving right after SUBSCRIBE is not dropped.
        let previous = self
            .inner
            .listeners
            .register_destination_shared(destination, listener);

        let result = self
            .inner
            .connection
            .subscribe(destination, headers, None)
            .await;
        if result.is_err() {
            // Put back whatever the broker still knows about.
            let listeners = &self.inner.listeners;
            match previous {
                Some(previous) => {
                    listeners.register_destination_shared(destination, previous);
                }
                None => {
                    listeners.remove_destination(destination);
                }
            }
        }
        result
    }

    /// Unsubscribe from a destination and drop its listener.
    pub async fn unsubscribe(&self, destination: &str, headers: Headers) -> Result<()> {
        self.inner
            .connection
            .unsubscribe(destination, headers, None)
            .await?;
        self.inner.listeners.remove_destination(destination);
        Ok(())
    }

    /// Acknowledge a message.
    ///
    /// With a `transaction` header the message is kept for replay until the
    /// transaction is committed or aborted.
    pub async fn acknowledge(&self, message: &Frame, headers: Headers) -> Result<()> {
        self.acknowledge_inner(message, headers, None).await.map(|_| ())
    }

    /// Acknowledge a message and request a receipt for the ACK.
    ///
    /// Returns the receipt id.
    pub async fn acknowledge_with_receipt<L: Listener>(
        &self,
        message: &Frame,
        headers: Headers,
        on_receipt: L,
    ) -> Result<String> {
        let id = self
            .acknowledge_inner(message, headers, Some(Arc::new(on_receipt)))
            .await?;
        Ok(id.unwrap_or_default())
    }

    async fn acknowledge_inner(
        &self,
        message: &Frame,
        mut headers: Headers,
        on_receipt: Option<SharedListener>,
    ) -> Result<Option<String>> {
        let message_id = message
            .message_id()
            .ok_or_else(|| StompError::Protocol("cannot ack a message without message-id".to_string()))?
            .to_string();

        if let Some(transaction) = headers.get(header_names::TRANSACTION) {
            self.inner.transactions.record(transaction, message.clone());
        }

        let receipt = on_receipt.map(|listener| self.register_receipt(listener));
        if let Some(id) = &receipt {
            headers.insert(header_names::RECEIPT, id.as_str());
        }

        if let Err(e) = self.inner.connection.ack(&message_id, headers).await {
            if let Some(id) = &receipt {
                self.inner.listeners.take_receipt(id);
            }
            return Err(e);
        }
        Ok(receipt)
    }

    /// Send a message to a destination. Accepts a `transaction` header.
    pub async fn send(&self, destination: &str, body: impl AsRef<[u8]>, headers: Headers) -> Result<()> {
        self.inner.connection.send(destination, body, headers).await
    }

    /// Send a message and request a receipt, delivered to `on_receipt`.
    ///
    /// Returns the receipt id.
    pub async fn send_with_receipt<L: Listener>(
        &self,
        destination: &str,
        body: impl AsRef<[u8]>,
        mut headers: Headers,
        on_receipt: L,
    ) -> Result<String> {
        let id = self.register_receipt(Arc::new(on_receipt));
        headers.insert(header_names::RECEIPT, id.as_str());
        if let Err(e) = self.inner.connection.send(destination, body, headers).await {
            self.inner.listeners.take_receipt(&id);
            return Err(e);
        }
        Ok(id)
    }

    /// Allocate the next receipt id and register its listener.
    fn register_receipt(&self, listener: SharedListener) -> String {
        let id = self
            .inner
            .next_receipt
            .fetch_add(1, Ordering::AcqRel)
            .to_string();
        self.inner.listeners.register_receipt(&id, listener);
        id
    }

    /// Whether a listener is registered for `destination`.
    pub fn is_subscribed(&self, destination: &str) -> bool {
        self.inner.listeners.destination(destination).is_some()
    }

    /// Number of receipts requested but not yet received.
    pub fn pending_receipts(&self) -> usize {
        self.inner.listeners.pending_receipts()
    }

    /// Number of acknowledged messages held for replay in a transaction.
    pub fn pending_replay(&self, transaction: &str) -> usize {
        self.inner.transactions.pending(transaction)
    }

    /// Wait for the listener task to finish.
    ///
    /// Generally used to block until the connection ends.
    pub async fn join(&self) {
        let task = self.listener_task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::error!("listener task panicked: {}", e);
                }
            }
        }
    }

    /// Stop the listener task and disconnect.
    ///
    /// The task is given `reconnect_delay` to observe the end of stream
    /// before it is cancelled.
    pub async fn close(&self) {
        self.inner.running.store(false, Ordering::Release);
        self.inner.connection.disconnect(Headers::new()).await;

        let task = self.listener_task.lock().await.take();
        if let Some(mut task) = task {
            let grace = self.inner.connection.config().reconnect_delay;
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                tracing::debug!("listener task still blocked after close, cancelling");
                task.abort();
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(task) = self.listener_task.get_mut().take() {
            task.abort();
        }
    }
}
