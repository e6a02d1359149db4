//! Low-level broker connection.
//!
//! A [`Connection`] owns one byte channel at a time and maps protocol
//! commands onto it. It is shared (`&self` everywhere) between any number of
//! sending tasks and a single receiving task.
//!
//! # Locking
//!
//! ```text
//! transmit ──► writer lock ──┐
//!                            ├─► byte channel (split into halves)
//! receive  ──► reader lock ──┘
//!
//! acquire  ──► channel lock ──► connect / reconnect / subscription replay
//! ```
//!
//! - The writer lock serializes whole frames, so concurrent senders never
//!   interleave bytes.
//! - The reader lock serializes decoding, so two receivers never split a frame.
//! - The channel lock guards reconnecting. Whoever finds the channel dead
//!   first reconnects; everyone else waits for the live channel (or, on an
//!   unreliable connection, for the recorded failure).
//!
//! # Failure policy
//!
//! Every failure is logged and recorded as the last failure. A reliable
//! connection retries transparently (sleeping `reconnect_delay` between
//! connect attempts); an unreliable one returns the error after the current
//! attempt. With a secondary endpoint configured, each failed connect
//! alternates the target between primary and secondary. An unreliable
//! connection that has also failed on the secondary gives up on both and
//! fails fast from then on. `disconnect` stops a reliable retry loop, and a
//! `receive` caught in it reports end of stream.

use std::future::poll_fn;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::task::Poll;

use tokio::io::{
    split, AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf,
};
use tokio::sync::{Mutex, Notify};

use crate::config::{ConnectionConfig, Endpoint};
use crate::error::{Result, StompError};
use crate::protocol::{commands, encode_frame, header_names, read_frame, Frame, Headers};
use crate::transport::{BoxedStream, Connector, TcpConnector};

type Reader = BufReader<ReadHalf<BoxedStream>>;
type Writer = WriteHalf<BoxedStream>;

/// Lifecycle phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected, or explicitly disconnected.
    Disconnected,
    /// A connect attempt is in progress or the last one failed.
    Connecting,
    /// The CONNECT round-trip succeeded and the channel is live.
    Connected,
}

/// Mutable bookkeeping shared by all callers.
struct State {
    /// Endpoint the next connect attempt targets. `None` once an unreliable
    /// connection has exhausted both endpoints.
    current: Option<Endpoint>,
    /// Replay registry: subscription id to SUBSCRIBE headers, in insertion order.
    subscriptions: Vec<(String, Headers)>,
    phase: ConnectionState,
    open: bool,
    last_failure: Option<String>,
    /// Count of failed connect attempts.
    connect_failures: u64,
    /// Broker reply to the latest successful CONNECT.
    connected_frame: Option<Frame>,
}

/// One established byte channel.
#[derive(Clone)]
struct Link {
    reader: Arc<Mutex<Reader>>,
    writer: Arc<Mutex<Writer>>,
    alive: Arc<AtomicBool>,
}

impl Link {
    fn new(reader: Reader, writer: Writer) -> Self {
        Self {
            reader: Arc::new(Mutex::new(reader)),
            writer: Arc::new(Mutex::new(writer)),
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn mark_dead(&self) {
        self.alive.store(false, Ordering::Release);
    }

    fn same_as(&self, other: &Link) -> bool {
        Arc::ptr_eq(&self.alive, &other.alive)
    }

    /// Write one encoded frame under the writer lock.
    async fn write(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await
    }

    /// Decode one frame under the reader lock.
    async fn read(&self) -> Result<Option<Frame>> {
        let mut reader = self.reader.lock().await;
        read_frame(&mut *reader).await
    }

    /// Whether a read would make progress right now (data, EOF or error).
    ///
    /// Never waits: a busy reader counts as "nothing ready".
    async fn has_pending_input(&self) -> bool {
        let Ok(mut reader) = self.reader.try_lock() else {
            return false;
        };
        poll_fn(|cx| Poll::Ready(Pin::new(&mut *reader).poll_fill_buf(cx).is_ready())).await
    }

    /// Discard everything until end of stream.
    async fn drain(&self) {
        let mut reader = self.reader.lock().await;
        loop {
            let n = match reader.fill_buf().await {
                Ok(buf) if buf.is_empty() => break,
                Ok(buf) => buf.len(),
                Err(_) => break,
            };
            reader.consume(n);
        }
    }

    async fn close(&self) {
        self.mark_dead();
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            tracing::debug!("error closing channel: {}", e);
        }
    }
}

/// Low-level connection mapping commands onto the wire.
///
/// # Example
///
/// ```ignore
/// use stomp_client::{Connection, ConnectionConfig, Headers};
///
/// let conn = Connection::open(ConnectionConfig::new().host("localhost")).await?;
/// conn.subscribe("/queue/a", Headers::new(), None).await?;
/// conn.send("/queue/a", "hello", Headers::new()).await?;
/// let frame = conn.receive().await?;
/// conn.disconnect(Headers::new()).await;
/// ```
pub struct Connection {
    config: ConnectionConfig,
    primary: Endpoint,
    secondary: Option<Endpoint>,
    connector: Arc<dyn Connector>,
    state: std::sync::Mutex<State>,
    /// Channel lock: holds the live link and serializes reconnects.
    link: Mutex<Option<Link>>,
    /// Set by `disconnect`; makes `receive` report end of stream.
    shutdown: AtomicBool,
    /// Wakes a reconnect loop sleeping between attempts when `disconnect` runs.
    closing: Notify,
}

impl Connection {
    /// Open a TCP connection, blocking until the first successful connect.
    ///
    /// A reliable connection retries until it succeeds.
    pub async fn open(config: ConnectionConfig) -> Result<Self> {
        Self::open_with(config, Arc::new(TcpConnector)).await
    }

    /// Open a connection over channels produced by `connector`.
    pub async fn open_with(config: ConnectionConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        let conn = Self::new(config, connector)?;
        conn.acquire().await?;
        Ok(conn)
    }

    /// Build a connection without connecting. The first operation connects.
    pub fn new(config: ConnectionConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;
        let primary = config.primary_endpoint();
        let secondary = config.secondary_endpoint();

        Ok(Self {
            state: std::sync::Mutex::new(State {
                current: Some(primary.clone()),
                subscriptions: Vec::new(),
                phase: ConnectionState::Disconnected,
                open: false,
                last_failure: None,
                connect_failures: 0,
                connected_frame: None,
            }),
            config,
            primary,
            secondary,
            connector,
            link: Mutex::new(None),
            shutdown: AtomicBool::new(false),
            closing: Notify::new(),
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn is_reliable(&self) -> bool {
        self.config.reliable
    }

    /// Is this connection open?
    pub fn is_open(&self) -> bool {
        self.lock_state().open
    }

    /// Is this connection closed?
    pub fn is_closed(&self) -> bool {
        !self.is_open()
    }

    /// Current lifecycle phase.
    pub fn state(&self) -> ConnectionState {
        self.lock_state().phase
    }

    /// Endpoint the next connect attempt targets.
    pub fn current_target(&self) -> Option<Endpoint> {
        self.lock_state().current.clone()
    }

    pub fn current_host(&self) -> Option<String> {
        self.lock_state().current.as_ref().map(|e| e.host.clone())
    }

    pub fn current_port(&self) -> Option<u16> {
        self.lock_state().current.as_ref().map(|e| e.port)
    }

    /// Message of the most recent failure, cleared by a successful connect.
    pub fn last_failure(&self) -> Option<String> {
        self.lock_state().last_failure.clone()
    }

    /// The broker's reply to the latest successful CONNECT.
    pub fn connected_frame(&self) -> Option<Frame> {
        self.lock_state().connected_frame.clone()
    }

    /// Subscription ids that will be replayed on reconnect, in replay order.
    pub fn subscription_ids(&self) -> Vec<String> {
        self.lock_state()
            .subscriptions
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Begin a transaction.
    pub async fn begin(&self, name: &str, mut headers: Headers) -> Result<()> {
        headers.insert(header_names::TRANSACTION, name);
        self.transmit(commands::BEGIN, &headers, b"").await
    }

    /// Acknowledge a message. Accepts a `transaction` header.
    pub async fn ack(&self, message_id: &str, mut headers: Headers) -> Result<()> {
        headers.insert(header_names::MESSAGE_ID, message_id);
        self.transmit(commands::ACK, &headers, b"").await
    }

    /// Commit a transaction.
    pub async fn commit(&self, name: &str, mut headers: Headers) -> Result<()> {
        headers.insert(header_names::TRANSACTION, name);
        self.transmit(commands::COMMIT, &headers, b"").await
    }

    /// Abort a transaction.
    pub async fn abort(&self, name: &str, mut headers: Headers) -> Result<()> {
        headers.insert(header_names::TRANSACTION, name);
        self.transmit(commands::ABORT, &headers, b"").await
    }

    /// Subscribe to a destination.
    ///
    /// On a reliable connection the subscription is remembered under
    /// `subscription_id` (default: the destination) and replayed after every
    /// reconnect.
    pub async fn subscribe(
        &self,
        destination: &str,
        mut headers: Headers,
        subscription_id: Option<&str>,
    ) -> Result<()> {
        headers.insert(header_names::DESTINATION, destination);
        self.transmit(commands::SUBSCRIBE, &headers, b"").await?;

        if self.config.reliable {
            let id = subscription_id.unwrap_or(destination).to_string();
            let mut state = self.lock_state();
            match state.subscriptions.iter_mut().find(|(k, _)| *k == id) {
                Some(entry) => entry.1 = headers,
                None => state.subscriptions.push((id, headers)),
            }
        }
        Ok(())
    }

    /// Unsubscribe from a destination.
    pub async fn unsubscribe(
        &self,
        destination: &str,
        mut headers: Headers,
        subscription_id: Option<&str>,
    ) -> Result<()> {
        headers.insert(header_names::DESTINATION, destination);
        self.transmit(commands::UNSUBSCRIBE, &headers, b"").await?;

        if self.config.reliable {
            let id = subscription_id.unwrap_or(destination);
            self.lock_state().subscriptions.retain(|(k, _)| k != id);
        }
        Ok(())
    }

    /// Send a message to a destination. Accepts a `transaction` header.
    pub async fn send(&self, destination: &str, body: impl AsRef<[u8]>, mut headers: Headers) -> Result<()> {
        headers.insert(header_names::DESTINATION, destination);
        self.transmit(commands::SEND, &headers, body.as_ref()).await
    }

    /// Encode and write one frame, reconnecting as needed.
    pub async fn transmit(&self, command: &str, headers: &Headers, body: &[u8]) -> Result<()> {
        let bytes = encode_frame(command, headers, body);
        loop {
            let link = self.acquire().await?;
            match link.write(&bytes).await {
                Ok(()) => {
                    tracing::debug!(
                        "sent {} ({} headers, {} byte body)",
                        command,
                        headers.len(),
                        body.len()
                    );
                    return Ok(());
                }
                Err(e) => {
                    let message = format!("transmit '{}' failed: {}", command, e);
                    self.record_failure(&link, &message);
                    if !self.config.reliable {
                        return Err(StompError::Transmit(message));
                    }
                }
            }
        }
    }

    /// Block until a frame arrives.
    ///
    /// Returns `Ok(None)` once the connection has been disconnected.
    pub async fn receive(&self) -> Result<Option<Frame>> {
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return Ok(None);
            }
            let link = match self.acquire().await {
                Ok(link) => link,
                Err(_) if self.shutdown.load(Ordering::Acquire) => return Ok(None),
                Err(e) => return Err(e),
            };

            let failure = match link.read().await {
                Ok(Some(frame)) => {
                    tracing::debug!(
                        "received {} ({} headers, {} byte body)",
                        frame.command(),
                        frame.headers().len(),
                        frame.body().len()
                    );
                    return Ok(Some(frame));
                }
                Ok(None) if self.shutdown.load(Ordering::Acquire) => return Ok(None),
                Ok(None) => StompError::NoData("connection returned end of stream".to_string()),
                Err(e) => e,
            };

            let message = format!("receive failed: {}", failure);
            self.record_failure(&link, &message);

            // A desynchronized stream is never retried transparently.
            if matches!(failure, StompError::InvalidContentLength { .. }) {
                return Err(failure);
            }
            if !self.config.reliable {
                return Err(StompError::Receive(message));
            }
        }
    }

    /// Return a pending frame if one is available, otherwise `None`.
    ///
    /// Never waits for bytes to arrive. Once bytes are ready the rest of the
    /// frame is read as by [`Connection::receive`].
    pub async fn poll(&self) -> Result<Option<Frame>> {
        let link = match self.link.try_lock() {
            Ok(slot) => match slot.as_ref() {
                Some(link) if link.is_alive() => link.clone(),
                _ => return Ok(None),
            },
            Err(_) => return Ok(None),
        };

        if !link.has_pending_input().await {
            return Ok(None);
        }
        self.receive().await
    }

    /// Close this connection.
    ///
    /// Sends DISCONNECT, discards inbound bytes until the broker closes the
    /// stream (waiting at most `reconnect_delay`), then closes the channel.
    /// Failures along the way are logged and otherwise ignored.
    pub async fn disconnect(&self, headers: Headers) {
        self.shutdown.store(true, Ordering::Release);
        self.closing.notify_waiters();

        let link = {
            let slot = self.link.lock().await;
            slot.clone()
        };
        // A reconnect that won the channel lock first has cleared the flag.
        self.shutdown.store(true, Ordering::Release);

        if let Some(link) = link {
            if link.is_alive() {
                let bytes = encode_frame(commands::DISCONNECT, &headers, b"");
                if let Err(e) = link.write(&bytes).await {
                    tracing::debug!("DISCONNECT not delivered: {}", e);
                }
                if tokio::time::timeout(self.config.reconnect_delay, link.drain())
                    .await
                    .is_err()
                {
                    tracing::debug!("broker did not close the stream after DISCONNECT");
                }
            }
            link.close().await;

            let mut slot = self.link.lock().await;
            if slot.as_ref().is_some_and(|l| l.same_as(&link)) {
                *slot = None;
            }
        }

        let mut state = self.lock_state();
        state.open = false;
        state.phase = ConnectionState::Disconnected;
        drop(state);
        tracing::info!("disconnected");
    }

    /// Get the live channel, connecting first if there is none.
    async fn acquire(&self) -> Result<Link> {
        let failures_seen = self.lock_state().connect_failures;
        let mut slot = self.link.lock().await;

        if let Some(link) = slot.as_ref() {
            if link.is_alive() {
                return Ok(link.clone());
            }
        }

        // Someone else just failed to connect while we waited.
        if !self.config.reliable {
            let state = self.lock_state();
            if state.connect_failures != failures_seen {
                let message = state
                    .last_failure
                    .clone()
                    .unwrap_or_else(|| "connect failed".to_string());
                return Err(StompError::Connection(message));
            }
        }

        if let Some(old) = slot.take() {
            old.close().await;
        }

        loop {
            match self.establish().await {
                Ok(link) => {
                    *slot = Some(link.clone());
                    return Ok(link);
                }
                Err(e) => {
                    let message = self.after_connect_failure(&e);
                    if !self.config.reliable || !self.pause_before_retry().await {
                        return Err(StompError::Connection(message));
                    }
                }
            }
        }
    }

    /// Sleep `reconnect_delay` before the next connect attempt.
    ///
    /// Returns `false` if `disconnect` was called, before or during the
    /// sleep; the retry loop must then give up.
    async fn pause_before_retry(&self) -> bool {
        let notified = self.closing.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent disconnect is not missed.
        notified.as_mut().enable();

        if self.shutdown.load(Ordering::Acquire) {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            _ = &mut notified => {}
        }
        if self.shutdown.load(Ordering::Acquire) {
            tracing::info!("reconnect abandoned: connection is shutting down");
            return false;
        }
        true
    }

    /// One connect attempt: open the channel, CONNECT, await the reply,
    /// replay subscriptions.
    async fn establish(&self) -> Result<Link> {
        let target = {
            let mut state = self.lock_state();
            state.phase = ConnectionState::Connecting;
            state.current.clone()
        };
        let target = target.ok_or_else(|| {
            StompError::Connection("no broker endpoint left to try".to_string())
        })?;

        tracing::info!("connecting to {}", target);
        let stream = self.connector.connect(&target.host, target.port).await?;
        let (read_half, mut write_half) = split(stream);
        let mut reader = BufReader::new(read_half);

        let connect = encode_frame(commands::CONNECT, &self.connect_headers(), b"");
        write_half.write_all(&connect).await?;
        write_half.flush().await?;

        let reply = read_frame(&mut reader).await?.ok_or_else(|| {
            StompError::NoData("connection closed before the CONNECT reply".to_string())
        })?;
        tracing::debug!("CONNECT answered with {}", reply.command());

        let replay: Vec<(String, Headers)> = self.lock_state().subscriptions.clone();
        for (id, headers) in &replay {
            tracing::debug!("replaying subscription {}", id);
            let frame = encode_frame(commands::SUBSCRIBE, headers, b"");
            write_half.write_all(&frame).await?;
        }
        write_half.flush().await?;

        let mut state = self.lock_state();
        state.open = true;
        state.phase = ConnectionState::Connected;
        state.last_failure = None;
        state.connected_frame = Some(reply);
        drop(state);

        self.shutdown.store(false, Ordering::Release);
        tracing::info!("connected to {}", target);
        Ok(Link::new(reader, write_half))
    }

    /// Record a failed connect, pick the next target and log. Returns the
    /// logged message.
    fn after_connect_failure(&self, err: &StompError) -> String {
        let mut state = self.lock_state();
        state.open = false;
        state.connect_failures += 1;
        state.current = next_target(
            state.current.as_ref(),
            &self.primary,
            self.secondary.as_ref(),
            self.config.reliable,
        );

        let target = state
            .current
            .as_ref()
            .map_or_else(|| "no endpoint".to_string(), |e| e.to_string());
        let message = format!(
            "connect failed: '{}' will retry in {:?} on {}",
            err, self.config.reconnect_delay, target
        );
        state.last_failure = Some(message.clone());
        drop(state);

        tracing::warn!("{}", message);
        message
    }

    fn record_failure(&self, link: &Link, message: &str) {
        link.mark_dead();
        let mut state = self.lock_state();
        state.open = false;
        state.last_failure = Some(message.to_string());
        drop(state);
        tracing::warn!("{}", message);
    }

    fn connect_headers(&self) -> Headers {
        let mut headers = Headers::new()
            .with(header_names::USER, self.config.user.as_str())
            .with(header_names::PASSWORD, self.config.password.as_str());
        if let Some(client_id) = &self.config.client_id {
            headers.insert(header_names::CLIENT_ID, client_id.as_str());
        }
        headers
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Failover target after a failed connect.
///
/// Without a secondary the target never changes. Otherwise the target
/// alternates between primary and secondary, except that an unreliable
/// connection failing on the secondary blanks the target.
fn next_target(
    current: Option<&Endpoint>,
    primary: &Endpoint,
    secondary: Option<&Endpoint>,
    reliable: bool,
) -> Option<Endpoint> {
    let Some(secondary) = secondary else {
        return current.cloned();
    };
    match current {
        None => None,
        Some(cur) if cur == secondary => reliable.then(|| primary.clone()),
        Some(_) => Some(secondary.clone()),
    }
}
