//! Listener registry for dispatching inbound frames.
//!
//! MESSAGE frames are routed by their `destination` header to the one
//! listener registered for that destination (last registration wins).
//! RECEIPT frames are routed by `receipt-id`; receipt listeners are one-shot
//! and removed when their receipt arrives. A frame with no matching listener
//! is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::protocol::{commands, Frame};

/// Callback invoked with an inbound frame.
///
/// Listeners run on the client's receive task, so they should hand heavy
/// work off elsewhere.
pub trait Listener: Send + Sync + 'static {
    fn on_frame(&self, frame: &Frame);
}

impl<F> Listener for F
where
    F: Fn(&Frame) + Send + Sync + 'static,
{
    fn on_frame(&self, frame: &Frame) {
        self(frame)
    }
}

/// Shared handle to a listener.
pub type SharedListener = Arc<dyn Listener>;

/// Outcome of dispatching one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A listener was invoked.
    Delivered,
    /// No listener for the frame's destination or receipt id.
    NoListener,
    /// The command is not dispatched.
    Ignored,
}

/// Registry mapping destinations and receipt ids to listeners.
#[derive(Default)]
pub struct ListenerRegistry {
    /// Listeners by destination.
    destinations: Mutex<HashMap<String, SharedListener>>,
    /// One-shot listeners by receipt id.
    receipts: Mutex<HashMap<String, SharedListener>>,
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for a destination, replacing any previous one.
    pub fn register_destination<L: Listener>(&self, destination: &str, listener: L) {
        self.register_destination_shared(destination, Arc::new(listener));
    }

    /// Register a shared listener, returning the one it replaced.
    pub fn register_destination_shared(
        &self,
        destination: &str,
        listener: SharedListener,
    ) -> Option<SharedListener> {
        lock(&self.destinations).insert(destination.to_string(), listener)
    }

    /// Remove a destination's listener.
    pub fn remove_destination(&self, destination: &str) -> Option<SharedListener> {
        lock(&self.destinations).remove(destination)
    }

    /// Current listener for a destination.
    pub fn destination(&self, destination: &str) -> Option<SharedListener> {
        lock(&self.destinations).get(destination).cloned()
    }

    /// Register a one-shot listener for a receipt id.
    pub fn register_receipt(&self, receipt_id: &str, listener: SharedListener) {
        lock(&self.receipts).insert(receipt_id.to_string(), listener);
    }

    /// Remove and return a receipt listener.
    pub fn take_receipt(&self, receipt_id: &str) -> Option<SharedListener> {
        lock(&self.receipts).remove(receipt_id)
    }

    /// Number of receipts still awaited.
    pub fn pending_receipts(&self) -> usize {
        lock(&self.receipts).len()
    }

    /// Deliver a frame to its listener.
    ///
    /// The registry lock is released before the listener runs, so listeners
    /// may register or remove listeners themselves.
    pub fn dispatch(&self, frame: &Frame) -> Dispatch {
        let listener = match frame.command() {
            commands::MESSAGE => frame.destination().and_then(|d| self.destination(d)),
            commands::RECEIPT => frame.receipt_id().and_then(|id| self.take_receipt(id)),
            _ => return Dispatch::Ignored,
        };

        match listener {
            Some(listener) => {
                listener.on_frame(frame);
                Dispatch::Delivered
            }
            None => Dispatch::NoListener,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking listener never runs under these locks, so the data is intact.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting() -> (Arc<AtomicUsize>, impl Listener) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move |_: &Frame| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn message(destination: &str) -> Frame {
        Frame::new(commands::MESSAGE).header("destination", destination)
    }

    #[test]
    fn test_dispatch_message_to_destination() {
        let registry = ListenerRegistry::new();
        let (count, listener) = counting();
        registry.register_destination("/queue/a", listener);

        assert_eq!(registry.dispatch(&message("/queue/a")), Dispatch::Delivered);
        assert_eq!(registry.dispatch(&message("/queue/b")), Dispatch::NoListener);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = ListenerRegistry::new();
        let (first, l1) = counting();
        let (second, l2) = counting();
        registry.register_destination("/queue/a", l1);
        registry.register_destination("/queue/a", l2);

        registry.dispatch(&message("/queue/a"));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_removed_destination_drops_message() {
        let registry = ListenerRegistry::new();
        let (count, listener) = counting();
        registry.register_destination("/queue/a", listener);
        assert!(registry.remove_destination("/queue/a").is_some());

        assert_eq!(registry.dispatch(&message("/queue/a")), Dispatch::NoListener);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_receipt_listener_is_one_shot() {
        let registry = ListenerRegistry::new();
        let (count, listener) = counting();
        registry.register_receipt("1", Arc::new(listener));
        assert_eq!(registry.pending_receipts(), 1);

        let receipt = Frame::new(commands::RECEIPT).header("receipt-id", "1");
        assert_eq!(registry.dispatch(&receipt), Dispatch::Delivered);
        assert_eq!(registry.dispatch(&receipt), Dispatch::NoListener);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.pending_receipts(), 0);
    }

    #[test]
    fn test_other_commands_ignored() {
        let registry = ListenerRegistry::new();
        let (count, listener) = counting();
        registry.register_destination("/queue/a", listener);

        let error = Frame::new(commands::ERROR).header("destination", "/queue/a");
        assert_eq!(registry.dispatch(&error), Dispatch::Ignored);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_listener_may_reenter_registry() {
        let registry = Arc::new(ListenerRegistry::new());
        let inner = registry.clone();
        registry.register_destination("/queue/a", move |_: &Frame| {
            inner.remove_destination("/queue/a");
        });

        assert_eq!(registry.dispatch(&message("/queue/a")), Dispatch::Delivered);
        assert!(registry.destination("/queue/a").is_none());
    }
}
