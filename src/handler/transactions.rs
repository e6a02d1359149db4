//! Acknowledged frames held per open transaction.
//!
//! A frame acknowledged inside a transaction stays "at risk" until the
//! transaction ends: commit discards it for good, abort hands it back for
//! redelivery in acknowledgement order.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::protocol::Frame;

/// Replay lists keyed by transaction id.
#[derive(Debug, Default)]
pub struct TransactionLog {
    by_transaction: Mutex<HashMap<String, Vec<Frame>>>,
}

impl TransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an acknowledged frame to a transaction's replay list.
    pub fn record(&self, transaction: &str, frame: Frame) {
        self.lock()
            .entry(transaction.to_string())
            .or_default()
            .push(frame);
    }

    /// Remove and return a transaction's replay list, oldest first.
    pub fn take(&self, transaction: &str) -> Vec<Frame> {
        self.lock().remove(transaction).unwrap_or_default()
    }

    /// Drop a transaction's replay list.
    pub fn discard(&self, transaction: &str) {
        self.lock().remove(transaction);
    }

    /// Number of frames held for a transaction.
    pub fn pending(&self, transaction: &str) -> usize {
        self.lock().get(transaction).map_or(0, Vec::len)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Frame>>> {
        self.by_transaction
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
