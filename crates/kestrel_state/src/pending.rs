//! Transient overlay of pending message subscriptions.
//!
//! Holds one entry per subscription whose lifecycle is in flight (opening
//! or closing), ordered by the time the last command was sent, so the
//! periodic checker can find the oldest unacknowledged subscriptions
//! first.
//!
//! The overlay is purely in-memory and process-wide, but its mutations
//! are transaction-bound: each one is applied immediately (so the writing
//! context observes it) and recorded in an undo journal that is replayed
//! in reverse when the transaction aborts. The owning table registers the
//! overlay as a transaction listener to drive this.

use std::collections::{BTreeSet, HashMap};

use parking_lot::Mutex;

use kestrel_db::TransactionListener;

/// Sort key of the overlay: oldest command first, then subscription
/// identity for determinism.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct PendingEntry {
    pub sent_time: i64,
    pub element_instance_key: i64,
    pub message_name: String,
}

enum UndoOp {
    /// Undo of a removal: put the entry back.
    Reinsert(PendingEntry),
    /// Undo of an insertion: take the entry out.
    Remove(PendingEntry),
}

#[derive(Default)]
struct PendingInner {
    by_time: BTreeSet<PendingEntry>,
    /// Current sent time per subscription, for identity lookups.
    sent_times: HashMap<(i64, String), i64>,
    journal: Vec<UndoOp>,
}

impl PendingInner {
    fn insert(&mut self, entry: PendingEntry, journal: bool) {
        self.sent_times.insert(
            (entry.element_instance_key, entry.message_name.clone()),
            entry.sent_time,
        );
        self.by_time.insert(entry.clone());
        if journal {
            self.journal.push(UndoOp::Remove(entry));
        }
    }

    fn remove(&mut self, element_instance_key: i64, message_name: &str, journal: bool) {
        let identity = (element_instance_key, message_name.to_string());
        if let Some(sent_time) = self.sent_times.remove(&identity) {
            let entry = PendingEntry {
                sent_time,
                element_instance_key,
                message_name: identity.1,
            };
            self.by_time.remove(&entry);
            if journal {
                self.journal.push(UndoOp::Reinsert(entry));
            }
        }
    }
}

/// The pending-subscription overlay.
#[derive(Default)]
pub(crate) struct PendingSubscriptions {
    inner: Mutex<PendingInner>,
}

impl PendingSubscriptions {
    /// Insert the subscription with sent time 0, replacing any existing
    /// entry (a re-put restarts the lifecycle).
    pub fn add(&self, element_instance_key: i64, message_name: &str) {
        let mut inner = self.inner.lock();
        inner.remove(element_instance_key, message_name, true);
        inner.insert(
            PendingEntry {
                sent_time: 0,
                element_instance_key,
                message_name: message_name.to_string(),
            },
            true,
        );
    }

    /// Recovery-pass insertion: not transaction-bound, and keeps an
    /// existing entry untouched so running the pass twice is a no-op.
    pub fn add_if_absent(&self, element_instance_key: i64, message_name: &str) {
        let mut inner = self.inner.lock();
        let identity = (element_instance_key, message_name.to_string());
        if inner.sent_times.contains_key(&identity) {
            return;
        }
        inner.insert(
            PendingEntry {
                sent_time: 0,
                element_instance_key,
                message_name: message_name.to_string(),
            },
            false,
        );
    }

    pub fn remove(&self, element_instance_key: i64, message_name: &str) {
        self.inner.lock().remove(element_instance_key, message_name, true);
    }

    /// Re-key the entry under a new sent time; no-op when the
    /// subscription is not pending.
    pub fn update_sent_time(&self, element_instance_key: i64, message_name: &str, sent_time: i64) {
        let mut inner = self.inner.lock();
        let identity = (element_instance_key, message_name.to_string());
        if !inner.sent_times.contains_key(&identity) {
            return;
        }
        inner.remove(element_instance_key, message_name, true);
        inner.insert(
            PendingEntry {
                sent_time,
                element_instance_key,
                message_name: message_name.to_string(),
            },
            true,
        );
    }

    /// Snapshot of entries with `sent_time <= deadline`, oldest first.
    ///
    /// A snapshot rather than live iteration: visitors typically update
    /// sent times while walking the result.
    pub fn entries_before(&self, deadline: i64) -> Vec<PendingEntry> {
        let inner = self.inner.lock();
        inner
            .by_time
            .iter()
            .take_while(|e| e.sent_time <= deadline)
            .cloned()
            .collect()
    }
}

impl TransactionListener for PendingSubscriptions {
    fn on_commit(&self) {
        self.inner.lock().journal.clear();
    }

    fn on_abort(&self) {
        let mut inner = self.inner.lock();
        while let Some(op) = inner.journal.pop() {
            match op {
                UndoOp::Reinsert(entry) => {
                    inner.sent_times.insert(
                        (entry.element_instance_key, entry.message_name.clone()),
                        entry.sent_time,
                    );
                    inner.by_time.insert(entry);
                }
                UndoOp::Remove(entry) => {
                    inner
                        .sent_times
                        .remove(&(entry.element_instance_key, entry.message_name.clone()));
                    inner.by_time.remove(&entry);
                }
            }
        }
    }
}
