//! Message-subscription table with a pending overlay.
//!
//! The durable family holds the full subscription record under (element
//! instance, message name). The transient overlay (`pending`) holds only
//! subscriptions whose open or close is still unacknowledged, ordered by
//! the time the last command was sent.
//!
//! Lifecycle:
//!
//! ```text
//!          put                    update_to_opened
//!  (absent) ──▶ Opening  ────────────▶ Opened
//!                 │                      │
//!                 │  update_to_closing   │ update_to_closing
//!                 └──────▶ Closing ◀─────┘
//!                            │
//!                            │ remove
//!                            ▼
//!                         (absent)
//! ```
//!
//! Transitions outside the diagram are ignored without error, except that
//! `put` on an existing row replaces it and restarts the pending entry.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use kestrel_common::error::{DbResult, DecodeError};
use kestrel_db::codec::{self, CompositeKey, ForeignKey, I64Key, StringKey, ValueCodec};
use kestrel_db::{ColumnFamily, TransactionDb};

use crate::column_families;
use crate::element::ElementInstanceState;
use crate::pending::PendingSubscriptions;

/// Lifecycle of a message subscription. The terminal state is absence of
/// the row, reached through `remove`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionLifecycle {
    #[default]
    Opening,
    Opened,
    Closing,
}

impl SubscriptionLifecycle {
    /// Whether the subscription awaits an acknowledgment and therefore
    /// belongs in the pending overlay.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Opening | Self::Closing)
    }
}

/// A message subscription of a workflow element instance.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub key: i64,
    pub element_instance_key: i64,
    pub message_name: String,
    pub correlation_key: String,
    pub interrupting: bool,
    pub state: SubscriptionLifecycle,
}

impl ValueCodec for SubscriptionRecord {
    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), DecodeError> {
        codec::encode_record(self, out)
    }

    fn decode_from(&mut self, input: &[u8]) -> Result<(), DecodeError> {
        *self = codec::decode_record(input)?;
        Ok(())
    }
}

type SubscriptionKey = CompositeKey<ForeignKey<I64Key>, StringKey>;

fn subscription_key() -> SubscriptionKey {
    CompositeKey::new(ElementInstanceState::foreign_key(), StringKey::default())
}

/// Typed view over `PROCESS_SUBSCRIPTION_BY_KEY` plus the pending overlay.
pub struct SubscriptionState {
    subscriptions: ColumnFamily<SubscriptionKey, SubscriptionRecord>,
    key: SubscriptionKey,
    record: SubscriptionRecord,

    scan_key: SubscriptionKey,
    scan_record: SubscriptionRecord,

    pending: Arc<PendingSubscriptions>,
}

impl SubscriptionState {
    pub fn new(db: &TransactionDb) -> Self {
        let pending = Arc::new(PendingSubscriptions::default());
        db.transaction().register_listener(pending.clone());

        Self {
            subscriptions: db.column_family(column_families::PROCESS_SUBSCRIPTION_BY_KEY),
            key: subscription_key(),
            record: SubscriptionRecord::default(),
            scan_key: subscription_key(),
            scan_record: SubscriptionRecord::default(),
            pending,
        }
    }

    /// Store the subscription as `Opening` under the given key, replacing
    /// any existing row, and (re-)insert its pending entry at sent time 0.
    pub fn put(&mut self, key: i64, record: &SubscriptionRecord) -> DbResult<()> {
        self.bind_key(record.element_instance_key, &record.message_name);

        self.record.clone_from(record);
        self.record.key = key;
        self.record.state = SubscriptionLifecycle::Opening;
        self.subscriptions.put(&self.key, &self.record)?;

        self.pending
            .add(record.element_instance_key, &record.message_name);
        Ok(())
    }

    /// Mark the open as acknowledged: durable state becomes `Opened` and
    /// the pending entry is dropped. Silent no-op when the row is absent.
    pub fn update_to_opened(&mut self, record: &SubscriptionRecord) -> DbResult<()> {
        if self.update(record, SubscriptionLifecycle::Opened)? {
            self.pending
                .remove(record.element_instance_key, &record.message_name);
        }
        Ok(())
    }

    /// Start closing: durable state becomes `Closing` and a fresh pending
    /// entry is inserted. Silent no-op when the row is absent.
    pub fn update_to_closing(&mut self, record: &SubscriptionRecord) -> DbResult<()> {
        if self.update(record, SubscriptionLifecycle::Closing)? {
            self.pending
                .add(record.element_instance_key, &record.message_name);
        }
        Ok(())
    }

    /// Delete the subscription and its pending entry. Returns whether a
    /// row existed.
    pub fn remove(&mut self, element_instance_key: i64, message_name: &str) -> DbResult<bool> {
        self.bind_key(element_instance_key, message_name);
        if !self.subscriptions.exists(&self.key)? {
            return Ok(false);
        }
        self.subscriptions.delete(&self.key)?;
        self.pending.remove(element_instance_key, message_name);
        Ok(true)
    }

    pub fn get(
        &mut self,
        element_instance_key: i64,
        message_name: &str,
    ) -> DbResult<Option<&SubscriptionRecord>> {
        self.bind_key(element_instance_key, message_name);
        if self.subscriptions.get(&self.key, &mut self.record)? {
            Ok(Some(&self.record))
        } else {
            Ok(None)
        }
    }

    pub fn exists(&mut self, element_instance_key: i64, message_name: &str) -> DbResult<bool> {
        self.bind_key(element_instance_key, message_name);
        self.subscriptions.exists(&self.key)
    }

    /// Visit every subscription of one element instance, in message-name
    /// order.
    pub fn visit_element_subscriptions(
        &mut self,
        element_instance_key: i64,
        mut visit: impl FnMut(&SubscriptionRecord) -> DbResult<()>,
    ) -> DbResult<()> {
        self.key.first.inner_mut().wrap(element_instance_key);
        let prefix = &self.key.first;

        self.subscriptions.while_equal_prefix(
            prefix,
            &mut self.scan_key,
            &mut self.scan_record,
            |_, record| {
                visit(record)?;
                Ok(true)
            },
        )
    }

    /// Visit pending subscriptions whose last command was sent at or
    /// before `deadline`, oldest first, until the visitor halts.
    pub fn visit_pending_before(
        &mut self,
        deadline: i64,
        mut visit: impl FnMut(&SubscriptionRecord) -> DbResult<bool>,
    ) -> DbResult<()> {
        for entry in self.pending.entries_before(deadline) {
            self.bind_key(entry.element_instance_key, &entry.message_name);
            if self.subscriptions.get(&self.key, &mut self.record)? {
                if !visit(&self.record)? {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Record that a command was (re-)sent for this subscription. Only the
    /// overlay changes; the durable row is untouched.
    pub fn update_sent_time(&mut self, record: &SubscriptionRecord, sent_time: i64) {
        self.pending
            .update_sent_time(record.element_instance_key, &record.message_name, sent_time);
    }

    /// Recovery pass: rebuild the pending overlay from the durable family.
    /// Idempotent, so replays of the startup sequence are harmless.
    pub fn on_recovered(&mut self) -> DbResult<()> {
        let pending = Arc::clone(&self.pending);
        self.subscriptions
            .for_each(&mut self.scan_key, &mut self.scan_record, |_, record| {
                if record.state.is_pending() {
                    pending.add_if_absent(record.element_instance_key, &record.message_name);
                }
                Ok(())
            })
    }

    fn update(
        &mut self,
        record: &SubscriptionRecord,
        state: SubscriptionLifecycle,
    ) -> DbResult<bool> {
        self.bind_key(record.element_instance_key, &record.message_name);
        if !self.subscriptions.get(&self.key, &mut self.record)? {
            return Ok(false);
        }

        let key = self.record.key;
        self.record.clone_from(record);
        self.record.key = key;
        self.record.state = state;
        self.subscriptions.put(&self.key, &self.record)?;
        Ok(true)
    }

    fn bind_key(&mut self, element_instance_key: i64, message_name: &str) {
        self.key.first.inner_mut().wrap(element_instance_key);
        self.key.second.wrap(message_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_common::config::DbConfig;

    fn subscription(element: i64, message: &str) -> SubscriptionRecord {
        SubscriptionRecord {
            key: 0,
            element_instance_key: element,
            message_name: message.to_string(),
            correlation_key: "order-123".into(),
            interrupting: true,
            state: SubscriptionLifecycle::Opening,
        }
    }

    fn state() -> (TransactionDb, SubscriptionState) {
        let db = TransactionDb::in_memory(&DbConfig::default());
        let state = SubscriptionState::new(&db);
        (db, state)
    }

    fn pending_names(state: &mut SubscriptionState) -> Vec<String> {
        let mut names = Vec::new();
        state
            .visit_pending_before(i64::MAX, |record| {
                names.push(record.message_name.clone());
                Ok(true)
            })
            .unwrap();
        names
    }

    #[test]
    fn test_put_stores_opening_subscription() {
        let (_db, mut state) = state();
        state.put(100, &subscription(5, "M")).unwrap();

        let stored = state.get(5, "M").unwrap().unwrap();
        assert_eq!(stored.key, 100);
        assert_eq!(stored.state, SubscriptionLifecycle::Opening);
        assert_eq!(pending_names(&mut state), vec!["M"]);
    }

    #[test]
    fn test_opened_leaves_pending_then_closing_rejoins() {
        let (_db, mut state) = state();
        let record = subscription(5, "M");
        state.put(100, &record).unwrap();

        state.update_to_opened(&record).unwrap();
        assert_eq!(
            state.get(5, "M").unwrap().unwrap().state,
            SubscriptionLifecycle::Opened
        );
        assert!(pending_names(&mut state).is_empty());

        state.update_to_closing(&record).unwrap();
        assert_eq!(
            state.get(5, "M").unwrap().unwrap().state,
            SubscriptionLifecycle::Closing
        );
        assert_eq!(pending_names(&mut state), vec!["M"]);
    }

    #[test]
    fn test_update_on_missing_row_is_silent_noop() {
        let (_db, mut state) = state();
        let record = subscription(5, "missing");

        state.update_to_opened(&record).unwrap();
        state.update_to_closing(&record).unwrap();

        assert!(state.get(5, "missing").unwrap().is_none());
        assert!(pending_names(&mut state).is_empty());
    }

    #[test]
    fn test_remove_reports_presence() {
        let (_db, mut state) = state();
        state.put(100, &subscription(5, "M")).unwrap();

        assert!(state.remove(5, "M").unwrap());
        assert!(!state.remove(5, "M").unwrap());
        assert!(state.get(5, "M").unwrap().is_none());
        assert!(pending_names(&mut state).is_empty());
    }

    #[test]
    fn test_update_sent_time_respects_deadline() {
        let (_db, mut state) = state();
        let record = subscription(5, "M");
        state.put(100, &record).unwrap();

        state.update_sent_time(&record, 1_000);

        let mut before = Vec::new();
        state
            .visit_pending_before(999, |r| {
                before.push(r.message_name.clone());
                Ok(true)
            })
            .unwrap();
        assert!(before.is_empty());

        assert_eq!(pending_names(&mut state), vec!["M"]);
    }

    #[test]
    fn test_pending_visits_oldest_first_and_halts() {
        let (_db, mut state) = state();
        let first = subscription(1, "A");
        let second = subscription(2, "B");
        state.put(10, &first).unwrap();
        state.put(11, &second).unwrap();
        state.update_sent_time(&first, 500);

        // Oldest first: B (sent 0) before A (sent 500).
        assert_eq!(pending_names(&mut state), vec!["B", "A"]);

        let mut visited = Vec::new();
        state
            .visit_pending_before(i64::MAX, |r| {
                visited.push(r.message_name.clone());
                Ok(false)
            })
            .unwrap();
        assert_eq!(visited, vec!["B"]);
    }

    #[test]
    fn test_visit_element_subscriptions_in_name_order() {
        let (_db, mut state) = state();
        state.put(1, &subscription(7, "B")).unwrap();
        state.put(2, &subscription(7, "A")).unwrap();
        state.put(3, &subscription(9, "A")).unwrap();

        let mut names = Vec::new();
        state
            .visit_element_subscriptions(7, |r| {
                names.push(r.message_name.clone());
                Ok(())
            })
            .unwrap();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn test_abort_rolls_back_row_and_pending_entry() {
        let (db, mut state) = state();
        let record = subscription(5, "M");

        db.transaction().begin().unwrap();
        state.put(100, &record).unwrap();
        db.transaction().abort();

        assert!(state.get(5, "M").unwrap().is_none());
        assert!(pending_names(&mut state).is_empty());
    }

    #[test]
    fn test_commit_keeps_row_and_pending_entry() {
        let (db, mut state) = state();
        let record = subscription(5, "M");

        db.transaction().begin().unwrap();
        state.put(100, &record).unwrap();
        db.transaction().commit().unwrap();

        assert!(state.get(5, "M").unwrap().is_some());
        assert_eq!(pending_names(&mut state), vec!["M"]);
    }

    #[test]
    fn test_recovery_pass_rebuilds_overlay() {
        let (db, mut state) = state();
        let opening = subscription(1, "opening");
        let opened = subscription(2, "opened");
        let closing = subscription(3, "closing");
        state.put(10, &opening).unwrap();
        state.put(11, &opened).unwrap();
        state.update_to_opened(&opened).unwrap();
        state.put(12, &closing).unwrap();
        state.update_to_closing(&closing).unwrap();
        db.transaction().commit().unwrap();

        // A restarted partition starts with an empty overlay.
        let mut recovered = SubscriptionState::new(&db);
        assert!(pending_names(&mut recovered).is_empty());

        recovered.on_recovered().unwrap();
        let mut names = pending_names(&mut recovered);
        names.sort();
        assert_eq!(names, vec!["closing", "opening"]);

        // Running the pass again changes nothing.
        recovered.on_recovered().unwrap();
        assert_eq!(pending_names(&mut recovered).len(), 2);
    }
}
