//! Timer table with a due-date secondary index.
//!
//! The primary family holds the timer record under (element instance,
//! timer key). The secondary family holds (due date, element instance,
//! timer key) with a nil value, maintained in lock-step within the same
//! transaction, so the scheduler can answer "when is the next wake-up"
//! from an ordered scan instead of reading every timer.

use serde::{Deserialize, Serialize};

use kestrel_common::error::{DbResult, DecodeError};
use kestrel_db::codec::{self, CompositeKey, ForeignKey, I64Key, NilValue, ValueCodec};
use kestrel_db::{ColumnFamily, TransactionDb};

use crate::column_families;
use crate::element::ElementInstanceState;

/// A scheduled timer for a workflow element instance.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerRecord {
    pub element_instance_key: i64,
    pub timer_key: i64,
    pub due_date: i64,
    pub process_definition_key: i64,
    pub repetitions: i32,
}

impl ValueCodec for TimerRecord {
    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), DecodeError> {
        codec::encode_record(self, out)
    }

    fn decode_from(&mut self, input: &[u8]) -> Result<(), DecodeError> {
        *self = codec::decode_record(input)?;
        Ok(())
    }
}

type ElementAndTimerKey = CompositeKey<ForeignKey<I64Key>, I64Key>;
type DueDateKey = CompositeKey<I64Key, ElementAndTimerKey>;

fn element_and_timer_key() -> ElementAndTimerKey {
    CompositeKey::new(ElementInstanceState::foreign_key(), I64Key::default())
}

/// Typed view over `TIMERS` and `TIMER_DUE_DATES`.
pub struct TimerState {
    timers: ColumnFamily<ElementAndTimerKey, TimerRecord>,
    due_dates: ColumnFamily<DueDateKey, NilValue>,

    element_and_timer: ElementAndTimerKey,
    due_date_key: DueDateKey,
    timer: TimerRecord,

    scan_due_key: DueDateKey,
    scan_timer_key: ElementAndTimerKey,
    scan_timer: TimerRecord,
    scan_nil: NilValue,
}

impl TimerState {
    pub fn new(db: &TransactionDb) -> Self {
        Self {
            timers: db.column_family(column_families::TIMERS),
            due_dates: db.column_family(column_families::TIMER_DUE_DATES),
            element_and_timer: element_and_timer_key(),
            due_date_key: CompositeKey::new(I64Key::default(), element_and_timer_key()),
            timer: TimerRecord::default(),
            scan_due_key: CompositeKey::new(I64Key::default(), element_and_timer_key()),
            scan_timer_key: element_and_timer_key(),
            scan_timer: TimerRecord::default(),
            scan_nil: NilValue,
        }
    }

    /// Store the timer in both families within the current transaction.
    pub fn put(&mut self, timer: &TimerRecord) -> DbResult<()> {
        self.bind_primary(timer.element_instance_key, timer.timer_key);
        self.timers.put(&self.element_and_timer, timer)?;

        self.bind_due_date(timer);
        self.due_dates.put(&self.due_date_key, &NilValue)
    }

    /// Delete the timer from both families.
    pub fn remove(&mut self, timer: &TimerRecord) -> DbResult<()> {
        self.bind_primary(timer.element_instance_key, timer.timer_key);
        self.timers.delete(&self.element_and_timer)?;

        self.bind_due_date(timer);
        self.due_dates.delete(&self.due_date_key)
    }

    pub fn get(
        &mut self,
        element_instance_key: i64,
        timer_key: i64,
    ) -> DbResult<Option<&TimerRecord>> {
        self.bind_primary(element_instance_key, timer_key);
        if self.timers.get(&self.element_and_timer, &mut self.timer)? {
            Ok(Some(&self.timer))
        } else {
            Ok(None)
        }
    }

    /// Scan the due-date index in ascending order, resolving each entry
    /// that is due at `timestamp` and offering it to the visitor.
    ///
    /// Returns the next wake-up hint: the due date of the first entry the
    /// visitor did not consume, or of the first entry past `timestamp`
    /// once everything due was consumed, or `-1` when no timers remain
    /// pending.
    pub fn find_timers_with_due_date_before(
        &mut self,
        timestamp: i64,
        mut visit: impl FnMut(&TimerRecord) -> DbResult<bool>,
    ) -> DbResult<i64> {
        let mut next_due_date: i64 = -1;

        let timers = &mut self.timers;
        let lookup_key = &mut self.element_and_timer;
        let timer = &mut self.timer;

        self.due_dates
            .while_true(&mut self.scan_due_key, &mut self.scan_nil, |key, _| {
                let due_date = key.first.value();

                let mut consumed = false;
                if due_date <= timestamp {
                    lookup_key
                        .first
                        .inner_mut()
                        .wrap(key.second.first.inner().value());
                    lookup_key.second.wrap(key.second.second.value());

                    if timers.get(lookup_key, timer)? {
                        consumed = visit(timer)?;
                    } else {
                        // Index entry without a primary row; skip it.
                        consumed = true;
                    }
                }

                if !consumed {
                    next_due_date = due_date;
                }
                Ok(consumed)
            })?;

        Ok(next_due_date)
    }

    /// Visit every timer of one element instance, in timer-key order.
    pub fn for_each_timer_for_element_instance(
        &mut self,
        element_instance_key: i64,
        mut action: impl FnMut(&TimerRecord) -> DbResult<()>,
    ) -> DbResult<()> {
        self.element_and_timer
            .first
            .inner_mut()
            .wrap(element_instance_key);
        let prefix = &self.element_and_timer.first;

        self.timers
            .while_equal_prefix(prefix, &mut self.scan_timer_key, &mut self.scan_timer, |_, timer| {
                action(timer)?;
                Ok(true)
            })
    }

    fn bind_primary(&mut self, element_instance_key: i64, timer_key: i64) {
        self.element_and_timer
            .first
            .inner_mut()
            .wrap(element_instance_key);
        self.element_and_timer.second.wrap(timer_key);
    }

    fn bind_due_date(&mut self, timer: &TimerRecord) {
        self.due_date_key.first.wrap(timer.due_date);
        self.due_date_key
            .second
            .first
            .inner_mut()
            .wrap(timer.element_instance_key);
        self.due_date_key.second.second.wrap(timer.timer_key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_common::config::DbConfig;

    fn timer(element: i64, key: i64, due: i64) -> TimerRecord {
        TimerRecord {
            element_instance_key: element,
            timer_key: key,
            due_date: due,
            process_definition_key: 1,
            repetitions: 1,
        }
    }

    fn state() -> (TransactionDb, TimerState) {
        let db = TransactionDb::in_memory(&DbConfig::default());
        let state = TimerState::new(&db);
        (db, state)
    }

    #[test]
    fn test_put_get_remove() {
        let (_db, mut state) = state();
        let t = timer(1, 10, 100);
        state.put(&t).unwrap();

        assert_eq!(state.get(1, 10).unwrap(), Some(&t));
        assert!(state.get(1, 11).unwrap().is_none());

        state.remove(&t).unwrap();
        assert!(state.get(1, 10).unwrap().is_none());
    }

    #[test]
    fn test_due_timer_visited_once_and_next_due_returned() {
        let (_db, mut state) = state();
        state.put(&timer(1, 10, 100)).unwrap();
        state.put(&timer(1, 11, 200)).unwrap();

        let mut visited = Vec::new();
        let next = state
            .find_timers_with_due_date_before(150, |t| {
                visited.push(t.timer_key);
                Ok(true)
            })
            .unwrap();

        assert_eq!(visited, vec![10]);
        assert_eq!(next, 200);
    }

    #[test]
    fn test_non_consuming_visitor_stops_scan() {
        let (_db, mut state) = state();
        state.put(&timer(1, 10, 100)).unwrap();
        state.put(&timer(1, 11, 200)).unwrap();

        let mut visited = Vec::new();
        let next = state
            .find_timers_with_due_date_before(250, |t| {
                visited.push(t.due_date);
                Ok(false)
            })
            .unwrap();

        assert_eq!(visited, vec![100]);
        assert_eq!(next, 100);
    }

    #[test]
    fn test_all_consumed_returns_no_wakeup() {
        let (_db, mut state) = state();
        state.put(&timer(1, 10, 100)).unwrap();

        let next = state
            .find_timers_with_due_date_before(500, |_| Ok(true))
            .unwrap();
        assert_eq!(next, -1);
    }

    #[test]
    fn test_no_timers_returns_no_wakeup() {
        let (_db, mut state) = state();
        let next = state
            .find_timers_with_due_date_before(500, |_| Ok(true))
            .unwrap();
        assert_eq!(next, -1);
    }

    #[test]
    fn test_due_date_order_drives_visit_order() {
        let (_db, mut state) = state();
        state.put(&timer(3, 30, 300)).unwrap();
        state.put(&timer(1, 10, 100)).unwrap();
        state.put(&timer(2, 20, 200)).unwrap();

        let mut visited = Vec::new();
        state
            .find_timers_with_due_date_before(1_000, |t| {
                visited.push(t.due_date);
                Ok(true)
            })
            .unwrap();

        assert_eq!(visited, vec![100, 200, 300]);
    }

    #[test]
    fn test_for_each_timer_for_element_instance() {
        let (_db, mut state) = state();
        state.put(&timer(1, 10, 100)).unwrap();
        state.put(&timer(1, 11, 150)).unwrap();
        state.put(&timer(2, 20, 120)).unwrap();

        let mut keys = Vec::new();
        state
            .for_each_timer_for_element_instance(1, |t| {
                keys.push(t.timer_key);
                Ok(())
            })
            .unwrap();

        assert_eq!(keys, vec![10, 11]);
    }

    #[test]
    fn test_remove_clears_due_date_index() {
        let (_db, mut state) = state();
        let t = timer(1, 10, 100);
        state.put(&t).unwrap();
        state.remove(&t).unwrap();

        let next = state
            .find_timers_with_due_date_before(500, |_| Ok(true))
            .unwrap();
        assert_eq!(next, -1);
    }
}
