//! Per-partition transactions over the embedded engine.
//!
//! A transaction buffers writes in an in-memory overlay keyed by the raw
//! engine key; `None` marks a tombstone. Reads consult the overlay first,
//! then the engine's committed view, so a transaction observes its own
//! uncommitted writes while other contexts see nothing until commit.
//!
//! Exactly one execution context drives a partition's transaction, so the
//! internal locks are held only for the duration of a single operation and
//! never across visitor callbacks.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::Mutex;

use kestrel_common::error::{DbResult, EngineError};

use crate::engine::{KvEngine, WriteBatch};

/// Hook for components that keep purely in-memory state alongside the
/// durable store (pending overlays). Notified after the durable outcome is
/// decided, so transient mutations fold in on commit and roll back on
/// abort.
pub trait TransactionListener: Send + Sync {
    fn on_commit(&self);
    fn on_abort(&self);
}

/// Cheaply cloneable handle to a partition's transaction.
///
/// All clones share one overlay and one reusable write batch; column
/// families and tables each hold a clone.
#[derive(Clone)]
pub struct TransactionContext {
    inner: Arc<TxnInner>,
}

struct TxnInner {
    engine: Arc<KvEngine>,
    state: Mutex<TxnState>,
    listeners: Mutex<Vec<Arc<dyn TransactionListener>>>,
}

#[derive(Default)]
struct TxnState {
    /// Uncommitted writes; `None` is a tombstone.
    overlay: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    /// Reused across transactions: reset, not reallocated.
    batch: WriteBatch,
}

impl TransactionContext {
    pub fn new(engine: Arc<KvEngine>) -> Self {
        Self {
            inner: Arc::new(TxnInner {
                engine,
                state: Mutex::new(TxnState::default()),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a transient-state listener for commit/abort notifications.
    pub fn register_listener(&self, listener: Arc<dyn TransactionListener>) {
        self.inner.listeners.lock().push(listener);
    }

    /// Start a fresh transaction, resetting the reusable buffers.
    ///
    /// Fails when the engine has reported an unrecoverable condition.
    pub fn begin(&self) -> DbResult<()> {
        if self.inner.engine.is_poisoned() {
            return Err(EngineError::Unrecoverable("engine refused new transaction".into()).into());
        }
        let mut state = self.inner.state.lock();
        state.overlay.clear();
        state.batch.clear();
        Ok(())
    }

    /// Read a raw key: overlay first, then the committed view.
    pub fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        {
            let state = self.inner.state.lock();
            if let Some(entry) = state.overlay.get(key) {
                return Ok(entry.clone());
            }
        }
        Ok(self.inner.engine.get(key)?)
    }

    /// Short-circuited `get`.
    pub fn exists(&self, key: &[u8]) -> DbResult<bool> {
        {
            let state = self.inner.state.lock();
            if let Some(entry) = state.overlay.get(key) {
                return Ok(entry.is_some());
            }
        }
        Ok(self.inner.engine.contains_key(key))
    }

    /// Buffer a write.
    pub fn put(&self, key: &[u8], value: &[u8]) -> DbResult<()> {
        let mut state = self.inner.state.lock();
        state.overlay.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    /// Buffer a tombstone.
    pub fn delete(&self, key: &[u8]) -> DbResult<()> {
        let mut state = self.inner.state.lock();
        state.overlay.insert(key.to_vec(), None);
        Ok(())
    }

    /// Next live entry at or after `bound` in the merged overlay ∪ engine
    /// view, ascending lexicographic order. Overlay entries shadow engine
    /// entries with the same key; tombstones hide them entirely.
    ///
    /// Stateless seek-stepping: no lock is held between calls, so visitors
    /// may write mid-scan and observe their own writes on the next step.
    pub fn next_entry(
        &self,
        bound: &[u8],
        inclusive: bool,
    ) -> DbResult<Option<(Vec<u8>, Vec<u8>)>> {
        let mut from = bound.to_vec();
        let mut include = inclusive;

        loop {
            let overlay_next: Option<(Vec<u8>, Option<Vec<u8>>)> = {
                let state = self.inner.state.lock();
                let lower = if include {
                    Bound::Included(from.as_slice())
                } else {
                    Bound::Excluded(from.as_slice())
                };
                state
                    .overlay
                    .range::<[u8], _>((lower, Bound::Unbounded))
                    .next()
                    .map(|(k, v)| (k.clone(), v.clone()))
            };

            let engine_next: Option<(Vec<u8>, Vec<u8>)> = {
                let mut cursor = self.inner.engine.cursor();
                if include {
                    cursor.seek(&from);
                } else {
                    cursor.seek_after(&from);
                }
                cursor
                    .key()
                    .map(|k| (k.to_vec(), cursor.value().unwrap_or_default().to_vec()))
            };

            let (key, value) = match (overlay_next, engine_next) {
                (None, None) => return Ok(None),
                (Some((k, v)), None) => (k, v),
                (None, Some((k, v))) => (k, Some(v)),
                (Some((ok, ov)), Some((ek, ev))) => {
                    if ok <= ek {
                        (ok, ov)
                    } else {
                        (ek, Some(ev))
                    }
                }
            };

            match value {
                Some(v) => return Ok(Some((key, v))),
                None => {
                    // Tombstone: skip this key in both views and continue.
                    from = key;
                    include = false;
                }
            }
        }
    }

    /// Visit every live entry whose key starts with `prefix`, in ascending
    /// lexicographic order, until the visitor returns `false`.
    pub fn iter_prefix(
        &self,
        prefix: &[u8],
        mut visit: impl FnMut(&[u8], &[u8]) -> DbResult<bool>,
    ) -> DbResult<()> {
        let mut bound = prefix.to_vec();
        let mut inclusive = true;

        while let Some((key, value)) = self.next_entry(&bound, inclusive)? {
            if !key.starts_with(prefix) {
                break;
            }
            if !visit(&key, &value)? {
                break;
            }
            bound = key;
            inclusive = false;
        }
        Ok(())
    }

    /// Flush the overlay to the engine atomically, then notify listeners.
    ///
    /// On failure the durable store is unchanged and the overlay is
    /// cleared, exactly as for `abort`.
    pub fn commit(&self) -> DbResult<()> {
        let result = {
            let mut state = self.inner.state.lock();
            let TxnState { overlay, batch } = &mut *state;
            batch.clear();
            for (key, value) in overlay.iter() {
                match value {
                    Some(v) => batch.put(key, v),
                    None => batch.delete(key),
                }
            }
            let applied = self.inner.engine.apply(batch);
            overlay.clear();
            applied
        };

        match result {
            Ok(()) => {
                self.notify(|l| l.on_commit());
                Ok(())
            }
            Err(e) => {
                self.notify(|l| l.on_abort());
                Err(e.into())
            }
        }
    }

    /// Discard the overlay and the buffered batch, then notify listeners.
    pub fn abort(&self) {
        {
            let mut state = self.inner.state.lock();
            state.overlay.clear();
            state.batch.clear();
        }
        self.notify(|l| l.on_abort());
    }

    /// Begin, run `f`, and commit; abort when `f` fails.
    pub fn run_in_transaction<T>(&self, f: impl FnOnce() -> DbResult<T>) -> DbResult<T> {
        self.begin()?;
        match f() {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }

    fn notify(&self, f: impl Fn(&dyn TransactionListener)) {
        let listeners = self.inner.listeners.lock().clone();
        for listener in &listeners {
            f(listener.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context() -> TransactionContext {
        TransactionContext::new(Arc::new(KvEngine::in_memory()))
    }

    #[test]
    fn test_reads_observe_own_writes() {
        let txn = context();
        txn.begin().unwrap();
        txn.put(b"k", b"v").unwrap();
        assert_eq!(txn.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert!(txn.exists(b"k").unwrap());
    }

    #[test]
    fn test_writes_invisible_before_commit() {
        let engine = Arc::new(KvEngine::in_memory());
        let txn = TransactionContext::new(Arc::clone(&engine));
        txn.begin().unwrap();
        txn.put(b"k", b"v").unwrap();

        assert_eq!(engine.get(b"k").unwrap(), None);
        txn.commit().unwrap();
        assert_eq!(engine.get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_abort_discards_everything() {
        let engine = Arc::new(KvEngine::in_memory());
        let txn = TransactionContext::new(Arc::clone(&engine));

        txn.begin().unwrap();
        txn.put(b"committed", b"1").unwrap();
        txn.commit().unwrap();

        txn.begin().unwrap();
        txn.put(b"uncommitted", b"2").unwrap();
        txn.delete(b"committed").unwrap();
        txn.abort();

        assert_eq!(engine.get(b"committed").unwrap(), Some(b"1".to_vec()));
        assert_eq!(engine.get(b"uncommitted").unwrap(), None);
        assert_eq!(txn.get(b"uncommitted").unwrap(), None);
    }

    #[test]
    fn test_tombstone_hides_committed_record() {
        let txn = context();
        txn.begin().unwrap();
        txn.put(b"k", b"v").unwrap();
        txn.commit().unwrap();

        txn.begin().unwrap();
        txn.delete(b"k").unwrap();
        assert_eq!(txn.get(b"k").unwrap(), None);
        assert!(!txn.exists(b"k").unwrap());
    }

    #[test]
    fn test_iteration_merges_overlay_and_engine() {
        let txn = context();
        txn.begin().unwrap();
        txn.put(b"b", b"engine").unwrap();
        txn.put(b"d", b"engine").unwrap();
        txn.commit().unwrap();

        txn.begin().unwrap();
        txn.put(b"a", b"overlay").unwrap();
        txn.put(b"c", b"overlay").unwrap();
        txn.put(b"d", b"shadowed").unwrap();

        let mut seen = Vec::new();
        let mut bound = Vec::new();
        let mut inclusive = true;
        while let Some((key, value)) = txn.next_entry(&bound, inclusive).unwrap() {
            seen.push((key.clone(), value));
            bound = key;
            inclusive = false;
        }

        assert_eq!(
            seen,
            vec![
                (b"a".to_vec(), b"overlay".to_vec()),
                (b"b".to_vec(), b"engine".to_vec()),
                (b"c".to_vec(), b"overlay".to_vec()),
                (b"d".to_vec(), b"shadowed".to_vec()),
            ]
        );
    }

    #[test]
    fn test_iteration_skips_tombstoned_records() {
        let txn = context();
        txn.begin().unwrap();
        txn.put(b"a", b"1").unwrap();
        txn.put(b"b", b"2").unwrap();
        txn.put(b"c", b"3").unwrap();
        txn.commit().unwrap();

        txn.begin().unwrap();
        txn.delete(b"b").unwrap();

        let first = txn.next_entry(b"a", false).unwrap();
        assert_eq!(first, Some((b"c".to_vec(), b"3".to_vec())));
    }

    #[test]
    fn test_iter_prefix_stays_within_prefix() {
        let txn = context();
        txn.begin().unwrap();
        txn.put(b"a/1", b"1").unwrap();
        txn.put(b"b/1", b"3").unwrap();
        txn.commit().unwrap();

        txn.begin().unwrap();
        txn.put(b"a/2", b"2").unwrap();

        let mut seen = Vec::new();
        txn.iter_prefix(b"a/", |key, value| {
            seen.push((key.to_vec(), value.to_vec()));
            Ok(true)
        })
        .unwrap();

        assert_eq!(
            seen,
            vec![
                (b"a/1".to_vec(), b"1".to_vec()),
                (b"a/2".to_vec(), b"2".to_vec()),
            ]
        );
    }

    #[test]
    fn test_listeners_follow_outcomes() {
        struct Counter {
            commits: AtomicUsize,
            aborts: AtomicUsize,
        }
        impl TransactionListener for Counter {
            fn on_commit(&self) {
                self.commits.fetch_add(1, Ordering::Relaxed);
            }
            fn on_abort(&self) {
                self.aborts.fetch_add(1, Ordering::Relaxed);
            }
        }

        let txn = context();
        let counter = Arc::new(Counter {
            commits: AtomicUsize::new(0),
            aborts: AtomicUsize::new(0),
        });
        txn.register_listener(counter.clone());

        txn.begin().unwrap();
        txn.put(b"k", b"v").unwrap();
        txn.commit().unwrap();

        txn.begin().unwrap();
        txn.abort();

        assert_eq!(counter.commits.load(Ordering::Relaxed), 1);
        assert_eq!(counter.aborts.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_run_in_transaction_commits_on_ok() {
        let engine = Arc::new(KvEngine::in_memory());
        let txn = TransactionContext::new(Arc::clone(&engine));

        txn.run_in_transaction(|| {
            txn.put(b"k", b"v").unwrap();
            Ok(())
        })
        .unwrap();

        assert_eq!(engine.get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_run_in_transaction_aborts_on_err() {
        let engine = Arc::new(KvEngine::in_memory());
        let txn = TransactionContext::new(Arc::clone(&engine));

        let result: DbResult<()> = txn.run_in_transaction(|| {
            txn.put(b"k", b"v").unwrap();
            Err(kestrel_common::error::DbError::Conflict)
        });

        assert!(result.is_err());
        assert_eq!(engine.get(b"k").unwrap(), None);
    }
}
