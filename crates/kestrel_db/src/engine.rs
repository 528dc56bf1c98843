//! Embedded ordered key-value engine.
//!
//! A durable ordered map of byte sequences with atomic write batches:
//!
//! ```text
//!   commit ──► WAL record (one per batch) ──► in-memory ordered index
//!   open   ──► WAL replay rebuilds the index, torn tail truncated
//! ```
//!
//! The engine knows nothing about column families or codecs; those layers
//! prefix and interpret the raw keys. A crash either preserves a committed
//! batch completely or not at all: replay applies whole `Commit` records
//! and discards a damaged tail.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};

use kestrel_common::config::EngineConfig;
use kestrel_common::error::EngineError;

use crate::wal::{self, WalOp, WalRecord, WalWriter};

const WAL_FILE: &str = "kestrel.wal";

/// A batch of writes applied atomically at commit.
///
/// The buffer is reused across transactions: `clear` keeps the allocation.
#[derive(Default)]
pub struct WriteBatch {
    pub(crate) ops: Vec<WalOp>,
}

impl WriteBatch {
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.ops.push(WalOp::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        });
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.ops.push(WalOp::Delete { key: key.to_vec() });
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// The embedded engine: ordered index + write-ahead log.
pub struct KvEngine {
    /// Sorted committed view. Deletes remove the entry outright; tombstones
    /// only exist transiently inside transaction overlays.
    index: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    /// Durability log; absent for in-memory engines.
    wal: Option<Mutex<WalWriter>>,
    /// Set when a log append failed mid-write. The log tail is then suspect
    /// and all further commits are refused.
    poisoned: AtomicBool,
}

impl KvEngine {
    /// Open or create an engine at the given directory, replaying the log.
    pub fn open(dir: &Path, config: &EngineConfig) -> Result<Self, EngineError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(WAL_FILE);

        let mut index = BTreeMap::new();
        let file_len = if path.exists() {
            fs::metadata(&path)?.len()
        } else {
            0
        };

        if file_len >= wal::WAL_HEADER_SIZE as u64 {
            let valid_len = wal::replay(&path, |record| match record {
                WalRecord::Commit { ops } => {
                    for op in ops {
                        match op {
                            WalOp::Put { key, value } => {
                                index.insert(key, value);
                            }
                            WalOp::Delete { key } => {
                                index.remove(&key);
                            }
                        }
                    }
                }
            })?;

            if valid_len < file_len {
                tracing::warn!(
                    "truncating damaged log tail: {} of {} bytes valid",
                    valid_len,
                    file_len
                );
                OpenOptions::new()
                    .write(true)
                    .open(&path)?
                    .set_len(valid_len)?;
            }
        } else if file_len > 0 {
            // A crash mid-header-write; the writer below lays it down again.
            tracing::warn!("discarding torn log header of {} bytes", file_len);
            OpenOptions::new().write(true).open(&path)?.set_len(0)?;
        }

        let wal = WalWriter::open(&path, config.sync_mode)?;
        Ok(Self {
            index: RwLock::new(index),
            wal: Some(Mutex::new(wal)),
            poisoned: AtomicBool::new(false),
        })
    }

    /// Create a volatile engine with no log (tests, scratch partitions).
    pub fn in_memory() -> Self {
        Self {
            index: RwLock::new(BTreeMap::new()),
            wal: None,
            poisoned: AtomicBool::new(false),
        }
    }

    /// Whether the engine refuses writes after a failed log append.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Atomically install a write batch: one log record, then the index.
    pub fn apply(&self, batch: &WriteBatch) -> Result<(), EngineError> {
        if self.is_poisoned() {
            return Err(EngineError::Unrecoverable(
                "previous log append failed".into(),
            ));
        }
        if batch.is_empty() {
            return Ok(());
        }

        if let Some(wal) = &self.wal {
            let record = WalRecord::Commit {
                ops: batch.ops.clone(),
            };
            if let Err(e) = wal.lock().append(&record) {
                // The log may now hold a partial record; appending more
                // would put intact records after the tear, where replay
                // cannot reach them.
                self.poisoned.store(true, Ordering::Release);
                return Err(e);
            }
        }

        let mut index = self.index.write();
        for op in &batch.ops {
            match op {
                WalOp::Put { key, value } => {
                    index.insert(key.clone(), value.clone());
                }
                WalOp::Delete { key } => {
                    index.remove(key);
                }
            }
        }
        Ok(())
    }

    /// Point lookup.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        Ok(self.index.read().get(key).cloned())
    }

    /// Whether a live record exists for the key.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.index.read().contains_key(key)
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// A cursor positioned before the start; call `seek` first.
    pub fn cursor(&self) -> Cursor<'_> {
        Cursor {
            engine: self,
            current: None,
        }
    }

    fn entry_at_or_after(
        &self,
        bound: &[u8],
        inclusive: bool,
    ) -> Option<(Vec<u8>, Vec<u8>)> {
        let lower = if inclusive {
            Bound::Included(bound)
        } else {
            Bound::Excluded(bound)
        };
        let index = self.index.read();
        index
            .range::<[u8], _>((lower, Bound::Unbounded))
            .next()
            .map(|(k, v)| (k.clone(), v.clone()))
    }
}

/// Ordered cursor over the committed view.
///
/// Each step re-seeks under a short read lock, so the holder may freely
/// write between steps; a step observes the committed state at the moment
/// it runs (single-threaded-per-partition model).
pub struct Cursor<'a> {
    engine: &'a KvEngine,
    current: Option<(Vec<u8>, Vec<u8>)>,
}

impl Cursor<'_> {
    /// Position at the first record with key >= `lower_bound`.
    pub fn seek(&mut self, lower_bound: &[u8]) {
        self.current = self.engine.entry_at_or_after(lower_bound, true);
    }

    /// Position at the first record with key > `key`.
    pub fn seek_after(&mut self, key: &[u8]) {
        self.current = self.engine.entry_at_or_after(key, false);
    }

    /// Advance past the current record.
    pub fn next(&mut self) {
        if let Some((key, _)) = self.current.take() {
            self.current = self.engine.entry_at_or_after(&key, false);
        }
    }

    pub fn valid(&self) -> bool {
        self.current.is_some()
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(k, _)| k.as_slice())
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(_, v)| v.as_slice())
    }
}
