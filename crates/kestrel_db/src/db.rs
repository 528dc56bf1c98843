//! Partition-level database: engine + transaction context + column-family
//! factory.
//!
//! Column families and tables are created once at startup, bound to the
//! partition's transaction context, and retained for the process lifetime.
//! The consistency-preconditions flag is read here at construction and
//! never mutated afterwards.

use std::path::Path;
use std::sync::Arc;

use kestrel_common::config::DbConfig;
use kestrel_common::error::DbResult;

use crate::codec::{KeyCodec, ValueCodec};
use crate::column_family::{ColumnFamily, ColumnFamilyId};
use crate::engine::KvEngine;
use crate::fk::ForeignKeyChecker;
use crate::txn::TransactionContext;

/// A partition's transactional state database.
pub struct TransactionDb {
    engine: Arc<KvEngine>,
    txn: TransactionContext,
    enable_preconditions: bool,
}

impl TransactionDb {
    /// Open a durable database at the given directory, replaying the log.
    pub fn open(dir: &Path, config: &DbConfig) -> DbResult<Self> {
        let engine = Arc::new(KvEngine::open(dir, &config.engine)?);
        Ok(Self::with_engine(
            engine,
            config.consistency_checks.enable_preconditions,
        ))
    }

    /// Open a volatile database (tests, scratch partitions).
    pub fn in_memory(config: &DbConfig) -> Self {
        Self::with_engine(
            Arc::new(KvEngine::in_memory()),
            config.consistency_checks.enable_preconditions,
        )
    }

    fn with_engine(engine: Arc<KvEngine>, enable_preconditions: bool) -> Self {
        let txn = TransactionContext::new(Arc::clone(&engine));
        Self {
            engine,
            txn,
            enable_preconditions,
        }
    }

    /// Create a typed handle over a column family, bound to this
    /// partition's transaction context.
    pub fn column_family<K: KeyCodec, V: ValueCodec>(
        &self,
        id: ColumnFamilyId,
    ) -> ColumnFamily<K, V> {
        let checker = self
            .enable_preconditions
            .then(|| ForeignKeyChecker::new(self.txn.clone()));
        ColumnFamily::new(id, self.txn.clone(), checker)
    }

    /// The partition's transaction context.
    pub fn transaction(&self) -> &TransactionContext {
        &self.txn
    }

    /// The underlying engine.
    pub fn engine(&self) -> &Arc<KvEngine> {
        &self.engine
    }
}
