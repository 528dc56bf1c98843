//! Element-instance table: the foreign-key target.
//!
//! Timers and subscriptions reference element instances by key. When
//! consistency preconditions are enabled, deleting an element instance
//! before its referring rows is caught at the referrers' next write, not
//! here; this table only has to exist and stay addressable.

use serde::{Deserialize, Serialize};

use kestrel_common::error::{DbResult, DecodeError};
use kestrel_db::codec::{self, ForeignKey, I64Key, ValueCodec};
use kestrel_db::{ColumnFamily, TransactionDb};

use crate::column_families;

/// A workflow element instance (activity, gateway, event) that is live in
/// some process instance.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementInstanceRecord {
    pub key: i64,
    pub process_definition_key: i64,
    pub element_id: String,
}

impl ValueCodec for ElementInstanceRecord {
    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), DecodeError> {
        codec::encode_record(self, out)
    }

    fn decode_from(&mut self, input: &[u8]) -> Result<(), DecodeError> {
        *self = codec::decode_record(input)?;
        Ok(())
    }
}

/// Typed view over `ELEMENT_INSTANCE_BY_KEY`.
pub struct ElementInstanceState {
    instances: ColumnFamily<I64Key, ElementInstanceRecord>,
    key: I64Key,
    record: ElementInstanceRecord,
}

impl ElementInstanceState {
    pub fn new(db: &TransactionDb) -> Self {
        Self {
            instances: db.column_family(column_families::ELEMENT_INSTANCE_BY_KEY),
            key: I64Key::default(),
            record: ElementInstanceRecord::default(),
        }
    }

    /// A foreign-key codec referencing this table, for use in other
    /// tables' composite keys.
    pub fn foreign_key() -> ForeignKey<I64Key> {
        ForeignKey::new(column_families::ELEMENT_INSTANCE_BY_KEY, I64Key::default())
    }

    pub fn put(&mut self, record: &ElementInstanceRecord) -> DbResult<()> {
        self.key.wrap(record.key);
        self.instances.put(&self.key, record)
    }

    pub fn get(&mut self, key: i64) -> DbResult<Option<&ElementInstanceRecord>> {
        self.key.wrap(key);
        if self.instances.get(&self.key, &mut self.record)? {
            Ok(Some(&self.record))
        } else {
            Ok(None)
        }
    }

    pub fn exists(&mut self, key: i64) -> DbResult<bool> {
        self.key.wrap(key);
        self.instances.exists(&self.key)
    }

    pub fn remove(&mut self, key: i64) -> DbResult<()> {
        self.key.wrap(key);
        self.instances.delete(&self.key)
    }
}
