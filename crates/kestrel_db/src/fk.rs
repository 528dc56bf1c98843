//! Referential-integrity checking for foreign-key-guarded writes.
//!
//! Unlike a column family, the checker looks up keys in *arbitrary*
//! families: it prefixes the target family's id itself and reads through
//! the unprefixed transactional keyspace, so uncommitted writes count.
//! Centralizing the lookup here keeps tables ignorant of integrity policy;
//! the process-wide preconditions flag flips behavior without table-level
//! changes.

use kestrel_common::error::{DbError, DbResult};

use crate::codec::{FkValidator, KeyCodec};
use crate::column_family::{ColumnFamilyId, CF_PREFIX_LEN};
use crate::txn::TransactionContext;

/// Verifies that foreign-key references point at live rows.
pub struct ForeignKeyChecker {
    txn: TransactionContext,
    /// Reusable lookup buffer: `target_cf (8 bytes BE) || encoded_key`.
    key_buf: Vec<u8>,
}

impl ForeignKeyChecker {
    pub fn new(txn: TransactionContext) -> Self {
        Self {
            txn,
            key_buf: Vec::new(),
        }
    }
}

impl FkValidator for ForeignKeyChecker {
    fn assert_exists(&mut self, target_cf: ColumnFamilyId, key: &dyn KeyCodec) -> DbResult<()> {
        self.key_buf.clear();
        self.key_buf.reserve(CF_PREFIX_LEN + key.encoded_len());
        target_cf.write_prefix(&mut self.key_buf);
        key.encode_into(&mut self.key_buf);

        if self.txn.exists(&self.key_buf)? {
            Ok(())
        } else {
            let key_hex = self.key_buf[CF_PREFIX_LEN..]
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect();
            Err(DbError::ForeignKeyViolation {
                key_hex,
                target_cf: target_cf.raw(),
            })
        }
    }
}
