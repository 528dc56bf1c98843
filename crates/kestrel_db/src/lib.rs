//! Transactional typed key-value substrate.
//!
//! Layering, leaves first:
//!
//! ```text
//!   engine  — durable ordered map of byte sequences (WAL + sorted index)
//!   txn     — per-record transaction: overlay buffer, atomic commit/abort
//!   codec   — composable key/value codecs (ints, strings, composites, FKs)
//!   cf      — typed column families with ordered and prefix scans
//!   fk      — cross-family referential-integrity checking
//! ```
//!
//! Higher layers (`kestrel_state`) build domain tables on top.

pub mod codec;
pub mod column_family;
pub mod db;
pub mod engine;
pub mod fk;
pub mod txn;
mod wal;


pub use codec::{
    BytesKey, CompositeKey, FkValidator, ForeignKey, I64Key, KeyCodec, NilValue, StringKey,
    ValueCodec,
};
pub use column_family::{ColumnFamily, ColumnFamilyId, CF_PREFIX_LEN};
pub use db::TransactionDb;
pub use engine::{Cursor, KvEngine, WriteBatch};
pub use fk::ForeignKeyChecker;
pub use txn::{TransactionContext, TransactionListener};
