//! Typed column families over the transactional keyspace.
//!
//! A column family is a disjoint keyspace identified by a stable small
//! integer. Every physical record is `cf_id (8 bytes BE) || encoded_key`,
//! so records of one family are contiguous in the engine's ordered view
//! and prefix scans fall out of plain ordered iteration.

use std::fmt;
use std::marker::PhantomData;

use kestrel_common::error::{DbResult, DecodeError};

use crate::codec::{KeyCodec, ValueCodec};
use crate::fk::ForeignKeyChecker;
use crate::txn::TransactionContext;

/// Length of the column-family prefix on every physical key.
pub const CF_PREFIX_LEN: usize = 8;

/// Stable identifier of a column family.
///
/// Identifiers are schema: they are assigned once and never reused across
/// versions, because they prefix every persisted record of the family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColumnFamilyId(u64);

impl ColumnFamilyId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Append the 8-byte big-endian prefix to `out`.
    pub fn write_prefix(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0.to_be_bytes());
    }
}

impl fmt::Display for ColumnFamilyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Typed handle over one column family.
///
/// Owns reusable key/value byte buffers; callers must treat an encoded
/// buffer as invalidated by the next mutating call (one in-flight key per
/// family, per the single-threaded-per-partition model).
pub struct ColumnFamily<K, V> {
    id: ColumnFamilyId,
    txn: TransactionContext,
    /// Present iff consistency preconditions are enabled; checking is
    /// all-or-nothing for the process.
    checker: Option<ForeignKeyChecker>,
    key_buf: Vec<u8>,
    value_buf: Vec<u8>,
    _codecs: PhantomData<fn(K, V)>,
}

impl<K: KeyCodec, V: ValueCodec> ColumnFamily<K, V> {
    pub(crate) fn new(
        id: ColumnFamilyId,
        txn: TransactionContext,
        checker: Option<ForeignKeyChecker>,
    ) -> Self {
        Self {
            id,
            txn,
            checker,
            key_buf: Vec::new(),
            value_buf: Vec::new(),
            _codecs: PhantomData,
        }
    }

    pub fn id(&self) -> ColumnFamilyId {
        self.id
    }

    fn bind_key(&mut self, key: &K) {
        self.key_buf.clear();
        self.key_buf.reserve(CF_PREFIX_LEN + key.encoded_len());
        self.id.write_prefix(&mut self.key_buf);
        key.encode_into(&mut self.key_buf);
    }

    /// Write a record, verifying foreign-key references first when
    /// preconditions are enabled.
    pub fn put(&mut self, key: &K, value: &V) -> DbResult<()> {
        if let Some(checker) = &mut self.checker {
            key.visit_foreign_keys(checker)?;
        }
        self.bind_key(key);
        self.value_buf.clear();
        value.encode_into(&mut self.value_buf)?;
        self.txn.put(&self.key_buf, &self.value_buf)
    }

    /// Read a record into `value`. Returns `false` when absent.
    pub fn get(&mut self, key: &K, value: &mut V) -> DbResult<bool> {
        self.bind_key(key);
        match self.txn.get(&self.key_buf)? {
            Some(raw) => {
                value.decode_from(&raw)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn delete(&mut self, key: &K) -> DbResult<()> {
        self.bind_key(key);
        self.txn.delete(&self.key_buf)
    }

    pub fn exists(&mut self, key: &K) -> DbResult<bool> {
        self.bind_key(key);
        self.txn.exists(&self.key_buf)
    }

    /// Visit every record in ascending encoded-key order until the visitor
    /// returns `false`. Uncommitted overlay entries are observed.
    pub fn while_true(
        &mut self,
        key: &mut K,
        value: &mut V,
        visit: impl FnMut(&K, &V) -> DbResult<bool>,
    ) -> DbResult<()> {
        let mut prefix = Vec::with_capacity(CF_PREFIX_LEN);
        self.id.write_prefix(&mut prefix);
        self.scan_prefix(prefix, key, value, visit)
    }

    /// Visit every record whose encoded key starts with the encoding of
    /// `prefix` (the leading sub-codecs of a composite key), in ascending
    /// order, until the visitor returns `false`.
    pub fn while_equal_prefix(
        &mut self,
        prefix: &dyn KeyCodec,
        key: &mut K,
        value: &mut V,
        visit: impl FnMut(&K, &V) -> DbResult<bool>,
    ) -> DbResult<()> {
        let mut bound = Vec::with_capacity(CF_PREFIX_LEN + prefix.encoded_len());
        self.id.write_prefix(&mut bound);
        prefix.encode_into(&mut bound);
        self.scan_prefix(bound, key, value, visit)
    }

    /// Unconditional visit of every record in order.
    pub fn for_each(
        &mut self,
        key: &mut K,
        value: &mut V,
        mut visit: impl FnMut(&K, &V) -> DbResult<()>,
    ) -> DbResult<()> {
        self.while_true(key, value, |k, v| {
            visit(k, v)?;
            Ok(true)
        })
    }

    fn scan_prefix(
        &mut self,
        prefix: Vec<u8>,
        key: &mut K,
        value: &mut V,
        mut visit: impl FnMut(&K, &V) -> DbResult<bool>,
    ) -> DbResult<()> {
        let txn = self.txn.clone();
        txn.iter_prefix(&prefix, |raw_key, raw_value| {
            let encoded_key = &raw_key[CF_PREFIX_LEN..];
            let consumed = key.decode_from(encoded_key)?;
            if consumed != encoded_key.len() {
                return Err(DecodeError::InvalidLength {
                    offset: consumed,
                    length: encoded_key.len() as i64,
                }
                .into());
            }
            value.decode_from(raw_value)?;
            visit(key, value)
        })
    }
}
