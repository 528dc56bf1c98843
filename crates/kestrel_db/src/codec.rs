//! Key and value codecs for column-family records.
//!
//! Codecs are stateful holders, not pure functions: a table owns one
//! instance per role, rebinds it around each domain value, and hands it to
//! the column family. This keeps the hot path free of per-call allocation,
//! at the price of a contract: one in-flight key per table, and encoded
//! buffers are invalidated by the next rebinding call.
//!
//! Multi-byte integers encode big-endian so lexicographic order of the
//! encoded bytes matches numeric order, which is what makes ordered scans
//! (due-date index, prefix scans) work.

use kestrel_common::error::{DbResult, DecodeError};

use crate::column_family::ColumnFamilyId;

/// Deterministic, length-self-describing encoding for a key type.
///
/// Object-safe so composite keys and the foreign-key checker can treat
/// sub-codecs uniformly.
pub trait KeyCodec {
    /// Encoded size of the currently bound value.
    fn encoded_len(&self) -> usize;

    /// Append the encoding of the bound value to `out`.
    fn encode_into(&self, out: &mut Vec<u8>);

    /// Rebind from the front of `input`; returns the number of bytes read.
    fn decode_from(&mut self, input: &[u8]) -> Result<usize, DecodeError>;

    /// Visit every foreign-key component of this key. Plain codecs have
    /// none; wrappers and composites forward.
    fn visit_foreign_keys(&self, validator: &mut dyn FkValidator) -> DbResult<()> {
        let _ = validator;
        Ok(())
    }
}

/// Encoding for a stored value. Unlike keys, order preservation is not
/// required.
pub trait ValueCodec {
    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), DecodeError>;
    fn decode_from(&mut self, input: &[u8]) -> Result<(), DecodeError>;
}

/// Receiver for foreign-key components during a guarded write.
pub trait FkValidator {
    /// Fail unless `key` exists in `target_cf`, uncommitted writes included.
    fn assert_exists(&mut self, target_cf: ColumnFamilyId, key: &dyn KeyCodec) -> DbResult<()>;
}

// ── Fixed-width integer ─────────────────────────────────────────────────

/// 64-bit signed integer key, 8 bytes big-endian.
///
/// Order-preserving over the non-negative range that engine-assigned keys
/// occupy; negative values sort after positive ones lexicographically and
/// are not used as keys.
#[derive(Debug, Default, Clone, Copy)]
pub struct I64Key {
    value: i64,
}

impl I64Key {
    pub fn wrap(&mut self, value: i64) {
        self.value = value;
    }

    pub fn value(&self) -> i64 {
        self.value
    }
}

impl KeyCodec for I64Key {
    fn encoded_len(&self) -> usize {
        8
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.value.to_be_bytes());
    }

    fn decode_from(&mut self, input: &[u8]) -> Result<usize, DecodeError> {
        let raw: [u8; 8] = input
            .get(0..8)
            .and_then(|s| s.try_into().ok())
            .ok_or(DecodeError::Truncated {
                offset: 0,
                needed: 8,
                remaining: input.len(),
            })?;
        self.value = i64::from_be_bytes(raw);
        Ok(8)
    }
}

// ── Length-prefixed byte sequences ──────────────────────────────────────

/// Read a 4-byte big-endian signed length prefix and validate it against
/// the remaining input. Returns the payload length.
fn read_length_prefix(input: &[u8]) -> Result<usize, DecodeError> {
    let raw: [u8; 4] = input
        .get(0..4)
        .and_then(|s| s.try_into().ok())
        .ok_or(DecodeError::Truncated {
            offset: 0,
            needed: 4,
            remaining: input.len(),
        })?;
    let declared = i32::from_be_bytes(raw);
    if declared < 0 {
        return Err(DecodeError::InvalidLength {
            offset: 0,
            length: declared as i64,
        });
    }
    let len = declared as usize;
    if input.len() - 4 < len {
        return Err(DecodeError::Truncated {
            offset: 4,
            needed: len,
            remaining: input.len() - 4,
        });
    }
    Ok(len)
}

/// Variable-length byte sequence: 4-byte big-endian length prefix + bytes.
#[derive(Debug, Default, Clone)]
pub struct BytesKey {
    bytes: Vec<u8>,
}

impl BytesKey {
    pub fn wrap(&mut self, bytes: &[u8]) {
        self.bytes.clear();
        self.bytes.extend_from_slice(bytes);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

impl KeyCodec for BytesKey {
    fn encoded_len(&self) -> usize {
        4 + self.bytes.len()
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.bytes);
    }

    fn decode_from(&mut self, input: &[u8]) -> Result<usize, DecodeError> {
        let len = read_length_prefix(input)?;
        self.bytes.clear();
        self.bytes.extend_from_slice(&input[4..4 + len]);
        Ok(4 + len)
    }
}

/// UTF-8 string over the byte-sequence encoding. No normalization.
#[derive(Debug, Default, Clone)]
pub struct StringKey {
    value: String,
}

impl StringKey {
    pub fn wrap(&mut self, value: &str) {
        self.value.clear();
        self.value.push_str(value);
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl KeyCodec for StringKey {
    fn encoded_len(&self) -> usize {
        4 + self.value.len()
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.value.len() as u32).to_be_bytes());
        out.extend_from_slice(self.value.as_bytes());
    }

    fn decode_from(&mut self, input: &[u8]) -> Result<usize, DecodeError> {
        let len = read_length_prefix(input)?;
        let text = std::str::from_utf8(&input[4..4 + len])
            .map_err(|e| DecodeError::Utf8 {
                offset: 4 + e.valid_up_to(),
            })?;
        self.value.clear();
        self.value.push_str(text);
        Ok(4 + len)
    }
}

// ── Nil ─────────────────────────────────────────────────────────────────

/// Zero-byte sentinel value for set-like column families.
#[derive(Debug, Default, Clone, Copy)]
pub struct NilValue;

impl ValueCodec for NilValue {
    fn encode_into(&self, _out: &mut Vec<u8>) -> Result<(), DecodeError> {
        Ok(())
    }

    fn decode_from(&mut self, _input: &[u8]) -> Result<(), DecodeError> {
        Ok(())
    }
}

// ── Composite keys ──────────────────────────────────────────────────────

/// Ordered concatenation of two sub-codecs; nest for higher arity.
///
/// Lexicographic order of the concatenation equals lexicographic order of
/// the `(first, second)` tuple, since each sub-encoding is
/// length-self-describing and order-preserving.
#[derive(Debug, Default, Clone)]
pub struct CompositeKey<A, B> {
    pub first: A,
    pub second: B,
}

impl<A, B> CompositeKey<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A: KeyCodec, B: KeyCodec> KeyCodec for CompositeKey<A, B> {
    fn encoded_len(&self) -> usize {
        self.first.encoded_len() + self.second.encoded_len()
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        self.first.encode_into(out);
        self.second.encode_into(out);
    }

    fn decode_from(&mut self, input: &[u8]) -> Result<usize, DecodeError> {
        let first_len = self.first.decode_from(input)?;
        let second_len = self.second.decode_from(&input[first_len..])?;
        Ok(first_len + second_len)
    }

    fn visit_foreign_keys(&self, validator: &mut dyn FkValidator) -> DbResult<()> {
        self.first.visit_foreign_keys(validator)?;
        self.second.visit_foreign_keys(validator)
    }
}

// ── Foreign keys ────────────────────────────────────────────────────────

/// A key codec that references a row of another column family.
///
/// The target column family is schema, not data: it is carried as a
/// construction-time tag and consulted by the consistency checker. The
/// persisted bytes are identical to the inner codec's.
#[derive(Debug, Clone)]
pub struct ForeignKey<K> {
    target_cf: ColumnFamilyId,
    inner: K,
}

impl<K> ForeignKey<K> {
    pub fn new(target_cf: ColumnFamilyId, inner: K) -> Self {
        Self { target_cf, inner }
    }

    pub fn target_cf(&self) -> ColumnFamilyId {
        self.target_cf
    }

    pub fn inner(&self) -> &K {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut K {
        &mut self.inner
    }
}

impl<K: KeyCodec> KeyCodec for ForeignKey<K> {
    fn encoded_len(&self) -> usize {
        self.inner.encoded_len()
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        self.inner.encode_into(out);
    }

    fn decode_from(&mut self, input: &[u8]) -> Result<usize, DecodeError> {
        self.inner.decode_from(input)
    }

    fn visit_foreign_keys(&self, validator: &mut dyn FkValidator) -> DbResult<()> {
        validator.assert_exists(self.target_cf, &self.inner)?;
        self.inner.visit_foreign_keys(validator)
    }
}

// ── Serde-backed record values ──────────────────────────────────────────

/// Encode a serde record value (bincode, the log serialization format).
pub fn encode_record<T: serde::Serialize>(
    record: &T,
    out: &mut Vec<u8>,
) -> Result<(), DecodeError> {
    bincode::serialize_into(out, record).map_err(|e| DecodeError::Serialization(e.to_string()))
}

/// Decode a serde record value.
pub fn decode_record<T: serde::de::DeserializeOwned>(input: &[u8]) -> Result<T, DecodeError> {
    bincode::deserialize(input).map_err(|e| DecodeError::Serialization(e.to_string()))
}
