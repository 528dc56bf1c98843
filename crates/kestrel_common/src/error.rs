use thiserror::Error;

/// Convenience alias for `Result<T, DbError>`.
pub type DbResult<T> = Result<T, DbError>;

/// Top-level error type that all substrate-layer errors convert into.
///
/// Every error surfaces unchanged at the transaction boundary: the substrate
/// never retries, never swallows, and never logs on the hot path. The stream
/// processor driving the partition decides whether to abort the record,
/// replay, or terminate.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A foreign-key-guarded write referenced a key that does not exist in
    /// the target column family, overlay included. Only raised when
    /// consistency preconditions are enabled.
    #[error("foreign key {key_hex} does not exist in column family {target_cf}")]
    ForeignKeyViolation { key_hex: String, target_cf: u64 },

    /// The engine detected a write conflict at commit. The embedded engine
    /// is single-writer per partition and never produces this, but the
    /// commit contract allows it so the engine can be swapped for one with
    /// optimistic concurrency control.
    #[error("transaction conflict")]
    Conflict,
}

/// Errors from decoding persisted keys and values.
///
/// Malformed bytes are fatal for the current record; the decoder makes no
/// attempt to resynchronize.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("truncated input: need {needed} bytes at offset {offset}, {remaining} remaining")]
    Truncated {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("invalid encoded length {length} at offset {offset}")]
    InvalidLength { offset: usize, length: i64 },

    #[error("invalid utf-8 in string at offset {offset}")]
    Utf8 { offset: usize },

    #[error("record deserialization failed: {0}")]
    Serialization(String),
}

/// Errors from the embedded key-value engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The on-disk state failed validation during open. Not recoverable by
    /// the substrate; the partition must be restored from a snapshot or
    /// replica.
    #[error("corruption detected: {0}")]
    Corruption(String),

    /// A previous write failed mid-apply and the in-memory index may no
    /// longer match the log. All further transactions are refused.
    #[error("engine unrecoverable: {0}")]
    Unrecoverable(String),

    #[error("log serialization failed: {0}")]
    Serialization(String),
}
