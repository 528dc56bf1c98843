use serde::{Deserialize, Serialize};

/// Top-level configuration for a partition's state database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub consistency_checks: ConsistencyChecksConfig,
}

/// Tuning for the embedded key-value engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How log appends are synced to disk. `FDataSync` gives commit-level
    /// durability; `None` trades durability for speed (tests, replicas that
    /// can re-fetch from a leader).
    pub sync_mode: SyncMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::FDataSync,
        }
    }
}

/// Durability mode for log appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    None,
    FDataSync,
}

/// Referential-integrity checking for foreign-key-guarded writes.
///
/// When `enable_preconditions` is set, every write whose key carries a
/// foreign-key tag is verified against the target column family within the
/// writing transaction. The flag is read once at construction and never
/// mutated; behavior is binary for the whole process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConsistencyChecksConfig {
    #[serde(default)]
    pub enable_preconditions: bool,
}

impl Default for ConsistencyChecksConfig {
    fn default() -> Self {
        Self {
            enable_preconditions: false,
        }
    }
}
