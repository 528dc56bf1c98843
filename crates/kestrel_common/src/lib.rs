//! Shared error taxonomy and configuration for the kestrel state substrate.

pub mod config;
pub mod error;

pub use config::{ConsistencyChecksConfig, DbConfig, EngineConfig, SyncMode};
pub use error::{DbError, DbResult, DecodeError, EngineError};
