//! Column-family identifiers for the workflow state.
//!
//! These ids are schema: each prefixes every persisted record of its
//! family, so an id is assigned once and never reused across versions.
//! Id 0 is reserved for the unprefixed default keyspace the foreign-key
//! checker reads through.

use kestrel_db::ColumnFamilyId;

/// Element instances by their engine-assigned key. Target of foreign-key
/// references from timers and subscriptions.
pub const ELEMENT_INSTANCE_BY_KEY: ColumnFamilyId = ColumnFamilyId::new(1);

/// Timers keyed by (element instance, timer key).
pub const TIMERS: ColumnFamilyId = ColumnFamilyId::new(2);

/// Due-date index over timers: (due date, element instance, timer key),
/// nil-valued. Maintained in lock-step with `TIMERS`.
pub const TIMER_DUE_DATES: ColumnFamilyId = ColumnFamilyId::new(3);

/// Message subscriptions keyed by (element instance, message name).
pub const PROCESS_SUBSCRIPTION_BY_KEY: ColumnFamilyId = ColumnFamilyId::new(4);
