//! Typed state collections of the workflow engine.
//!
//! Each table owns one or more column families of `kestrel_db` and
//! enforces its own invariants: the timer table keeps its due-date index
//! in lock-step with the primary family, and the subscription table
//! coordinates a transient pending overlay with the durable store.
//!
//! Tables are created once per partition, bound to the partition's
//! transaction context, and retained for the process lifetime. After a
//! restart, `WorkflowState::on_recovered` rebuilds the in-memory overlays
//! from durable state.

pub mod column_families;
pub mod element;
mod pending;
pub mod subscription;
pub mod timer;

pub use element::{ElementInstanceRecord, ElementInstanceState};
pub use subscription::{SubscriptionLifecycle, SubscriptionRecord, SubscriptionState};
pub use timer::{TimerRecord, TimerState};

use kestrel_common::error::DbResult;
use kestrel_db::TransactionDb;

/// All state collections of one partition.
pub struct WorkflowState {
    pub element_instances: ElementInstanceState,
    pub timers: TimerState,
    pub subscriptions: SubscriptionState,
}

impl WorkflowState {
    pub fn new(db: &TransactionDb) -> Self {
        Self {
            element_instances: ElementInstanceState::new(db),
            timers: TimerState::new(db),
            subscriptions: SubscriptionState::new(db),
        }
    }

    /// Startup scan that repopulates transient overlays from durable
    /// state. Idempotent.
    pub fn on_recovered(&mut self) -> DbResult<()> {
        self.subscriptions.on_recovered()
    }
}
