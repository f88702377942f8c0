//! WAL engine: durable, prioritized, batched, idempotent replay of write
//! operations with per-instance acknowledgement tracking.
//!
//! Submodules:
//! - `entry`: the `WalEntry` record and its enums.
//! - `engine`: append, batch selection, retry policy, bookkeeping.
//! - `replay`: per-entry replay semantics (path/UUID resolution, deletion
//!   conversion, verification, obsolete propagation).
//! - `sync_driver`: the background loop that drives replay at an adaptive
//!   cadence across a worker pool.

pub mod engine;
pub mod entry;
pub mod replay;
pub mod sync_driver;

pub use engine::{WalEngine, WalStatusBreakdown, WalStatusCounts};
pub use entry::{TargetInstance, WalEntry, WalStatus};
pub use replay::WalReplayer;
pub use sync_driver::SyncDriver;
