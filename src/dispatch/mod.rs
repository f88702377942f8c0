//! Request dispatcher: admission control, health-aware instance
//! selection, path/UUID substitution, and distributed fan-out for
//! collection lifecycle operations.
//!
//! Submodules:
//! - `admission`: bounded semaphore + queue.
//! - `recent_writes`: the consistency-window pin map.
//! - `selector`: write/read instance selection policy.
//! - `dispatcher`: ties the above together into a single request path.

pub mod admission;
pub mod dispatcher;
pub mod recent_writes;
pub mod selector;

pub use admission::AdmissionControl;
pub use dispatcher::{DispatchResponse, Dispatcher};
pub use recent_writes::RecentWrites;
