//! Transaction safety log: a durable record of every inbound write,
//! written before dispatch, so that a proxy crash between acceptance and
//! completion is recoverable rather than silently lost.
//!
//! Submodules:
//! - `entry`: the `TransactionEntry` record, status enum, and
//!   classification helpers.
//! - `log`: `TransactionLog`, the durable append/update API used by the
//!   dispatcher.
//! - `recovery`: the background sweep that replays stuck attempts
//!   through the dispatcher and retires exhausted ones.

pub mod entry;
pub mod log;
pub mod recovery;

pub use entry::{classify_operation, extract_client_session, TransactionEntry, TransactionStatus};
pub use log::TransactionLog;
pub use recovery::{encode_body_for_log, RecoveryLoop, ReplayHandler};
