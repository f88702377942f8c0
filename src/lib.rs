//! vdb-proxy - a highly-available reverse proxy and synchronization
//! engine sitting in front of a two-instance (primary/replica) vector
//! database cluster.
//!
//! The proxy keeps the two instances converged via a durable
//! write-ahead log, maps client-visible collection names onto
//! per-instance identifiers, and logs every inbound write before
//! dispatch so that a crash between acceptance and completion is
//! recoverable rather than silently lost.

pub mod backend;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod http;
pub mod instance;
pub mod mapping;
pub mod observability;
pub mod reaper;
pub mod recovery;
pub mod resource;
pub mod txlog;
pub mod wal;
