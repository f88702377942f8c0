//! Persistence store: a pooled Postgres connection plus schema
//! initialization for the three durable tables the core depends on —
//! `wal_writes`, `collection_mappings`, `transaction_log`.

pub mod pool;
pub mod schema;

pub use pool::Store;
