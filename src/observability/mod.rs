//! Observability subsystem.
//!
//! - Structured logging: one JSON object per line, deterministic field
//!   ordering, synchronous writes, no buffering.
//! - Metrics: monotonic counters only, reset on process start.
//!
//! Both are owned objects constructed once at startup and shared through
//! `AppState`; there is no global mutable logger or registry.

pub mod logger;
pub mod metrics;

pub use logger::{Logger, Severity};
pub use metrics::MetricsRegistry;
