//! Health monitor: periodic and on-demand liveness probing of each
//! backend instance.

pub mod monitor;

pub use monitor::HealthMonitor;
