//! Resource monitor: RSS/CPU sampling feeding adaptive WAL batch sizing
//! and a recorded peak-RSS metric.

pub mod monitor;

pub use monitor::ResourceMonitor;
