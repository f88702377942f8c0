//! Shared application state handed to every axum handler.

use std::sync::Arc;

use crate::dispatch::Dispatcher;
use crate::health::HealthMonitor;
use crate::instance::InstanceDescriptor;
use crate::observability::MetricsRegistry;
use crate::wal::WalEngine;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub health: Arc<HealthMonitor>,
    pub wal: Arc<WalEngine>,
    pub metrics: Arc<MetricsRegistry>,
    pub primary: Arc<InstanceDescriptor>,
    pub replica: Arc<InstanceDescriptor>,
}
