//! vdb-proxy entry point.
//!
//! Parses a handful of startup overrides, builds every core component
//! (persistence store, mapping resolver, health monitor, WAL engine,
//! transaction safety log, dispatcher), spawns the background loops each
//! owns, and serves the HTTP front end until a shutdown signal arrives.
//!
//! Startup failures (unreachable database, schema init failure, port
//! bind failure) are fatal: the process logs and exits nonzero rather
//! than serving traffic against a half-initialized core.

use std::process;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use clap::Parser;

use vdb_proxy::backend::BackendClient;
use vdb_proxy::config::ProxyConfig;
use vdb_proxy::db::{schema, Store};
use vdb_proxy::dispatch::{AdmissionControl, Dispatcher, RecentWrites};
use vdb_proxy::health::HealthMonitor;
use vdb_proxy::instance::{InstanceDescriptor, InstanceName};
use vdb_proxy::mapping::MappingResolver;
use vdb_proxy::observability::{Logger, MetricsRegistry};
use vdb_proxy::reaper::Reaper;
use vdb_proxy::recovery::RecoveryCoordinator;
use vdb_proxy::resource::ResourceMonitor;
use vdb_proxy::txlog::{RecoveryLoop, TransactionLog};
use vdb_proxy::wal::{SyncDriver, WalEngine, WalReplayer};
use vdb_proxy::http::{AppState, HttpServer};

/// Overrides layered on top of environment-derived defaults. Every
/// option here also has an env-var equivalent (see `config::ProxyConfig`)
/// so the proxy can run unattended in a container with no flags at all.
#[derive(Debug, Parser)]
#[command(name = "vdb-proxy", about = "HA reverse proxy for a primary/replica vector database cluster")]
struct Args {
    #[arg(long)]
    primary_url: Option<String>,

    #[arg(long)]
    replica_url: Option<String>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    database_url: Option<String>,
}

impl Args {
    fn apply(self, mut config: ProxyConfig) -> ProxyConfig {
        if let Some(v) = self.primary_url {
            config.primary_url = v;
        }
        if let Some(v) = self.replica_url {
            config.replica_url = v;
        }
        if let Some(v) = self.host {
            config.host = v;
        }
        if let Some(v) = self.port {
            config.port = v;
        }
        if let Some(v) = self.database_url {
            config.database_url = v;
        }
        config
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = args.apply(ProxyConfig::from_env());

    if let Err(e) = run(config).await {
        Logger::fatal("STARTUP_FAILED", &[("error", &e)]);
        process::exit(1);
    }
}

async fn run(config: ProxyConfig) -> Result<(), String> {
    let metrics = Arc::new(MetricsRegistry::new());

    let store = Arc::new(
        Store::connect(&config.database_url, metrics.clone())
            .map_err(|e| format!("database connection failed: {e}"))?,
    );
    schema::init_schema(&store)
        .await
        .map_err(|e| format!("schema init failed: {e}"))?;
    Logger::info("SCHEMA_READY", &[]);

    let backend = Arc::new(BackendClient::new(config.request_timeout()));
    let mapping = Arc::new(MappingResolver::new(store.clone(), backend.clone()));

    let primary = Arc::new(InstanceDescriptor::new(InstanceName::Primary, config.primary_url.clone(), 100));
    let replica = Arc::new(InstanceDescriptor::new(InstanceName::Replica, config.replica_url.clone(), 50));

    let recovery = Arc::new(RecoveryCoordinator::new(
        store.clone(),
        mapping.clone(),
        backend.clone(),
        primary.clone(),
        replica.clone(),
        metrics.clone(),
    ));

    let health = Arc::new(HealthMonitor::new(
        primary.clone(),
        replica.clone(),
        backend.clone(),
        config.check_interval(),
        recovery,
    ));

    let wal = Arc::new(WalEngine::new(
        store.clone(),
        mapping.clone(),
        backend.clone(),
        metrics.clone(),
        config.clone(),
    ));
    let replayer = Arc::new(WalReplayer::new(wal.clone(), mapping.clone(), backend.clone(), metrics.clone()));

    let pressure_fraction = Arc::new(AtomicUsize::new(0));
    let resource_monitor = Arc::new(ResourceMonitor::new(
        config.max_memory_mb,
        metrics.clone(),
        pressure_fraction.clone(),
    ));

    let sync_driver = Arc::new(SyncDriver::new(
        wal.clone(),
        replayer,
        primary.clone(),
        replica.clone(),
        metrics.clone(),
        config.clone(),
        pressure_fraction,
    ));

    let txlog = Arc::new(TransactionLog::new(store.clone(), metrics.clone(), 5));

    let admission = Arc::new(AdmissionControl::new(
        config.max_concurrent_requests,
        config.request_queue_size,
        config.admission_timeout(),
        metrics.clone(),
    ));
    let recent_writes = Arc::new(RecentWrites::new(config.consistency_window()));

    let dispatcher = Arc::new(Dispatcher::new(
        health.clone(),
        backend.clone(),
        wal.clone(),
        mapping.clone(),
        txlog.clone(),
        admission,
        recent_writes,
        metrics.clone(),
        config.clone(),
    ));

    let recovery_loop = Arc::new(RecoveryLoop::new(
        store.clone(),
        txlog.clone(),
        dispatcher.clone(),
        metrics.clone(),
        std::time::Duration::from_secs(30),
    ));

    let reaper = Arc::new(Reaper::new(
        wal.clone(),
        txlog,
        config.wal_retention(),
        config.transaction_retention(),
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let health_task = tokio::spawn(health.clone().run(shutdown_rx.clone()));
    let sync_task = tokio::spawn(sync_driver.run(shutdown_rx.clone()));
    let resource_task = tokio::spawn(resource_monitor.run(shutdown_rx.clone()));
    let recovery_task = tokio::spawn(recovery_loop.run(shutdown_rx.clone()));
    let reaper_task = tokio::spawn(reaper.run(shutdown_rx.clone()));

    let state = AppState {
        dispatcher,
        health,
        wal,
        metrics,
        primary,
        replica,
    };

    let server = HttpServer::new(&config.socket_addr(), state);
    Logger::info("LISTENING", &[("addr", &server.socket_addr().to_string())]);

    tokio::select! {
        result = server.serve() => {
            if let Err(e) = result {
                return Err(format!("http server error: {e}"));
            }
        }
        _ = tokio::signal::ctrl_c() => {
            Logger::info("SHUTDOWN_SIGNAL_RECEIVED", &[]);
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(health_task, sync_task, resource_task, recovery_task, reaper_task);

    Ok(())
}
