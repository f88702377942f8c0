//! Connection pool wrapper around `deadpool_postgres`.
//!
//! Tasks acquire a connection only for the duration of a single DB
//! operation. Explicit hit/miss counters are exposed to `/metrics`. Pool
//! exhaustion degrades to a direct (unpooled) connection rather than
//! blocking the caller indefinitely — this keeps the write/read path
//! responsive under a connection-pool stampede at the cost of a slower
//! individual request.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use deadpool_postgres::{Config as PoolConfig, Pool, Runtime};
use tokio_postgres::{Client, NoTls};

use crate::error::{ProxyError, ProxyResult};
use crate::observability::MetricsRegistry;

/// A connection either checked out of the pool or opened directly when the
/// pool could not hand one out within `acquire_timeout`.
pub enum Conn {
    Pooled(deadpool_postgres::Object),
    Direct(Client),
}

impl Deref for Conn {
    type Target = Client;

    fn deref(&self) -> &Client {
        match self {
            Conn::Pooled(obj) => obj,
            Conn::Direct(client) => client,
        }
    }
}

pub struct Store {
    pool: Pool,
    database_url: String,
    metrics: Arc<MetricsRegistry>,
    acquire_timeout: Duration,
}

impl Store {
    pub fn connect(database_url: &str, metrics: Arc<MetricsRegistry>) -> ProxyResult<Self> {
        let mut cfg = PoolConfig::new();
        cfg.url = Some(database_url.to_string());
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ProxyError::Fatal(format!("failed to build connection pool: {e}")))?;

        Ok(Self {
            pool,
            database_url: database_url.to_string(),
            metrics,
            acquire_timeout: Duration::from_secs(3),
        })
    }

    /// Acquire a connection. Tries the pool first; on timeout or pool
    /// error, falls back to a direct connection so the caller never blocks
    /// indefinitely on an exhausted pool.
    pub async fn get(&self) -> ProxyResult<Conn> {
        match tokio::time::timeout(self.acquire_timeout, self.pool.get()).await {
            Ok(Ok(obj)) => {
                self.metrics.incr_pool_hits();
                Ok(Conn::Pooled(obj))
            }
            Ok(Err(_)) | Err(_) => {
                self.metrics.incr_pool_misses();
                self.metrics.incr_pool_direct_fallbacks();
                let (client, connection) =
                    tokio_postgres::connect(&self.database_url, NoTls).await?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        crate::observability::Logger::error(
                            "DB_DIRECT_CONNECTION_ERROR",
                            &[("error", &e.to_string())],
                        );
                    }
                });
                Ok(Conn::Direct(client))
            }
        }
    }

    pub fn pool_status(&self) -> (usize, usize) {
        let status = self.pool.status();
        (status.available as usize, status.size as usize)
    }
}
