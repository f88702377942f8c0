//! Periodic storage-hygiene reaper. Deletes WAL entries and transaction
//! log rows that have sat in a terminal status past their retention
//! horizon. Runs independently of the sync driver and recovery loop —
//! it never touches a row still eligible for replay or recovery.

use std::sync::Arc;
use std::time::Duration;

use crate::observability::Logger;
use crate::txlog::TransactionLog;
use crate::wal::WalEngine;

const RUN_INTERVAL: Duration = Duration::from_secs(3600);

pub struct Reaper {
    wal: Arc<WalEngine>,
    txlog: Arc<TransactionLog>,
    wal_retention: Duration,
    transaction_retention: Duration,
}

impl Reaper {
    pub fn new(
        wal: Arc<WalEngine>,
        txlog: Arc<TransactionLog>,
        wal_retention: Duration,
        transaction_retention: Duration,
    ) -> Self {
        Self {
            wal,
            txlog,
            wal_retention,
            transaction_retention,
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(RUN_INTERVAL) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }

            match self.wal.reap_expired(self.wal_retention).await {
                Ok(n) if n > 0 => Logger::info("REAPER_WAL_ROWS_DELETED", &[("count", &n.to_string())]),
                Ok(_) => {}
                Err(e) => Logger::warn("REAPER_WAL_CLEANUP_FAILED", &[("error", &e.to_string())]),
            }

            match self.txlog.cleanup_old_transactions(self.transaction_retention).await {
                Ok(n) if n > 0 => Logger::info("REAPER_TRANSACTIONS_DELETED", &[("count", &n.to_string())]),
                Ok(_) => {}
                Err(e) => Logger::warn("REAPER_TRANSACTION_CLEANUP_FAILED", &[("error", &e.to_string())]),
            }
        }
    }
}
