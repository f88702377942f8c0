//! Pre-execution durable logging of inbound writes. `log_attempt` is
//! called *before* the admission semaphore is acquired so that
//! concurrency-timeout failures are themselves recoverable.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use crate::db::Store;
use crate::error::ProxyResult;
use crate::observability::{Logger, MetricsRegistry};

use super::entry::{classify_operation, extract_client_session, TransactionStatus};

pub struct TransactionLog {
    store: Arc<Store>,
    metrics: Arc<MetricsRegistry>,
    max_retries: i32,
}

impl TransactionLog {
    pub fn new(store: Arc<Store>, metrics: Arc<MetricsRegistry>, max_retries: i32) -> Self {
        Self {
            store,
            metrics,
            max_retries,
        }
    }

    /// Log an inbound request attempt before dispatch. Returns the
    /// transaction id the caller must pass to `mark_completed` /
    /// `mark_failed`.
    #[allow(clippy::too_many_arguments)]
    pub async fn log_attempt(
        &self,
        method: &str,
        path: &str,
        body: &Value,
        headers: &Value,
        remote_addr: &str,
        target_instance: Option<&str>,
    ) -> ProxyResult<Uuid> {
        let transaction_id = Uuid::new_v4();
        let operation_type = classify_operation(method, path);
        let (client_session, client_ip, user_id) = extract_client_session(headers, remote_addr);

        let conn = self.store.get().await?;
        conn.execute(
            "INSERT INTO transaction_log \
                (transaction_id, client_session, client_ip, user_id, method, path, body, headers, \
                 status, operation_type, target_instance, retry_count, max_retries, created, attempted) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 0, $12, NOW(), NOW())",
            &[
                &transaction_id,
                &client_session,
                &client_ip,
                &user_id,
                &method.to_uppercase(),
                &path,
                body,
                headers,
                &TransactionStatus::Attempting.as_str(),
                &operation_type,
                &target_instance,
                &self.max_retries,
            ],
        )
        .await?;

        self.metrics.incr_transactions_logged();
        Ok(transaction_id)
    }

    pub async fn mark_completed(&self, transaction_id: Uuid, response_status: u16) -> ProxyResult<()> {
        let conn = self.store.get().await?;
        conn.execute(
            "UPDATE transaction_log SET status = $2, response_status = $3, completed = NOW() \
             WHERE transaction_id = $1",
            &[&transaction_id, &TransactionStatus::Completed.as_str(), &(response_status as i32)],
        )
        .await?;
        self.metrics.incr_transactions_completed();
        Ok(())
    }

    /// Record a failed attempt. Schedules `next_retry_at` using a fixed
    /// short backoff; once `retry_count` reaches `max_retries` the
    /// recovery loop transitions the row to ABANDONED instead of
    /// re-attempting it.
    pub async fn mark_failed(
        &self,
        transaction_id: Uuid,
        reason: &str,
        is_timing_gap: bool,
        response_status: Option<u16>,
    ) -> ProxyResult<()> {
        let conn = self.store.get().await?;
        let row = conn
            .query_one(
                "SELECT retry_count FROM transaction_log WHERE transaction_id = $1",
                &[&transaction_id],
            )
            .await?;
        let retry_count: i32 = row.get(0);
        let new_retry_count = retry_count + 1;
        let delay = Self::retry_delay(new_retry_count);

        conn.execute(
            "UPDATE transaction_log SET status = $2, failure_reason = $3, retry_count = $4, \
                is_timing_gap_failure = $5, response_status = $6, \
                next_retry_at = NOW() + ($7 || ' seconds')::interval \
             WHERE transaction_id = $1",
            &[
                &transaction_id,
                &TransactionStatus::Failed.as_str(),
                &truncate(reason, 500),
                &new_retry_count,
                &is_timing_gap,
                &response_status.map(|s| s as i32),
                &delay.as_secs().to_string(),
            ],
        )
        .await?;
        Ok(())
    }

    /// Delete COMPLETED/ABANDONED/RECOVERED rows completed before
    /// `retention` ago. Rows still ATTEMPTING or FAILED (recoverable)
    /// are never touched regardless of age.
    pub async fn cleanup_old_transactions(&self, retention: Duration) -> ProxyResult<u64> {
        let conn = self.store.get().await?;
        let retention_secs = retention.as_secs().to_string();
        let result = conn
            .execute(
                "DELETE FROM transaction_log \
                 WHERE status IN ('COMPLETED', 'ABANDONED', 'RECOVERED') \
                   AND completed IS NOT NULL \
                   AND completed < NOW() - ($1 || ' seconds')::interval",
                &[&retention_secs],
            )
            .await?;
        Ok(result)
    }

    fn retry_delay(retry_count: i32) -> Duration {
        Duration::from_secs(30u64.saturating_mul(retry_count.max(1) as u64).min(600))
    }

    pub async fn abandon(&self, transaction_id: Uuid) -> ProxyResult<()> {
        let conn = self.store.get().await?;
        conn.execute(
            "UPDATE transaction_log SET status = $2, completed = NOW() WHERE transaction_id = $1",
            &[&transaction_id, &TransactionStatus::Abandoned.as_str()],
        )
        .await?;
        self.metrics.incr_transactions_abandoned();
        Logger::warn("TRANSACTION_ABANDONED", &[("transaction_id", &transaction_id.to_string())]);
        Ok(())
    }

    pub async fn mark_recovered(&self, transaction_id: Uuid) -> ProxyResult<()> {
        let conn = self.store.get().await?;
        conn.execute(
            "UPDATE transaction_log SET status = $2, completed = NOW() WHERE transaction_id = $1",
            &[&transaction_id, &TransactionStatus::Recovered.as_str()],
        )
        .await?;
        self.metrics.incr_transactions_recovered();
        Ok(())
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_grows_and_caps() {
        assert_eq!(TransactionLog::retry_delay(1).as_secs(), 30);
        assert_eq!(TransactionLog::retry_delay(2).as_secs(), 60);
        assert_eq!(TransactionLog::retry_delay(100).as_secs(), 600);
    }
}
