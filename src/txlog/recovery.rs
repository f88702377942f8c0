//! Background recovery loop for the transaction safety log.
//!
//! Selects rows with status in {FAILED, ATTEMPTING}, `retry_count <
//! max_retries`, `next_retry_at <= now`; reconstructs the original
//! request (binary bodies are base64-preserved in the stored JSON) and
//! replays it through the dispatcher as if arriving from an external
//! client — this is a DAG, not a cycle: the recovery loop never re-calls
//! the component that originally invoked it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::db::Store;
use crate::error::ProxyResult;
use crate::observability::{Logger, MetricsRegistry};

use super::log::TransactionLog;

/// Re-entry point into the dispatcher. Implemented by the HTTP/dispatch
/// layer; the transaction log itself has no knowledge of admission
/// control, instance selection, or the WAL.
#[async_trait]
pub trait ReplayHandler: Send + Sync {
    async fn replay(
        &self,
        method: &str,
        path: &str,
        body: &[u8],
        headers: &Value,
        original_transaction_id: Uuid,
    ) -> Result<u16, String>;
}

pub struct RecoveryLoop {
    store: Arc<Store>,
    log: Arc<TransactionLog>,
    handler: Arc<dyn ReplayHandler>,
    metrics: Arc<MetricsRegistry>,
    period: Duration,
}

struct RecoveryRow {
    transaction_id: Uuid,
    method: String,
    path: String,
    body: Value,
    headers: Value,
    retry_count: i32,
    max_retries: i32,
}

impl RecoveryLoop {
    pub fn new(
        store: Arc<Store>,
        log: Arc<TransactionLog>,
        handler: Arc<dyn ReplayHandler>,
        metrics: Arc<MetricsRegistry>,
        period: Duration,
    ) -> Self {
        Self {
            store,
            log,
            handler,
            metrics,
            period,
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            if let Err(e) = self.sweep().await {
                Logger::warn("TXLOG_RECOVERY_SWEEP_FAILED", &[("error", &e.to_string())]);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.period) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn sweep(&self) -> ProxyResult<()> {
        let rows = self.select_due_rows().await?;
        for row in rows {
            self.recover_one(row).await;
        }
        Ok(())
    }

    async fn select_due_rows(&self) -> ProxyResult<Vec<RecoveryRow>> {
        let conn = self.store.get().await?;
        let rows = conn
            .query(
                "SELECT transaction_id, method, path, body, headers, retry_count, max_retries \
                 FROM transaction_log \
                 WHERE status IN ('FAILED', 'ATTEMPTING') AND retry_count < max_retries \
                   AND (next_retry_at IS NULL OR next_retry_at <= NOW()) \
                 ORDER BY created ASC LIMIT 100",
                &[],
            )
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| RecoveryRow {
                transaction_id: r.get(0),
                method: r.get(1),
                path: r.get(2),
                body: r.get::<_, Option<Value>>(3).unwrap_or(Value::Null),
                headers: r.get::<_, Option<Value>>(4).unwrap_or(Value::Null),
                retry_count: r.get(5),
                max_retries: r.get(6),
            })
            .collect())
    }

    async fn recover_one(&self, row: RecoveryRow) {
        let body_bytes = decode_body(&row.body);

        let result = self
            .handler
            .replay(&row.method, &row.path, &body_bytes, &row.headers, row.transaction_id)
            .await;

        match result {
            Ok(status) if (200..300).contains(&status) => {
                if let Err(e) = self.log.mark_recovered(row.transaction_id).await {
                    Logger::warn(
                        "TXLOG_RECOVERY_MARK_FAILED",
                        &[("transaction_id", &row.transaction_id.to_string()), ("error", &e.to_string())],
                    );
                }
                self.metrics.incr_transactions_recovered();
            }
            Ok(status) => {
                self.handle_exhaustion_or_retry(&row, &format!("recovery replay returned {status}"))
                    .await;
            }
            Err(reason) => {
                self.handle_exhaustion_or_retry(&row, &reason).await;
            }
        }
    }

    async fn handle_exhaustion_or_retry(&self, row: &RecoveryRow, reason: &str) {
        if row.retry_count + 1 >= row.max_retries {
            if let Err(e) = self.log.abandon(row.transaction_id).await {
                Logger::warn(
                    "TXLOG_ABANDON_PERSIST_FAILED",
                    &[("transaction_id", &row.transaction_id.to_string()), ("error", &e.to_string())],
                );
            }
        } else if let Err(e) = self.log.mark_failed(row.transaction_id, reason, false, None).await {
            Logger::warn(
                "TXLOG_MARK_FAILED_PERSIST_FAILED",
                &[("transaction_id", &row.transaction_id.to_string()), ("error", &e.to_string())],
            );
        }
    }
}

/// Bodies are stored as JSON (JSONB column); binary payloads are
/// base64-encoded under a `__base64__` wrapper key at log time so they
/// survive the round trip through a text-friendly column type.
fn decode_body(body: &Value) -> Vec<u8> {
    if let Some(b64) = body.get("__base64__").and_then(|v| v.as_str()) {
        use base64::Engine;
        return base64::engine::general_purpose::STANDARD
            .decode(b64)
            .unwrap_or_default();
    }
    if body.is_null() {
        return Vec::new();
    }
    serde_json::to_vec(body).unwrap_or_default()
}

/// Encode a raw request body for the `body JSONB` column, preserving
/// binary payloads that are not valid UTF-8/JSON behind a base64 wrapper.
pub fn encode_body_for_log(body: &[u8]) -> Value {
    if let Ok(parsed) = serde_json::from_slice::<Value>(body) {
        return parsed;
    }
    use base64::Engine;
    serde_json::json!({ "__base64__": base64::engine::general_purpose::STANDARD.encode(body) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips_json_body() {
        let original = br#"{"ids":["a","b"]}"#;
        let encoded = encode_body_for_log(original);
        let decoded = decode_body(&encoded);
        assert_eq!(decoded, original);
    }

    #[test]
    fn encode_decode_round_trips_binary_body() {
        let original: Vec<u8> = vec![0, 159, 146, 150, 255];
        let encoded = encode_body_for_log(&original);
        let decoded = decode_body(&encoded);
        assert_eq!(decoded, original);
    }
}
