//! Append, batch selection, and retry-policy bookkeeping for the WAL.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use super::entry::{TargetInstance, WalEntry, WalStatus};
use crate::backend::path;
use crate::backend::BackendClient;
use crate::config::ProxyConfig;
use crate::db::Store;
use crate::error::ProxyResult;
use crate::instance::InstanceName;
use crate::mapping::MappingResolver;
use crate::observability::{Logger, MetricsRegistry};

pub struct WalEngine {
    store: Arc<Store>,
    mapping: Arc<MappingResolver>,
    backend: Arc<BackendClient>,
    metrics: Arc<MetricsRegistry>,
    config: ProxyConfig,
}

impl WalEngine {
    pub fn new(
        store: Arc<Store>,
        mapping: Arc<MappingResolver>,
        backend: Arc<BackendClient>,
        metrics: Arc<MetricsRegistry>,
        config: ProxyConfig,
    ) -> Self {
        Self {
            store,
            mapping,
            backend,
            metrics,
            config,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn mapping(&self) -> &Arc<MappingResolver> {
        &self.mapping
    }

    pub fn backend(&self) -> &Arc<BackendClient> {
        &self.backend
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Append a write to the WAL. Performs path normalization, collection
    /// identifier extraction, DELETE method normalization, and (where
    /// applicable) ID-based deletion conversion before persisting.
    #[allow(clippy::too_many_arguments)]
    pub async fn add_wal_write(
        &self,
        original_method: &str,
        original_path: &str,
        body: &[u8],
        headers: &Value,
        target_instance: TargetInstance,
        executed_on: Option<InstanceName>,
        executed_on_base_url: Option<&str>,
    ) -> ProxyResult<Uuid> {
        let write_id = Uuid::new_v4();
        let normalized_path = path::normalize_path(original_path);

        let is_doc_delete = path::is_document_delete_path(&normalized_path);
        let stored_method = if is_doc_delete {
            "DELETE".to_string()
        } else {
            original_method.to_uppercase()
        };
        let stored_original_method = if stored_method != original_method.to_uppercase() {
            Some(original_method.to_uppercase())
        } else {
            None
        };

        // `collection_id` is always keyed by the collection's stable
        // cross-instance name, never a per-instance UUID: `partition_for`
        // and `obsolete_earlier_entries` both rely on it being a single
        // consistent key regardless of how the client addressed the
        // collection or which instance executed the request.
        let collection_id = match path::extract_collection_identifier(&normalized_path) {
            Some(identifier) => Some(self.stable_collection_name(&identifier).await),
            None if stored_method == "POST" && path::is_collection_root_path(&normalized_path) => {
                path::extract_name_from_create_body(body)
            }
            None => None,
        };

        let (stored_body, original_body, conversion_type) = if is_doc_delete {
            self.maybe_convert_deletion(&normalized_path, body, executed_on, executed_on_base_url)
                .await
        } else {
            (body.to_vec(), None, None)
        };

        let priority = if stored_method == "DELETE" { 1 } else { 0 };
        let status = if executed_on.is_some() {
            WalStatus::Executed
        } else {
            WalStatus::Pending
        };

        let conn = self.store.get().await?;
        conn.execute(
            "INSERT INTO wal_writes \
                (write_id, method, original_method, path, body, headers, target_instance, \
                 executed_on, status, synced_instances, collection_id, retry_count, priority, \
                 original_body, conversion_type, created, updated, data_size_bytes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, '[]'::jsonb, $10, 0, $11, $12, $13, \
                     NOW(), NOW(), $14)",
            &[
                &write_id,
                &stored_method,
                &stored_original_method,
                &normalized_path,
                &stored_body,
                headers,
                &target_instance.as_str(),
                &executed_on.map(|i| i.as_str().to_string()),
                &status.as_str(),
                &collection_id,
                &priority,
                &original_body,
                &conversion_type,
                &(stored_body.len() as i64),
            ],
        )
        .await?;

        self.metrics.incr_wal_writes_appended();
        if conversion_type.is_some() {
            self.metrics.incr_deletion_conversions();
        }

        Logger::info(
            "WAL_WRITE_APPENDED",
            &[
                ("write_id", &write_id.to_string()),
                ("path", &normalized_path),
                ("target_instance", target_instance.as_str()),
            ],
        );

        Ok(write_id)
    }

    /// Resolve a path-extracted identifier (name or UUID) to the
    /// collection's stable name. Falls back to the identifier unchanged
    /// when it isn't a recognized UUID or the mapping has no record of it
    /// yet (e.g. a CREATE racing ahead of its own mapping row).
    async fn stable_collection_name(&self, identifier: &str) -> String {
        if Uuid::parse_str(identifier).is_ok() {
            if let Ok(Some(name)) = self.mapping.resolve_name_for_uuid(identifier).await {
                return name;
            }
        }
        identifier.to_string()
    }

    /// Rewrite an ID-based delete into a metadata-predicate delete so it
    /// replays correctly on an instance with different local chunk IDs.
    /// Returns `(sync_body, original_body_if_converted, conversion_type)`.
    async fn maybe_convert_deletion(
        &self,
        normalized_path: &str,
        body: &[u8],
        executed_on: Option<InstanceName>,
        executed_on_base_url: Option<&str>,
    ) -> (Vec<u8>, Option<Vec<u8>>, Option<String>) {
        let Ok(payload) = serde_json::from_slice::<Value>(body) else {
            return (body.to_vec(), None, None);
        };
        let Some(ids) = payload.get("ids").and_then(|v| v.as_array()) else {
            return (body.to_vec(), None, None);
        };
        if ids.is_empty() {
            return (body.to_vec(), None, None);
        }

        let Some(collection_id) = path::extract_collection_identifier(normalized_path) else {
            return (body.to_vec(), None, None);
        };

        let Some(_query_instance) = executed_on else {
            return (body.to_vec(), None, None);
        };
        let Some(base_url) = executed_on_base_url else {
            return (body.to_vec(), None, None);
        };

        let get_path = format!("{}/{collection_id}/get", path::collections_endpoint());
        let get_body = serde_json::json!({ "ids": ids, "include": ["metadatas"] });

        let response = self
            .backend
            .forward(
                base_url,
                "POST",
                &get_path,
                get_body.to_string().as_bytes(),
                &[("Content-Type".to_string(), "application/json".to_string())],
            )
            .await;

        let Ok(response) = response else {
            return (body.to_vec(), None, None);
        };
        if !response.is_success() {
            return (body.to_vec(), None, None);
        }
        let Ok(parsed) = serde_json::from_slice::<Value>(&response.body) else {
            return (body.to_vec(), None, None);
        };
        let Some(metadatas) = parsed.get("metadatas").and_then(|v| v.as_array()) else {
            return (body.to_vec(), None, None);
        };

        let mut document_ids: Vec<Value> = Vec::new();
        for m in metadatas {
            if let Some(doc_id) = m.get("document_id") {
                if !document_ids.contains(doc_id) {
                    document_ids.push(doc_id.clone());
                }
            }
        }

        if document_ids.is_empty() {
            return (body.to_vec(), None, None);
        }

        let predicate = if document_ids.len() == 1 {
            serde_json::json!({ "where": { "document_id": { "$eq": document_ids[0] } } })
        } else {
            serde_json::json!({ "where": { "document_id": { "$in": document_ids } } })
        };

        let converted = serde_json::to_vec(&predicate).unwrap_or_else(|_| body.to_vec());
        (converted, Some(body.to_vec()), Some("id_to_metadata".to_string()))
    }

    /// Select rows needing sync to `target_instance`, packed into
    /// memory-bounded, chronologically-ordered batches. Chronological
    /// order (not priority) dominates: replaying a DELETE before its
    /// preceding CREATE for the same collection would fail.
    pub async fn next_batches(
        &self,
        target_instance: InstanceName,
        batch_size: usize,
        max_batch_bytes: usize,
    ) -> ProxyResult<Vec<Vec<WalEntry>>> {
        let conn = self.store.get().await?;
        let target_str = target_instance.as_str();

        let rows = conn
            .query(
                "SELECT write_id, method, original_method, path, body, headers, \
                        target_instance, executed_on, status, synced_instances, \
                        collection_id, retry_count, priority, original_body, conversion_type \
                 FROM wal_writes \
                 WHERE status IN ('executed', 'failed') AND retry_count < 3 \
                   AND ( \
                        (target_instance = $1 AND (executed_on IS NULL OR executed_on <> $1)) \
                     OR (target_instance = 'both' AND NOT (synced_instances @> to_jsonb($1::text))) \
                   ) \
                   AND (status <> 'failed' OR next_retry_at IS NULL OR next_retry_at <= NOW()) \
                 ORDER BY created ASC, priority DESC \
                 LIMIT $2",
                &[&target_str, &(batch_size as i64 * 4)],
            )
            .await?;

        let mut batches: Vec<Vec<WalEntry>> = Vec::new();
        let mut current: Vec<WalEntry> = Vec::new();
        let mut current_bytes: usize = 0;

        for row in rows {
            let entry = row_to_entry(&row);
            let entry_bytes = entry.body.len();

            if !current.is_empty()
                && (current.len() >= batch_size || current_bytes + entry_bytes > max_batch_bytes)
            {
                batches.push(std::mem::take(&mut current));
                current_bytes = 0;
            }
            current_bytes += entry_bytes;
            current.push(entry);
        }
        if !current.is_empty() {
            batches.push(current);
        }

        Ok(batches)
    }

    /// Adaptive batch size: shrunk under memory pressure and further
    /// shrunk (to at most a quarter of the default) when the target
    /// instance is struggling, so a recovering instance is not
    /// immediately hammered with a full-size batch.
    pub fn adaptive_batch_size(&self, memory_pressure_fraction: f64, target_struggling: bool) -> usize {
        let mut size = self.config.default_batch_size;
        if memory_pressure_fraction > 0.85 {
            size /= 4;
        } else if memory_pressure_fraction > 0.7 {
            size /= 2;
        }
        if target_struggling {
            size = size.min(self.config.default_batch_size / 4).max(1);
        }
        size.max(1).min(self.config.max_batch_size)
    }

    /// Exponential backoff for a failed entry's next eligible replay time.
    /// Base is ~15s when the primary is healthy, ~60s otherwise, capped
    /// at 15 minutes.
    pub fn backoff(retry_count: i32, primary_healthy: bool) -> Duration {
        let base_secs: u64 = if primary_healthy { 15 } else { 60 };
        let factor = 2u64.saturating_pow(retry_count.max(0) as u32);
        let secs = base_secs.saturating_mul(factor).min(15 * 60);
        Duration::from_secs(secs)
    }

    pub async fn mark_failed(&self, write_id: Uuid, error: &str, primary_healthy: bool) -> ProxyResult<()> {
        let conn = self.store.get().await?;
        let row = conn
            .query_one("SELECT retry_count FROM wal_writes WHERE write_id = $1", &[&write_id])
            .await?;
        let retry_count: i32 = row.get(0);
        let new_retry_count = retry_count + 1;
        let next_retry = Self::backoff(new_retry_count, primary_healthy);
        let next_retry_secs = next_retry.as_secs() as f64;

        conn.execute(
            "UPDATE wal_writes SET status = 'failed', retry_count = $2, \
                error_message = $3, next_retry_at = NOW() + ($4 || ' seconds')::interval, \
                updated = NOW() \
             WHERE write_id = $1",
            &[&write_id, &new_retry_count, &truncate(error, 500), &next_retry_secs.to_string()],
        )
        .await?;
        self.metrics.incr_wal_entries_failed();
        Ok(())
    }

    pub async fn mark_synced_for_single_target(&self, write_id: Uuid) -> ProxyResult<()> {
        let conn = self.store.get().await?;
        conn.execute(
            "UPDATE wal_writes SET status = 'synced', synced = NOW(), updated = NOW() WHERE write_id = $1",
            &[&write_id],
        )
        .await?;
        self.metrics.incr_wal_entries_synced();
        Ok(())
    }

    /// Append `instance` to `synced_instances`; transition to `synced`
    /// once both instances have acknowledged a `target = both` entry.
    pub async fn ack_both(&self, write_id: Uuid, instance: InstanceName) -> ProxyResult<()> {
        let conn = self.store.get().await?;
        conn.execute(
            "UPDATE wal_writes SET \
                synced_instances = (synced_instances || to_jsonb($2::text)), \
                updated = NOW() \
             WHERE write_id = $1",
            &[&write_id, &instance.as_str()],
        )
        .await?;

        let row = conn
            .query_one("SELECT synced_instances FROM wal_writes WHERE write_id = $1", &[&write_id])
            .await?;
        let synced: Value = row.get(0);
        let has_both = synced
            .as_array()
            .map(|arr| arr.len() >= 2)
            .unwrap_or(false);

        if has_both {
            conn.execute(
                "UPDATE wal_writes SET status = 'synced', synced = NOW(), updated = NOW() WHERE write_id = $1",
                &[&write_id],
            )
            .await?;
            self.metrics.incr_wal_entries_synced();
        }
        Ok(())
    }

    /// When a collection DELETE for name N transitions to synced, all
    /// earlier WAL entries referencing N still pending/executed/failed
    /// are transitioned to obsolete — avoids recreating a collection that
    /// was intentionally destroyed.
    pub async fn obsolete_earlier_entries(&self, name: &str, delete_write_id: Uuid) -> ProxyResult<u64> {
        let conn = self.store.get().await?;
        let result = conn
            .execute(
                "UPDATE wal_writes SET status = 'obsolete', \
                    error_message = 'superseded by collection delete', updated = NOW() \
                 WHERE collection_id = $1 AND write_id <> $2 \
                   AND status IN ('pending', 'executed', 'failed') \
                   AND created < (SELECT created FROM wal_writes WHERE write_id = $2)",
                &[&name, &delete_write_id],
            )
            .await?;
        for _ in 0..result {
            self.metrics.incr_wal_entries_obsoleted();
        }
        Ok(result)
    }

    /// Mark every not-yet-synced entry for `name` obsolete. Used when a
    /// collection DELETE completes synchronously against both instances:
    /// there is no WAL row for the delete itself to anchor
    /// `obsolete_earlier_entries` against, but any entry still pending for
    /// `name` necessarily predates this now-completed delete.
    pub async fn obsolete_pending_for_collection(&self, name: &str) -> ProxyResult<u64> {
        let conn = self.store.get().await?;
        let result = conn
            .execute(
                "UPDATE wal_writes SET status = 'obsolete', \
                    error_message = 'superseded by collection delete', updated = NOW() \
                 WHERE collection_id = $1 AND status IN ('pending', 'executed', 'failed')",
                &[&name],
            )
            .await?;
        for _ in 0..result {
            self.metrics.incr_wal_entries_obsoleted();
        }
        Ok(result)
    }

    pub async fn upsert_mapping_uuid(&self, name: &str, instance: InstanceName, uuid: &str) -> ProxyResult<()> {
        match instance {
            InstanceName::Primary => self.mapping.create_complete_mapping(name, Some(uuid), None).await,
            InstanceName::Replica => self.mapping.create_complete_mapping(name, None, Some(uuid)).await,
        }
    }

    pub async fn clear_mapping_uuid(&self, name: &str, instance: InstanceName) -> ProxyResult<()> {
        self.mapping.delete_mapping_side(name, instance).await
    }

    /// Delete terminal rows (`synced`, `abandoned`, `obsolete`) last
    /// touched before `retention` ago. Storage hygiene only: rows still
    /// eligible for replay or recovery are never touched.
    pub async fn reap_expired(&self, retention: Duration) -> ProxyResult<u64> {
        let conn = self.store.get().await?;
        let retention_secs = retention.as_secs().to_string();
        let result = conn
            .execute(
                "DELETE FROM wal_writes \
                 WHERE status IN ('synced', 'abandoned', 'obsolete') \
                   AND updated < NOW() - ($1 || ' seconds')::interval",
                &[&retention_secs],
            )
            .await?;
        Ok(result)
    }

    pub async fn pending_count(&self) -> ProxyResult<i64> {
        let conn = self.store.get().await?;
        let row = conn
            .query_one(
                "SELECT COUNT(*) FROM wal_writes WHERE status IN ('pending', 'executed', 'failed') AND retry_count < 3",
                &[],
            )
            .await?;
        Ok(row.get(0))
    }

    /// Pending/executed/failed/synced row counts by target instance, plus
    /// the age of the oldest still-pending entry. Feeds `GET /wal/status`.
    pub async fn status_breakdown(&self) -> ProxyResult<WalStatusBreakdown> {
        let conn = self.store.get().await?;
        let rows = conn
            .query(
                "SELECT target_instance, status, COUNT(*) FROM wal_writes GROUP BY target_instance, status",
                &[],
            )
            .await?;

        let mut breakdown = WalStatusBreakdown::default();
        for row in rows {
            let target: String = row.get(0);
            let status: String = row.get(1);
            let count: i64 = row.get(2);
            let bucket = match target.as_str() {
                "primary" => &mut breakdown.primary,
                "replica" => &mut breakdown.replica,
                _ => &mut breakdown.both,
            };
            match status.as_str() {
                "pending" | "executed" => bucket.pending += count,
                "failed" => bucket.failed += count,
                "synced" => bucket.synced += count,
                _ => {}
            }
        }

        let oldest = conn
            .query_opt(
                "SELECT EXTRACT(EPOCH FROM (NOW() - MIN(created)))::bigint FROM wal_writes \
                 WHERE status IN ('pending', 'executed', 'failed') AND retry_count < 3",
                &[],
            )
            .await?;
        breakdown.oldest_pending_age_secs = oldest.and_then(|r| r.get::<_, Option<i64>>(0));

        Ok(breakdown)
    }
}

#[derive(Debug, Default, serde::Serialize)]
pub struct WalStatusCounts {
    pub pending: i64,
    pub failed: i64,
    pub synced: i64,
}

#[derive(Debug, Default, serde::Serialize)]
pub struct WalStatusBreakdown {
    pub primary: WalStatusCounts,
    pub replica: WalStatusCounts,
    pub both: WalStatusCounts,
    pub oldest_pending_age_secs: Option<i64>,
}

fn row_to_entry(row: &tokio_postgres::Row) -> WalEntry {
    let target_instance = TargetInstance::parse(row.get::<_, &str>(6)).unwrap_or(TargetInstance::Both);
    let status = WalStatus::parse(row.get::<_, &str>(8)).unwrap_or(WalStatus::Pending);
    let synced_instances: Value = row.get(9);
    let synced_instances = synced_instances
        .as_array()
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default();

    WalEntry {
        write_id: row.get(0),
        method: row.get(1),
        original_method: row.get(2),
        path: row.get(3),
        body: row.get(4),
        headers: row.get(5),
        target_instance,
        executed_on: row.get(7),
        status,
        synced_instances,
        collection_id: row.get(10),
        retry_count: row.get(11),
        priority: row.get(12),
        error_message: None,
        original_body: row.get(13),
        conversion_type: row.get(14),
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
    fn backoff_grows_exponentially_and_caps() {
        let d0 = WalEngine::backoff(0, true);
        let d1 = WalEngine::backoff(1, true);
        let d2 = WalEngine::backoff(2, true);
        assert_eq!(d0.as_secs(), 15);
        assert_eq!(d1.as_secs(), 30);
        assert_eq!(d2.as_secs(), 60);
        let d_big = WalEngine::backoff(20, true);
        assert_eq!(d_big.as_secs(), 15 * 60);
    }

    #[test]
    fn backoff_uses_larger_base_when_primary_unhealthy() {
        let healthy = WalEngine::backoff(0, true);
        let unhealthy = WalEngine::backoff(0, false);
        assert!(unhealthy > healthy);
    }
}
