//! Per-entry replay semantics: path/UUID resolution, deletion conversion
//! playback, idempotence classification, DELETE verification, obsolete
//! propagation, and mapping updates.
//!
//! Replay of a single entry is never parallelized internally; the
//! sync driver is responsible for ensuring entries for the same
//! collection are replayed in chronological order across workers.

use std::sync::Arc;
use std::time::Duration;

use crate::backend::path;
use crate::backend::BackendClient;
use crate::instance::InstanceName;
use crate::mapping::MappingResolver;
use crate::observability::{Logger, MetricsRegistry};

use super::engine::WalEngine;
use super::entry::WalEntry;

const MAPPING_RETRY_ATTEMPTS: u32 = 3;
const MAPPING_RETRY_BASE: Duration = Duration::from_millis(200);
const DELETE_VERIFY_ATTEMPTS: u32 = 3;
const DELETE_VERIFY_DELAY: Duration = Duration::from_millis(500);

pub struct WalReplayer {
    engine: Arc<WalEngine>,
    mapping: Arc<MappingResolver>,
    backend: Arc<BackendClient>,
    metrics: Arc<MetricsRegistry>,
}

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Synced,
    Failed(String),
    /// Entry was superseded (obsolete propagation already applied by the
    /// caller that triggered the delete) — nothing further to do.
    Obsolete,
}

impl WalReplayer {
    pub fn new(
        engine: Arc<WalEngine>,
        mapping: Arc<MappingResolver>,
        backend: Arc<BackendClient>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            engine,
            mapping,
            backend,
            metrics,
        }
    }

    /// Replay a single WAL entry against `target` / `target_base_url`.
    /// `primary_healthy` feeds the retry backoff base used on failure.
    pub async fn replay_entry(
        &self,
        entry: &WalEntry,
        target: InstanceName,
        target_base_url: &str,
        primary_healthy: bool,
    ) -> bool {
        let outcome = self.replay_inner(entry, target, target_base_url).await;

        match outcome {
            Outcome::Synced => {
                if let Err(e) = self.acknowledge(entry, target).await {
                    Logger::warn(
                        "WAL_ACK_PERSIST_FAILED",
                        &[("write_id", &entry.write_id.to_string()), ("error", &e.to_string())],
                    );
                }
                true
            }
            Outcome::Failed(reason) => {
                if let Err(e) = self.engine.mark_failed(entry.write_id, &reason, primary_healthy).await {
                    Logger::warn(
                        "WAL_MARK_FAILED_PERSIST_FAILED",
                        &[("write_id", &entry.write_id.to_string()), ("error", &e.to_string())],
                    );
                }
                Logger::warn(
                    "WAL_REPLAY_FAILED",
                    &[
                        ("write_id", &entry.write_id.to_string()),
                        ("target", target.as_str()),
                        ("reason", &reason),
                    ],
                );
                false
            }
            Outcome::Obsolete => true,
        }
    }

    async fn acknowledge(&self, entry: &WalEntry, target: InstanceName) -> crate::error::ProxyResult<()> {
        match entry.target_instance {
            super::entry::TargetInstance::Both => {
                self.engine.ack_both(entry.write_id, target).await?;
            }
            _ => {
                self.engine.mark_synced_for_single_target(entry.write_id).await?;
            }
        }

        if entry.is_collection_level_delete() {
            if let Some(name) = &entry.collection_id {
                let obsoleted = self
                    .engine
                    .obsolete_earlier_entries(name, entry.write_id)
                    .await
                    .unwrap_or(0);
                if obsoleted > 0 {
                    Logger::info(
                        "WAL_OBSOLETE_PROPAGATED",
                        &[("collection", name), ("count", &obsoleted.to_string())],
                    );
                }
            }
        }

        Ok(())
    }

    async fn replay_inner(&self, entry: &WalEntry, target: InstanceName, target_base_url: &str) -> Outcome {
        let normalized_path = path::normalize_path(&entry.path);

        if entry.is_collection_create() {
            return self.replay_collection_create(entry, target, target_base_url, &normalized_path).await;
        }
        if entry.is_collection_level_delete() {
            return self.replay_collection_delete(entry, target, target_base_url, &normalized_path).await;
        }
        self.replay_document_operation(entry, target, target_base_url, &normalized_path).await
    }

    async fn replay_collection_create(
        &self,
        entry: &WalEntry,
        target: InstanceName,
        target_base_url: &str,
        normalized_path: &str,
    ) -> Outcome {
        let response = match self
            .backend
            .forward(target_base_url, "POST", normalized_path, entry.sync_body(), &[])
            .await
        {
            Ok(r) => r,
            Err(e) => return Outcome::Failed(e.to_string()),
        };

        // The collections-root path carries no identifier of its own; the
        // name only ever lives in the CREATE request body.
        let name = path::extract_name_from_create_body(entry.sync_body());

        if response.status == 409 {
            // Already exists: idempotent success, but we still need the
            // UUID to populate the mapping, so look it up by name.
            if let Some(name) = &name {
                if let Ok(Some(uuid)) = self.mapping.resolve_name_to_uuid(name, target, target_base_url).await {
                    let _ = self.engine.upsert_mapping_uuid(name, target, &uuid).await;
                }
            }
            return Outcome::Synced;
        }
        if !response.is_success() {
            return Outcome::Failed(format!("collection create returned {}", response.status));
        }

        if let Ok(parsed) = serde_json::from_slice::<serde_json::Value>(&response.body) {
            if let Some(uuid) = parsed.get("id").and_then(|v| v.as_str()) {
                if let Some(name) = &name {
                    let _ = self.engine.upsert_mapping_uuid(name, target, uuid).await;
                }
            }
        }
        Outcome::Synced
    }

    async fn replay_collection_delete(
        &self,
        entry: &WalEntry,
        target: InstanceName,
        target_base_url: &str,
        normalized_path: &str,
    ) -> Outcome {
        let Some(name) = entry.collection_id.clone() else {
            return Outcome::Failed("collection delete missing collection identifier".to_string());
        };

        // Collection-level DELETE always addresses by name, never by a
        // substituted UUID: a stale mapping risks deleting the wrong
        // collection.
        let status = match self.backend.delete_collection(target_base_url, &name).await {
            Ok(s) => s,
            Err(e) => return Outcome::Failed(e.to_string()),
        };
        let _ = normalized_path;

        if status == 404 {
            let _ = self.engine.clear_mapping_uuid(&name, target).await;
            return Outcome::Synced;
        }
        if !(200..300).contains(&status) {
            return Outcome::Failed(format!("collection delete returned {status}"));
        }

        if self.verify_deletion(&name, target, target_base_url).await {
            let _ = self.engine.clear_mapping_uuid(&name, target).await;
            Outcome::Synced
        } else {
            Outcome::Failed("collection persisted after claimed-successful delete".to_string())
        }
    }

    /// After a claimed-successful collection DELETE, list collections on
    /// the target and confirm absence. Observed backend bug: DELETE can
    /// return 200 without actually deleting. Retries by alternative
    /// addressing (name, then a freshly-discovered UUID) before giving up.
    async fn verify_deletion(&self, name: &str, target: InstanceName, target_base_url: &str) -> bool {
        for attempt in 0..DELETE_VERIFY_ATTEMPTS {
            let Ok(collections) = self.backend.list_collections(target_base_url).await else {
                return true; // can't verify; don't block forward progress on a transient list failure
            };
            let found = collections.iter().find(|c| c.name == name);
            match found {
                None => return true,
                Some(c) => {
                    let addr = if attempt == 0 { name.to_string() } else { c.id.clone() };
                    let _ = self.backend.delete_collection(target_base_url, &addr).await;
                    tokio::time::sleep(DELETE_VERIFY_DELAY).await;
                }
            }
        }
        false
    }

    async fn replay_document_operation(
        &self,
        entry: &WalEntry,
        target: InstanceName,
        target_base_url: &str,
        normalized_path: &str,
    ) -> Outcome {
        let Some(collection_ref) = path::extract_collection_identifier(normalized_path) else {
            return Outcome::Failed("document operation missing collection identifier".to_string());
        };

        let resolved = match self.resolve_with_retry(&collection_ref, target, target_base_url).await {
            Ok(Some(uuid)) => uuid,
            Ok(None) => {
                // Cross-outage recovery: the resolver failed after retries;
                // list collections directly and repair if found.
                match self.cross_outage_recover(&collection_ref, target, target_base_url).await {
                    Some(uuid) => uuid,
                    None => {
                        return Outcome::Failed(format!(
                            "mapping unresolved for {collection_ref} on {}",
                            target.as_str()
                        ))
                    }
                }
            }
            Err(e) => return Outcome::Failed(e.to_string()),
        };

        let operation = path::extract_operation(normalized_path).unwrap_or_default();
        let endpoint = path::collections_endpoint();
        let rebuilt_path = format!("{endpoint}/{resolved}/{operation}");

        let method = if entry.is_document_delete() { "POST" } else { entry.method.as_str() };

        let response = match self
            .backend
            .forward(target_base_url, method, &rebuilt_path, entry.sync_body(), &[])
            .await
        {
            Ok(r) => r,
            Err(e) => return Outcome::Failed(e.to_string()),
        };

        if response.is_success() || (entry.is_document_delete() && response.status == 404) {
            Outcome::Synced
        } else {
            Outcome::Failed(format!("document operation returned {}", response.status))
        }
    }

    async fn resolve_with_retry(
        &self,
        collection_ref: &str,
        target: InstanceName,
        target_base_url: &str,
    ) -> crate::error::ProxyResult<Option<String>> {
        // The collection_ref may already be the source instance's UUID
        // (late-resolved at append time); translate via the mapping's
        // reverse lookup first, falling back to name resolution.
        if let Ok(Some(uuid)) = self.mapping.resolve_by_source_uuid(collection_ref, target).await {
            return Ok(Some(uuid));
        }

        let mut delay = MAPPING_RETRY_BASE;
        for attempt in 0..MAPPING_RETRY_ATTEMPTS {
            match self.mapping.resolve_name_to_uuid(collection_ref, target, target_base_url).await {
                Ok(Some(uuid)) => return Ok(Some(uuid)),
                Ok(None) if attempt + 1 < MAPPING_RETRY_ATTEMPTS => {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Ok(None) => return Ok(None),
                Err(e) if attempt + 1 < MAPPING_RETRY_ATTEMPTS => {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    let _ = e;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    async fn cross_outage_recover(
        &self,
        collection_ref: &str,
        target: InstanceName,
        target_base_url: &str,
    ) -> Option<String> {
        let collections = self.backend.list_collections(target_base_url).await.ok()?;
        let found = collections.into_iter().find(|c| c.name == collection_ref || c.id == collection_ref)?;
        let _ = self
            .engine
            .upsert_mapping_uuid(&found.name, target, &found.id)
            .await;
        self.metrics.incr_recovery_runs();
        Some(found.id)
    }
}
