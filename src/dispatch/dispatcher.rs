//! The request dispatcher: admission control, health-aware instance
//! selection, path/UUID resolution, distributed fan-out for collection
//! lifecycle operations, and the WAL-append policy that decides which
//! writes need asynchronous replication.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::backend::{path, BackendClient, CollectionInfo};
use crate::config::ProxyConfig;
use crate::error::{ProxyError, ProxyResult};
use crate::health::HealthMonitor;
use crate::instance::InstanceName;
use crate::mapping::MappingResolver;
use crate::observability::{Logger, MetricsRegistry};
use crate::txlog::{ReplayHandler, TransactionLog};
use crate::wal::{TargetInstance, WalEngine};

use super::admission::AdmissionControl;
use super::recent_writes::RecentWrites;
use super::selector;

pub struct DispatchResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl DispatchResponse {
    fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            body: serde_json::json!({ "error": message }).to_string().into_bytes(),
            headers: vec![("content-type".to_string(), "application/json".to_string())],
        }
    }
}

pub struct Dispatcher {
    health: Arc<HealthMonitor>,
    backend: Arc<BackendClient>,
    wal: Arc<WalEngine>,
    mapping: Arc<MappingResolver>,
    txlog: Arc<TransactionLog>,
    admission: Arc<AdmissionControl>,
    recent_writes: Arc<RecentWrites>,
    metrics: Arc<MetricsRegistry>,
    config: ProxyConfig,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        health: Arc<HealthMonitor>,
        backend: Arc<BackendClient>,
        wal: Arc<WalEngine>,
        mapping: Arc<MappingResolver>,
        txlog: Arc<TransactionLog>,
        admission: Arc<AdmissionControl>,
        recent_writes: Arc<RecentWrites>,
        metrics: Arc<MetricsRegistry>,
        config: ProxyConfig,
    ) -> Self {
        Self {
            health,
            backend,
            wal,
            mapping,
            txlog,
            admission,
            recent_writes,
            metrics,
            config,
        }
    }

    /// Entry point for a foreground client request. Logs the attempt
    /// before admission (so concurrency timeouts are themselves
    /// recoverable), then admits, selects, and forwards.
    pub async fn handle(
        &self,
        method: &str,
        path: &str,
        body: &[u8],
        header_pairs: Vec<(String, String)>,
        remote_addr: &str,
    ) -> DispatchResponse {
        self.metrics.incr_total_requests();
        let headers = header_pairs_to_value(&header_pairs);

        let transaction_id = match self
            .txlog
            .log_attempt(method, path, &body_as_value(body), &headers, remote_addr, None)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                Logger::error("TXLOG_LOG_ATTEMPT_FAILED", &[("error", &e.to_string())]);
                Uuid::new_v4()
            }
        };

        let guard = match self.admission.acquire().await {
            Ok(g) => g,
            Err(e) => {
                let _ = self
                    .txlog
                    .mark_failed(transaction_id, &e.to_string(), false, Some(e.status_code()))
                    .await;
                self.metrics.incr_failed_requests();
                return DispatchResponse::error(e.status_code(), &e.to_string());
            }
        };

        let result = self.route_and_forward(method, path, body, &header_pairs).await;
        drop(guard);

        match result {
            Ok(resp) => {
                let _ = self.txlog.mark_completed(transaction_id, resp.status).await;
                self.metrics.incr_successful_requests();
                resp
            }
            Err(e) => {
                let is_timing_gap = matches!(e, ProxyError::NoHealthyInstance);
                let _ = self
                    .txlog
                    .mark_failed(transaction_id, &e.to_string(), is_timing_gap, Some(e.status_code()))
                    .await;
                self.metrics.incr_failed_requests();
                DispatchResponse::error(e.status_code(), &e.to_string())
            }
        }
    }

    /// Core routing/forwarding logic shared by foreground dispatch and
    /// transaction-recovery replay. Does not touch the transaction log —
    /// callers own that bookkeeping.
    async fn route_and_forward(
        &self,
        method: &str,
        path: &str,
        body: &[u8],
        header_pairs: &[(String, String)],
    ) -> ProxyResult<DispatchResponse> {
        let normalized_path = path::normalize_path(path);
        let timeout = self.config.request_timeout();

        if method.eq_ignore_ascii_case("POST") && path::is_collection_root_path(&normalized_path) {
            return self.handle_collection_create(body, header_pairs, timeout).await;
        }
        if method.eq_ignore_ascii_case("DELETE") && path::is_collection_level_path(&normalized_path) {
            return self.handle_collection_delete(&normalized_path, timeout).await;
        }

        if path::is_read_request(method, &normalized_path) {
            self.handle_read(method, &normalized_path, body, header_pairs, timeout).await
        } else {
            self.handle_document_write(method, &normalized_path, body, header_pairs, timeout).await
        }
    }

    async fn handle_read(
        &self,
        method: &str,
        normalized_path: &str,
        body: &[u8],
        header_pairs: &[(String, String)],
        timeout: Duration,
    ) -> ProxyResult<DispatchResponse> {
        let collection_ref = path::extract_collection_identifier(normalized_path);

        let pinned = collection_ref
            .as_deref()
            .map(|c| self.recent_writes.is_recent(c))
            .unwrap_or(false);

        let instance = if pinned {
            self.metrics.incr_consistency_pins();
            if self.health.check_realtime(InstanceName::Primary, timeout).await {
                Some(InstanceName::Primary)
            } else {
                None
            }
        } else {
            selector::select_read_instance(&self.health, timeout, self.config.read_replica_ratio).await
        };

        let Some(instance) = instance else {
            return Err(ProxyError::NoHealthyInstance);
        };
        match instance {
            InstanceName::Primary => self.metrics.incr_reads_routed_primary(),
            InstanceName::Replica => self.metrics.incr_reads_routed_replica(),
        }

        let base_url = self.health.instance(instance).base_url.clone();
        let rebuilt_path = match &collection_ref {
            Some(name) => self.substitute_uuid(name, instance, &base_url, normalized_path).await?,
            None => normalized_path.to_string(),
        };

        let resp = match self.backend.forward(&base_url, method, &rebuilt_path, body, header_pairs).await {
            Ok(r) => {
                self.health.instance(instance).record_request(true);
                r
            }
            Err(e) => {
                self.health.instance(instance).record_request(false);
                return Err(e);
            }
        };
        Ok(to_dispatch_response(resp))
    }

    async fn handle_document_write(
        &self,
        method: &str,
        normalized_path: &str,
        body: &[u8],
        header_pairs: &[(String, String)],
        timeout: Duration,
    ) -> ProxyResult<DispatchResponse> {
        let instance = selector::select_write_instance(&self.health, timeout)
            .await
            .ok_or(ProxyError::NoHealthyInstance)?;

        let base_url = self.health.instance(instance).base_url.clone();
        let collection_ref = path::extract_collection_identifier(normalized_path);
        let rebuilt_path = match &collection_ref {
            Some(name) => self.substitute_uuid(name, instance, &base_url, normalized_path).await?,
            None => normalized_path.to_string(),
        };

        // Document-level delete arrives as POST .../delete; forwarded verbatim.
        let resp = match self.backend.forward(&base_url, method, &rebuilt_path, body, header_pairs).await {
            Ok(r) => {
                self.health.instance(instance).record_request(true);
                r
            }
            Err(e) => {
                self.health.instance(instance).record_request(false);
                return Err(e);
            }
        };

        let headers_json: Value = header_pairs_to_value(header_pairs);
        let _ = self
            .wal
            .add_wal_write(
                method,
                normalized_path,
                body,
                &headers_json,
                TargetInstance::Both,
                Some(instance),
                Some(&base_url),
            )
            .await;

        if resp.is_success() {
            if let Some(name) = &collection_ref {
                self.recent_writes.record(name);
            }
        }

        Ok(to_dispatch_response(resp))
    }

    /// For document-level operations where the path addresses a
    /// collection by name, substitute the target instance's UUID. A
    /// request that already addresses a UUID is left unchanged unless
    /// the mapping resolver recognizes it as a cross-instance UUID.
    async fn substitute_uuid(
        &self,
        collection_ref: &str,
        instance: InstanceName,
        base_url: &str,
        normalized_path: &str,
    ) -> ProxyResult<String> {
        let operation = path::extract_operation(normalized_path);

        let resolved = match self
            .mapping
            .resolve_name_to_uuid(collection_ref, instance, base_url)
            .await?
        {
            Some(uuid) => uuid,
            None => {
                return Err(ProxyError::MappingUnresolved {
                    collection: collection_ref.to_string(),
                    instance: instance.as_str().to_string(),
                })
            }
        };

        let endpoint = path::collections_endpoint();
        Ok(match operation {
            Some(op) if !op.is_empty() => format!("{endpoint}/{resolved}/{op}"),
            _ => format!("{endpoint}/{resolved}"),
        })
    }

    /// Distributed fan-out CREATE: forward to the selected instance, then
    /// replay the identical body against the other instance when both are
    /// healthy and the mapping is otherwise clean. Falls back to a WAL
    /// entry targeting `both` when fan-out cannot be completed
    /// synchronously, to avoid a partial mapping.
    async fn handle_collection_create(
        &self,
        body: &[u8],
        header_pairs: &[(String, String)],
        timeout: Duration,
    ) -> ProxyResult<DispatchResponse> {
        let instance = selector::select_write_instance(&self.health, timeout)
            .await
            .ok_or(ProxyError::NoHealthyInstance)?;
        let other = instance.other();
        let base_url = self.health.instance(instance).base_url.clone();
        let endpoint = path::collections_endpoint();

        let resp = match self.backend.forward(&base_url, "POST", &endpoint, body, header_pairs).await {
            Ok(r) => {
                self.health.instance(instance).record_request(true);
                r
            }
            Err(e) => {
                self.health.instance(instance).record_request(false);
                return Err(e);
            }
        };
        if !resp.is_success() {
            return Ok(to_dispatch_response(resp));
        }

        let name = path::extract_name_from_create_body(body);
        let primary_info = parse_collection_info(&resp.body);

        let other_healthy = self.health.check_realtime(other, timeout).await;
        if other_healthy {
            let other_base_url = self.health.instance(other).base_url.clone();
            let metadata = primary_info.as_ref().map(|c| c.metadata.clone()).unwrap_or(Value::Null);
            if let Some(name) = &name {
                match self.backend.create_collection(&other_base_url, name, &metadata, true).await {
                    Ok((_, other_info)) => {
                        self.health.instance(other).record_request(true);
                        let (primary_uuid, replica_uuid) = assign_by_instance(instance, &primary_info, &other_info);
                        let _ = self
                            .mapping
                            .create_complete_mapping(name, primary_uuid.as_deref(), replica_uuid.as_deref())
                            .await;
                    }
                    Err(_) => {
                        self.health.instance(other).record_request(false);
                        self.append_both_wal("POST", &endpoint, body, header_pairs, instance, &base_url).await;
                    }
                }
            }
        } else if let Some(name) = &name {
            if let Some(info) = &primary_info {
                let uuid = info.id.clone();
                match instance {
                    InstanceName::Primary => {
                        let _ = self.mapping.create_complete_mapping(name, Some(&uuid), None).await;
                    }
                    InstanceName::Replica => {
                        let _ = self.mapping.create_complete_mapping(name, None, Some(&uuid)).await;
                    }
                }
            }
            self.append_both_wal("POST", &endpoint, body, header_pairs, instance, &base_url).await;
        }

        Ok(to_dispatch_response(resp))
    }

    /// Distributed fan-out DELETE: forward to the selected instance; on
    /// success, issue a parallel DELETE to the other instance when
    /// healthy (404 tolerated); otherwise fall back to a WAL entry.
    async fn handle_collection_delete(&self, normalized_path: &str, timeout: Duration) -> ProxyResult<DispatchResponse> {
        let name = path::extract_collection_identifier(normalized_path)
            .ok_or_else(|| ProxyError::BackendSemantic { status: 404, body: "missing collection identifier".to_string() })?;

        let instance = selector::select_write_instance(&self.health, timeout)
            .await
            .ok_or(ProxyError::NoHealthyInstance)?;
        let base_url = self.health.instance(instance).base_url.clone();

        let status = match self.backend.delete_collection(&base_url, &name).await {
            Ok(s) => {
                self.health.instance(instance).record_request(true);
                s
            }
            Err(e) => {
                self.health.instance(instance).record_request(false);
                return Err(e);
            }
        };
        if !(status == 404 || (200..300).contains(&status)) {
            return Err(ProxyError::BackendSemantic { status, body: "collection delete failed".to_string() });
        }

        let other = instance.other();
        let other_healthy = self.health.check_realtime(other, timeout).await;

        if other_healthy {
            let other_base_url = self.health.instance(other).base_url.clone();
            match self.backend.delete_collection(&other_base_url, &name).await {
                Ok(_) => self.health.instance(other).record_request(true),
                Err(_) => self.health.instance(other).record_request(false),
            }
            let _ = self.mapping.delete_mapping_side(&name, instance).await;
            let _ = self.mapping.delete_mapping_side(&name, other).await;

            // No WAL entry anchors this delete (it completed synchronously
            // on both instances), but any write still pending for `name`
            // predates it and must not resurrect the collection.
            let obsoleted = self.wal.obsolete_pending_for_collection(&name).await.unwrap_or(0);
            if obsoleted > 0 {
                Logger::info(
                    "WAL_OBSOLETE_PROPAGATED",
                    &[("collection", &name), ("count", &obsoleted.to_string())],
                );
            }
        } else {
            let _ = self.mapping.delete_mapping_side(&name, instance).await;
            let endpoint = format!("{}/{name}", path::collections_endpoint());
            self.append_both_wal("DELETE", &endpoint, b"", &[], instance, &base_url).await;
        }

        Ok(DispatchResponse {
            status,
            body: Vec::new(),
            headers: Vec::new(),
        })
    }

    async fn append_both_wal(
        &self,
        method: &str,
        path: &str,
        body: &[u8],
        header_pairs: &[(String, String)],
        executed_on: InstanceName,
        executed_on_base_url: &str,
    ) {
        let headers_json = header_pairs_to_value(header_pairs);
        let _ = self
            .wal
            .add_wal_write(
                method,
                path,
                body,
                &headers_json,
                TargetInstance::Both,
                Some(executed_on),
                Some(executed_on_base_url),
            )
            .await;
    }
}

#[async_trait]
impl ReplayHandler for Dispatcher {
    /// Re-entry point for the transaction-recovery loop: replays a stuck
    /// attempt through the same routing/forwarding path a fresh client
    /// request would take, without re-logging it as a new attempt.
    async fn replay(
        &self,
        method: &str,
        path: &str,
        body: &[u8],
        headers: &Value,
        _original_transaction_id: Uuid,
    ) -> Result<u16, String> {
        let header_pairs = value_to_header_pairs(headers);
        let guard = self.admission.acquire().await.map_err(|e| e.to_string())?;
        let result = self.route_and_forward(method, path, body, &header_pairs).await;
        drop(guard);
        result.map(|r| r.status).map_err(|e| e.to_string())
    }
}

fn to_dispatch_response(resp: crate::backend::client::ForwardedResponse) -> DispatchResponse {
    DispatchResponse {
        status: resp.status,
        body: resp.body,
        headers: resp.headers,
    }
}

fn body_as_value(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap_or_else(|_| crate::txlog::encode_body_for_log(body))
}

fn header_pairs_to_value(header_pairs: &[(String, String)]) -> Value {
    let map: serde_json::Map<String, Value> = header_pairs
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    Value::Object(map)
}

fn value_to_header_pairs(headers: &Value) -> Vec<(String, String)> {
    headers
        .as_object()
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn parse_collection_info(body: &[u8]) -> Option<CollectionInfo> {
    serde_json::from_slice(body).ok()
}

fn assign_by_instance(
    first_instance: InstanceName,
    first_info: &Option<CollectionInfo>,
    second_info: &CollectionInfo,
) -> (Option<String>, Option<String>) {
    let first_uuid = first_info.as_ref().map(|c| c.id.clone());
    match first_instance {
        InstanceName::Primary => (first_uuid, Some(second_info.id.clone())),
        InstanceName::Replica => (Some(second_info.id.clone()), first_uuid),
    }
}
