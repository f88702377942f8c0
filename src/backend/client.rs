//! Thin reqwest-based client for the backend's REST contract: collection
//! listing, creation, deletion, heartbeat, and generic request forwarding
//! with a small bounded retry for transient errors.

use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::path;
use crate::error::{ProxyError, ProxyResult};

#[derive(Debug, Clone, Deserialize)]
pub struct CollectionInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct ForwardedResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl ForwardedResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl BackendClient {
    pub fn new(timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client construction should not fail");
        Self { http, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// `GET /collections` against a single instance with a caller-supplied
    /// timeout; used by the health monitor's real-time probe as well as
    /// the general collection listing.
    pub async fn list_collections_with_timeout(
        &self,
        base_url: &str,
        timeout: Duration,
    ) -> ProxyResult<Vec<CollectionInfo>> {
        let url = format!("{base_url}{}", path::collections_endpoint());
        let resp = self
            .http
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(ProxyError::from)?;

        if resp.status().as_u16() != 200 {
            return Err(ProxyError::TransientBackend(format!(
                "collections list returned {}",
                resp.status()
            )));
        }

        resp.json::<Vec<CollectionInfo>>()
            .await
            .map_err(|e| ProxyError::TransientBackend(format!("invalid collections body: {e}")))
    }

    pub async fn list_collections(&self, base_url: &str) -> ProxyResult<Vec<CollectionInfo>> {
        self.list_collections_with_timeout(base_url, self.timeout)
            .await
    }

    /// Heartbeat/liveness probe: 200 and a parseable JSON array from
    /// `GET /collections` is the health signal used throughout this
    /// system (a dedicated heartbeat endpoint, when present, is treated
    /// the same way by callers).
    pub async fn probe_healthy(&self, base_url: &str, timeout: Duration) -> bool {
        self.list_collections_with_timeout(base_url, timeout)
            .await
            .is_ok()
    }

    pub async fn create_collection(
        &self,
        base_url: &str,
        name: &str,
        metadata: &Value,
        get_or_create: bool,
    ) -> ProxyResult<(u16, CollectionInfo)> {
        let url = format!("{base_url}{}", path::collections_endpoint());
        let body = serde_json::json!({
            "name": name,
            "metadata": metadata,
            "get_or_create": get_or_create,
        });
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(ProxyError::from)?;

        let status = resp.status().as_u16();
        if status == 409 {
            return Err(ProxyError::BackendSemantic {
                status,
                body: "already exists".to_string(),
            });
        }
        if !(200..300).contains(&status) {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProxyError::BackendSemantic {
                status,
                body: truncate(&text, 200),
            });
        }

        let info = resp
            .json::<CollectionInfo>()
            .await
            .map_err(|e| ProxyError::TransientBackend(format!("invalid create response: {e}")))?;
        Ok((status, info))
    }

    /// DELETE a collection by name or UUID. 404 is treated by the caller
    /// as idempotent success, not surfaced here as an error variant that
    /// would be mistaken for a transient failure.
    pub async fn delete_collection(&self, base_url: &str, name_or_uuid: &str) -> ProxyResult<u16> {
        let url = format!("{base_url}{}/{name_or_uuid}", path::collections_endpoint());
        let resp = self
            .http
            .delete(&url)
            .send()
            .await
            .map_err(ProxyError::from)?;
        Ok(resp.status().as_u16())
    }

    /// Generic forward of a single request to a specific instance, with a
    /// small bounded retry for transient connection/5xx/timeout classes.
    pub async fn forward(
        &self,
        base_url: &str,
        method: &str,
        path: &str,
        body: &[u8],
        headers: &[(String, String)],
    ) -> ProxyResult<ForwardedResponse> {
        const MAX_ATTEMPTS: u32 = 3;
        let mut attempt = 0;
        let mut backoff = Duration::from_millis(200);

        loop {
            attempt += 1;
            match self.forward_once(base_url, method, path, body, headers).await {
                Ok(resp) if !is_transient_status(resp.status) => return Ok(resp),
                Ok(resp) if attempt >= MAX_ATTEMPTS => return Ok(resp),
                Ok(_) => {
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) if attempt >= MAX_ATTEMPTS => return Err(e),
                Err(_) => {
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }

    async fn forward_once(
        &self,
        base_url: &str,
        method: &str,
        path: &str,
        body: &[u8],
        headers: &[(String, String)],
    ) -> ProxyResult<ForwardedResponse> {
        let url = format!("{base_url}{path}");
        let m = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| ProxyError::TransientBackend(format!("invalid method {method}")))?;

        let mut builder = self.http.request(m, &url).body(body.to_vec());
        for (k, v) in headers {
            if is_hop_by_hop(k) {
                continue;
            }
            builder = builder.header(k, v);
        }

        let resp = builder
            .send()
            .await
            .map_err(ProxyError::from)?;

        let status = resp.status().as_u16();
        let headers: Vec<(String, String)> = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let body = resp
            .bytes()
            .await
            .map_err(|e| ProxyError::TransientBackend(e.to_string()))?
            .to_vec();

        Ok(ForwardedResponse { status, body, headers })
    }
}

fn is_transient_status(status: u16) -> bool {
    matches!(status, 502 | 503 | 504)
}

fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "host" | "content-length" | "connection" | "transfer-encoding" | "content-encoding"
    )
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
