//! Catch-all proxy passthrough: every path not claimed by an admin
//! endpoint is forwarded through the dispatcher.

use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, OriginalUri, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::Response;

use super::state::AppState;

pub async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header_pairs: Vec<(String, String)> = headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect();

    let result = state
        .dispatcher
        .handle(method.as_str(), uri.path(), &body, header_pairs, &addr.to_string())
        .await;

    let mut builder = Response::builder()
        .status(StatusCode::from_u16(result.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR));
    for (k, v) in &result.headers {
        if is_hop_by_hop(k) {
            continue;
        }
        builder = builder.header(k, v);
    }
    builder
        .body(axum::body::Body::from(result.body))
        .unwrap_or_else(|_| Response::new(axum::body::Body::empty()))
}

fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection" | "transfer-encoding" | "content-length"
    )
}
