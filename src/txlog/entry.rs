//! Transaction safety log entry: a durable mirror of an inbound request,
//! written before dispatch so that a proxy crash mid-request does not
//! lose the client's intent.

use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Attempting,
    Completed,
    Failed,
    Recovered,
    Abandoned,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Attempting => "ATTEMPTING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Recovered => "RECOVERED",
            TransactionStatus::Abandoned => "ABANDONED",
        }
    }

    pub fn parse(s: &str) -> Option<TransactionStatus> {
        match s {
            "ATTEMPTING" => Some(TransactionStatus::Attempting),
            "COMPLETED" => Some(TransactionStatus::Completed),
            "FAILED" => Some(TransactionStatus::Failed),
            "RECOVERED" => Some(TransactionStatus::Recovered),
            "ABANDONED" => Some(TransactionStatus::Abandoned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransactionEntry {
    pub transaction_id: Uuid,
    pub client_session: Option<String>,
    pub client_ip: Option<String>,
    pub user_id: Option<String>,
    pub method: String,
    pub path: String,
    pub body: Value,
    pub headers: Value,
    pub status: TransactionStatus,
    pub operation_type: String,
    pub target_instance: Option<String>,
    pub failure_reason: Option<String>,
    pub response_status: Option<i32>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub is_timing_gap_failure: bool,
}

/// Classify an inbound request into a coarse operation type, used purely
/// for observability and recovery log readability.
pub fn classify_operation(method: &str, path: &str) -> String {
    let m = method.to_uppercase();
    if m == "GET" {
        return "read".to_string();
    }
    if path.ends_with("/add") {
        return "document_add".to_string();
    }
    if path.ends_with("/upsert") {
        return "document_upsert".to_string();
    }
    if path.ends_with("/update") {
        return "document_update".to_string();
    }
    if path.ends_with("/delete") {
        return "document_delete".to_string();
    }
    if path.ends_with("/get") || path.ends_with("/query") || path.ends_with("/count") {
        return "read".to_string();
    }
    match m.as_str() {
        "POST" => "collection_create".to_string(),
        "DELETE" => "collection_delete".to_string(),
        other => other.to_lowercase(),
    }
}

/// Extract a best-effort client session/IP/user identifier from headers,
/// falling back to a UUID fragment when the client supplied nothing
/// identifying — still unique enough to correlate retries.
pub fn extract_client_session(headers: &Value, remote_addr: &str) -> (Option<String>, String, Option<String>) {
    let session = headers
        .get("x-session-id")
        .or_else(|| headers.get("x-client-session"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("anon-{}", short_uuid()));

    let user = headers
        .get("x-user-id")
        .or_else(|| headers.get("authorization"))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    (Some(session), remote_addr.to_string(), user)
}

fn short_uuid() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_document_operations() {
        assert_eq!(classify_operation("POST", ".../COL1/add"), "document_add");
        assert_eq!(classify_operation("POST", ".../COL1/delete"), "document_delete");
        assert_eq!(classify_operation("GET", ".../COL1"), "read");
        assert_eq!(classify_operation("POST", ".../COL1/query"), "read");
    }

    #[test]
    fn classifies_collection_lifecycle() {
        assert_eq!(classify_operation("POST", "/collections"), "collection_create");
        assert_eq!(classify_operation("DELETE", "/collections/COL1"), "collection_delete");
    }

    #[test]
    fn status_round_trips_through_string() {
        for s in [
            TransactionStatus::Attempting,
            TransactionStatus::Completed,
            TransactionStatus::Failed,
            TransactionStatus::Recovered,
            TransactionStatus::Abandoned,
        ] {
            assert_eq!(TransactionStatus::parse(s.as_str()), Some(s));
        }
    }

    #[test]
    fn session_extraction_falls_back_to_anonymous_identifier() {
        let (session, ip, user) = extract_client_session(&serde_json::json!({}), "10.0.0.1");
        assert!(session.unwrap().starts_with("anon-"));
        assert_eq!(ip, "10.0.0.1");
        assert!(user.is_none());
    }
}
