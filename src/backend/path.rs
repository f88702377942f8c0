//! Path normalization and collection-identifier extraction.
//!
//! The backend's canonical shape is
//! `/api/v2/tenants/{tenant}/databases/{database}/collections[/...]`.
//! Legacy `/api/v1/collections/...` paths are accepted inbound and
//! rewritten to this shape before forwarding or recording in the WAL.

pub const API_BASE: &str = "/api/v2";
pub const DEFAULT_TENANT: &str = "default_tenant";
pub const DEFAULT_DATABASE: &str = "default_database";

pub fn collections_endpoint() -> String {
    format!(
        "{API_BASE}/tenants/{DEFAULT_TENANT}/databases/{DEFAULT_DATABASE}/collections"
    )
}

pub fn heartbeat_path() -> String {
    format!("{API_BASE}/heartbeat")
}

/// Rewrite a legacy v1 path or a bare collection path into the canonical
/// v2 tenant/database/collections shape. Paths already in v2 shape, or
/// not collection-related at all, pass through unchanged (v2-shaped) or
/// get the API base prepended.
pub fn normalize_path(original_path: &str) -> String {
    let endpoint = collections_endpoint();

    if original_path.starts_with(&endpoint) {
        return original_path.to_string();
    }

    if let Some(rest) = original_path.strip_prefix("/api/v1/") {
        if let Some(after_collections) = rest.strip_prefix("collections/") {
            let mut parts = after_collections.splitn(2, '/');
            let collection_id = parts.next().unwrap_or("");
            let operation = parts.next();
            return match operation {
                Some(op) if !op.is_empty() => format!("{endpoint}/{collection_id}/{op}"),
                _ => format!("{endpoint}/{collection_id}"),
            };
        }
        if rest == "collections" {
            return endpoint;
        }
        return format!("{API_BASE}/{rest}");
    }

    if original_path.starts_with(API_BASE) {
        return original_path.to_string();
    }

    if original_path == "/collections" || original_path == "collections" {
        return endpoint;
    }

    if !original_path.starts_with('/') {
        return format!("{endpoint}/{original_path}");
    }

    original_path.to_string()
}

/// Extract the collection name-or-UUID segment from a (normalized or raw)
/// path whose prefix is the collections endpoint. Returns `None` for
/// paths that do not address a specific collection (e.g. the bare
/// collections-list endpoint, or unrelated admin paths).
pub fn extract_collection_identifier(path: &str) -> Option<String> {
    let endpoint = collections_endpoint();
    let prefix = format!("{endpoint}/");
    let rest = path.strip_prefix(&prefix)?;
    let collection = rest.split('/').next()?;
    if collection.is_empty() {
        None
    } else {
        Some(collection.to_string())
    }
}

/// Returns the document-level operation suffix (`add`, `upsert`, `update`,
/// `get`, `query`, `count`, `delete`) if the path addresses one, else
/// `None` for a bare collection path (`.../collections/{id}`).
pub fn extract_operation(path: &str) -> Option<String> {
    let endpoint = collections_endpoint();
    let prefix = format!("{endpoint}/");
    let rest = path.strip_prefix(&prefix)?;
    let mut parts = rest.splitn(2, '/');
    let _collection = parts.next()?;
    parts.next().map(|s| s.to_string())
}

pub fn is_collection_root_path(path: &str) -> bool {
    path == collections_endpoint()
}

/// A path is a collection-level path (vs. document-level) if it addresses
/// exactly `.../collections/{id}` with no further operation segment.
pub fn is_collection_level_path(path: &str) -> bool {
    extract_collection_identifier(path).is_some() && extract_operation(path).is_none()
}

/// Read classification: GET requests, and POSTs whose path ends in one of
/// the read-only document operations.
pub fn is_read_request(method: &str, path: &str) -> bool {
    if method.eq_ignore_ascii_case("GET") {
        return true;
    }
    if method.eq_ignore_ascii_case("POST") {
        return path.ends_with("/get") || path.ends_with("/query") || path.ends_with("/count");
    }
    false
}

/// A document-level delete arrives as `POST .../delete`; the WAL engine
/// stores these with method `DELETE` for downstream routing clarity, but
/// must reissue them as `POST` against the backend.
pub fn is_document_delete_path(path: &str) -> bool {
    path.ends_with("/delete")
}

/// Pull the `name` field out of a collection-create request body. The
/// collections-root path carries no identifier of its own, so a CREATE
/// entry's collection name only ever lives in its body.
pub fn extract_name_from_create_body(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()?
        .get("name")?
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v1_collection_path_converts_to_v2() {
        let got = normalize_path("/api/v1/collections/COL1/add");
        assert_eq!(got, format!("{}/COL1/add", collections_endpoint()));
    }

    #[test]
    fn v1_bare_collection_converts() {
        let got = normalize_path("/api/v1/collections/COL1");
        assert_eq!(got, format!("{}/COL1", collections_endpoint()));
    }

    #[test]
    fn v2_path_passes_through() {
        let endpoint = collections_endpoint();
        let path = format!("{endpoint}/COL1/query");
        assert_eq!(normalize_path(&path), path);
    }

    #[test]
    fn extract_identifier_from_document_path() {
        let path = format!("{}/COL1/add", collections_endpoint());
        assert_eq!(extract_collection_identifier(&path), Some("COL1".to_string()));
    }

    #[test]
    fn extract_identifier_none_for_root() {
        assert_eq!(extract_collection_identifier(&collections_endpoint()), None);
    }

    #[test]
    fn collection_level_vs_document_level() {
        let endpoint = collections_endpoint();
        assert!(is_collection_level_path(&format!("{endpoint}/COL1")));
        assert!(!is_collection_level_path(&format!("{endpoint}/COL1/add")));
    }

    #[test]
    fn read_classification() {
        let endpoint = collections_endpoint();
        assert!(is_read_request("GET", &endpoint));
        assert!(is_read_request("POST", &format!("{endpoint}/COL1/query")));
        assert!(is_read_request("POST", &format!("{endpoint}/COL1/count")));
        assert!(!is_read_request("POST", &format!("{endpoint}/COL1/add")));
        assert!(!is_read_request("DELETE", &format!("{endpoint}/COL1")));
    }

    #[test]
    fn document_delete_detection() {
        let endpoint = collections_endpoint();
        assert!(is_document_delete_path(&format!("{endpoint}/COL1/delete")));
        assert!(!is_document_delete_path(&format!("{endpoint}/COL1/add")));
    }
}
