//! Path normalization and collection-identifier extraction invariants
//! exercised at the crate boundary, independent of any running backend.

use vdb_proxy::backend::path;

#[test]
fn legacy_v1_document_path_normalizes_to_canonical_v2_shape() {
    let got = path::normalize_path("/api/v1/collections/COL1/query");
    assert_eq!(got, format!("{}/COL1/query", path::collections_endpoint()));
}

#[test]
fn bare_collections_path_normalizes_to_canonical_endpoint() {
    assert_eq!(path::normalize_path("/collections"), path::collections_endpoint());
}

#[test]
fn already_canonical_path_is_unchanged() {
    let canonical = format!("{}/COL1/add", path::collections_endpoint());
    assert_eq!(path::normalize_path(&canonical), canonical);
}

#[test]
fn collection_root_is_not_a_collection_level_or_document_path() {
    let endpoint = path::collections_endpoint();
    assert!(path::is_collection_root_path(&endpoint));
    assert!(!path::is_collection_level_path(&endpoint));
    assert!(path::extract_collection_identifier(&endpoint).is_none());
}

#[test]
fn document_delete_path_is_recognized_for_method_normalization() {
    let endpoint = path::collections_endpoint();
    let delete_path = format!("{endpoint}/COL1/delete");
    assert!(path::is_document_delete_path(&delete_path));
    assert_eq!(path::extract_collection_identifier(&delete_path), Some("COL1".to_string()));
    assert_eq!(path::extract_operation(&delete_path), Some("delete".to_string()));
}

#[test]
fn read_classification_covers_get_and_read_only_post_suffixes() {
    let endpoint = path::collections_endpoint();
    assert!(path::is_read_request("GET", &format!("{endpoint}/COL1")));
    assert!(path::is_read_request("POST", &format!("{endpoint}/COL1/get")));
    assert!(path::is_read_request("POST", &format!("{endpoint}/COL1/query")));
    assert!(path::is_read_request("POST", &format!("{endpoint}/COL1/count")));
    assert!(!path::is_read_request("POST", &format!("{endpoint}/COL1/add")));
    assert!(!path::is_read_request("POST", &format!("{endpoint}/COL1/delete")));
}
