//! Schema initialization for the three durable tables.
//!
//! Run once at startup. Failure here is fatal — the process cannot serve
//! traffic without a working WAL/mapping/transaction-log store.

use super::pool::Store;
use crate::error::{ProxyError, ProxyResult};

const WAL_WRITES_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS wal_writes (
    write_id UUID PRIMARY KEY,
    method VARCHAR(10) NOT NULL,
    original_method VARCHAR(10),
    path TEXT NOT NULL,
    body BYTEA,
    headers JSONB,
    target_instance VARCHAR(10) NOT NULL,
    executed_on VARCHAR(10),
    status VARCHAR(20) NOT NULL DEFAULT 'pending',
    synced_instances JSONB NOT NULL DEFAULT '[]',
    collection_id TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    priority INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    original_body BYTEA,
    conversion_type VARCHAR(50),
    created TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    executed TIMESTAMPTZ,
    synced TIMESTAMPTZ,
    updated TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    next_retry_at TIMESTAMPTZ,
    data_size_bytes BIGINT NOT NULL DEFAULT 0
);
"#;

const WAL_WRITES_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_wal_status_priority_created
    ON wal_writes (status, priority DESC, created ASC);
CREATE INDEX IF NOT EXISTS idx_wal_target_status
    ON wal_writes (target_instance, status);
CREATE INDEX IF NOT EXISTS idx_wal_collection_status
    ON wal_writes (collection_id, status);
"#;

const COLLECTION_MAPPINGS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS collection_mappings (
    name TEXT PRIMARY KEY,
    primary_uuid UUID,
    replica_uuid UUID,
    created TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;

const COLLECTION_MAPPINGS_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_mappings_primary_uuid ON collection_mappings (primary_uuid);
CREATE INDEX IF NOT EXISTS idx_mappings_replica_uuid ON collection_mappings (replica_uuid);
"#;

const TRANSACTION_LOG_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS transaction_log (
    transaction_id UUID PRIMARY KEY,
    client_session TEXT,
    client_ip TEXT,
    user_id TEXT,
    method VARCHAR(10) NOT NULL,
    path TEXT NOT NULL,
    body JSONB,
    headers JSONB,
    status VARCHAR(20) NOT NULL DEFAULT 'ATTEMPTING',
    operation_type VARCHAR(50),
    target_instance VARCHAR(10),
    failure_reason TEXT,
    response_status INTEGER,
    retry_count INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3,
    next_retry_at TIMESTAMPTZ,
    is_timing_gap_failure BOOLEAN NOT NULL DEFAULT FALSE,
    created TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    attempted TIMESTAMPTZ,
    completed TIMESTAMPTZ
);
"#;

const TRANSACTION_LOG_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_txlog_status_retry
    ON transaction_log (status, next_retry_at);
"#;

pub async fn init_schema(store: &Store) -> ProxyResult<()> {
    let conn = store.get().await?;

    for stmt in [
        WAL_WRITES_DDL,
        WAL_WRITES_INDEXES,
        COLLECTION_MAPPINGS_DDL,
        COLLECTION_MAPPINGS_INDEXES,
        TRANSACTION_LOG_DDL,
        TRANSACTION_LOG_INDEXES,
    ] {
        conn.batch_execute(stmt)
            .await
            .map_err(|e| ProxyError::Fatal(format!("schema init failed: {e}")))?;
    }

    Ok(())
}
