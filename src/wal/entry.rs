//! WAL entry record and its enumerations.

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetInstance {
    Primary,
    Replica,
    Both,
}

impl TargetInstance {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetInstance::Primary => "primary",
            TargetInstance::Replica => "replica",
            TargetInstance::Both => "both",
        }
    }

    pub fn parse(s: &str) -> Option<TargetInstance> {
        match s {
            "primary" => Some(TargetInstance::Primary),
            "replica" => Some(TargetInstance::Replica),
            "both" => Some(TargetInstance::Both),
            _ => None,
        }
    }

    pub fn from_instance(name: crate::instance::InstanceName) -> TargetInstance {
        match name {
            crate::instance::InstanceName::Primary => TargetInstance::Primary,
            crate::instance::InstanceName::Replica => TargetInstance::Replica,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WalStatus {
    Pending,
    Executed,
    Synced,
    Failed,
    Abandoned,
    Obsolete,
}

impl WalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalStatus::Pending => "pending",
            WalStatus::Executed => "executed",
            WalStatus::Synced => "synced",
            WalStatus::Failed => "failed",
            WalStatus::Abandoned => "abandoned",
            WalStatus::Obsolete => "obsolete",
        }
    }

    pub fn parse(s: &str) -> Option<WalStatus> {
        match s {
            "pending" => Some(WalStatus::Pending),
            "executed" => Some(WalStatus::Executed),
            "synced" => Some(WalStatus::Synced),
            "failed" => Some(WalStatus::Failed),
            "abandoned" => Some(WalStatus::Abandoned),
            "obsolete" => Some(WalStatus::Obsolete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WalEntry {
    pub write_id: Uuid,
    pub method: String,
    pub original_method: Option<String>,
    pub path: String,
    pub body: Vec<u8>,
    pub headers: Value,
    pub target_instance: TargetInstance,
    pub executed_on: Option<String>,
    pub status: WalStatus,
    pub synced_instances: Vec<String>,
    pub collection_id: Option<String>,
    pub retry_count: i32,
    pub priority: i32,
    pub error_message: Option<String>,
    pub original_body: Option<Vec<u8>>,
    pub conversion_type: Option<String>,
}

impl WalEntry {
    pub fn is_collection_level_delete(&self) -> bool {
        self.method == "DELETE" && !self.path.ends_with("/delete")
    }

    pub fn is_document_delete(&self) -> bool {
        self.method == "DELETE" && self.path.ends_with("/delete")
    }

    pub fn is_collection_create(&self) -> bool {
        self.method == "POST" && crate::backend::path::is_collection_root_path(&self.path)
    }

    pub fn sync_body(&self) -> &[u8] {
        &self.body
    }
}
