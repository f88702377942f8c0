//! Name<->UUID mapping resolver.
//!
//! The resolver never fabricates a UUID: it only ever reports what is
//! already in the `collection_mappings` table, or what a direct listing
//! of the target instance's collections has just observed. On a cold
//! miss it repairs the mapping by querying the instance directly — this
//! is the "repairs incomplete mappings via direct-instance queries" path.

use std::sync::Arc;

use crate::backend::BackendClient;
use crate::db::Store;
use crate::error::ProxyResult;
use crate::instance::InstanceName;

#[derive(Debug, Clone, Default)]
pub struct CollectionMapping {
    pub name: String,
    pub primary_uuid: Option<String>,
    pub replica_uuid: Option<String>,
}

impl CollectionMapping {
    pub fn uuid_for(&self, instance: InstanceName) -> Option<&str> {
        match instance {
            InstanceName::Primary => self.primary_uuid.as_deref(),
            InstanceName::Replica => self.replica_uuid.as_deref(),
        }
    }
}

pub struct MappingResolver {
    store: Arc<Store>,
    backend: Arc<BackendClient>,
}

impl MappingResolver {
    pub fn new(store: Arc<Store>, backend: Arc<BackendClient>) -> Self {
        Self { store, backend }
    }

    pub async fn get_mapping(&self, name: &str) -> ProxyResult<Option<CollectionMapping>> {
        let conn = self.store.get().await?;
        let row = conn
            .query_opt(
                "SELECT name, primary_uuid, replica_uuid FROM collection_mappings WHERE name = $1",
                &[&name],
            )
            .await?;
        Ok(row.map(|r| CollectionMapping {
            name: r.get(0),
            primary_uuid: r.get::<_, Option<uuid::Uuid>>(1).map(|u| u.to_string()),
            replica_uuid: r.get::<_, Option<uuid::Uuid>>(2).map(|u| u.to_string()),
        }))
    }

    /// Resolve `name` to the instance-local UUID on `instance`. On a
    /// cache miss, queries `GET /collections` on that instance directly
    /// and repairs the mapping row if found.
    pub async fn resolve_name_to_uuid(
        &self,
        name: &str,
        instance: InstanceName,
        instance_base_url: &str,
    ) -> ProxyResult<Option<String>> {
        if let Some(mapping) = self.get_mapping(name).await? {
            if let Some(uuid) = mapping.uuid_for(instance) {
                return Ok(Some(uuid.to_string()));
            }
        }

        let collections = self.backend.list_collections(instance_base_url).await?;
        let found = collections.into_iter().find(|c| c.name == name);

        match found {
            Some(c) => {
                self.upsert_side(name, instance, &c.id).await?;
                Ok(Some(c.id))
            }
            None => Ok(None),
        }
    }

    /// Given a UUID observed on one instance, find the corresponding UUID
    /// on `target_instance`. Returns `Ok(None)` if the mapping exists but
    /// the target side has not been populated yet — the caller must treat
    /// this as "not yet replicated" and either defer or synthesize.
    pub async fn resolve_by_source_uuid(
        &self,
        source_uuid: &str,
        target_instance: InstanceName,
    ) -> ProxyResult<Option<String>> {
        let conn = self.store.get().await?;
        let parsed: Result<uuid::Uuid, _> = source_uuid.parse();
        let Ok(parsed) = parsed else { return Ok(None) };

        let row = conn
            .query_opt(
                "SELECT name, primary_uuid, replica_uuid FROM collection_mappings \
                 WHERE primary_uuid = $1 OR replica_uuid = $1",
                &[&parsed],
            )
            .await?;

        let Some(row) = row else { return Ok(None) };
        let mapping = CollectionMapping {
            name: row.get(0),
            primary_uuid: row.get::<_, Option<uuid::Uuid>>(1).map(|u| u.to_string()),
            replica_uuid: row.get::<_, Option<uuid::Uuid>>(2).map(|u| u.to_string()),
        };
        Ok(mapping.uuid_for(target_instance).map(|s| s.to_string()))
    }

    /// Given a UUID observed on either instance, find the collection's
    /// stable cross-instance name. Used to key WAL entries consistently
    /// when the client addressed a collection by UUID rather than name.
    pub async fn resolve_name_for_uuid(&self, uuid_str: &str) -> ProxyResult<Option<String>> {
        let conn = self.store.get().await?;
        let parsed: Result<uuid::Uuid, _> = uuid_str.parse();
        let Ok(parsed) = parsed else { return Ok(None) };

        let row = conn
            .query_opt(
                "SELECT name FROM collection_mappings WHERE primary_uuid = $1 OR replica_uuid = $1",
                &[&parsed],
            )
            .await?;
        Ok(row.map(|r| r.get(0)))
    }

    /// Upsert a complete mapping row. Conflicts are resolved with COALESCE
    /// semantics: a previously-known non-null side is preserved even if
    /// this call supplies `None` for it.
    pub async fn create_complete_mapping(
        &self,
        name: &str,
        primary_uuid: Option<&str>,
        replica_uuid: Option<&str>,
    ) -> ProxyResult<()> {
        let conn = self.store.get().await?;
        let primary_uuid: Option<uuid::Uuid> = primary_uuid.and_then(|s| s.parse().ok());
        let replica_uuid: Option<uuid::Uuid> = replica_uuid.and_then(|s| s.parse().ok());

        conn.execute(
            "INSERT INTO collection_mappings (name, primary_uuid, replica_uuid, created, updated) \
             VALUES ($1, $2, $3, NOW(), NOW()) \
             ON CONFLICT (name) DO UPDATE SET \
                primary_uuid = COALESCE(EXCLUDED.primary_uuid, collection_mappings.primary_uuid), \
                replica_uuid = COALESCE(EXCLUDED.replica_uuid, collection_mappings.replica_uuid), \
                updated = NOW()",
            &[&name, &primary_uuid, &replica_uuid],
        )
        .await?;
        Ok(())
    }

    /// Names with `instance`'s UUID null but the other side populated —
    /// the recovery coordinator's reconciliation candidates.
    pub async fn list_incomplete(&self, instance: InstanceName) -> ProxyResult<Vec<String>> {
        let (column, other_column) = match instance {
            InstanceName::Primary => ("primary_uuid", "replica_uuid"),
            InstanceName::Replica => ("replica_uuid", "primary_uuid"),
        };
        let conn = self.store.get().await?;
        let query = format!(
            "SELECT name FROM collection_mappings WHERE {column} IS NULL AND {other_column} IS NOT NULL"
        );
        let rows = conn.query(query.as_str(), &[]).await?;
        Ok(rows.into_iter().map(|r| r.get(0)).collect())
    }

    async fn upsert_side(&self, name: &str, instance: InstanceName, uuid_str: &str) -> ProxyResult<()> {
        match instance {
            InstanceName::Primary => self.create_complete_mapping(name, Some(uuid_str), None).await,
            InstanceName::Replica => self.create_complete_mapping(name, None, Some(uuid_str)).await,
        }
    }

    /// Clear one side of a mapping; delete the row entirely once both
    /// sides are null (invariant: a mapping row never exists with both
    /// UUIDs null).
    pub async fn delete_mapping_side(&self, name: &str, instance: InstanceName) -> ProxyResult<()> {
        let conn = self.store.get().await?;
        match instance {
            InstanceName::Primary => {
                conn.execute(
                    "UPDATE collection_mappings SET primary_uuid = NULL, updated = NOW() WHERE name = $1",
                    &[&name],
                )
                .await?;
            }
            InstanceName::Replica => {
                conn.execute(
                    "UPDATE collection_mappings SET replica_uuid = NULL, updated = NOW() WHERE name = $1",
                    &[&name],
                )
                .await?;
            }
        }

        conn.execute(
            "DELETE FROM collection_mappings WHERE name = $1 AND primary_uuid IS NULL AND replica_uuid IS NULL",
            &[&name],
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_for_picks_correct_side() {
        let mapping = CollectionMapping {
            name: "COL1".to_string(),
            primary_uuid: Some("11111111-1111-1111-1111-111111111111".to_string()),
            replica_uuid: None,
        };
        assert_eq!(
            mapping.uuid_for(InstanceName::Primary),
            Some("11111111-1111-1111-1111-111111111111")
        );
        assert_eq!(mapping.uuid_for(InstanceName::Replica), None);
    }
}
