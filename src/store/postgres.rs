//! PostgreSQL cluster store implementation.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

use crate::config::DatabaseConfig;
use crate::error::{ControlError, ControlResult};
use crate::profiles::{refuse_default_removal, DefaultProfile, ProfilePayload};
use crate::types::{
    CloudProvider, ClusterConfig, ClusterData, ClusterId, ClusterRecord, ClusterStatus,
    ProviderRef,
};

use super::{ClusterFilter, ClusterStore, ProfileStore};

/// PostgreSQL-backed cluster store.
///
/// Name uniqueness is enforced by a `UNIQUE` constraint on the `name`
/// column, so racing inserts are decided by the database, not by callers.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to PostgreSQL and create a new store.
    ///
    /// The required tables are created if they don't exist.
    pub async fn connect(config: &DatabaseConfig) -> ControlResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;

        Ok(store)
    }

    /// Create a store from an existing connection pool.
    pub async fn from_pool(pool: PgPool) -> ControlResult<Self> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Ensure the required tables exist.
    async fn ensure_schema(&self) -> ControlResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS clusters (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                cloud TEXT NOT NULL,
                config JSONB NOT NULL,
                provider_ref TEXT,
                status TEXT NOT NULL,
                status_message TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS profiles (
                cloud TEXT NOT NULL,
                name TEXT NOT NULL,
                payload JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (cloud, name)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_clusters_cloud
            ON clusters (cloud)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_clusters_status
            ON clusters (status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_clusters_created_at
            ON clusters (created_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Map a write error, turning unique violations into duplicate-name
    /// rejections.
    fn map_write_error(err: sqlx::Error, name: &str) -> ControlError {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                ControlError::duplicate_name(name)
            }
            _ => ControlError::Database(err),
        }
    }

    /// Parse a row into a ClusterRecord.
    fn row_to_record(row: &sqlx::postgres::PgRow) -> ControlResult<ClusterRecord> {
        let id: String = row.get("id");
        let name: String = row.get("name");
        let cloud_str: String = row.get("cloud");
        let config_json: serde_json::Value = row.get("config");
        let provider_ref: Option<String> = row.get("provider_ref");
        let status_str: String = row.get("status");
        let status_message: Option<String> = row.get("status_message");
        let created_at: chrono::DateTime<chrono::Utc> = row.get("created_at");
        let updated_at: chrono::DateTime<chrono::Utc> = row.get("updated_at");

        let cloud: CloudProvider = cloud_str.parse().map_err(|_| {
            ControlError::malformed_record(format!("cluster {id} has unknown cloud '{cloud_str}'"))
        })?;

        let config: ClusterConfig = serde_json::from_value(config_json).map_err(|e| {
            ControlError::malformed_record(format!("cluster {id} config undecodable: {e}"))
        })?;

        if config.cloud() != cloud {
            return Err(ControlError::malformed_record(format!(
                "cluster {id} is tagged {cloud} but its config document says {}",
                config.cloud()
            )));
        }

        let status: ClusterStatus = status_str.parse().map_err(|e| {
            ControlError::Serialisation(format!("failed to parse status '{status_str}': {e}"))
        })?;

        Ok(ClusterRecord {
            data: ClusterData {
                id: ClusterId::new(id),
                name,
                cloud,
                config,
                provider_ref: provider_ref.map(ProviderRef::new),
                status_message,
                created_at,
                updated_at,
            },
            status,
        })
    }

    /// Parse a row into a DefaultProfile.
    fn row_to_profile(row: &sqlx::postgres::PgRow) -> ControlResult<DefaultProfile> {
        let name: String = row.get("name");
        let payload_json: serde_json::Value = row.get("payload");
        let created_at: chrono::DateTime<chrono::Utc> = row.get("created_at");
        let updated_at: chrono::DateTime<chrono::Utc> = row.get("updated_at");

        let payload: ProfilePayload = serde_json::from_value(payload_json).map_err(|e| {
            ControlError::malformed_record(format!("profile {name} payload undecodable: {e}"))
        })?;

        Ok(DefaultProfile {
            name,
            payload,
            created_at,
            updated_at,
        })
    }
}

#[async_trait]
impl ClusterStore for PostgresStore {
    async fn insert(&self, record: &ClusterRecord) -> ControlResult<()> {
        let config_json = serde_json::to_value(&record.data.config).map_err(|e| {
            ControlError::Serialisation(format!("failed to serialise config: {e}"))
        })?;

        sqlx::query(
            r#"
            INSERT INTO clusters (
                id, name, cloud, config, provider_ref,
                status, status_message, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.data.id.as_str())
        .bind(&record.data.name)
        .bind(record.data.cloud.as_str())
        .bind(&config_json)
        .bind(record.data.provider_ref.as_ref().map(ProviderRef::as_str))
        .bind(record.status.as_str())
        .bind(&record.data.status_message)
        .bind(record.data.created_at)
        .bind(record.data.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::map_write_error(e, &record.data.name))?;

        Ok(())
    }

    async fn get(&self, id: &ClusterId) -> ControlResult<Option<ClusterRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, cloud, config, provider_ref,
                   status, status_message, created_at, updated_at
            FROM clusters
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(Self::row_to_record(&r)?)),
            None => Ok(None),
        }
    }

    async fn find_by_name(&self, name: &str) -> ControlResult<Option<ClusterRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, cloud, config, provider_ref,
                   status, status_message, created_at, updated_at
            FROM clusters
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(Self::row_to_record(&r)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, filter: &ClusterFilter) -> ControlResult<Vec<ClusterRecord>> {
        let mut query = String::from(
            r#"
            SELECT id, name, cloud, config, provider_ref,
                   status, status_message, created_at, updated_at
            FROM clusters
            WHERE 1=1
            "#,
        );

        let mut params: Vec<String> = Vec::new();

        if let Some(cloud) = filter.cloud {
            params.push(cloud.as_str().to_owned());
            query.push_str(&format!(" AND cloud = ${}", params.len()));
        }

        if let Some(status) = filter.status {
            params.push(status.as_str().to_owned());
            query.push_str(&format!(" AND status = ${}", params.len()));
        }

        if let Some(ref prefix) = filter.name_prefix {
            params.push(prefix.clone());
            query.push_str(&format!(" AND starts_with(name, ${})", params.len()));
        }

        query.push_str(" ORDER BY created_at DESC");

        if let Some(limit) = filter.limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }

        if let Some(offset) = filter.offset {
            query.push_str(&format!(" OFFSET {offset}"));
        }

        let mut sqlx_query = sqlx::query(&query);
        for param in &params {
            sqlx_query = sqlx_query.bind(param);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn save(&self, record: &ClusterRecord) -> ControlResult<()> {
        let config_json = serde_json::to_value(&record.data.config).map_err(|e| {
            ControlError::Serialisation(format!("failed to serialise config: {e}"))
        })?;

        sqlx::query(
            r#"
            INSERT INTO clusters (
                id, name, cloud, config, provider_ref,
                status, status_message, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                cloud = EXCLUDED.cloud,
                config = EXCLUDED.config,
                provider_ref = EXCLUDED.provider_ref,
                status = EXCLUDED.status,
                status_message = EXCLUDED.status_message,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(record.data.id.as_str())
        .bind(&record.data.name)
        .bind(record.data.cloud.as_str())
        .bind(&config_json)
        .bind(record.data.provider_ref.as_ref().map(ProviderRef::as_str))
        .bind(record.status.as_str())
        .bind(&record.data.status_message)
        .bind(record.data.created_at)
        .bind(record.data.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::map_write_error(e, &record.data.name))?;

        Ok(())
    }

    async fn update_status(
        &self,
        id: &ClusterId,
        status: ClusterStatus,
        message: Option<&str>,
    ) -> ControlResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE clusters
            SET status = $1, status_message = $2, updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(status.as_str())
        .bind(message)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ControlError::ClusterNotFound(id.to_string()));
        }

        Ok(())
    }

    async fn delete(&self, id: &ClusterId) -> ControlResult<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM clusters WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ControlError::ClusterNotFound(id.to_string()));
        }

        Ok(())
    }
}

#[async_trait]
impl ProfileStore for PostgresStore {
    async fn profile(
        &self,
        cloud: CloudProvider,
        name: &str,
    ) -> ControlResult<Option<DefaultProfile>> {
        let row = sqlx::query(
            r#"
            SELECT name, payload, created_at, updated_at
            FROM profiles
            WHERE cloud = $1 AND name = $2
            "#,
        )
        .bind(cloud.as_str())
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(Self::row_to_profile(&r)?)),
            None => Ok(None),
        }
    }

    async fn profiles(&self, cloud: CloudProvider) -> ControlResult<Vec<DefaultProfile>> {
        let rows = sqlx::query(
            r#"
            SELECT name, payload, created_at, updated_at
            FROM profiles
            WHERE cloud = $1
            ORDER BY name
            "#,
        )
        .bind(cloud.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_profile).collect()
    }

    async fn save_profile(&self, profile: &DefaultProfile) -> ControlResult<()> {
        let payload_json = serde_json::to_value(&profile.payload).map_err(|e| {
            ControlError::Serialisation(format!("failed to serialise profile: {e}"))
        })?;

        sqlx::query(
            r#"
            INSERT INTO profiles (cloud, name, payload, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (cloud, name) DO UPDATE SET
                payload = EXCLUDED.payload,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(profile.cloud().as_str())
        .bind(&profile.name)
        .bind(&payload_json)
        .bind(profile.created_at)
        .bind(profile.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_profile_if_absent(&self, profile: &DefaultProfile) -> ControlResult<bool> {
        let payload_json = serde_json::to_value(&profile.payload).map_err(|e| {
            ControlError::Serialisation(format!("failed to serialise profile: {e}"))
        })?;

        let result = sqlx::query(
            r#"
            INSERT INTO profiles (cloud, name, payload, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (cloud, name) DO NOTHING
            "#,
        )
        .bind(profile.cloud().as_str())
        .bind(&profile.name)
        .bind(&payload_json)
        .bind(profile.created_at)
        .bind(profile.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_profile(&self, cloud: CloudProvider, name: &str) -> ControlResult<()> {
        refuse_default_removal(name)?;

        let result = sqlx::query(
            r#"
            DELETE FROM profiles WHERE cloud = $1 AND name = $2
            "#,
        )
        .bind(cloud.as_str())
        .bind(name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ControlError::ProfileNotFound {
                cloud,
                name: name.to_owned(),
            });
        }

        Ok(())
    }
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AmazonConfig, AmazonNodePool};
    use std::collections::BTreeMap;

    fn get_database_url() -> Option<String> {
        std::env::var("DATABASE_URL").ok()
    }

    async fn connect() -> PostgresStore {
        let url = get_database_url().expect("DATABASE_URL not set");
        let config = DatabaseConfig {
            url,
            ..DatabaseConfig::default()
        };
        PostgresStore::connect(&config)
            .await
            .expect("failed to connect")
    }

    /// Names are unique per run so leftovers from failed runs never collide
    /// with the unique constraint.
    fn fresh_name() -> String {
        format!("it{}", ulid::Ulid::new().to_string().to_lowercase())
    }

    fn amazon_record(name: &str) -> ClusterRecord {
        let mut node_pools = BTreeMap::new();
        node_pools.insert(
            "pool1".to_owned(),
            AmazonNodePool {
                instance_type: "m4.xlarge".to_owned(),
                image: "ami-06d1667f".to_owned(),
                spot_price: "0.2".to_owned(),
                min_count: 1,
                max_count: 2,
                count: 1,
            },
        );
        let data = ClusterData::new(
            name,
            ClusterConfig::Amazon(AmazonConfig {
                location: "eu-west-1".to_owned(),
                master_instance_type: "m4.xlarge".to_owned(),
                master_image: "ami-06d1667f".to_owned(),
                node_pools,
            }),
        );
        ClusterRecord::new(data)
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL)"]
    async fn insert_and_get() {
        let store = connect().await;

        let record = amazon_record(&fresh_name());
        let id = record.data.id.clone();

        store.insert(&record).await.expect("insert failed");

        let retrieved = store
            .get(&id)
            .await
            .expect("get failed")
            .expect("cluster not found");

        assert_eq!(retrieved.data.id, id);
        assert_eq!(retrieved.data.name, record.data.name);
        assert_eq!(retrieved.data.cloud, CloudProvider::Amazon);
        assert_eq!(retrieved.status, ClusterStatus::Requested);

        store.delete(&id).await.expect("delete failed");
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL)"]
    async fn duplicate_name_maps_to_typed_error() {
        let store = connect().await;

        let record = amazon_record(&fresh_name());
        store.insert(&record).await.expect("insert failed");

        let rival = amazon_record(&record.data.name);
        let err = store
            .insert(&rival)
            .await
            .expect_err("second insert should fail");
        assert!(err.is_duplicate_name(), "unexpected error: {err}");

        store.delete(&record.data.id).await.expect("delete failed");
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL)"]
    async fn update_status_roundtrip() {
        let store = connect().await;

        let record = amazon_record(&fresh_name());
        let id = record.data.id.clone();
        store.insert(&record).await.expect("insert failed");

        store
            .update_status(&id, ClusterStatus::Error, Some("quota exceeded"))
            .await
            .expect("update failed");

        let retrieved = store.get(&id).await.expect("get failed").expect("missing");
        assert_eq!(retrieved.status, ClusterStatus::Error);
        assert_eq!(
            retrieved.data.status_message.as_deref(),
            Some("quota exceeded")
        );

        store.delete(&id).await.expect("delete failed");
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL)"]
    async fn profile_seeding_roundtrip() {
        let store = connect().await;

        store.ensure_defaults().await.expect("seeding failed");
        // A second pass inserts nothing.
        let seeded = store.ensure_defaults().await.expect("seeding failed");
        assert_eq!(seeded, 0);

        let profile = store
            .profile(CloudProvider::Amazon, "default")
            .await
            .expect("profile failed")
            .expect("default profile missing");
        assert_eq!(profile.cloud(), CloudProvider::Amazon);
    }
}
