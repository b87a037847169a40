//! SQLite implementation of [`MetadataStore`].

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use vproc_models::{AssetStatus, JobId, Rendition, VideoAsset};

use crate::config::DbConfig;
use crate::error::{DbError, DbResult};
use crate::schema;
use crate::store::MetadataStore;

#[derive(Debug, sqlx::FromRow)]
struct VideoRow {
    id: String,
    original_name: String,
    source_location: String,
    status: String,
    source_width: i64,
    source_height: i64,
    duration_seconds: f64,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    master_manifest_location: Option<String>,
    master_manifest_url: Option<String>,
}

impl TryFrom<VideoRow> for VideoAsset {
    type Error = DbError;

    fn try_from(row: VideoRow) -> DbResult<Self> {
        let status = AssetStatus::from_str(&row.status)
            .map_err(|e| DbError::invalid_data(e.to_string()))?;
        Ok(VideoAsset {
            id: JobId::from(row.id),
            original_name: row.original_name,
            source_location: row.source_location,
            status,
            source_width: to_u32(row.source_width, "source_width")?,
            source_height: to_u32(row.source_height, "source_height")?,
            duration_seconds: row.duration_seconds,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
            master_manifest_location: row.master_manifest_location,
            master_manifest_url: row.master_manifest_url,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RenditionRow {
    id: String,
    video_id: String,
    label: String,
    height: i64,
    artifact_location: String,
    artifact_url: Option<String>,
    segment_count: i64,
    size_bytes: i64,
    bandwidth_estimate: i64,
    processed_at: DateTime<Utc>,
}

impl TryFrom<RenditionRow> for Rendition {
    type Error = DbError;

    fn try_from(row: RenditionRow) -> DbResult<Self> {
        Ok(Rendition {
            id: row.id,
            video_id: JobId::from(row.video_id),
            label: row.label,
            height: to_u32(row.height, "height")?,
            artifact_location: row.artifact_location,
            artifact_url: row.artifact_url,
            segment_count: to_u32(row.segment_count, "segment_count")?,
            size_bytes: to_u64(row.size_bytes, "size_bytes")?,
            bandwidth_estimate: to_u64(row.bandwidth_estimate, "bandwidth_estimate")?,
            processed_at: row.processed_at,
        })
    }
}

fn to_u32(value: i64, column: &str) -> DbResult<u32> {
    u32::try_from(value).map_err(|_| DbError::invalid_data(format!("{column} out of range: {value}")))
}

fn to_u64(value: i64, column: &str) -> DbResult<u64> {
    u64::try_from(value).map_err(|_| DbError::invalid_data(format!("{column} out of range: {value}")))
}

fn to_i64(value: u64, column: &str) -> DbResult<i64> {
    i64::try_from(value).map_err(|_| DbError::invalid_data(format!("{column} out of range: {value}")))
}

/// SQLx implementation of [`MetadataStore`].
#[derive(Clone)]
pub struct SqlxMetadataStore {
    pool: SqlitePool,
}

impl SqlxMetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the pool and run migrations.
    pub async fn connect(config: &DbConfig) -> DbResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.database_url)?
            .busy_timeout(config.busy_timeout)
            .foreign_keys(true)
            .create_if_missing(true);

        // Every connection to :memory: is its own database, so pin one
        let pool = if config.is_in_memory() {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(config.max_connections)
                .connect_with(options)
                .await?
        };

        schema::run_migrations(&pool).await?;
        info!(
            "Metadata store ready ({} max connections)",
            if config.is_in_memory() { 1 } else { config.max_connections }
        );
        Ok(Self { pool })
    }

    /// Fresh in-memory store with migrations applied.
    pub async fn in_memory() -> DbResult<Self> {
        Self::connect(&DbConfig::in_memory()).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cheap liveness probe.
    pub async fn ping(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for SqlxMetadataStore {
    async fn create_asset(&self, asset: &VideoAsset) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO videos (
                id, original_name, source_location, status, source_width, source_height,
                duration_seconds, error_message, created_at, updated_at, completed_at,
                master_manifest_location, master_manifest_url
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(asset.id.as_str())
        .bind(&asset.original_name)
        .bind(&asset.source_location)
        .bind(asset.status.as_str())
        .bind(i64::from(asset.source_width))
        .bind(i64::from(asset.source_height))
        .bind(asset.duration_seconds)
        .bind(&asset.error_message)
        .bind(asset.created_at)
        .bind(asset.updated_at)
        .bind(asset.completed_at)
        .bind(&asset.master_manifest_location)
        .bind(&asset.master_manifest_url)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_asset(&self, id: &JobId) -> DbResult<Option<VideoAsset>> {
        sqlx::query_as::<_, VideoRow>("SELECT * FROM videos WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(VideoAsset::try_from)
            .transpose()
    }

    async fn list_assets(&self, limit: u32, offset: u32) -> DbResult<Vec<VideoAsset>> {
        let rows = sqlx::query_as::<_, VideoRow>(
            "SELECT * FROM videos ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        )
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(VideoAsset::try_from).collect()
    }

    async fn update_status(
        &self,
        id: &JobId,
        status: AssetStatus,
        error: Option<&str>,
    ) -> DbResult<()> {
        let now = Utc::now();
        let completed_at = (status == AssetStatus::Completed).then_some(now);
        let error_message = if status == AssetStatus::Failed {
            Some(error.unwrap_or("unknown error"))
        } else {
            None
        };

        let result = sqlx::query(
            r#"
            UPDATE videos
            SET status = ?, error_message = ?, completed_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(completed_at)
        .bind(now)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Video", id.as_str()));
        }
        Ok(())
    }

    async fn update_source_info(
        &self,
        id: &JobId,
        width: u32,
        height: u32,
        duration_seconds: f64,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE videos
            SET source_width = ?, source_height = ?, duration_seconds = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(i64::from(width))
        .bind(i64::from(height))
        .bind(duration_seconds)
        .bind(Utc::now())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Video", id.as_str()));
        }
        Ok(())
    }

    async fn set_master_manifest(
        &self,
        id: &JobId,
        location: &str,
        url: Option<&str>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE videos
            SET master_manifest_location = ?, master_manifest_url = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(location)
        .bind(url)
        .bind(Utc::now())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Video", id.as_str()));
        }
        Ok(())
    }

    async fn upsert_rendition(&self, rendition: &Rendition) -> DbResult<()> {
        let id = if rendition.id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            rendition.id.clone()
        };

        sqlx::query(
            r#"
            INSERT INTO renditions (
                id, video_id, label, height, artifact_location, artifact_url,
                segment_count, size_bytes, bandwidth_estimate, processed_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (video_id, label) DO UPDATE SET
                height = excluded.height,
                artifact_location = excluded.artifact_location,
                artifact_url = excluded.artifact_url,
                segment_count = excluded.segment_count,
                size_bytes = excluded.size_bytes,
                bandwidth_estimate = excluded.bandwidth_estimate,
                processed_at = excluded.processed_at
            "#,
        )
        .bind(id)
        .bind(rendition.video_id.as_str())
        .bind(&rendition.label)
        .bind(i64::from(rendition.height))
        .bind(&rendition.artifact_location)
        .bind(&rendition.artifact_url)
        .bind(i64::from(rendition.segment_count))
        .bind(to_i64(rendition.size_bytes, "size_bytes")?)
        .bind(to_i64(rendition.bandwidth_estimate, "bandwidth_estimate")?)
        .bind(rendition.processed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_renditions(&self, video_id: &JobId) -> DbResult<Vec<Rendition>> {
        let rows = sqlx::query_as::<_, RenditionRow>(
            r#"
            SELECT * FROM renditions
            WHERE video_id = ?
            ORDER BY bandwidth_estimate DESC, height DESC
            "#,
        )
        .bind(video_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Rendition::try_from).collect()
    }

    async fn delete_asset(&self, id: &JobId) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM renditions WHERE video_id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM videos WHERE id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vproc_models::VideoJob;

    fn asset(id: &str) -> VideoAsset {
        VideoAsset::waiting(&VideoJob::new("uploads/src.mp4", "src.mp4").with_job_id(id))
    }

    fn rendition(video_id: &str, height: u32, bandwidth: u64) -> Rendition {
        Rendition {
            id: String::new(),
            video_id: JobId::from(video_id),
            label: Rendition::label_for(height),
            height,
            artifact_location: format!("{}/processed/{}p/playlist.m3u8", video_id, height),
            artifact_url: None,
            segment_count: 3,
            size_bytes: 1024,
            bandwidth_estimate: bandwidth,
            processed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_migrations_apply_once_per_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = DbConfig {
            database_url: format!("sqlite://{}", dir.path().join("vproc.db").display()),
            ..DbConfig::default()
        };

        let first = SqlxMetadataStore::connect(&config).await.unwrap();
        first.create_asset(&asset("v1")).await.unwrap();
        first.pool().close().await;

        // Reconnecting skips the applied migration and keeps the data
        let second = SqlxMetadataStore::connect(&config).await.unwrap();
        let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
            .fetch_one(second.pool())
            .await
            .unwrap();
        assert_eq!(applied, 1);
        assert!(second.get_asset(&JobId::from("v1")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_create_asset_is_idempotent() {
        let store = SqlxMetadataStore::in_memory().await.unwrap();
        assert!(store.create_asset(&asset("v1")).await.unwrap());
        assert!(!store.create_asset(&asset("v1")).await.unwrap());

        let loaded = store.get_asset(&JobId::from("v1")).await.unwrap().unwrap();
        assert_eq!(loaded.status, AssetStatus::Waiting);
        assert_eq!(loaded.original_name, "src.mp4");
        assert!(store.get_asset(&JobId::from("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_fields_follow_status() {
        let store = SqlxMetadataStore::in_memory().await.unwrap();
        let id = JobId::from("v1");
        store.create_asset(&asset("v1")).await.unwrap();

        store
            .update_status(&id, AssetStatus::Failed, Some("probe failed"))
            .await
            .unwrap();
        let failed = store.get_asset(&id).await.unwrap().unwrap();
        assert_eq!(failed.error_message.as_deref(), Some("probe failed"));
        assert!(failed.completed_at.is_none());

        store
            .update_status(&id, AssetStatus::Processing, None)
            .await
            .unwrap();
        store
            .update_status(&id, AssetStatus::Completed, Some("ignored"))
            .await
            .unwrap();
        let done = store.get_asset(&id).await.unwrap().unwrap();
        assert_eq!(done.status, AssetStatus::Completed);
        assert!(done.completed_at.is_some());
        assert!(done.error_message.is_none());
    }

    #[tokio::test]
    async fn test_update_missing_asset_is_not_found() {
        let store = SqlxMetadataStore::in_memory().await.unwrap();
        let err = store
            .update_status(&JobId::from("ghost"), AssetStatus::Processing, None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_source_info_and_manifest() {
        let store = SqlxMetadataStore::in_memory().await.unwrap();
        let id = JobId::from("v1");
        store.create_asset(&asset("v1")).await.unwrap();

        store.update_source_info(&id, 1920, 1080, 62.5).await.unwrap();
        store
            .set_master_manifest(&id, "v1/processed/master.m3u8", Some("https://cdn/master"))
            .await
            .unwrap();

        let loaded = store.get_asset(&id).await.unwrap().unwrap();
        assert_eq!((loaded.source_width, loaded.source_height), (1920, 1080));
        assert_eq!(loaded.duration_seconds, 62.5);
        assert_eq!(
            loaded.master_manifest_location.as_deref(),
            Some("v1/processed/master.m3u8")
        );
    }

    #[tokio::test]
    async fn test_upsert_rendition_overwrites_by_label() {
        let store = SqlxMetadataStore::in_memory().await.unwrap();
        let id = JobId::from("v1");
        store.create_asset(&asset("v1")).await.unwrap();

        store.upsert_rendition(&rendition("v1", 720, 2_800_000)).await.unwrap();
        let mut again = rendition("v1", 720, 2_800_000);
        again.segment_count = 9;
        store.upsert_rendition(&again).await.unwrap();

        let rows = store.list_renditions(&id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].segment_count, 9);
    }

    #[tokio::test]
    async fn test_renditions_ordered_by_bandwidth_then_height() {
        let store = SqlxMetadataStore::in_memory().await.unwrap();
        let id = JobId::from("v1");
        store.create_asset(&asset("v1")).await.unwrap();

        store.upsert_rendition(&rendition("v1", 144, 300_000)).await.unwrap();
        store.upsert_rendition(&rendition("v1", 1080, 5_000_000)).await.unwrap();
        store.upsert_rendition(&rendition("v1", 480, 1_400_000)).await.unwrap();
        store.upsert_rendition(&rendition("v1", 500, 1_400_000)).await.unwrap();

        let heights: Vec<u32> = store
            .list_renditions(&id)
            .await
            .unwrap()
            .iter()
            .map(|r| r.height)
            .collect();
        assert_eq!(heights, vec![1080, 500, 480, 144]);
    }

    #[tokio::test]
    async fn test_delete_asset_cascades() {
        let store = SqlxMetadataStore::in_memory().await.unwrap();
        let id = JobId::from("v1");
        store.create_asset(&asset("v1")).await.unwrap();
        store.upsert_rendition(&rendition("v1", 360, 800_000)).await.unwrap();

        assert!(store.delete_asset(&id).await.unwrap());
        assert!(!store.delete_asset(&id).await.unwrap());
        assert!(store.get_asset(&id).await.unwrap().is_none());
        assert!(store.list_renditions(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_assets_newest_first() {
        let store = SqlxMetadataStore::in_memory().await.unwrap();
        let mut older = asset("old");
        older.created_at = Utc::now() - chrono::Duration::hours(1);
        store.create_asset(&older).await.unwrap();
        store.create_asset(&asset("new")).await.unwrap();

        let ids: Vec<String> = store
            .list_assets(10, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.id.to_string())
            .collect();
        assert_eq!(ids, vec!["new", "old"]);

        assert_eq!(store.list_assets(1, 1).await.unwrap()[0].id.as_str(), "old");
    }
}
