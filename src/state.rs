use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use sqlx::PgPool;

use crate::config::AppConfig;
use crate::db::build_pool;
use crate::services::storage::BlobStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: Option<PgPool>,
    pub user_role_cache: Cache<String, String>,
    pub blob_store: Option<BlobStore>,
}

impl AppState {
    pub async fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db_pool = build_pool(&config)?;

        let user_role_cache = Cache::builder()
            .max_capacity(config.user_role_cache_max_entries)
            .time_to_live(Duration::from_secs(config.user_role_cache_ttl_seconds))
            .build();

        let blob_store = match config.documents_bucket.as_deref() {
            Some(bucket) => Some(
                BlobStore::connect(bucket, config.documents_public_base_url.as_deref()).await,
            ),
            None => {
                tracing::warn!(
                    "DOCUMENTS_BUCKET is not set; document upload endpoints will be unavailable"
                );
                None
            }
        };

        Ok(Self {
            config: Arc::new(config),
            db_pool,
            user_role_cache,
            blob_store,
        })
    }
}
