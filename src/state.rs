//! Application state wiring

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::FetchCache;
use crate::config::CollectorConfig;
use crate::db::sqlite::SqliteDb;
use crate::error::Result;
use crate::sources::SourceRegistry;

/// Shared application state: the store, the source adapters, the
/// fetch cache and the loaded configuration.
pub struct AppState {
    pub db: Arc<SqliteDb>,
    pub sources: Arc<SourceRegistry>,
    pub cache: Arc<FetchCache>,
    pub config: CollectorConfig,
}

impl AppState {
    /// Open the database, overlay configuration and build the source
    /// registry from the catalog.
    pub fn new(db_path: &Path) -> Result<Self> {
        let defaults = CollectorConfig::default();
        let db = Arc::new(SqliteDb::new(db_path, defaults.db_pool_size)?);
        let config = CollectorConfig::load(&db)?;

        let sources = db.sources()?;
        let registry = SourceRegistry::new(
            &sources,
            Duration::from_secs(config.request_timeout_secs),
        )?;
        let cache = Arc::new(FetchCache::new(Duration::from_secs(config.cache_ttl_seconds)));

        tracing::info!(
            db = %db_path.display(),
            sources = sources.len(),
            "Application state initialized"
        );

        Ok(Self {
            db,
            sources: Arc::new(registry),
            cache,
            config,
        })
    }
}
