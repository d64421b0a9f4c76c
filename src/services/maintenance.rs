//! Maintenance operations
//!
//! Age-based observation purge plus a cache sweep. Not part of the
//! per-run pipeline; each purge writes its own run-history record
//! tagged `cleanup` so deletions never masquerade as collections.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::cache::FetchCache;
use crate::config::CollectorConfig;
use crate::db::sqlite::models::{RunOperation, RunStatus};
use crate::db::sqlite::{RunOutcome, SqliteDb};
use crate::error::Result;

/// Result of one cleanup pass
#[derive(Debug, Clone)]
pub struct CleanupSummary {
    pub run_id: String,
    pub observations_deleted: usize,
    pub cache_entries_dropped: usize,
}

/// Retention purge and cache sweep
pub struct MaintenanceService {
    db: Arc<SqliteDb>,
    cache: Arc<FetchCache>,
    config: CollectorConfig,
}

impl MaintenanceService {
    pub fn new(db: Arc<SqliteDb>, cache: Arc<FetchCache>, config: CollectorConfig) -> Self {
        Self { db, cache, config }
    }

    /// Delete observations created before the retention cutoff.
    /// Returns the count deleted; running it again against the same
    /// cutoff deletes nothing.
    pub fn purge_old_data(&self, retention_days: Option<i64>) -> Result<CleanupSummary> {
        let retention_days = retention_days.unwrap_or(self.config.data_retention_days);
        let cutoff = Utc::now() - chrono::Duration::days(retention_days);

        let run_id = Uuid::new_v4().to_string();
        let db_run_id =
            self.db
                .start_run(&run_id, RunOperation::Cleanup, 0, Utc::now())?;
        info!(run = %run_id, retention_days, %cutoff, "Cleanup started");

        let purged = self.db.purge_observations_created_before(cutoff);
        let (status, deleted, error_message) = match &purged {
            Ok(deleted) => (RunStatus::Completed, *deleted, None),
            Err(e) => (RunStatus::Failed, 0, Some(e.to_string())),
        };

        let cache_entries_dropped = self.cache.purge_expired();

        let outcome = RunOutcome {
            status,
            successful_indicators: 0,
            failed_indicators: 0,
            total_observations: deleted as i64,
            error_message,
            execution_metadata: Some(serde_json::json!({
                "retention_days": retention_days,
                "cutoff": cutoff.to_rfc3339(),
                "cache_entries_dropped": cache_entries_dropped,
            })),
        };
        self.db.finish_run(db_run_id, Utc::now(), &outcome)?;

        let deleted = purged?;
        info!(
            run = %run_id,
            deleted,
            cache_entries_dropped,
            "Cleanup finished"
        );

        Ok(CleanupSummary {
            run_id,
            observations_deleted: deleted,
            cache_entries_dropped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::models::NewObservation;
    use std::time::Duration;

    #[test]
    fn test_purge_records_cleanup_run() {
        let db = Arc::new(SqliteDb::new_in_memory().unwrap());
        let (indicator, _) = db.indicator_by_code("selic").unwrap();
        db.upsert_observations(&[NewObservation {
            indicator_id: indicator.id,
            reference_date: chrono::NaiveDate::from_ymd_opt(2017, 1, 1).unwrap(),
            value: 13.0,
            raw_value: "13,00".to_string(),
            collection_timestamp: Utc::now(),
            quality_score: 0.9,
            is_validated: true,
            notes: None,
        }])
        .unwrap();
        db.backdate_observations(indicator.id, "2017-01-01 12:00:00")
            .unwrap();

        let cache = Arc::new(FetchCache::new(Duration::from_secs(60)));
        let service =
            MaintenanceService::new(Arc::clone(&db), cache, CollectorConfig::default());

        let summary = service.purge_old_data(Some(2555)).unwrap();
        assert_eq!(summary.observations_deleted, 1);

        // Second pass over the same cutoff removes nothing.
        let summary = service.purge_old_data(Some(2555)).unwrap();
        assert_eq!(summary.observations_deleted, 0);

        let runs = db.recent_runs(5).unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs
            .iter()
            .all(|r| r.operation == RunOperation::Cleanup && r.status == RunStatus::Completed));
        // Counts stay non-negative; the operation tag tells deletions
        // apart from collections.
        assert!(runs.iter().all(|r| r.total_observations >= 0));
    }
}
