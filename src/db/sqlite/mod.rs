//! SQLite database module

pub mod models;
mod connection;
mod migrations;
mod indicators;
mod observations;
mod runs;
mod quality_logs;
pub mod configuration;

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;

use crate::error::Result;
use crate::quality::QualityReport;
use crate::sources::DateRange;
use configuration::ConfigValue;
use models::{
    CollectionRun, Indicator, LatestObservation, NewObservation, Observation, QualityLog,
    RunOperation, Source,
};
pub use runs::RunOutcome;

/// SQLite database facade. Owns the connection pool; collection
/// workers share it across tasks.
pub struct SqliteDb {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteDb {
    /// Open (or create) the database file and run migrations
    pub fn new(path: &Path, pool_size: u32) -> Result<Self> {
        let pool = connection::create_pool(path, pool_size)?;
        let db = Self { pool };
        db.run_migrations()?;
        Ok(db)
    }

    /// In-memory database, used by tests
    pub fn new_in_memory() -> Result<Self> {
        let pool = connection::create_memory_pool()?;
        let db = Self { pool };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;
        migrations::run_migrations(&conn)
    }

    // ========== Indicator Methods ==========

    /// All configured sources
    pub fn sources(&self) -> Result<Vec<Source>> {
        let conn = self.conn()?;
        indicators::list_sources(&conn)
    }

    /// All active indicators with their sources
    pub fn active_indicators(&self) -> Result<Vec<(Indicator, Source)>> {
        let conn = self.conn()?;
        indicators::list_active(&conn)
    }

    /// Look up one indicator by code
    pub fn indicator_by_code(&self, code: &str) -> Result<(Indicator, Source)> {
        let conn = self.conn()?;
        indicators::get_by_code(&conn, code)
    }

    // ========== Observation Methods ==========

    /// Upsert a batch of observations in one transaction
    pub fn upsert_observations(&self, batch: &[NewObservation]) -> Result<usize> {
        let mut conn = self.conn()?;
        observations::upsert_batch(&mut conn, batch)
    }

    /// Latest observation for an indicator code, or `NotFound`
    pub fn latest_observation(&self, indicator_code: &str) -> Result<Observation> {
        let conn = self.conn()?;
        let (indicator, _) = indicators::get_by_code(&conn, indicator_code)?;
        observations::latest(&conn, indicator.id)
    }

    /// Stored observations for an indicator in a date range
    pub fn observations_for_range(
        &self,
        indicator_id: i64,
        range: DateRange,
    ) -> Result<Vec<Observation>> {
        let conn = self.conn()?;
        observations::for_range(&conn, indicator_id, range)
    }

    /// Stamp a validation result onto stored rows
    pub fn apply_quality(
        &self,
        indicator_id: i64,
        range: DateRange,
        quality_score: f64,
        is_validated: bool,
    ) -> Result<usize> {
        let conn = self.conn()?;
        observations::apply_quality(&conn, indicator_id, range, quality_score, is_validated)
    }

    /// Delete observations created before the cutoff
    pub fn purge_observations_created_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        observations::purge_created_before(&conn, cutoff)
    }

    /// Latest observation per indicator (dashboard projection)
    pub fn latest_per_indicator(&self) -> Result<Vec<LatestObservation>> {
        let conn = self.conn()?;
        observations::latest_per_indicator(&conn)
    }

    // ========== Run Tracker Methods ==========

    /// Open a run record in `running` state, returning its row id
    pub fn start_run(
        &self,
        run_id: &str,
        operation: RunOperation,
        total_indicators: i64,
        start_time: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        runs::start(&conn, run_id, operation, total_indicators, start_time)
    }

    /// Move a run to its terminal state
    pub fn finish_run(&self, id: i64, end_time: DateTime<Utc>, outcome: &RunOutcome) -> Result<()> {
        let conn = self.conn()?;
        runs::finish(&conn, id, end_time, outcome)
    }

    pub fn get_run(&self, id: i64) -> Result<CollectionRun> {
        let conn = self.conn()?;
        runs::get(&conn, id)
    }

    pub fn recent_runs(&self, limit: i64) -> Result<Vec<CollectionRun>> {
        let conn = self.conn()?;
        runs::recent(&conn, limit)
    }

    // ========== Quality Log Methods ==========

    /// Record a validation pass for an indicator
    pub fn insert_quality_log(
        &self,
        indicator_id: i64,
        checked_at: DateTime<Utc>,
        report: &QualityReport,
    ) -> Result<i64> {
        let conn = self.conn()?;
        quality_logs::insert(&conn, indicator_id, checked_at, report)
    }

    /// Latest quality snapshot per indicator code
    pub fn quality_summary(&self) -> Result<Vec<(String, QualityLog)>> {
        let conn = self.conn()?;
        quality_logs::latest_per_indicator(&conn)
    }

    /// Quality log history for one indicator
    pub fn quality_logs_for(&self, indicator_id: i64, limit: i64) -> Result<Vec<QualityLog>> {
        let conn = self.conn()?;
        quality_logs::for_indicator(&conn, indicator_id, limit)
    }

    // ========== Configuration Methods ==========

    pub fn get_config(&self, key: &str) -> Result<Option<ConfigValue>> {
        let conn = self.conn()?;
        configuration::get(&conn, key)
    }

    pub fn set_config(&self, key: &str, value: &ConfigValue) -> Result<()> {
        let conn = self.conn()?;
        configuration::set(&conn, key, value)
    }

    pub fn all_config(&self) -> Result<Vec<(String, ConfigValue)>> {
        let conn = self.conn()?;
        configuration::all(&conn)
    }

    // ========== Test Support ==========

    /// Backdate created_at on an indicator's observations, so tests
    /// can exercise retention cutoffs.
    #[cfg(test)]
    pub fn backdate_observations(&self, indicator_id: i64, stamp: &str) -> Result<usize> {
        let conn = self.conn()?;
        observations::backdate_created_at(&conn, indicator_id, stamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn obs(indicator_id: i64, date: &str, value: f64, raw: &str) -> NewObservation {
        NewObservation {
            indicator_id,
            reference_date: d(date),
            value,
            raw_value: raw.to_string(),
            collection_timestamp: Utc::now(),
            quality_score: 0.9,
            is_validated: true,
            notes: None,
        }
    }

    fn selic_id(db: &SqliteDb) -> i64 {
        db.indicator_by_code("selic").unwrap().0.id
    }

    #[test]
    fn test_seeded_catalog_present() {
        let db = SqliteDb::new_in_memory().unwrap();
        let active = db.active_indicators().unwrap();
        assert!(active.len() >= 6);
        let (selic, source) = db.indicator_by_code("selic").unwrap();
        assert_eq!(selic.external_code, "11");
        assert_eq!(source.code, "bcb");
    }

    #[test]
    fn test_upsert_converges_to_latest_value() {
        let db = SqliteDb::new_in_memory().unwrap();
        let id = selic_id(&db);

        db.upsert_observations(&[obs(id, "2025-06-01", 10.5, "10,50")])
            .unwrap();
        let first = db.latest_observation("selic").unwrap();

        // Same key, different value: must replace, not duplicate.
        db.upsert_observations(&[obs(id, "2025-06-01", 10.75, "10,75")])
            .unwrap();
        db.upsert_observations(&[obs(id, "2025-06-01", 10.75, "10,75")])
            .unwrap();

        let range = DateRange {
            start: d("2025-06-01"),
            end: d("2025-06-30"),
        };
        let stored = db.observations_for_range(id, range).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].value, 10.75);
        assert_eq!(stored[0].raw_value, "10,75");
        // Row identity and creation time survive the replacement.
        assert_eq!(stored[0].id, first.id);
        assert_eq!(stored[0].created_at, first.created_at);
    }

    #[test]
    fn test_latest_observation_not_found() {
        let db = SqliteDb::new_in_memory().unwrap();
        let err = db.latest_observation("selic").unwrap_err();
        assert!(matches!(err, crate::error::AppError::NotFound(_)));
    }

    #[test]
    fn test_latest_picks_max_reference_date() {
        let db = SqliteDb::new_in_memory().unwrap();
        let id = selic_id(&db);
        db.upsert_observations(&[
            obs(id, "2025-06-02", 10.6, "10,60"),
            obs(id, "2025-06-01", 10.5, "10,50"),
        ])
        .unwrap();
        let latest = db.latest_observation("selic").unwrap();
        assert_eq!(latest.reference_date, d("2025-06-02"));
    }

    #[test]
    fn test_purge_twice_deletes_then_zero() {
        let db = SqliteDb::new_in_memory().unwrap();
        let id = selic_id(&db);
        db.upsert_observations(&[obs(id, "2018-01-01", 6.5, "6,50")])
            .unwrap();
        db.backdate_observations(id, "2018-01-01 00:00:00").unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(2555);
        let deleted = db.purge_observations_created_before(cutoff).unwrap();
        assert_eq!(deleted, 1);
        let deleted_again = db.purge_observations_created_before(cutoff).unwrap();
        assert_eq!(deleted_again, 0);
    }

    #[test]
    fn test_run_lifecycle_and_terminal_finality() {
        let db = SqliteDb::new_in_memory().unwrap();
        let started = Utc::now();
        let id = db
            .start_run("run-1", RunOperation::Collect, 7, started)
            .unwrap();

        let run = db.get_run(id).unwrap();
        assert_eq!(run.status, models::RunStatus::Running);
        assert!(run.end_time.is_none());

        let outcome = RunOutcome {
            status: models::RunStatus::Completed,
            successful_indicators: 5,
            failed_indicators: 2,
            total_observations: 120,
            error_message: Some("selic: timeout; ipca: timeout".to_string()),
            execution_metadata: None,
        };
        db.finish_run(id, Utc::now(), &outcome).unwrap();

        let run = db.get_run(id).unwrap();
        assert_eq!(run.status, models::RunStatus::Completed);
        assert_eq!(run.successful_indicators, 5);
        assert_eq!(run.failed_indicators, 2);
        assert!(run.end_time.is_some());

        // Completed history is append-only: a second transition fails.
        assert!(db.finish_run(id, Utc::now(), &outcome).is_err());
    }

    #[test]
    fn test_config_round_trip_and_type_mismatch() {
        let db = SqliteDb::new_in_memory().unwrap();
        db.set_config("max_retry_attempts", &ConfigValue::Integer(5))
            .unwrap();
        db.set_config("enable_parallel_collection", &ConfigValue::Boolean(false))
            .unwrap();

        assert_eq!(
            db.get_config("max_retry_attempts").unwrap(),
            Some(ConfigValue::Integer(5))
        );
        assert_eq!(
            db.get_config("enable_parallel_collection")
                .unwrap()
                .and_then(|v| v.as_boolean()),
            Some(false)
        );
        assert_eq!(db.get_config("missing").unwrap(), None);
    }

    #[test]
    fn test_quality_log_summary() {
        let db = SqliteDb::new_in_memory().unwrap();
        let id = selic_id(&db);
        let report = QualityReport {
            total_records: 20,
            null_count: 0,
            outlier_count: 1,
            outlier_dates: vec![d("2025-06-15")],
            completeness: 0.95,
            score: 0.96,
            is_validated: true,
            errors: vec![],
            warnings: vec!["1 outlier(s) flagged".to_string()],
        };
        db.insert_quality_log(id, Utc::now(), &report).unwrap();

        let summary = db.quality_summary().unwrap();
        let (code, log) = summary
            .iter()
            .find(|(code, _)| code == "selic")
            .expect("selic snapshot");
        assert_eq!(code, "selic");
        assert_eq!(log.outlier_count, 1);
        assert_eq!(log.outlier_dates, vec![d("2025-06-15")]);
        assert_eq!(log.quality_score, 0.96);
    }
}
