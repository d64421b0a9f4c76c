//! Validation-only pass
//!
//! Re-scores observations already in the store without touching the
//! network: per indicator, load the stored range, assess it, write a
//! quality log and stamp the result back onto the rows. The pass is
//! recorded in run history under the `validate` operation.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::config::CollectorConfig;
use crate::db::sqlite::models::{Indicator, RunOperation, RunStatus};
use crate::db::sqlite::{RunOutcome, SqliteDb};
use crate::error::Result;
use crate::normalize::ObservationDraft;
use crate::quality::QualityValidator;
use crate::sources::DateRange;

/// Result of one indicator's re-validation
#[derive(Debug, Clone)]
pub struct IndicatorQuality {
    pub code: String,
    pub records: usize,
    pub score: f64,
    pub is_validated: bool,
}

/// Aggregated result of a validation pass
#[derive(Debug, Clone)]
pub struct ValidationSummary {
    pub run_id: String,
    pub overall_score: f64,
    pub passed: bool,
    pub per_indicator: Vec<IndicatorQuality>,
}

/// Re-validates stored observations against the quality policy
pub struct ValidationService {
    db: Arc<SqliteDb>,
    config: CollectorConfig,
}

impl ValidationService {
    pub fn new(db: Arc<SqliteDb>, config: CollectorConfig) -> Self {
        Self { db, config }
    }

    /// Validate every active indicator over the given range (or the
    /// configured lookback).
    pub fn validate_all(&self, range: Option<DateRange>) -> Result<ValidationSummary> {
        let targets: Vec<Indicator> = self
            .db
            .active_indicators()?
            .into_iter()
            .map(|(indicator, _)| indicator)
            .collect();
        self.run(targets, range)
    }

    /// Validate a single indicator by code
    pub fn validate_one(&self, code: &str, range: Option<DateRange>) -> Result<ValidationSummary> {
        let (indicator, _) = self.db.indicator_by_code(code)?;
        self.run(vec![indicator], range)
    }

    fn run(&self, targets: Vec<Indicator>, range: Option<DateRange>) -> Result<ValidationSummary> {
        let as_of = Utc::now().date_naive();
        let range =
            range.unwrap_or_else(|| DateRange::trailing_days(as_of, self.config.default_lookback_days));

        let run_id = Uuid::new_v4().to_string();
        let db_run_id = self.db.start_run(
            &run_id,
            RunOperation::Validate,
            targets.len() as i64,
            Utc::now(),
        )?;
        info!(run = %run_id, indicators = targets.len(), %range, "Validation pass started");

        let validator = QualityValidator::new(self.config.quality());
        let mut per_indicator = Vec::with_capacity(targets.len());
        let mut records_inspected = 0usize;

        for indicator in &targets {
            let stored = self.db.observations_for_range(indicator.id, range)?;
            let drafts: Vec<ObservationDraft> = stored
                .iter()
                .map(|o| ObservationDraft {
                    reference_date: o.reference_date,
                    value: o.value,
                    raw_value: o.raw_value.clone(),
                })
                .collect();

            let report = validator.assess(
                &drafts,
                0,
                indicator.frequency,
                indicator.freshness_limit_days,
                range,
                as_of,
            );

            self.db
                .insert_quality_log(indicator.id, Utc::now(), &report)?;
            self.db
                .apply_quality(indicator.id, range, report.score, report.is_validated)?;

            records_inspected += report.total_records;
            info!(
                indicator = %indicator.code,
                records = report.total_records,
                score = report.score,
                validated = report.is_validated,
                "Indicator validated"
            );
            per_indicator.push(IndicatorQuality {
                code: indicator.code.clone(),
                records: report.total_records,
                score: report.score,
                is_validated: report.is_validated,
            });
        }

        let overall_score = if per_indicator.is_empty() {
            0.0
        } else {
            let sum: f64 = per_indicator.iter().map(|q| q.score).sum();
            sum / per_indicator.len() as f64
        };
        let passed = overall_score >= self.config.quality_threshold;
        let validated = per_indicator.iter().filter(|q| q.is_validated).count();

        let outcome = RunOutcome {
            status: RunStatus::Completed,
            successful_indicators: validated as i64,
            failed_indicators: (per_indicator.len() - validated) as i64,
            total_observations: records_inspected as i64,
            error_message: None,
            execution_metadata: Some(serde_json::json!({
                "range": range.to_string(),
                "overall_score": overall_score,
            })),
        };
        self.db.finish_run(db_run_id, Utc::now(), &outcome)?;

        info!(
            run = %run_id,
            overall_score,
            passed,
            "Validation pass finished"
        );

        Ok(ValidationSummary {
            run_id,
            overall_score,
            passed,
            per_indicator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::models::NewObservation;
    use chrono::NaiveDate;

    fn seed_daily(db: &SqliteDb, code: &str, days: i64) -> i64 {
        let (indicator, _) = db.indicator_by_code(code).unwrap();
        let today = Utc::now().date_naive();
        let batch: Vec<NewObservation> = (0..days)
            .map(|i| NewObservation {
                indicator_id: indicator.id,
                reference_date: today - chrono::Duration::days(i),
                value: 10.0 + (i % 3) as f64 * 0.1,
                raw_value: "10,0".to_string(),
                collection_timestamp: Utc::now(),
                quality_score: 0.0,
                is_validated: false,
                notes: None,
            })
            .collect();
        db.upsert_observations(&batch).unwrap();
        indicator.id
    }

    #[test]
    fn test_revalidation_updates_rows_and_logs() {
        let db = Arc::new(SqliteDb::new_in_memory().unwrap());
        let indicator_id = seed_daily(&db, "selic", 30);

        let today = Utc::now().date_naive();
        let range = DateRange {
            start: today - chrono::Duration::days(29),
            end: today,
        };
        let service = ValidationService::new(Arc::clone(&db), CollectorConfig::default());
        let summary = service.validate_one("selic", Some(range)).unwrap();

        assert_eq!(summary.per_indicator.len(), 1);
        let quality = &summary.per_indicator[0];
        assert_eq!(quality.records, 30);
        assert!(quality.is_validated, "fresh complete series should pass");

        // Stored rows were stamped with the new score.
        let stored = db.observations_for_range(indicator_id, range).unwrap();
        assert!(stored.iter().all(|o| o.is_validated));
        assert!(stored.iter().all(|o| o.quality_score == quality.score));

        let logs = db.quality_logs_for(indicator_id, 10).unwrap();
        assert_eq!(logs.len(), 1);

        // Run history carries the validate operation tag.
        let run = db.recent_runs(1).unwrap().remove(0);
        assert_eq!(run.operation, RunOperation::Validate);
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[test]
    fn test_empty_store_scores_zero_without_failing() {
        let db = Arc::new(SqliteDb::new_in_memory().unwrap());
        let service = ValidationService::new(Arc::clone(&db), CollectorConfig::default());

        let today = Utc::now().date_naive();
        let range = DateRange {
            start: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            end: today,
        };
        let summary = service.validate_one("selic", Some(range)).unwrap();
        assert_eq!(summary.per_indicator[0].score, 0.0);
        assert!(!summary.passed);
    }
}
