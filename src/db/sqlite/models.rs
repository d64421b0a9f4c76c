//! SQLite database models

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::normalize::ValueLocale;

/// Reporting frequency of an indicator series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Annual,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Quarterly => "quarterly",
            Frequency::Annual => "annual",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            "quarterly" => Ok(Frequency::Quarterly),
            "annual" => Ok(Frequency::Annual),
            other => Err(AppError::Config(format!("unknown frequency: {other}"))),
        }
    }

    /// Number of reporting periods expected between two dates, inclusive.
    pub fn expected_periods(&self, start: NaiveDate, end: NaiveDate) -> usize {
        if end < start {
            return 0;
        }
        let days = (end - start).num_days();
        match self {
            Frequency::Daily => days as usize + 1,
            Frequency::Weekly => days as usize / 7 + 1,
            Frequency::Monthly => {
                let months = (end.year() - start.year()) * 12
                    + (end.month() as i32 - start.month() as i32);
                months as usize + 1
            }
            Frequency::Quarterly => {
                let q = |d: NaiveDate| d.year() * 4 + (d.month() as i32 - 1) / 3;
                (q(end) - q(start)) as usize + 1
            }
            Frequency::Annual => (end.year() - start.year()) as usize + 1,
        }
    }

    /// Bucket identity used when counting distinct periods present.
    pub fn period_key(&self, date: NaiveDate) -> String {
        match self {
            Frequency::Daily => date.format("%Y-%m-%d").to_string(),
            Frequency::Weekly => {
                let week = date.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            Frequency::Monthly => date.format("%Y-%m").to_string(),
            Frequency::Quarterly => {
                format!("{}-Q{}", date.year(), (date.month() - 1) / 3 + 1)
            }
            Frequency::Annual => date.format("%Y").to_string(),
        }
    }
}

/// Data provider (BCB, IBGE, Tesouro Nacional)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub base_url: String,
    pub value_locale: ValueLocale,
    /// Per-source HTTP timeout override; the global default applies
    /// when unset
    pub timeout_secs: Option<i64>,
    pub created_at: String,
}

/// Economic indicator series. Reference data, created at setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Indicator {
    pub id: i64,
    pub source_id: i64,
    pub code: String,
    pub name: String,
    pub unit: String,
    pub frequency: Frequency,
    /// Provider-side series identifier (SGS code, SIDRA path, ...)
    pub external_code: String,
    /// Max acceptable age in days of the latest data point
    pub freshness_limit_days: i64,
    pub is_active: bool,
    pub created_at: String,
}

/// One dated scalar measurement for an indicator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: i64,
    pub indicator_id: i64,
    pub reference_date: NaiveDate,
    pub value: f64,
    /// Original provider text, retained verbatim for audit
    pub raw_value: String,
    pub collection_timestamp: DateTime<Utc>,
    pub quality_score: f64,
    pub is_validated: bool,
    pub notes: Option<String>,
    pub created_at: String,
}

/// Observation payload for the upsert path (id and creation time are
/// owned by the store).
#[derive(Debug, Clone)]
pub struct NewObservation {
    pub indicator_id: i64,
    pub reference_date: NaiveDate,
    pub value: f64,
    pub raw_value: String,
    pub collection_timestamp: DateTime<Utc>,
    pub quality_score: f64,
    pub is_validated: bool,
    pub notes: Option<String>,
}

/// Run lifecycle: `running` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(AppError::Internal(format!("unknown run status: {other}"))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// What a run-history entry records. Collection and maintenance share
/// the history table; the operation tag keeps them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOperation {
    Collect,
    Validate,
    Cleanup,
}

impl RunOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOperation::Collect => "collect",
            RunOperation::Validate => "validate",
            RunOperation::Cleanup => "cleanup",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "collect" => Ok(RunOperation::Collect),
            "validate" => Ok(RunOperation::Validate),
            "cleanup" => Ok(RunOperation::Cleanup),
            other => Err(AppError::Internal(format!("unknown run operation: {other}"))),
        }
    }
}

/// One execution of the pipeline across a set of indicators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionRun {
    pub id: i64,
    pub run_id: String,
    pub operation: RunOperation,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_indicators: i64,
    pub successful_indicators: i64,
    pub failed_indicators: i64,
    pub total_observations: i64,
    pub error_message: Option<String>,
    pub execution_metadata: Option<serde_json::Value>,
}

/// Immutable snapshot of one validation pass over one indicator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityLog {
    pub id: i64,
    pub indicator_id: i64,
    pub checked_at: DateTime<Utc>,
    pub total_records: i64,
    pub null_count: i64,
    pub outlier_count: i64,
    pub quality_score: f64,
    pub is_validated: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub outlier_dates: Vec<NaiveDate>,
}

/// Latest observation per indicator, for the dashboard projection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestObservation {
    pub indicator_code: String,
    pub indicator_name: String,
    pub unit: String,
    pub reference_date: NaiveDate,
    pub value: f64,
    pub quality_score: f64,
    pub is_validated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_expected_periods_daily() {
        assert_eq!(
            Frequency::Daily.expected_periods(d("2025-06-01"), d("2025-06-20")),
            20
        );
        assert_eq!(Frequency::Daily.expected_periods(d("2025-06-01"), d("2025-06-01")), 1);
    }

    #[test]
    fn test_expected_periods_monthly_across_years() {
        assert_eq!(
            Frequency::Monthly.expected_periods(d("2024-11-15"), d("2025-02-01")),
            4
        );
    }

    #[test]
    fn test_expected_periods_quarterly() {
        assert_eq!(
            Frequency::Quarterly.expected_periods(d("2024-01-01"), d("2024-12-31")),
            4
        );
    }

    #[test]
    fn test_period_key_buckets() {
        assert_eq!(Frequency::Monthly.period_key(d("2025-06-10")), "2025-06");
        assert_eq!(Frequency::Quarterly.period_key(d("2025-05-01")), "2025-Q2");
        assert_eq!(Frequency::Annual.period_key(d("2025-01-31")), "2025");
    }

    #[test]
    fn test_status_round_trip() {
        for s in [
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            assert_eq!(RunStatus::parse(s.as_str()).unwrap(), s);
        }
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }
}
