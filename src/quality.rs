//! Data quality scoring
//!
//! Pure, deterministic assessment of an observation batch: completeness
//! against the expected reporting periods, outlier detection against the
//! trailing mean, freshness of the latest point. The validator never
//! reads the clock; callers pass `as_of`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::db::sqlite::models::Frequency;
use crate::normalize::ObservationDraft;
use crate::sources::DateRange;

/// Thresholds and weights for quality scoring. Constructed once from
/// `CollectorConfig`; no process-wide state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Minimum score for `is_validated`
    pub quality_threshold: f64,
    /// Standard deviations from the trailing mean before a point is
    /// flagged as an outlier
    pub outlier_threshold: f64,
    /// Minimum sample size for outlier detection
    pub min_data_points: usize,
    pub completeness_weight: f64,
    pub outlier_weight: f64,
    pub freshness_weight: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            quality_threshold: 0.80,
            outlier_threshold: 2.5,
            min_data_points: 24,
            completeness_weight: 0.4,
            outlier_weight: 0.3,
            freshness_weight: 0.3,
        }
    }
}

/// Outcome of one validation pass over one indicator's batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub total_records: usize,
    pub null_count: usize,
    pub outlier_count: usize,
    pub outlier_dates: Vec<NaiveDate>,
    pub completeness: f64,
    pub score: f64,
    pub is_validated: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Scores observation batches for completeness, outliers and freshness
#[derive(Debug, Clone, Copy)]
pub struct QualityValidator {
    cfg: QualityConfig,
}

impl QualityValidator {
    pub fn new(cfg: QualityConfig) -> Self {
        Self { cfg }
    }

    /// Assess one indicator's drafts over the requested range.
    ///
    /// Drafts must be ordered by reference date (the normalizer's
    /// batch output already is). Outliers are flagged, never dropped;
    /// a stale series is capped below the validation threshold no
    /// matter how complete it is.
    pub fn assess(
        &self,
        drafts: &[ObservationDraft],
        null_count: usize,
        frequency: Frequency,
        freshness_limit_days: i64,
        range: DateRange,
        as_of: NaiveDate,
    ) -> QualityReport {
        let mut warnings = Vec::new();
        let errors = Vec::new();

        if drafts.is_empty() {
            warnings.push("no observations in range".to_string());
            return QualityReport {
                total_records: 0,
                null_count,
                outlier_count: 0,
                outlier_dates: Vec::new(),
                completeness: 0.0,
                score: 0.0,
                is_validated: false,
                errors,
                warnings,
            };
        }

        if null_count > 0 {
            warnings.push(format!("{null_count} null value(s) in provider payload"));
        }

        let completeness = self.completeness_component(drafts, frequency, range);
        if completeness < 1.0 {
            warnings.push(format!(
                "incomplete series: {:.0}% of expected periods present",
                completeness * 100.0
            ));
        }

        let (outlier_dates, outlier_component) = self.outlier_component(drafts, &mut warnings);

        let latest = drafts.last().map(|d| d.reference_date).unwrap_or(range.end);
        let age_days = (as_of - latest).num_days();
        let fresh = age_days <= freshness_limit_days;
        let freshness_component = if fresh { 1.0 } else { 0.0 };
        if !fresh {
            warnings.push(format!(
                "stale data: latest point is {age_days} days old (limit {freshness_limit_days})"
            ));
        }

        let mut score = self.cfg.completeness_weight * completeness
            + self.cfg.outlier_weight * outlier_component
            + self.cfg.freshness_weight * freshness_component;

        // A stale series can never validate, whatever the other
        // components say.
        if !fresh {
            score = score.min(self.cfg.quality_threshold - 0.01);
        }

        let score = round2(score.clamp(0.0, 1.0));
        let is_validated = score >= self.cfg.quality_threshold;

        QualityReport {
            total_records: drafts.len(),
            null_count,
            outlier_count: outlier_dates.len(),
            outlier_dates,
            completeness,
            score,
            is_validated,
            errors,
            warnings,
        }
    }

    fn completeness_component(
        &self,
        drafts: &[ObservationDraft],
        frequency: Frequency,
        range: DateRange,
    ) -> f64 {
        let expected = frequency.expected_periods(range.start, range.end);
        if expected == 0 {
            return 1.0;
        }

        let mut keys: Vec<String> = drafts
            .iter()
            .filter(|d| d.reference_date >= range.start && d.reference_date <= range.end)
            .map(|d| frequency.period_key(d.reference_date))
            .collect();
        keys.sort();
        keys.dedup();

        (keys.len() as f64 / expected as f64).min(1.0)
    }

    /// Flag points further than `outlier_threshold` standard deviations
    /// from the trailing mean. Returns the flagged dates and the score
    /// component (fraction of clean records).
    fn outlier_component(
        &self,
        drafts: &[ObservationDraft],
        warnings: &mut Vec<String>,
    ) -> (Vec<NaiveDate>, f64) {
        if drafts.len() < self.cfg.min_data_points {
            warnings.push(format!(
                "insufficient sample for outlier detection: {} < {}",
                drafts.len(),
                self.cfg.min_data_points
            ));
            return (Vec::new(), 1.0);
        }

        let mut outliers = Vec::new();
        for i in 2..drafts.len() {
            let trailing: Vec<f64> = drafts[..i].iter().map(|d| d.value).collect();
            let mean = trailing.iter().sum::<f64>() / trailing.len() as f64;
            let variance = trailing
                .iter()
                .map(|v| (v - mean).powi(2))
                .sum::<f64>()
                / trailing.len() as f64;
            let std_dev = variance.sqrt();
            if std_dev <= f64::EPSILON {
                continue;
            }
            if (drafts[i].value - mean).abs() > self.cfg.outlier_threshold * std_dev {
                outliers.push(drafts[i].reference_date);
            }
        }

        if !outliers.is_empty() {
            warnings.push(format!("{} outlier(s) flagged", outliers.len()));
        }

        let component = 1.0 - outliers.len() as f64 / drafts.len() as f64;
        (outliers, component)
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn draft(date: &str, value: f64) -> ObservationDraft {
        ObservationDraft {
            reference_date: d(date),
            value,
            raw_value: value.to_string(),
        }
    }

    fn daily_range() -> DateRange {
        DateRange {
            start: d("2025-06-01"),
            end: d("2025-06-20"),
        }
    }

    #[test]
    fn test_empty_input_scores_zero_with_warning() {
        let v = QualityValidator::new(QualityConfig::default());
        let report = v.assess(&[], 0, Frequency::Daily, 7, daily_range(), d("2025-06-21"));
        assert_eq!(report.score, 0.0);
        assert!(!report.is_validated);
        assert!(!report.warnings.is_empty());
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_score_is_deterministic() {
        let v = QualityValidator::new(QualityConfig::default());
        let drafts: Vec<_> = (1..=20)
            .map(|i| draft(&format!("2025-06-{i:02}"), 10.0 + (i % 3) as f64 * 0.1))
            .collect();
        let a = v.assess(&drafts, 0, Frequency::Daily, 7, daily_range(), d("2025-06-21"));
        let b = v.assess(&drafts, 0, Frequency::Daily, 7, daily_range(), d("2025-06-21"));
        assert_eq!(a.score, b.score);
        assert_eq!(a.outlier_dates, b.outlier_dates);
    }

    #[test]
    fn test_freshness_cap_blocks_validation() {
        let v = QualityValidator::new(QualityConfig::default());
        // Complete daily series, but the latest point is 10 days old
        // with a 7-day limit.
        let drafts: Vec<_> = (1..=20)
            .map(|i| draft(&format!("2025-06-{i:02}"), 10.0))
            .collect();
        let report = v.assess(&drafts, 0, Frequency::Daily, 7, daily_range(), d("2025-06-30"));
        assert!(report.score < 0.80);
        assert!(!report.is_validated);
    }

    #[test]
    fn test_fresh_complete_series_validates() {
        let v = QualityValidator::new(QualityConfig::default());
        let drafts: Vec<_> = (1..=20)
            .map(|i| draft(&format!("2025-06-{i:02}"), 10.0 + (i % 2) as f64 * 0.05))
            .collect();
        let report = v.assess(&drafts, 0, Frequency::Daily, 7, daily_range(), d("2025-06-21"));
        assert_eq!(report.score, 1.0);
        assert!(report.is_validated);
    }

    #[test]
    fn test_selic_gap_and_spike_scenario() {
        // 19 daily points for 2025-06-01..2025-06-20 with a gap on the
        // 10th and a 10-sigma spike on the 15th.
        let cfg = QualityConfig {
            min_data_points: 10,
            ..QualityConfig::default()
        };
        let v = QualityValidator::new(cfg);

        let mut drafts = Vec::new();
        for i in 1..=20u32 {
            if i == 10 {
                continue;
            }
            let value = if i == 15 {
                50.0
            } else {
                10.65 + (i % 4) as f64 * 0.01
            };
            drafts.push(draft(&format!("2025-06-{i:02}"), value));
        }

        let report = v.assess(&drafts, 0, Frequency::Daily, 7, daily_range(), d("2025-06-21"));

        assert_eq!(report.total_records, 19);
        assert!((report.completeness - 19.0 / 20.0).abs() < 1e-9);
        assert_eq!(report.outlier_count, 1);
        assert!(report.outlier_dates.contains(&d("2025-06-15")));
        assert!(report.score < 1.0);
    }

    #[test]
    fn test_small_sample_skips_outlier_detection() {
        let v = QualityValidator::new(QualityConfig::default());
        let drafts = vec![
            draft("2025-06-18", 10.0),
            draft("2025-06-19", 10.0),
            draft("2025-06-20", 500.0),
        ];
        let range = DateRange {
            start: d("2025-06-18"),
            end: d("2025-06-20"),
        };
        let report = v.assess(&drafts, 0, Frequency::Daily, 7, range, d("2025-06-21"));
        assert_eq!(report.outlier_count, 0);
        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("insufficient sample")));
        // Completeness and freshness still computed.
        assert_eq!(report.completeness, 1.0);
        assert!(report.is_validated);
    }

    #[test]
    fn test_score_rounded_to_two_decimals() {
        let v = QualityValidator::new(QualityConfig {
            min_data_points: 30,
            ..QualityConfig::default()
        });
        let drafts: Vec<_> = (1..=19)
            .filter(|i| *i != 10)
            .map(|i| draft(&format!("2025-06-{i:02}"), 10.0))
            .collect();
        let range = DateRange {
            start: d("2025-06-01"),
            end: d("2025-06-19"),
        };
        let report = v.assess(&drafts, 0, Frequency::Daily, 7, range, d("2025-06-20"));
        let scaled = report.score * 100.0;
        assert!((scaled - scaled.round()).abs() < 1e-9);
    }
}
