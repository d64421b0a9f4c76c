//! Payload normalization
//!
//! Converts raw provider points into canonical observation drafts:
//! locale-aware decimal parsing, multi-format date parsing, original
//! text retained verbatim for audit.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Numeric locale declared by a provider. Decides which characters are
/// thousands separators and which is the decimal mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValueLocale {
    /// "1.234,56" - dot thousands, comma decimal
    PtBr,
    /// "1,234.56" - comma thousands, dot decimal
    EnUs,
}

impl ValueLocale {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueLocale::PtBr => "pt-br",
            ValueLocale::EnUs => "en-us",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pt-br" => Ok(ValueLocale::PtBr),
            "en-us" => Ok(ValueLocale::EnUs),
            other => Err(AppError::Config(format!("unknown value locale: {other}"))),
        }
    }
}

/// Raw time-series point as returned by a source adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPoint {
    pub date: String,
    pub value: String,
}

/// Canonical draft of an observation, pre-storage
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationDraft {
    pub reference_date: NaiveDate,
    pub value: f64,
    pub raw_value: String,
}

/// Result of normalizing a whole provider batch. Points with an empty
/// value token are tolerated (providers publish placeholder rows ahead
/// of release) and surface in `null_count`; anything else malformed is
/// a hard error.
#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub drafts: Vec<ObservationDraft>,
    pub null_count: usize,
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y"];

/// Converts provider payload points into observation drafts
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    locale: ValueLocale,
}

impl Normalizer {
    pub fn new(locale: ValueLocale) -> Self {
        Self { locale }
    }

    /// Normalize one point. `Ok(None)` means the provider sent an
    /// empty value token; the caller counts it as a null.
    pub fn normalize_point(&self, raw: &RawPoint) -> Result<Option<ObservationDraft>> {
        let date_token = raw.date.trim();
        if date_token.is_empty() {
            return Err(AppError::Normalization(format!(
                "missing date token (value {:?})",
                raw.value
            )));
        }

        let reference_date = parse_date(date_token)?;

        let value_token = raw.value.trim();
        if value_token.is_empty() {
            return Ok(None);
        }

        let value = parse_decimal(value_token, self.locale)?;
        Ok(Some(ObservationDraft {
            reference_date,
            value,
            raw_value: raw.value.clone(),
        }))
    }

    /// Normalize a batch, sorted ascending by date. Within a batch the
    /// last point for a date wins, matching the store's upsert.
    pub fn normalize_batch(&self, points: &[RawPoint]) -> Result<NormalizedBatch> {
        let mut batch = NormalizedBatch::default();
        for point in points {
            match self.normalize_point(point)? {
                Some(draft) => batch.drafts.push(draft),
                None => batch.null_count += 1,
            }
        }

        batch.drafts.sort_by_key(|d| d.reference_date);
        batch
            .drafts
            .dedup_by(|later, earlier| {
                if later.reference_date == earlier.reference_date {
                    std::mem::swap(later, earlier);
                    true
                } else {
                    false
                }
            });

        Ok(batch)
    }
}

/// Parse a date token in any of the accepted provider formats,
/// including SIDRA's YYYYMM and YYYY period codes.
fn parse_date(token: &str) -> Result<NaiveDate> {
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(token, fmt) {
            return Ok(date);
        }
    }

    // Period codes resolve to the first day of the period.
    if token.len() == 6 && token.chars().all(|c| c.is_ascii_digit()) {
        let year: i32 = token[..4].parse().unwrap_or(0);
        let month: u32 = token[4..].parse().unwrap_or(0);
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, 1) {
            return Ok(date);
        }
    }
    if token.len() == 4 && token.chars().all(|c| c.is_ascii_digit()) {
        let year: i32 = token.parse().unwrap_or(0);
        if let Some(date) = NaiveDate::from_ymd_opt(year, 1, 1) {
            return Ok(date);
        }
    }

    Err(AppError::Normalization(format!("unparseable date: {token:?}")))
}

/// Parse a decimal according to the provider locale. A malformed value
/// never silently becomes zero; it fails with the input retained.
fn parse_decimal(token: &str, locale: ValueLocale) -> Result<f64> {
    let canonical = match locale {
        // With a comma present, dots are thousands separators. Without
        // one, a single dot is a decimal point: providers hand JSON
        // numbers through as canonical dot-decimal strings.
        ValueLocale::PtBr => {
            if token.contains(',') {
                token.replace('.', "").replace(',', ".")
            } else if token.matches('.').count() > 1 {
                token.replace('.', "")
            } else {
                token.to_string()
            }
        }
        ValueLocale::EnUs => token.replace(',', ""),
    };

    let value: f64 = canonical
        .parse()
        .map_err(|_| AppError::Normalization(format!("non-numeric value: {token:?}")))?;

    if !value.is_finite() {
        return Err(AppError::Normalization(format!("non-finite value: {token:?}")));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn point(date: &str, value: &str) -> RawPoint {
        RawPoint {
            date: date.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn test_pt_br_decimal_separators() {
        let n = Normalizer::new(ValueLocale::PtBr);
        let draft = n
            .normalize_point(&point("01/06/2025", "1.234,56"))
            .unwrap()
            .unwrap();
        assert_eq!(draft.value, 1234.56);
        assert_eq!(draft.raw_value, "1.234,56");
        assert_eq!(draft.reference_date, d("2025-06-01"));
    }

    #[test]
    fn test_pt_br_passes_canonical_json_numbers_through() {
        let n = Normalizer::new(ValueLocale::PtBr);
        let draft = n
            .normalize_point(&point("2025-06-30", "-8.1"))
            .unwrap()
            .unwrap();
        assert_eq!(draft.value, -8.1);

        let draft = n
            .normalize_point(&point("2025-06-30", "1.234.567"))
            .unwrap()
            .unwrap();
        assert_eq!(draft.value, 1_234_567.0);
    }

    #[test]
    fn test_en_us_thousands_separator() {
        let n = Normalizer::new(ValueLocale::EnUs);
        let draft = n
            .normalize_point(&point("2025-06-01", "1,234.56"))
            .unwrap()
            .unwrap();
        assert_eq!(draft.value, 1234.56);
    }

    #[test]
    fn test_malformed_value_fails_with_input_retained() {
        let n = Normalizer::new(ValueLocale::PtBr);
        let err = n.normalize_point(&point("2025-06-01", "n/d")).unwrap_err();
        assert!(err.to_string().contains("n/d"), "offending input missing: {err}");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_empty_value_counts_as_null() {
        let n = Normalizer::new(ValueLocale::PtBr);
        let batch = n
            .normalize_batch(&[point("2025-06-01", "1,0"), point("2025-06-02", "")])
            .unwrap();
        assert_eq!(batch.drafts.len(), 1);
        assert_eq!(batch.null_count, 1);
    }

    #[test]
    fn test_sidra_period_codes() {
        assert_eq!(parse_date("202506").unwrap(), d("2025-06-01"));
        assert_eq!(parse_date("2024").unwrap(), d("2024-01-01"));
        assert!(parse_date("202513").is_err());
    }

    #[test]
    fn test_batch_sorted_and_last_write_wins_per_date() {
        let n = Normalizer::new(ValueLocale::PtBr);
        let batch = n
            .normalize_batch(&[
                point("03/06/2025", "3,0"),
                point("01/06/2025", "1,0"),
                point("03/06/2025", "3,5"),
            ])
            .unwrap();
        let dates: Vec<_> = batch.drafts.iter().map(|d| d.reference_date).collect();
        assert_eq!(dates, vec![d("2025-06-01"), d("2025-06-03")]);
        assert_eq!(batch.drafts[1].value, 3.5);
    }

    #[test]
    fn test_missing_date_is_an_error() {
        let n = Normalizer::new(ValueLocale::PtBr);
        assert!(n.normalize_point(&point("", "1,0")).is_err());
    }
}
