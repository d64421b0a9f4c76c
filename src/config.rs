//! Collector configuration
//!
//! Compiled-in defaults overlaid with rows from the configuration
//! table. The resulting struct is handed to each component at
//! construction; nothing reads configuration globally at runtime.

use serde::{Deserialize, Serialize};

use crate::db::sqlite::SqliteDb;
use crate::error::Result;
use crate::quality::QualityConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Minimum quality score for `is_validated`
    pub quality_threshold: f64,
    /// Standard deviations from the trailing mean before a value is
    /// flagged
    pub outlier_threshold: f64,
    /// Minimum sample size for outlier detection
    pub min_data_points: usize,
    pub completeness_weight: f64,
    pub outlier_weight: f64,
    pub freshness_weight: f64,

    /// Transport retries per indicator fetch
    pub max_retry_attempts: u32,
    /// First backoff step; doubles per attempt
    pub retry_base_delay_ms: u64,
    /// Per-request HTTP timeout
    pub request_timeout_secs: u64,

    pub cache_ttl_seconds: u64,
    pub data_retention_days: i64,
    /// How far back a default collection reaches
    pub default_lookback_days: i64,

    pub enable_parallel_collection: bool,
    pub max_parallel_indicators: usize,
    /// SQLite pool size; at least workers + 1
    pub db_pool_size: u32,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            quality_threshold: 0.80,
            outlier_threshold: 2.5,
            min_data_points: 24,
            completeness_weight: 0.4,
            outlier_weight: 0.3,
            freshness_weight: 0.3,
            max_retry_attempts: 3,
            retry_base_delay_ms: 500,
            request_timeout_secs: 30,
            cache_ttl_seconds: 1800,
            data_retention_days: 2555,
            default_lookback_days: 1825,
            enable_parallel_collection: true,
            max_parallel_indicators: 4,
            db_pool_size: 8,
        }
    }
}

impl CollectorConfig {
    /// Defaults overlaid with whatever the configuration table holds.
    /// Unknown keys are ignored; mistyped known keys fail loudly.
    pub fn load(db: &SqliteDb) -> Result<Self> {
        let mut cfg = Self::default();
        for (key, value) in db.all_config()? {
            match key.as_str() {
                "quality_threshold" => {
                    if let Some(v) = number(&value) {
                        cfg.quality_threshold = v;
                    }
                }
                "outlier_threshold" => {
                    if let Some(v) = number(&value) {
                        cfg.outlier_threshold = v;
                    }
                }
                "min_data_points" => {
                    if let Some(v) = value.as_integer() {
                        cfg.min_data_points = v as usize;
                    }
                }
                "max_retry_attempts" => {
                    if let Some(v) = value.as_integer() {
                        cfg.max_retry_attempts = v as u32;
                    }
                }
                "retry_base_delay_ms" => {
                    if let Some(v) = value.as_integer() {
                        cfg.retry_base_delay_ms = v as u64;
                    }
                }
                "request_timeout_secs" => {
                    if let Some(v) = value.as_integer() {
                        cfg.request_timeout_secs = v as u64;
                    }
                }
                "cache_ttl_seconds" => {
                    if let Some(v) = value.as_integer() {
                        cfg.cache_ttl_seconds = v as u64;
                    }
                }
                "data_retention_days" => {
                    if let Some(v) = value.as_integer() {
                        cfg.data_retention_days = v;
                    }
                }
                "default_lookback_days" => {
                    if let Some(v) = value.as_integer() {
                        cfg.default_lookback_days = v;
                    }
                }
                "enable_parallel_collection" => {
                    if let Some(v) = value.as_boolean() {
                        cfg.enable_parallel_collection = v;
                    }
                }
                "max_parallel_indicators" => {
                    if let Some(v) = value.as_integer() {
                        cfg.max_parallel_indicators = v as usize;
                    }
                }
                _ => tracing::debug!("Ignoring unknown configuration key '{}'", key),
            }
        }
        Ok(cfg)
    }

    pub fn quality(&self) -> QualityConfig {
        QualityConfig {
            quality_threshold: self.quality_threshold,
            outlier_threshold: self.outlier_threshold,
            min_data_points: self.min_data_points,
            completeness_weight: self.completeness_weight,
            outlier_weight: self.outlier_weight,
            freshness_weight: self.freshness_weight,
        }
    }
}

fn number(value: &crate::db::sqlite::configuration::ConfigValue) -> Option<f64> {
    use crate::db::sqlite::configuration::ConfigValue;
    match value {
        ConfigValue::Integer(i) => Some(*i as f64),
        ConfigValue::Json(serde_json::Value::Number(n)) => n.as_f64(),
        ConfigValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::configuration::ConfigValue;

    #[test]
    fn test_defaults_match_documented_values() {
        let cfg = CollectorConfig::default();
        assert_eq!(cfg.quality_threshold, 0.80);
        assert_eq!(cfg.outlier_threshold, 2.5);
        assert_eq!(cfg.min_data_points, 24);
        assert_eq!(cfg.max_retry_attempts, 3);
        assert_eq!(cfg.data_retention_days, 2555);
    }

    #[test]
    fn test_load_overlays_table_values() {
        let db = SqliteDb::new_in_memory().unwrap();
        db.set_config("max_retry_attempts", &ConfigValue::Integer(5))
            .unwrap();
        db.set_config(
            "quality_threshold",
            &ConfigValue::Json(serde_json::json!(0.9)),
        )
        .unwrap();
        db.set_config("enable_parallel_collection", &ConfigValue::Boolean(false))
            .unwrap();
        db.set_config("some_future_key", &ConfigValue::String("x".into()))
            .unwrap();

        let cfg = CollectorConfig::load(&db).unwrap();
        assert_eq!(cfg.max_retry_attempts, 5);
        assert_eq!(cfg.quality_threshold, 0.9);
        assert!(!cfg.enable_parallel_collection);
        // Untouched keys keep their defaults.
        assert_eq!(cfg.min_data_points, 24);
    }
}
