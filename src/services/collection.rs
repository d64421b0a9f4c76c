//! Collection pipeline
//!
//! Per indicator: fetch (through the cache) -> normalize -> validate
//! -> store, with the whole pass wrapped in a run record. Indicators
//! fail independently; the run completes with whatever subset
//! succeeded.

use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::FetchCache;
use crate::config::CollectorConfig;
use crate::db::sqlite::models::{Indicator, NewObservation, RunOperation, RunStatus, Source};
use crate::db::sqlite::{RunOutcome, SqliteDb};
use crate::error::{AppError, Result};
use crate::normalize::Normalizer;
use crate::quality::{QualityReport, QualityValidator};
use crate::services::CancelFlag;
use crate::sources::{fetch_with_retry, DateRange, SourceRegistry};

/// Per-call knobs for a collection pass
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectionOptions {
    /// Bypass and refresh the fetch cache
    pub force_refresh: bool,
    /// Explicit date range; defaults to the configured lookback
    pub range: Option<DateRange>,
}

/// What happened to one indicator during a run
#[derive(Debug, Clone)]
pub struct IndicatorOutcome {
    pub code: String,
    pub records_written: usize,
    pub quality_score: Option<f64>,
    pub error: Option<String>,
}

impl IndicatorOutcome {
    fn failed(code: &str, error: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            records_written: 0,
            quality_score: None,
            error: Some(error.into()),
        }
    }
}

/// Aggregated result of one collection run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub total_indicators: usize,
    pub successful_indicators: usize,
    pub failed_indicators: usize,
    pub total_observations: usize,
    pub outcomes: Vec<IndicatorOutcome>,
}

/// Orchestrates the fetch -> normalize -> validate -> store pipeline
#[derive(Clone)]
pub struct CollectionService {
    db: Arc<SqliteDb>,
    sources: Arc<SourceRegistry>,
    cache: Arc<FetchCache>,
    config: CollectorConfig,
}

impl CollectionService {
    pub fn new(
        db: Arc<SqliteDb>,
        sources: Arc<SourceRegistry>,
        cache: Arc<FetchCache>,
        config: CollectorConfig,
    ) -> Self {
        Self {
            db,
            sources,
            cache,
            config,
        }
    }

    /// Collect every active indicator
    pub async fn collect_all(
        &self,
        opts: CollectionOptions,
        cancel: CancelFlag,
    ) -> Result<RunSummary> {
        let targets = self.db.active_indicators()?;
        self.run(targets, opts, cancel).await
    }

    /// Collect a single indicator by code
    pub async fn collect_one(
        &self,
        code: &str,
        opts: CollectionOptions,
        cancel: CancelFlag,
    ) -> Result<RunSummary> {
        let target = self.db.indicator_by_code(code)?;
        self.run(vec![target], opts, cancel).await
    }

    async fn run(
        &self,
        targets: Vec<(Indicator, Source)>,
        opts: CollectionOptions,
        cancel: CancelFlag,
    ) -> Result<RunSummary> {
        let as_of = Utc::now().date_naive();
        let range = opts
            .range
            .unwrap_or_else(|| DateRange::trailing_days(as_of, self.config.default_lookback_days));

        let run_id = Uuid::new_v4().to_string();
        let started = Utc::now();
        let db_run_id = self.db.start_run(
            &run_id,
            RunOperation::Collect,
            targets.len() as i64,
            started,
        )?;

        info!(
            run = %run_id,
            indicators = targets.len(),
            %range,
            "Collection run started"
        );

        let outcomes = if self.config.enable_parallel_collection && targets.len() > 1 {
            self.run_parallel(targets, range, opts.force_refresh, as_of, &cancel)
                .await
        } else {
            self.run_sequential(targets, range, opts.force_refresh, as_of, &cancel)
                .await
        };

        let successful = outcomes.iter().filter(|o| o.error.is_none()).count();
        let failed = outcomes.len() - successful;
        let total_observations: usize = outcomes.iter().map(|o| o.records_written).sum();

        let status = if cancel.is_cancelled() {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };

        let failures: Vec<String> = outcomes
            .iter()
            .filter_map(|o| {
                o.error
                    .as_ref()
                    .map(|e| format!("{}: {}", o.code, e))
            })
            .collect();
        let error_message = (!failures.is_empty()).then(|| failures.join("; "));

        let outcome = RunOutcome {
            status,
            successful_indicators: successful as i64,
            failed_indicators: failed as i64,
            total_observations: total_observations as i64,
            error_message,
            execution_metadata: Some(serde_json::json!({
                "range": range.to_string(),
                "force_refresh": opts.force_refresh,
                "parallel": self.config.enable_parallel_collection,
            })),
        };
        self.db.finish_run(db_run_id, Utc::now(), &outcome)?;

        info!(
            run = %run_id,
            status = status.as_str(),
            successful,
            failed,
            total_observations,
            "Collection run finished"
        );

        Ok(RunSummary {
            run_id,
            status,
            total_indicators: outcomes.len(),
            successful_indicators: successful,
            failed_indicators: failed,
            total_observations,
            outcomes,
        })
    }

    async fn run_parallel(
        &self,
        targets: Vec<(Indicator, Source)>,
        range: DateRange,
        force: bool,
        as_of: NaiveDate,
        cancel: &CancelFlag,
    ) -> Vec<IndicatorOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_indicators.max(1)));
        let mut handles = Vec::with_capacity(targets.len());

        for (indicator, source) in targets {
            let service = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return IndicatorOutcome::failed(&indicator.code, "worker pool closed"),
                };
                if cancel.is_cancelled() {
                    return IndicatorOutcome::failed(&indicator.code, "run cancelled before start");
                }
                service
                    .collect_indicator(&indicator, &source, range, force, as_of)
                    .await
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => outcomes.push(IndicatorOutcome::failed("<unknown>", format!("worker panicked: {e}"))),
            }
        }
        outcomes
    }

    async fn run_sequential(
        &self,
        targets: Vec<(Indicator, Source)>,
        range: DateRange,
        force: bool,
        as_of: NaiveDate,
        cancel: &CancelFlag,
    ) -> Vec<IndicatorOutcome> {
        let mut outcomes = Vec::with_capacity(targets.len());
        for (indicator, source) in targets {
            if cancel.is_cancelled() {
                outcomes.push(IndicatorOutcome::failed(
                    &indicator.code,
                    "run cancelled before start",
                ));
                continue;
            }
            outcomes.push(
                self.collect_indicator(&indicator, &source, range, force, as_of)
                    .await,
            );
        }
        outcomes
    }

    /// One indicator's strictly ordered fetch -> normalize -> validate
    /// -> store sequence. Every failure is folded into the outcome so
    /// the run can keep going.
    async fn collect_indicator(
        &self,
        indicator: &Indicator,
        source: &Source,
        range: DateRange,
        force: bool,
        as_of: NaiveDate,
    ) -> IndicatorOutcome {
        match self
            .try_collect_indicator(indicator, source, range, force, as_of)
            .await
        {
            Ok((written, report)) => IndicatorOutcome {
                code: indicator.code.clone(),
                records_written: written,
                quality_score: Some(report.score),
                error: None,
            },
            Err(e) => {
                error!(indicator = %indicator.code, "Collection failed: {}", e);
                IndicatorOutcome::failed(&indicator.code, e.to_string())
            }
        }
    }

    async fn try_collect_indicator(
        &self,
        indicator: &Indicator,
        source: &Source,
        range: DateRange,
        force: bool,
        as_of: NaiveDate,
    ) -> Result<(usize, QualityReport)> {
        let adapter = self.sources.get(&source.code)?;
        let cache_key = FetchCache::key(&indicator.code, range);

        let points = if force {
            self.cache.invalidate(&cache_key);
            None
        } else {
            self.cache.get(&cache_key)
        };
        let points = match points {
            Some(points) => {
                info!(indicator = %indicator.code, "Cache hit, skipping fetch");
                points
            }
            None => {
                let fetched = fetch_with_retry(
                    adapter.as_ref(),
                    &indicator.external_code,
                    range,
                    self.config.max_retry_attempts,
                    Duration::from_millis(self.config.retry_base_delay_ms),
                )
                .await?;
                self.cache.set(&cache_key, fetched.clone());
                fetched
            }
        };

        let normalizer = Normalizer::new(source.value_locale);
        let batch = normalizer.normalize_batch(&points).map_err(|e| {
            // Keep the payload around for manual inspection.
            error!(
                indicator = %indicator.code,
                points = points.len(),
                "Normalization failed: {}",
                e
            );
            e
        })?;

        let validator = QualityValidator::new(self.config.quality());
        let report = validator.assess(
            &batch.drafts,
            batch.null_count,
            indicator.frequency,
            indicator.freshness_limit_days,
            range,
            as_of,
        );

        self.db
            .insert_quality_log(indicator.id, Utc::now(), &report)?;

        if !report.is_validated {
            // Below-threshold data is stored anyway, flagged, so the
            // dashboard shows stale or poor series instead of holes.
            warn!(
                indicator = %indicator.code,
                score = report.score,
                threshold = self.config.quality_threshold,
                "Quality below threshold, storing unvalidated"
            );
        }

        let collected_at = Utc::now();
        let observations: Vec<NewObservation> = batch
            .drafts
            .into_iter()
            .map(|draft| NewObservation {
                indicator_id: indicator.id,
                reference_date: draft.reference_date,
                value: draft.value,
                raw_value: draft.raw_value,
                collection_timestamp: collected_at,
                quality_score: report.score,
                is_validated: report.is_validated,
                notes: None,
            })
            .collect();

        let written = self
            .db
            .upsert_observations(&observations)
            .map_err(|e| AppError::Storage(format!("{}: {e}", indicator.code)))?;

        info!(
            indicator = %indicator.code,
            records = written,
            score = report.score,
            "Indicator collected"
        );
        Ok((written, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::RawPoint;
    use crate::sources::SourceAdapter;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticAdapter {
        id: &'static str,
        points: Vec<RawPoint>,
        calls: AtomicUsize,
    }

    impl StaticAdapter {
        fn new(id: &'static str, points: Vec<RawPoint>) -> Self {
            Self {
                id,
                points,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SourceAdapter for StaticAdapter {
        fn id(&self) -> &'static str {
            self.id
        }
        fn name(&self) -> &'static str {
            "Static Test Source"
        }
        async fn fetch(&self, _code: &str, _range: DateRange) -> Result<Vec<RawPoint>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.points.clone())
        }
    }

    struct DownAdapter {
        id: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SourceAdapter for DownAdapter {
        fn id(&self) -> &'static str {
            self.id
        }
        fn name(&self) -> &'static str {
            "Down Test Source"
        }
        async fn fetch(&self, _code: &str, _range: DateRange) -> Result<Vec<RawPoint>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::Transport("connect timeout".to_string()))
        }
    }

    fn recent_points() -> Vec<RawPoint> {
        let today = Utc::now().date_naive();
        (0..3)
            .map(|i| RawPoint {
                date: (today - chrono::Duration::days(2 - i))
                    .format("%Y-%m-%d")
                    .to_string(),
                value: format!("10,{}", 60 + i),
            })
            .collect()
    }

    fn test_config() -> CollectorConfig {
        CollectorConfig {
            max_retry_attempts: 2,
            retry_base_delay_ms: 1,
            max_parallel_indicators: 2,
            ..CollectorConfig::default()
        }
    }

    fn service_with(
        registry: SourceRegistry,
        config: CollectorConfig,
    ) -> (CollectionService, Arc<SqliteDb>) {
        let db = Arc::new(SqliteDb::new_in_memory().unwrap());
        let cache = Arc::new(FetchCache::new(Duration::from_secs(600)));
        let service = CollectionService::new(
            Arc::clone(&db),
            Arc::new(registry),
            cache,
            config,
        );
        (service, db)
    }

    fn registry_all_up() -> SourceRegistry {
        let mut registry = SourceRegistry::new(&[], Duration::from_secs(5)).unwrap();
        registry.register("bcb", Arc::new(StaticAdapter::new("bcb", recent_points())));
        registry.register("ibge", Arc::new(StaticAdapter::new("ibge", recent_points())));
        registry.register(
            "tesouro",
            Arc::new(StaticAdapter::new("tesouro", recent_points())),
        );
        registry
    }

    #[tokio::test]
    async fn test_partial_failure_still_completes() {
        let mut registry = SourceRegistry::new(&[], Duration::from_secs(5)).unwrap();
        registry.register("bcb", Arc::new(StaticAdapter::new("bcb", recent_points())));
        registry.register(
            "ibge",
            Arc::new(DownAdapter {
                id: "ibge",
                calls: AtomicUsize::new(0),
            }),
        );
        registry.register(
            "tesouro",
            Arc::new(StaticAdapter::new("tesouro", recent_points())),
        );
        let (service, db) = service_with(registry, test_config());

        let summary = service
            .collect_all(CollectionOptions::default(), CancelFlag::new())
            .await
            .unwrap();

        // Seeded catalog: 2 bcb + 3 ibge + 1 tesouro indicators.
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.total_indicators, 6);
        assert_eq!(summary.successful_indicators, 3);
        assert_eq!(summary.failed_indicators, 3);
        assert_eq!(summary.total_observations, 9);

        let run = db.recent_runs(1).unwrap().remove(0);
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.successful_indicators, 3);
        assert_eq!(run.failed_indicators, 3);
        let message = run.error_message.expect("failures enumerated");
        assert!(message.contains("ipca"));
        assert!(message.contains("desemprego"));
    }

    #[tokio::test]
    async fn test_transport_failure_retried_then_marked_failed() {
        let down = Arc::new(DownAdapter {
            id: "bcb",
            calls: AtomicUsize::new(0),
        });
        let mut registry = SourceRegistry::new(&[], Duration::from_secs(5)).unwrap();
        registry.register("bcb", Arc::clone(&down) as Arc<dyn SourceAdapter>);
        let (service, _db) = service_with(registry, test_config());

        let summary = service
            .collect_one("selic", CollectionOptions::default(), CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.failed_indicators, 1);
        // max_retry_attempts bounds the calls.
        assert_eq!(down.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cache_short_circuits_second_run() {
        let adapter = Arc::new(StaticAdapter::new("bcb", recent_points()));
        let mut registry = SourceRegistry::new(&[], Duration::from_secs(5)).unwrap();
        registry.register("bcb", Arc::clone(&adapter) as Arc<dyn SourceAdapter>);
        let (service, _db) = service_with(registry, test_config());

        let opts = CollectionOptions::default();
        service
            .collect_one("selic", opts, CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);

        service
            .collect_one("selic", opts, CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1, "expected cache hit");

        let forced = CollectionOptions {
            force_refresh: true,
            ..CollectionOptions::default()
        };
        service
            .collect_one("selic", forced, CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 2, "force bypasses cache");
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_indicators() {
        let (service, db) = service_with(registry_all_up(), test_config());
        let cancel = CancelFlag::new();
        cancel.cancel();

        let summary = service
            .collect_all(CollectionOptions::default(), cancel)
            .await
            .unwrap();

        assert_eq!(summary.status, RunStatus::Cancelled);
        assert_eq!(summary.successful_indicators, 0);
        let run = db.recent_runs(1).unwrap().remove(0);
        assert_eq!(run.status, RunStatus::Cancelled);
        assert!(run.end_time.is_some());
    }

    #[tokio::test]
    async fn test_observations_and_quality_logs_written() {
        let (service, db) = service_with(registry_all_up(), test_config());

        let summary = service
            .collect_one("selic", CollectionOptions::default(), CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(summary.successful_indicators, 1);

        let latest = db.latest_observation("selic").unwrap();
        assert!(latest.raw_value.contains("10,"));

        let (indicator, _) = db.indicator_by_code("selic").unwrap();
        let logs = db.quality_logs_for(indicator.id, 10).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].total_records, 3);
    }

    #[tokio::test]
    async fn test_unknown_indicator_is_not_found() {
        let (service, _db) = service_with(registry_all_up(), test_config());
        let err = service
            .collect_one("nope", CollectionOptions::default(), CancelFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
