//! Source adapters
//!
//! One adapter per government data provider. Adapters only fetch and
//! translate payload rows into raw points; parsing rigor lives in the
//! normalizer, retry policy lives here.

pub mod bcb;
pub mod ibge;
pub mod tesouro;

use async_trait::async_trait;
use chrono::NaiveDate;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::db::sqlite::models::Source;
use crate::error::{AppError, Result};
use crate::normalize::RawPoint;

/// Inclusive date range for a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Range ending at `end` and reaching `days` back
    pub fn trailing_days(end: NaiveDate, days: i64) -> Self {
        Self {
            start: end - chrono::Duration::days(days),
            end,
        }
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Adapter for one data provider
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Provider id (e.g. "bcb", "ibge", "tesouro")
    fn id(&self) -> &'static str;

    /// Provider display name
    fn name(&self) -> &'static str;

    /// Fetch raw time-series points for one provider-side series code.
    /// Fails with `AppError::Transport` when the provider is
    /// unreachable or times out.
    async fn fetch(&self, external_code: &str, range: DateRange) -> Result<Vec<RawPoint>>;
}

/// Registry of source adapters, keyed by source code
pub struct SourceRegistry {
    adapters: HashMap<String, Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    /// Build adapters for the catalog's sources. Unknown source codes
    /// are skipped with a warning so a catalog edit cannot take the
    /// whole pipeline down. Each source may override the default
    /// request timeout.
    pub fn new(sources: &[Source], default_timeout: Duration) -> Result<Self> {
        let build_client = |timeout: Duration| {
            reqwest::Client::builder()
                .timeout(timeout)
                .user_agent("econwatch/0.1 (economic data collector)")
                .build()
                .map_err(|e| AppError::Internal(format!("http client: {e}")))
        };

        let mut adapters: HashMap<String, Arc<dyn SourceAdapter>> = HashMap::new();
        for source in sources {
            let timeout = source
                .timeout_secs
                .map(|s| Duration::from_secs(s as u64))
                .unwrap_or(default_timeout);
            let client = build_client(timeout)?;
            let adapter: Option<Arc<dyn SourceAdapter>> = match source.code.as_str() {
                "bcb" => Some(Arc::new(bcb::BcbAdapter::new(
                    source.base_url.clone(),
                    client.clone(),
                ))),
                "ibge" => Some(Arc::new(ibge::IbgeAdapter::new(
                    source.base_url.clone(),
                    client.clone(),
                ))),
                "tesouro" => Some(Arc::new(tesouro::TesouroAdapter::new(
                    source.base_url.clone(),
                    client.clone(),
                ))),
                other => {
                    tracing::warn!("No adapter for source '{}', skipping", other);
                    None
                }
            };
            if let Some(adapter) = adapter {
                adapters.insert(source.code.clone(), adapter);
            }
        }

        Ok(Self { adapters })
    }

    /// Register (or replace) an adapter. Tests use this to plug mocks.
    pub fn register(&mut self, code: &str, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(code.to_string(), adapter);
    }

    pub fn get(&self, code: &str) -> Result<Arc<dyn SourceAdapter>> {
        self.adapters
            .get(code)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("source adapter '{code}'")))
    }
}

/// Fetch with bounded retries and exponential backoff. Only transport
/// failures are retried; malformed-payload errors pass through on the
/// first attempt.
pub async fn fetch_with_retry(
    adapter: &dyn SourceAdapter,
    external_code: &str,
    range: DateRange,
    max_attempts: u32,
    base_delay: Duration,
) -> Result<Vec<RawPoint>> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match adapter.fetch(external_code, range).await {
            Ok(points) => return Ok(points),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let backoff = base_delay * 2u32.saturating_pow(attempt - 1);
                let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=50));
                tracing::warn!(
                    source = adapter.id(),
                    series = external_code,
                    attempt,
                    "Fetch failed, retrying in {:?}: {}",
                    backoff + jitter,
                    err
                );
                tokio::time::sleep(backoff + jitter).await;
            }
            Err(err) => return Err(err),
        }
    }
}
