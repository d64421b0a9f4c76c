//! IBGE SIDRA adapter
//!
//! SIDRA takes the table/variable selection as a path
//! (`t/1737/n1/all/v/63/p/202401-202506`) and returns rows of string
//! maps, the first of which is the header. The period code is in
//! `D2C` (YYYYMM or YYYY), the value in `V`.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{AppError, Result};
use crate::normalize::RawPoint;
use crate::sources::{DateRange, SourceAdapter};

const PERIOD_FIELD: &str = "D2C";
const VALUE_FIELD: &str = "V";

/// SIDRA publishes "..." and "-" for unavailable cells.
const PLACEHOLDER_VALUES: &[&str] = &["...", "-", ".."];

pub struct IbgeAdapter {
    base_url: String,
    client: Client,
}

impl IbgeAdapter {
    pub fn new(base_url: String, client: Client) -> Self {
        Self { base_url, client }
    }

    fn endpoint(&self, series_path: &str, range: DateRange) -> String {
        format!(
            "{}/{}/{}-{}?formato=json",
            self.base_url,
            series_path.trim_matches('/'),
            range.start.format("%Y%m"),
            range.end.format("%Y%m"),
        )
    }

    fn parse_rows(series_path: &str, rows: Vec<HashMap<String, Value>>) -> Vec<RawPoint> {
        let mut points = Vec::new();
        // First row is the header legend.
        for row in rows.into_iter().skip(1) {
            let field = |key: &str| {
                row.get(key)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            let date = field(PERIOD_FIELD);
            let mut value = field(VALUE_FIELD);
            if PLACEHOLDER_VALUES.contains(&value.as_str()) {
                value = String::new();
            }
            if date.is_empty() && value.is_empty() {
                tracing::warn!(series = series_path, "Skipping empty SIDRA row");
                continue;
            }
            points.push(RawPoint { date, value });
        }
        points
    }
}

#[async_trait]
impl SourceAdapter for IbgeAdapter {
    fn id(&self) -> &'static str {
        "ibge"
    }

    fn name(&self) -> &'static str {
        "IBGE (SIDRA)"
    }

    async fn fetch(&self, external_code: &str, range: DateRange) -> Result<Vec<RawPoint>> {
        let url = self.endpoint(external_code, range);
        tracing::debug!(series = external_code, %range, "Fetching SIDRA series");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::Transport(format!("ibge: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::Transport(format!(
                "ibge: series {} returned HTTP {}",
                external_code,
                response.status()
            )));
        }

        let rows: Vec<HashMap<String, Value>> = response
            .json()
            .await
            .map_err(|e| AppError::Normalization(format!("ibge: series {external_code}: {e}")))?;

        Ok(Self::parse_rows(external_code, rows))
    }
}
