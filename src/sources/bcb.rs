//! Banco Central do Brasil SGS adapter
//!
//! Series endpoint: `{base}/{code}/dados?formato=json&dataInicial=DD/MM/YYYY&dataFinal=DD/MM/YYYY`.
//! Records come back as `{"data": "02/06/2025", "valor": "10,65"}`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::normalize::RawPoint;
use crate::sources::{DateRange, SourceAdapter};

#[derive(Debug, Deserialize)]
struct SgsRecord {
    #[serde(default)]
    data: String,
    #[serde(default)]
    valor: String,
}

pub struct BcbAdapter {
    base_url: String,
    client: Client,
}

impl BcbAdapter {
    pub fn new(base_url: String, client: Client) -> Self {
        Self { base_url, client }
    }

    fn endpoint(&self, series_code: &str, range: DateRange) -> String {
        format!(
            "{}/{}/dados?formato=json&dataInicial={}&dataFinal={}",
            self.base_url,
            series_code,
            range.start.format("%d/%m/%Y"),
            range.end.format("%d/%m/%Y"),
        )
    }
}

#[async_trait]
impl SourceAdapter for BcbAdapter {
    fn id(&self) -> &'static str {
        "bcb"
    }

    fn name(&self) -> &'static str {
        "Banco Central do Brasil (SGS)"
    }

    async fn fetch(&self, external_code: &str, range: DateRange) -> Result<Vec<RawPoint>> {
        let url = self.endpoint(external_code, range);
        tracing::debug!(series = external_code, %range, "Fetching BCB series");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::Transport(format!("bcb: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::Transport(format!(
                "bcb: series {} returned HTTP {}",
                external_code,
                response.status()
            )));
        }

        let records: Vec<SgsRecord> = response
            .json()
            .await
            .map_err(|e| AppError::Normalization(format!("bcb: series {external_code}: {e}")))?;

        Ok(records
            .into_iter()
            .map(|r| RawPoint {
                date: r.data,
                value: r.valor,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_endpoint_uses_provider_date_format() {
        let adapter = BcbAdapter::new(
            "https://api.bcb.gov.br/dados/serie/bcdata.sgs".to_string(),
            Client::new(),
        );
        let range = DateRange {
            start: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2025, 6, 20).unwrap(),
        };
        assert_eq!(
            adapter.endpoint("11", range),
            "https://api.bcb.gov.br/dados/serie/bcdata.sgs/11/dados?formato=json&dataInicial=01/06/2025&dataFinal=20/06/2025"
        );
    }
}
