//! Tesouro Transparente adapter
//!
//! ORDS-style endpoint returning an `{"items": [...]}` envelope. Field
//! names vary per dataset, so the adapter probes the known date/value
//! keys instead of binding to one record shape.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{AppError, Result};
use crate::normalize::RawPoint;
use crate::sources::{DateRange, SourceAdapter};

const DATE_KEYS: &[&str] = &["data_referencia", "dt_referencia", "periodo"];
const VALUE_KEYS: &[&str] = &["valor", "vl_resultado_primario", "vl_valor"];

#[derive(Debug, Deserialize)]
struct OrdsEnvelope {
    #[serde(default)]
    items: Vec<HashMap<String, Value>>,
}

pub struct TesouroAdapter {
    base_url: String,
    client: Client,
}

impl TesouroAdapter {
    pub fn new(base_url: String, client: Client) -> Self {
        Self { base_url, client }
    }

    fn endpoint(&self, resource: &str, range: DateRange) -> String {
        format!(
            "{}/{}?dataInicial={}&dataFinal={}",
            self.base_url,
            resource.trim_matches('/'),
            range.start.format("%Y-%m-%d"),
            range.end.format("%Y-%m-%d"),
        )
    }

    fn probe(item: &HashMap<String, Value>, keys: &[&str]) -> String {
        for key in keys {
            if let Some(value) = item.get(*key) {
                return match value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    _ => String::new(),
                };
            }
        }
        String::new()
    }

    fn parse_items(resource: &str, items: Vec<HashMap<String, Value>>) -> Vec<RawPoint> {
        let mut points = Vec::new();
        for item in items {
            let date = Self::probe(&item, DATE_KEYS);
            let value = Self::probe(&item, VALUE_KEYS);
            if date.is_empty() && value.is_empty() {
                tracing::warn!(resource, "Skipping unrecognized Tesouro item");
                continue;
            }
            points.push(RawPoint { date, value });
        }
        points
    }
}

#[async_trait]
impl SourceAdapter for TesouroAdapter {
    fn id(&self) -> &'static str {
        "tesouro"
    }

    fn name(&self) -> &'static str {
        "Tesouro Nacional (Tesouro Transparente)"
    }

    async fn fetch(&self, external_code: &str, range: DateRange) -> Result<Vec<RawPoint>> {
        let url = self.endpoint(external_code, range);
        tracing::debug!(resource = external_code, %range, "Fetching Tesouro dataset");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::Transport(format!("tesouro: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::Transport(format!(
                "tesouro: resource {} returned HTTP {}",
                external_code,
                response.status()
            )));
        }

        let envelope: OrdsEnvelope = response.json().await.map_err(|e| {
            AppError::Normalization(format!("tesouro: resource {external_code}: {e}"))
        })?;

        Ok(Self::parse_items(external_code, envelope.items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_items_probed_across_field_spellings() {
        let items: Vec<HashMap<String, Value>> = vec![
            [
                ("data_referencia".to_string(), Value::String("2025-05-31".into())),
                ("valor".to_string(), Value::String("-12,4".into())),
            ]
            .into_iter()
            .collect(),
            [
                ("dt_referencia".to_string(), Value::String("2025-06-30".into())),
                (
                    "vl_resultado_primario".to_string(),
                    serde_json::json!(-8.1),
                ),
            ]
            .into_iter()
            .collect(),
        ];
        let points = TesouroAdapter::parse_items("resultado_primario", items);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].value, "-12,4");
        assert_eq!(points[1].date, "2025-06-30");
        assert_eq!(points[1].value, "-8.1");
    }
}
