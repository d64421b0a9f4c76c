//! Quality log storage
//!
//! One immutable row per validation pass per indicator. Error,
//! warning and outlier lists are stored as JSON text columns.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, Row};

use crate::db::sqlite::models::QualityLog;
use crate::error::Result;
use crate::quality::QualityReport;

fn log_from_row(row: &Row) -> rusqlite::Result<QualityLog> {
    let checked_s: String = row.get(2)?;
    let errors_s: String = row.get(8)?;
    let warnings_s: String = row.get(9)?;
    let outliers_s: String = row.get(10)?;

    let conv = |idx: usize, msg: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, msg.into())
    };

    let checked_at = DateTime::parse_from_rfc3339(&checked_s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conv(2, e.to_string()))?;
    let errors: Vec<String> =
        serde_json::from_str(&errors_s).map_err(|e| conv(8, e.to_string()))?;
    let warnings: Vec<String> =
        serde_json::from_str(&warnings_s).map_err(|e| conv(9, e.to_string()))?;
    let outlier_dates: Vec<NaiveDate> =
        serde_json::from_str(&outliers_s).map_err(|e| conv(10, e.to_string()))?;

    Ok(QualityLog {
        id: row.get(0)?,
        indicator_id: row.get(1)?,
        checked_at,
        total_records: row.get(3)?,
        null_count: row.get(4)?,
        outlier_count: row.get(5)?,
        quality_score: row.get(6)?,
        is_validated: row.get(7)?,
        errors,
        warnings,
        outlier_dates,
    })
}

const SELECT_LOG: &str = "
    SELECT id, indicator_id, checked_at, total_records, null_count,
           outlier_count, quality_score, is_validated, errors, warnings, outlier_dates
    FROM quality_logs";

/// Record a validation pass
pub fn insert(
    conn: &Connection,
    indicator_id: i64,
    checked_at: DateTime<Utc>,
    report: &QualityReport,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO quality_logs
            (indicator_id, checked_at, total_records, null_count, outlier_count,
             quality_score, is_validated, errors, warnings, outlier_dates)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            indicator_id,
            checked_at.to_rfc3339(),
            report.total_records as i64,
            report.null_count as i64,
            report.outlier_count as i64,
            report.score,
            report.is_validated,
            serde_json::to_string(&report.errors)?,
            serde_json::to_string(&report.warnings)?,
            serde_json::to_string(&report.outlier_dates)?,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Latest quality snapshot per indicator, keyed by indicator code
pub fn latest_per_indicator(conn: &Connection) -> Result<Vec<(String, QualityLog)>> {
    let sql = format!(
        "SELECT i.code, q.* FROM ({SELECT_LOG}) q
         JOIN indicators i ON i.id = q.indicator_id
         WHERE q.id = (
             SELECT MAX(q2.id) FROM quality_logs q2
             WHERE q2.indicator_id = q.indicator_id
         )
         ORDER BY i.code"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        let code: String = row.get(0)?;
        // Shift the row view past the code column for the shared mapper.
        let log = QualityLog {
            id: row.get(1)?,
            indicator_id: row.get(2)?,
            checked_at: {
                let s: String = row.get(3)?;
                DateTime::parse_from_rfc3339(&s)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            3,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?
            },
            total_records: row.get(4)?,
            null_count: row.get(5)?,
            outlier_count: row.get(6)?,
            quality_score: row.get(7)?,
            is_validated: row.get(8)?,
            errors: parse_json_col(row, 9)?,
            warnings: parse_json_col(row, 10)?,
            outlier_dates: parse_json_col(row, 11)?,
        };
        Ok((code, log))
    })?;

    let mut logs = Vec::new();
    for row in rows {
        logs.push(row?);
    }
    Ok(logs)
}

fn parse_json_col<T: serde::de::DeserializeOwned>(
    row: &Row,
    idx: usize,
) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    serde_json::from_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// History for one indicator, newest first
pub fn for_indicator(conn: &Connection, indicator_id: i64, limit: i64) -> Result<Vec<QualityLog>> {
    let sql = format!("{SELECT_LOG} WHERE indicator_id = ?1 ORDER BY id DESC LIMIT ?2");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![indicator_id, limit], log_from_row)?;

    let mut logs = Vec::new();
    for row in rows {
        logs.push(row?);
    }
    Ok(logs)
}
