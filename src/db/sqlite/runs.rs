//! Collection run tracker
//!
//! Append-only run history. A run starts `running` and moves exactly
//! once to a terminal state; the transition is enforced in the UPDATE
//! itself so a finished row can never be rewritten.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::db::sqlite::models::{CollectionRun, RunOperation, RunStatus};
use crate::error::{AppError, Result};

/// Terminal outcome of a run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub successful_indicators: i64,
    pub failed_indicators: i64,
    pub total_observations: i64,
    pub error_message: Option<String>,
    pub execution_metadata: Option<serde_json::Value>,
}

fn run_from_row(row: &Row) -> rusqlite::Result<CollectionRun> {
    let operation_s: String = row.get(2)?;
    let status_s: String = row.get(3)?;
    let start_s: String = row.get(4)?;
    let end_s: Option<String> = row.get(5)?;
    let metadata_s: Option<String> = row.get(11)?;

    let conv = |idx: usize, msg: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, msg.into())
    };

    let parse_ts = |idx: usize, s: &str| {
        DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| conv(idx, e.to_string()))
    };

    Ok(CollectionRun {
        id: row.get(0)?,
        run_id: row.get(1)?,
        operation: RunOperation::parse(&operation_s).map_err(|e| conv(2, e.to_string()))?,
        status: RunStatus::parse(&status_s).map_err(|e| conv(3, e.to_string()))?,
        start_time: parse_ts(4, &start_s)?,
        end_time: end_s.as_deref().map(|s| parse_ts(5, s)).transpose()?,
        total_indicators: row.get(6)?,
        successful_indicators: row.get(7)?,
        failed_indicators: row.get(8)?,
        total_observations: row.get(9)?,
        error_message: row.get(10)?,
        execution_metadata: metadata_s
            .as_deref()
            .map(|s| serde_json::from_str(s).map_err(|e| conv(11, e.to_string())))
            .transpose()?,
    })
}

const SELECT_RUN: &str = "
    SELECT id, run_id, operation, status, start_time, end_time,
           total_indicators, successful_indicators, failed_indicators,
           total_observations, error_message, execution_metadata
    FROM collection_runs";

/// Open a new run in `running` state
pub fn start(
    conn: &Connection,
    run_id: &str,
    operation: RunOperation,
    total_indicators: i64,
    start_time: DateTime<Utc>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO collection_runs (run_id, operation, status, start_time, total_indicators)
         VALUES (?1, ?2, 'running', ?3, ?4)",
        params![
            run_id,
            operation.as_str(),
            start_time.to_rfc3339(),
            total_indicators,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Move a run to its terminal state. Fails if the row is already
/// terminal; history is never updated after completion.
pub fn finish(
    conn: &Connection,
    id: i64,
    end_time: DateTime<Utc>,
    outcome: &RunOutcome,
) -> Result<()> {
    if !outcome.status.is_terminal() {
        return Err(AppError::Internal(format!(
            "run {id}: '{}' is not a terminal status",
            outcome.status.as_str()
        )));
    }

    let metadata = outcome
        .execution_metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let updated = conn.execute(
        "UPDATE collection_runs
         SET status = ?1, end_time = ?2, successful_indicators = ?3,
             failed_indicators = ?4, total_observations = ?5,
             error_message = ?6, execution_metadata = ?7
         WHERE id = ?8 AND status = 'running'",
        params![
            outcome.status.as_str(),
            end_time.to_rfc3339(),
            outcome.successful_indicators,
            outcome.failed_indicators,
            outcome.total_observations,
            outcome.error_message,
            metadata,
            id,
        ],
    )?;

    if updated == 0 {
        return Err(AppError::Internal(format!(
            "run {id} is not in 'running' state"
        )));
    }
    Ok(())
}

pub fn get(conn: &Connection, id: i64) -> Result<CollectionRun> {
    let sql = format!("{SELECT_RUN} WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map(params![id], run_from_row)?;
    match rows.next() {
        Some(row) => Ok(row?),
        None => Err(AppError::NotFound(format!("collection run {id}"))),
    }
}

/// Most recent runs first
pub fn recent(conn: &Connection, limit: i64) -> Result<Vec<CollectionRun>> {
    let sql = format!("{SELECT_RUN} ORDER BY start_time DESC, id DESC LIMIT ?1");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![limit], run_from_row)?;

    let mut runs = Vec::new();
    for row in rows {
        runs.push(row?);
    }
    Ok(runs)
}
