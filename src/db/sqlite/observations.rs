//! Observation storage
//!
//! The (indicator_id, reference_date) uniqueness constraint is the
//! dedup mechanism: a later collection of the same date replaces the
//! prior value instead of duplicating it. Creation time survives the
//! replacement; everything else is last-writer-wins.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, Row};

use crate::db::sqlite::models::{LatestObservation, NewObservation, Observation};
use crate::error::{AppError, Result};
use crate::sources::DateRange;

const DATE_FMT: &str = "%Y-%m-%d";

fn parse_date(idx: usize, s: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FMT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_timestamp(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn observation_from_row(row: &Row) -> rusqlite::Result<Observation> {
    let date_s: String = row.get(2)?;
    let ts_s: String = row.get(5)?;
    Ok(Observation {
        id: row.get(0)?,
        indicator_id: row.get(1)?,
        reference_date: parse_date(2, &date_s)?,
        value: row.get(3)?,
        raw_value: row.get(4)?,
        collection_timestamp: parse_timestamp(5, &ts_s)?,
        quality_score: row.get(6)?,
        is_validated: row.get(7)?,
        notes: row.get(8)?,
        created_at: row.get(9)?,
    })
}

const SELECT_OBSERVATION: &str = "
    SELECT id, indicator_id, reference_date, value, raw_value,
           collection_timestamp, quality_score, is_validated, notes, created_at
    FROM observations";

/// Insert or replace the observation for its (indicator, date) key.
///
/// Duplicate keys are the expected, handled case: the conflict clause
/// replaces value, raw_value, score and collection timestamp while the
/// row keeps its original id and created_at.
pub fn upsert(conn: &Connection, obs: &NewObservation) -> Result<()> {
    conn.execute(
        "INSERT INTO observations
            (indicator_id, reference_date, value, raw_value,
             collection_timestamp, quality_score, is_validated, notes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(indicator_id, reference_date) DO UPDATE SET
            value = excluded.value,
            raw_value = excluded.raw_value,
            collection_timestamp = excluded.collection_timestamp,
            quality_score = excluded.quality_score,
            is_validated = excluded.is_validated,
            notes = excluded.notes",
        params![
            obs.indicator_id,
            obs.reference_date.format(DATE_FMT).to_string(),
            obs.value,
            obs.raw_value,
            obs.collection_timestamp.to_rfc3339(),
            obs.quality_score,
            obs.is_validated,
            obs.notes,
        ],
    )?;
    Ok(())
}

/// Upsert a whole batch in one transaction; per-indicator writes are
/// atomic at the commit.
pub fn upsert_batch(conn: &mut Connection, batch: &[NewObservation]) -> Result<usize> {
    let tx = conn.transaction()?;
    for obs in batch {
        upsert(&tx, obs)?;
    }
    tx.commit()?;
    Ok(batch.len())
}

/// The observation with the maximum reference date for an indicator
pub fn latest(conn: &Connection, indicator_id: i64) -> Result<Observation> {
    let sql = format!(
        "{SELECT_OBSERVATION} WHERE indicator_id = ?1 ORDER BY reference_date DESC LIMIT 1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map(params![indicator_id], observation_from_row)?;
    match rows.next() {
        Some(row) => Ok(row?),
        None => Err(AppError::NotFound(format!(
            "no observations for indicator {indicator_id}"
        ))),
    }
}

/// Observations for an indicator within a date range, ascending
pub fn for_range(
    conn: &Connection,
    indicator_id: i64,
    range: DateRange,
) -> Result<Vec<Observation>> {
    let sql = format!(
        "{SELECT_OBSERVATION}
         WHERE indicator_id = ?1 AND reference_date >= ?2 AND reference_date <= ?3
         ORDER BY reference_date"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![
            indicator_id,
            range.start.format(DATE_FMT).to_string(),
            range.end.format(DATE_FMT).to_string(),
        ],
        observation_from_row,
    )?;

    let mut observations = Vec::new();
    for row in rows {
        observations.push(row?);
    }
    Ok(observations)
}

/// Stamp a validation pass onto stored rows in the assessed range
pub fn apply_quality(
    conn: &Connection,
    indicator_id: i64,
    range: DateRange,
    quality_score: f64,
    is_validated: bool,
) -> Result<usize> {
    let updated = conn.execute(
        "UPDATE observations
         SET quality_score = ?1, is_validated = ?2
         WHERE indicator_id = ?3 AND reference_date >= ?4 AND reference_date <= ?5",
        params![
            quality_score,
            is_validated,
            indicator_id,
            range.start.format(DATE_FMT).to_string(),
            range.end.format(DATE_FMT).to_string(),
        ],
    )?;
    Ok(updated)
}

/// Delete observations created before the cutoff. Returns the count
/// deleted; a second pass over the same cutoff deletes nothing.
pub fn purge_created_before(conn: &Connection, cutoff: DateTime<Utc>) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM observations WHERE created_at < ?1",
        params![cutoff.format("%Y-%m-%d %H:%M:%S").to_string()],
    )?;
    Ok(deleted)
}

/// Latest observation per indicator - the dashboard's read-only feed
pub fn latest_per_indicator(conn: &Connection) -> Result<Vec<LatestObservation>> {
    let mut stmt = conn.prepare(
        "SELECT i.code, i.name, i.unit, o.reference_date, o.value,
                o.quality_score, o.is_validated
         FROM observations o
         JOIN indicators i ON i.id = o.indicator_id
         WHERE o.reference_date = (
             SELECT MAX(o2.reference_date) FROM observations o2
             WHERE o2.indicator_id = o.indicator_id
         )
         ORDER BY i.code",
    )?;
    let rows = stmt.query_map([], |row| {
        let date_s: String = row.get(3)?;
        Ok(LatestObservation {
            indicator_code: row.get(0)?,
            indicator_name: row.get(1)?,
            unit: row.get(2)?,
            reference_date: parse_date(3, &date_s)?,
            value: row.get(4)?,
            quality_score: row.get(5)?,
            is_validated: row.get(6)?,
        })
    })?;

    let mut latest = Vec::new();
    for row in rows {
        latest.push(row?);
    }
    Ok(latest)
}

/// Backdate created_at, test-only helper for retention scenarios
#[cfg(test)]
pub fn backdate_created_at(conn: &Connection, indicator_id: i64, stamp: &str) -> Result<usize> {
    let updated = conn.execute(
        "UPDATE observations SET created_at = ?1 WHERE indicator_id = ?2",
        params![stamp, indicator_id],
    )?;
    Ok(updated)
}
