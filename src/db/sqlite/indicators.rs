//! Indicator and source reference-data queries

use rusqlite::{params, Connection, Row};

use crate::db::sqlite::models::{Frequency, Indicator, Source};
use crate::error::{AppError, Result};
use crate::normalize::ValueLocale;

fn source_from_row(row: &Row, offset: usize) -> rusqlite::Result<Source> {
    let locale_s: String = row.get(offset + 4)?;
    let value_locale = ValueLocale::parse(&locale_s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            offset + 4,
            rusqlite::types::Type::Text,
            format!("{e}").into(),
        )
    })?;
    Ok(Source {
        id: row.get(offset)?,
        code: row.get(offset + 1)?,
        name: row.get(offset + 2)?,
        base_url: row.get(offset + 3)?,
        value_locale,
        timeout_secs: row.get(offset + 5)?,
        created_at: row.get(offset + 6)?,
    })
}

fn indicator_from_row(row: &Row) -> rusqlite::Result<Indicator> {
    let frequency_s: String = row.get(5)?;
    let frequency = Frequency::parse(&frequency_s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            format!("{e}").into(),
        )
    })?;
    Ok(Indicator {
        id: row.get(0)?,
        source_id: row.get(1)?,
        code: row.get(2)?,
        name: row.get(3)?,
        unit: row.get(4)?,
        frequency,
        external_code: row.get(6)?,
        freshness_limit_days: row.get(7)?,
        is_active: row.get(8)?,
        created_at: row.get(9)?,
    })
}

const SELECT_JOINED: &str = "
    SELECT i.id, i.source_id, i.code, i.name, i.unit, i.frequency,
           i.external_code, i.freshness_limit_days, i.is_active, i.created_at,
           s.id, s.code, s.name, s.base_url, s.value_locale, s.timeout_secs, s.created_at
    FROM indicators i
    JOIN sources s ON s.id = i.source_id";

/// All configured sources
pub fn list_sources(conn: &Connection) -> Result<Vec<Source>> {
    let mut stmt = conn.prepare(
        "SELECT id, code, name, base_url, value_locale, timeout_secs, created_at
         FROM sources ORDER BY code",
    )?;
    let rows = stmt.query_map([], |row| source_from_row(row, 0))?;

    let mut sources = Vec::new();
    for row in rows {
        sources.push(row?);
    }
    Ok(sources)
}

/// All active indicators with their sources, in code order
pub fn list_active(conn: &Connection) -> Result<Vec<(Indicator, Source)>> {
    let sql = format!("{SELECT_JOINED} WHERE i.is_active = 1 ORDER BY i.code");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok((indicator_from_row(row)?, source_from_row(row, 10)?))
    })?;

    let mut indicators = Vec::new();
    for row in rows {
        indicators.push(row?);
    }
    Ok(indicators)
}

/// Look up one indicator by code, active or not
pub fn get_by_code(conn: &Connection, code: &str) -> Result<(Indicator, Source)> {
    let sql = format!("{SELECT_JOINED} WHERE i.code = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map(params![code], |row| {
        Ok((indicator_from_row(row)?, source_from_row(row, 10)?))
    })?;

    match rows.next() {
        Some(row) => Ok(row?),
        None => Err(AppError::NotFound(format!("indicator '{code}'"))),
    }
}
