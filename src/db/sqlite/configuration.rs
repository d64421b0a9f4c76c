//! Typed key/value configuration table
//!
//! Each row carries a type tag so a consumer can fail loudly on a
//! mistyped value instead of parsing garbage.

use rusqlite::{params, Connection};

use crate::error::{AppError, Result};

/// A configuration value with its declared type
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    String(String),
    Integer(i64),
    Boolean(bool),
    Json(serde_json::Value),
}

impl ConfigValue {
    pub fn type_tag(&self) -> &'static str {
        match self {
            ConfigValue::String(_) => "string",
            ConfigValue::Integer(_) => "integer",
            ConfigValue::Boolean(_) => "boolean",
            ConfigValue::Json(_) => "json",
        }
    }

    fn encode(&self) -> Result<String> {
        Ok(match self {
            ConfigValue::String(s) => s.clone(),
            ConfigValue::Integer(i) => i.to_string(),
            ConfigValue::Boolean(b) => b.to_string(),
            ConfigValue::Json(v) => serde_json::to_string(v)?,
        })
    }

    fn decode(key: &str, raw: &str, type_tag: &str) -> Result<Self> {
        match type_tag {
            "string" => Ok(ConfigValue::String(raw.to_string())),
            "integer" => raw
                .parse()
                .map(ConfigValue::Integer)
                .map_err(|_| AppError::Config(format!("'{key}': not an integer: {raw:?}"))),
            "boolean" => match raw {
                "true" | "1" => Ok(ConfigValue::Boolean(true)),
                "false" | "0" => Ok(ConfigValue::Boolean(false)),
                _ => Err(AppError::Config(format!("'{key}': not a boolean: {raw:?}"))),
            },
            "json" => serde_json::from_str(raw)
                .map(ConfigValue::Json)
                .map_err(|e| AppError::Config(format!("'{key}': bad json: {e}"))),
            other => Err(AppError::Config(format!("'{key}': unknown type tag: {other}"))),
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ConfigValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            ConfigValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

pub fn get(conn: &Connection, key: &str) -> Result<Option<ConfigValue>> {
    let mut stmt =
        conn.prepare("SELECT value, value_type FROM configuration WHERE key = ?1")?;
    let mut rows = stmt.query_map(params![key], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    match rows.next() {
        Some(row) => {
            let (raw, type_tag) = row?;
            ConfigValue::decode(key, &raw, &type_tag).map(Some)
        }
        None => Ok(None),
    }
}

pub fn set(conn: &Connection, key: &str, value: &ConfigValue) -> Result<()> {
    conn.execute(
        "INSERT INTO configuration (key, value, value_type, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            value_type = excluded.value_type,
            updated_at = excluded.updated_at",
        params![key, value.encode()?, value.type_tag()],
    )?;
    Ok(())
}

pub fn all(conn: &Connection) -> Result<Vec<(String, ConfigValue)>> {
    let mut stmt = conn.prepare("SELECT key, value, value_type FROM configuration ORDER BY key")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (key, raw, type_tag) = row?;
        let value = ConfigValue::decode(&key, &raw, &type_tag)?;
        entries.push((key, value));
    }
    Ok(entries)
}
