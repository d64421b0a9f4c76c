//! SQLite database migrations
//!
//! Two namespaces share one file: economic data (sources, indicators,
//! observations) and operational metadata (collection runs, quality
//! logs, configuration).

use rusqlite::Connection;

use crate::error::Result;

/// Run all database migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    run_migration(conn, "001_sources", CREATE_SOURCES_TABLE)?;
    run_migration(conn, "002_indicators", CREATE_INDICATORS_TABLE)?;
    run_migration(conn, "003_observations", CREATE_OBSERVATIONS_TABLE)?;
    run_migration(conn, "004_collection_runs", CREATE_COLLECTION_RUNS_TABLE)?;
    run_migration(conn, "005_quality_logs", CREATE_QUALITY_LOGS_TABLE)?;
    run_migration(conn, "006_configuration", CREATE_CONFIGURATION_TABLE)?;
    run_migration(conn, "007_seed_catalog", SEED_CATALOG)?;

    tracing::info!("Database migrations completed");
    Ok(())
}

fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM migrations WHERE name = ?)",
        [name],
        |row| row.get(0),
    )?;

    if !exists {
        tracing::info!("Running migration: {}", name);
        conn.execute_batch(sql)?;
        conn.execute("INSERT INTO migrations (name) VALUES (?)", [name])?;
    }

    Ok(())
}

const CREATE_SOURCES_TABLE: &str = r#"
CREATE TABLE sources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    base_url TEXT NOT NULL,
    value_locale TEXT NOT NULL DEFAULT 'pt-br',
    timeout_secs INTEGER,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

const CREATE_INDICATORS_TABLE: &str = r#"
CREATE TABLE indicators (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER NOT NULL REFERENCES sources(id),
    code TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    unit TEXT NOT NULL,
    frequency TEXT NOT NULL,
    external_code TEXT NOT NULL,
    freshness_limit_days INTEGER NOT NULL DEFAULT 30,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_indicators_source ON indicators(source_id);
"#;

const CREATE_OBSERVATIONS_TABLE: &str = r#"
CREATE TABLE observations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    indicator_id INTEGER NOT NULL REFERENCES indicators(id),
    reference_date TEXT NOT NULL,
    value REAL NOT NULL,
    raw_value TEXT NOT NULL,
    collection_timestamp TEXT NOT NULL,
    quality_score REAL NOT NULL DEFAULT 0.0,
    is_validated INTEGER NOT NULL DEFAULT 0,
    notes TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(indicator_id, reference_date)
);
CREATE INDEX IF NOT EXISTS idx_observations_indicator_date
    ON observations(indicator_id, reference_date);
CREATE INDEX IF NOT EXISTS idx_observations_created ON observations(created_at);
"#;

const CREATE_COLLECTION_RUNS_TABLE: &str = r#"
CREATE TABLE collection_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL UNIQUE,
    operation TEXT NOT NULL DEFAULT 'collect',
    status TEXT NOT NULL DEFAULT 'running',
    start_time TEXT NOT NULL,
    end_time TEXT,
    total_indicators INTEGER NOT NULL DEFAULT 0,
    successful_indicators INTEGER NOT NULL DEFAULT 0,
    failed_indicators INTEGER NOT NULL DEFAULT 0,
    total_observations INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    execution_metadata TEXT
);
CREATE INDEX IF NOT EXISTS idx_collection_runs_start ON collection_runs(start_time);
"#;

const CREATE_QUALITY_LOGS_TABLE: &str = r#"
CREATE TABLE quality_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    indicator_id INTEGER NOT NULL REFERENCES indicators(id),
    checked_at TEXT NOT NULL,
    total_records INTEGER NOT NULL,
    null_count INTEGER NOT NULL DEFAULT 0,
    outlier_count INTEGER NOT NULL DEFAULT 0,
    quality_score REAL NOT NULL,
    is_validated INTEGER NOT NULL DEFAULT 0,
    errors TEXT NOT NULL DEFAULT '[]',
    warnings TEXT NOT NULL DEFAULT '[]',
    outlier_dates TEXT NOT NULL DEFAULT '[]'
);
CREATE INDEX IF NOT EXISTS idx_quality_logs_indicator ON quality_logs(indicator_id, checked_at);
"#;

const CREATE_CONFIGURATION_TABLE: &str = r#"
CREATE TABLE configuration (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    value_type TEXT NOT NULL CHECK (value_type IN ('string', 'integer', 'boolean', 'json')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

// Reference catalog: the government sources and the indicator series
// tracked out of the box. INSERT OR IGNORE keeps re-runs harmless.
const SEED_CATALOG: &str = r#"
INSERT OR IGNORE INTO sources (code, name, base_url, value_locale) VALUES
    ('bcb', 'Banco Central do Brasil (SGS)', 'https://api.bcb.gov.br/dados/serie/bcdata.sgs', 'pt-br'),
    ('ibge', 'IBGE (SIDRA)', 'https://apisidra.ibge.gov.br/values', 'pt-br'),
    ('tesouro', 'Tesouro Nacional (Tesouro Transparente)', 'https://apidatalake.tesouro.gov.br/ords/siafi/tt', 'pt-br');

INSERT OR IGNORE INTO indicators
    (source_id, code, name, unit, frequency, external_code, freshness_limit_days) VALUES
    ((SELECT id FROM sources WHERE code = 'bcb'),
     'selic', 'Taxa Selic', '% a.a.', 'daily', '11', 7),
    ((SELECT id FROM sources WHERE code = 'bcb'),
     'cambio_ptax_venda', 'Taxa de Cambio USD/BRL - PTAX Venda', 'R$/US$', 'daily', '1', 7),
    ((SELECT id FROM sources WHERE code = 'ibge'),
     'ipca', 'IPCA - Variacao Mensal', '% a.m.', 'monthly', 't/1737/n1/all/v/63/p', 45),
    ((SELECT id FROM sources WHERE code = 'ibge'),
     'pib', 'PIB - Variacao Trimestral', '% a.t.', 'quarterly', 't/5932/n1/all/v/6564/p', 150),
    ((SELECT id FROM sources WHERE code = 'ibge'),
     'desemprego', 'Taxa de Desocupacao', '%', 'monthly', 't/6381/n1/all/v/4099/p', 75),
    ((SELECT id FROM sources WHERE code = 'tesouro'),
     'deficit_primario', 'Resultado Primario do Governo Central', 'R$ bi', 'monthly', 'resultado_primario', 75);
"#;
