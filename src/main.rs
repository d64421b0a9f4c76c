//! Econwatch CLI
//!
//! Thin entry points over the service layer: trigger a full or
//! single-indicator update, re-validate stored data, purge by
//! retention, inspect the latest values and the run history.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use econwatch::db::sqlite::models::RunStatus;
use econwatch::services::collection::{CollectionOptions, CollectionService};
use econwatch::services::maintenance::MaintenanceService;
use econwatch::services::validation::ValidationService;
use econwatch::services::CancelFlag;
use econwatch::sources::DateRange;
use econwatch::state::AppState;

#[derive(Debug, Parser)]
#[command(name = "econwatch", version, about = "Brazilian economic indicator collector")]
struct Cli {
    /// SQLite database path
    #[arg(long, env = "ECONWATCH_DB", default_value = "econwatch.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the collection pipeline (all active indicators by default)
    Update {
        /// Collect a single indicator by code
        #[arg(long)]
        indicator: Option<String>,

        /// Bypass and refresh the fetch cache
        #[arg(long)]
        force: bool,

        /// Range start (YYYY-MM-DD); defaults to the configured lookback
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Range end (YYYY-MM-DD); defaults to today
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Re-validate stored observations without fetching
    Validate {
        /// Validate a single indicator by code
        #[arg(long)]
        indicator: Option<String>,

        #[arg(long)]
        from: Option<NaiveDate>,

        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Purge observations older than the retention window
    Cleanup {
        /// Override the configured retention in days
        #[arg(long)]
        retention_days: Option<i64>,
    },
    /// Latest value and quality snapshot per indicator
    Status,
    /// Recent run history
    Runs {
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    econwatch::init_tracing();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let state = AppState::new(&cli.db)?;

    match cli.command {
        Command::Update {
            indicator,
            force,
            from,
            to,
        } => {
            let service = CollectionService::new(
                Arc::clone(&state.db),
                Arc::clone(&state.sources),
                Arc::clone(&state.cache),
                state.config.clone(),
            );
            let opts = CollectionOptions {
                force_refresh: force,
                range: explicit_range(from, to, state.config.default_lookback_days),
            };

            let cancel = CancelFlag::new();
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::warn!(
                            "Cancellation requested; in-flight indicators will finish"
                        );
                        cancel.cancel();
                    }
                });
            }

            let summary = match indicator {
                Some(code) => service.collect_one(&code, opts, cancel).await?,
                None => service.collect_all(opts, cancel).await?,
            };

            for outcome in &summary.outcomes {
                match &outcome.error {
                    Some(error) => println!("{:<20} FAILED  {}", outcome.code, error),
                    None => println!(
                        "{:<20} ok      {} records, score {:.2}",
                        outcome.code,
                        outcome.records_written,
                        outcome.quality_score.unwrap_or(0.0)
                    ),
                }
            }
            println!(
                "run {} {}: {}/{} indicators, {} observations",
                summary.run_id,
                summary.status.as_str(),
                summary.successful_indicators,
                summary.total_indicators,
                summary.total_observations
            );

            Ok(if summary.status == RunStatus::Completed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        Command::Validate {
            indicator,
            from,
            to,
        } => {
            let service = ValidationService::new(Arc::clone(&state.db), state.config.clone());
            let range = explicit_range(from, to, state.config.default_lookback_days);
            let summary = match indicator {
                Some(code) => service.validate_one(&code, range)?,
                None => service.validate_all(range)?,
            };

            for quality in &summary.per_indicator {
                println!(
                    "{:<20} {:>5} records  score {:.2}  {}",
                    quality.code,
                    quality.records,
                    quality.score,
                    if quality.is_validated { "ok" } else { "BELOW THRESHOLD" }
                );
            }
            println!("overall quality: {:.2}", summary.overall_score);

            Ok(if summary.passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        Command::Cleanup { retention_days } => {
            let service = MaintenanceService::new(
                Arc::clone(&state.db),
                Arc::clone(&state.cache),
                state.config.clone(),
            );
            let summary = service.purge_old_data(retention_days)?;
            println!(
                "purged {} observations, dropped {} cache entries (run {})",
                summary.observations_deleted, summary.cache_entries_dropped, summary.run_id
            );
            Ok(ExitCode::SUCCESS)
        }

        Command::Status => {
            let latest = state.db.latest_per_indicator()?;
            if latest.is_empty() {
                println!("no observations stored yet");
            }
            for row in &latest {
                println!(
                    "{:<20} {} {:>12.4} {}  score {:.2}{}",
                    row.indicator_code,
                    row.reference_date,
                    row.value,
                    row.unit,
                    row.quality_score,
                    if row.is_validated { "" } else { "  (unvalidated)" }
                );
            }

            let summary = state.db.quality_summary()?;
            for (code, log) in &summary {
                println!(
                    "{:<20} checked {}  {} records, {} outliers, {} nulls",
                    code,
                    log.checked_at.format("%Y-%m-%d %H:%M"),
                    log.total_records,
                    log.outlier_count,
                    log.null_count
                );
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Runs { limit } => {
            for run in state.db.recent_runs(limit)? {
                println!(
                    "{} {:<8} {:<9} started {}  {}/{} ok, {} observations{}",
                    run.run_id,
                    run.operation.as_str(),
                    run.status.as_str(),
                    run.start_time.format("%Y-%m-%d %H:%M:%S"),
                    run.successful_indicators,
                    run.total_indicators,
                    run.total_observations,
                    run.error_message
                        .as_deref()
                        .map(|e| format!("  [{e}]"))
                        .unwrap_or_default()
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Build an explicit range when the user passed --from/--to; fall back
/// to the service default otherwise.
fn explicit_range(
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    lookback_days: i64,
) -> Option<DateRange> {
    if from.is_none() && to.is_none() {
        return None;
    }
    let end = to.unwrap_or_else(|| chrono::Utc::now().date_naive());
    let start = from.unwrap_or(end - chrono::Duration::days(lookback_days));
    Some(DateRange { start, end })
}
