//! Econwatch - Brazilian economic indicator collector
//!
//! Periodically pulls published indicators (Selic, IPCA, PIB, cambio,
//! desemprego, resultado primario) from government APIs, validates
//! their quality and stores them in SQLite for the dashboard to read.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod normalize;
pub mod quality;
pub mod services;
pub mod sources;
pub mod state;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging once at startup
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "econwatch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
