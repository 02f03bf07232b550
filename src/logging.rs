// src/logging.rs

//! Subscriber setup for the `stackdag` binary.
//!
//! The level comes from `--log-level`, then `STACKDAG_LOG`, then `info`.
//! It applies to this crate's targets; everything else is capped at
//! `warn`. Output goes to stderr so stdout only carries plans and reports.

use anyhow::{Context, Result};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::LogLevel;

pub const LOG_ENV_VAR: &str = "STACKDAG_LOG";

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let level = resolve_level(cli_level, std::env::var(LOG_ENV_VAR).ok().as_deref());
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .parse(format!("stackdag={level}"))
        .context("invalid log filter")?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialise logging: {e}"))
}

fn resolve_level(cli_level: Option<LogLevel>, env_value: Option<&str>) -> LevelFilter {
    if let Some(lvl) = cli_level {
        return LevelFilter::from(lvl);
    }
    env_value
        .and_then(|v| match v.trim() {
            // Common spelling that `LevelFilter` does not accept.
            w if w.eq_ignore_ascii_case("warning") => Some(LevelFilter::WARN),
            other => other.parse().ok(),
        })
        .unwrap_or(LevelFilter::INFO)
}

impl From<LogLevel> for LevelFilter {
    fn from(lvl: LogLevel) -> Self {
        match lvl {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}
