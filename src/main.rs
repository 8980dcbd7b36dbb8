mod config;
mod error;
mod models;
mod run;
mod utils;

use std::process::ExitCode;

use anyhow::Context;
use chrono::Local;
use dotenv::dotenv;
use log::{error, info, warn};
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

use crate::config::AppConfig;
use crate::run::run;
use crate::utils::web_portal::WebPortal;

// Single run, no parallelism: every network call is awaited in turn.
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Loads environment variables from a `.env` file, if present.
    dotenv().ok();

    init_logging();

    match try_main().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

// Terminal logging on mixed output with automatic colors. LOG_LEVEL picks
// the filter, info when unset or unreadable.
fn init_logging() {
    let raw = std::env::var("LOG_LEVEL").ok();
    let level = raw
        .as_deref()
        .and_then(|l| l.trim().parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);

    if let Err(e) = TermLogger::init(level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto) {
        eprintln!("Could not initialize logging: {e}");
        return;
    }
    if let Some(raw) = raw.filter(|r| r.trim().parse::<LevelFilter>().is_err()) {
        warn!("Unknown LOG_LEVEL {:?}, using info", raw);
    }
}

async fn try_main() -> anyhow::Result<u8> {
    let config = AppConfig::from_env().context("Invalid configuration")?;
    let today = Local::now().date_naive();

    let summary = run(&config, &WebPortal, today)
        .await
        .context("Could not fetch grades")?;

    info!("Done.");
    Ok(summary.exit_code())
}
