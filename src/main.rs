//! SCREENER: multi-factor instrument screener.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! builds the data providers, runs one screen with Ctrl+C cancellation,
//! and prints the ranked result table (or the full report as JSON).

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use screener::config;
use screener::data::build_providers;
use screener::engine::screener::{ScreenReport, Screener};
use screener::types::ProgressEvent;

const BANNER: &str = r#"
 ___  ___ _ __ ___  ___ _ __   ___ _ __
/ __|/ __| '__/ _ \/ _ \ '_ \ / _ \ '__|
\__ \ (__| | |  __/  __/ | | |  __/ |
|___/\___|_|  \___|\___|_| |_|\___|_|

  Value / Quality / Momentum / Options / Macro
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path =
        std::env::var("SCREENER_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::AppConfig::load(&config_path)?;

    init_logging();

    let json_output = std::env::var("SCREENER_JSON").is_ok();
    if !json_output {
        println!("{BANNER}");
    }

    // -- Initialise components -------------------------------------------

    let providers = build_providers(&cfg.providers)?;
    let screener = Screener::new(providers, cfg.engine_config());
    let request = cfg.screen_request();

    info!(
        config = %config_path,
        tickers = request.tickers.len(),
        start = %request.start,
        end = %request.end,
        filter = request.filter.is_some(),
        normalization = ?request.normalization,
        "SCREENER starting up"
    );

    // -- Cancellation and progress ---------------------------------------

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Shutdown signal received, cancelling screen");
            on_signal.cancel();
        }
    });

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let progress_log = tokio::spawn(async move {
        while let Some(event) = progress_rx.recv().await {
            info!(
                ticker = %event.ticker,
                completed = event.completed,
                total = event.total,
                disposition = %event.disposition,
                "Progress"
            );
        }
    });

    // -- Run -------------------------------------------------------------

    let outcome = screener
        .screen_until(&request, Some(progress_tx), cancel)
        .await;
    let _ = progress_log.await;
    let report = outcome?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_table(&report, cfg.screen.top_n);
    }

    info!(
        run_id = %report.run_id,
        elapsed_ms = report.elapsed_ms,
        cancelled = report.cancelled,
        "SCREENER finished."
    );

    Ok(())
}

/// Print the ranked results and everything that was left out.
fn print_table(report: &ScreenReport, top_n: usize) {
    println!(
        "{:>3}  {:<8} {:<20} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}",
        "#", "TICKER", "SECTOR", "VALUE", "QUALITY", "MOMENTUM", "OPTIONS", "MACRO", "TOTAL"
    );
    for (rank, r) in report.top(top_n).iter().enumerate() {
        let s = &r.score;
        println!(
            "{:>3}  {:<8} {:<20} {:>8.3} {:>8.3} {:>8.3} {:>8.3} {:>8.3} {:>8.3}",
            rank + 1,
            r.ticker,
            r.fundamentals.sector,
            s.value,
            s.quality,
            s.momentum,
            s.options,
            s.macro_tilt,
            s.total(),
        );
    }

    let excluded: Vec<_> = report
        .dispositions
        .iter()
        .filter(|d| !d.disposition.is_included())
        .collect();
    if !excluded.is_empty() {
        println!();
        println!("Excluded:");
        for d in excluded {
            println!("  {:<8} {}", d.ticker, d.disposition);
        }
    }

    println!();
    println!("{}", report.summary());
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("screener=info"));

    let json_logging = std::env::var("SCREENER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    }
}
