use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info};

use session_signals::config::EngineConfig;
use session_signals::trading_core::cache::{self, SessionData};
use session_signals::trading_core::trader::{calibrate, replay_session};
use session_signals::trading_core::{CalibrationCache, RealizedVolatility, SessionSummary, TradeSignal};

#[derive(Parser, Debug)]
#[command(name = "session-signals")]
#[command(about = "Intraday session signal engine - replay recorded sessions")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay recorded sessions and print every emitted signal as JSON
    Replay {
        /// Directory containing <date>.json.zst / <date>.csv session files
        #[arg(short, long, env = "SESSION_DATA_DIR", default_value = "data/sessions")]
        data_dir: PathBuf,

        /// Date filter: YYYYMMDD, a prefix like YYYYMM, or START:END
        #[arg(short = 'D', long)]
        date: Option<String>,

        /// JSON engine config (missing fields use defaults)
        #[arg(short, long, env = "SESSION_CONFIG")]
        config: Option<PathBuf>,

        /// Symbol for sessions without one (CSV input)
        #[arg(short, long)]
        symbol: Option<String>,
    },

    /// Convert CSV sessions into compressed JSON session files
    Pack {
        /// Directory containing <date>.csv files
        #[arg(short, long, env = "SESSION_DATA_DIR", default_value = "data/sessions")]
        data_dir: PathBuf,

        /// Output directory for <date>.json.zst files
        #[arg(short, long, default_value = "data/packed")]
        output_dir: PathBuf,

        /// Date filter: YYYYMMDD, a prefix like YYYYMM, or START:END
        #[arg(short = 'D', long)]
        date: Option<String>,

        /// Symbol recorded in the packed files
        #[arg(short, long, default_value = "NQ")]
        symbol: String,
    },
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Output<'a> {
    Signal {
        date: &'a str,
        #[serde(flatten)]
        signal: &'a TradeSignal,
    },
    Summary {
        date: &'a str,
        symbol: &'a str,
        volatility_fraction: f64,
        #[serde(flatten)]
        summary: &'a SessionSummary,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("session_signals=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Replay {
            data_dir,
            date,
            config,
            symbol,
        } => run_replay(data_dir, date, config, symbol).await,
        Commands::Pack {
            data_dir,
            output_dir,
            date,
            symbol,
        } => run_pack(data_dir, output_dir, date, symbol),
    }
}

async fn run_replay(
    data_dir: PathBuf,
    date: Option<String>,
    config_path: Option<PathBuf>,
    symbol: Option<String>,
) -> Result<()> {
    let mut config = match &config_path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(symbol) = symbol {
        config.session.symbol = symbol;
    }
    config.validate()?;
    let config = Arc::new(config);

    info!("Replaying sessions from {}", data_dir.display());
    info!("Date filter: {}", date.as_deref().unwrap_or("all"));

    let sessions = cache::load_all_sessions(&data_dir, date.as_deref(), &config.session.symbol)?;
    if sessions.is_empty() {
        info!("No sessions found");
        return Ok(());
    }

    let estimator = RealizedVolatility::new(config.volatility.clone());
    let mut calibration = CalibrationCache::from_config(&config.volatility);

    let mut tasks = JoinSet::new();
    for data in sessions {
        let volatility = calibrate(&data, &config.session.timeframe, &mut calibration, &estimator);
        let config = Arc::clone(&config);
        tasks.spawn(async move {
            let result = replay_session(&config, &data, volatility).await;
            (data, volatility, result)
        });
    }

    let mut total_signals = 0u64;
    let mut failed = 0usize;
    while let Some(joined) = tasks.join_next().await {
        let (data, volatility, result) = joined.context("Session task panicked")?;
        match result {
            Ok((signals, summary)) => {
                for signal in &signals {
                    print_json(&Output::Signal {
                        date: &data.date,
                        signal,
                    })?;
                }
                print_json(&Output::Summary {
                    date: &data.date,
                    symbol: &data.symbol,
                    volatility_fraction: volatility,
                    summary: &summary,
                })?;
                total_signals += summary.signals;
            }
            Err(e) => {
                failed += 1;
                error!("[{}] Replay failed: {:#}", data.date, e);
            }
        }
    }

    info!("Done: {} signals, {} failed sessions", total_signals, failed);
    Ok(())
}

fn run_pack(data_dir: PathBuf, output_dir: PathBuf, date: Option<String>, symbol: String) -> Result<()> {
    let sessions: Vec<SessionData> = cache::load_all_sessions(&data_dir, date.as_deref(), &symbol)?;
    for data in &sessions {
        let path = cache::write_session(data, &output_dir)?;
        info!("[{}] Packed {} candles -> {}", data.date, data.candles.len(), path.display());
    }
    info!("Packed {} sessions", sessions.len());
    Ok(())
}

fn print_json(output: &Output<'_>) -> Result<()> {
    println!("{}", serde_json::to_string(output)?);
    Ok(())
}
