mod config;
mod data;
mod error;
mod features;
mod indicators;
mod ml;
mod pipeline;
mod signals;
mod types;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::{default_config_toml, load_config};
use data::JsonFileSource;
use error::PipelineError;
use features::SourceKind;
use pipeline::{Pipeline, PipelineRun};

#[derive(Parser)]
#[command(name = "vol-regime-monitor")]
#[command(author = "Trading Bot")]
#[command(version = "0.1.0")]
#[command(about = "Daily volatility regime monitor: HMM regimes plus GARCH forecast", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceArg {
    /// OHLC bars of a traded asset (Garman-Klass range estimator)
    Range,
    /// Bars whose close is an annualized volatility level in percent
    Level,
}

impl From<SourceArg> for SourceKind {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Range => SourceKind::RangeDerived,
            SourceArg::Level => SourceKind::DirectLevel,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fit both models on the bar file and print today's signal
    Run {
        /// EODHD-style JSON bar file
        #[arg(short, long)]
        bars: PathBuf,
        /// How bars become a volatility observation
        #[arg(short, long, value_enum, default_value = "range")]
        source: SourceArg,
        /// Print the report as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Show the regime assignment of the most recent bars
    Regimes {
        /// EODHD-style JSON bar file
        #[arg(short, long)]
        bars: PathBuf,
        #[arg(short, long, value_enum, default_value = "range")]
        source: SourceArg,
        /// Number of bars to show
        #[arg(short, long, default_value = "20")]
        last: usize,
    },
    /// Print the default configuration as TOML
    DefaultConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    if cli.json_logs {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .json()
            .with_target(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    match cli.command {
        Commands::DefaultConfig => {
            print!("{}", default_config_toml()?);
        }
        Commands::Run { bars, source, json } => {
            let (pipeline, source) = setup(cli.config.as_deref(), &bars, source.into())?;
            let report = abort_on_error(pipeline.run_from(&source), &bars)?;
            if report.forecast_degraded {
                warn!(
                    "Forecast degraded: {}",
                    report.fallback_reason.as_deref().unwrap_or("unknown")
                );
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("\n{}", report);
            }
        }
        Commands::Regimes { bars, source, last } => {
            let (pipeline, source) = setup(cli.config.as_deref(), &bars, source.into())?;
            let run = abort_on_error(pipeline.analyze_from(&source), &bars)?;
            print_history(&run, last);
        }
    }

    Ok(())
}

fn setup(config_path: Option<&Path>, bars: &Path, kind: SourceKind) -> Result<(Pipeline, JsonFileSource)> {
    let config = load_config(config_path)?;
    let ticker = config.data.ticker.clone();
    let source = JsonFileSource::new(bars).with_start_date(config.data.start_date);
    let pipeline = Pipeline::new(config, kind)?;

    info!(
        "Volatility Regime Monitor v0.1.0 ({}, {} source)",
        ticker,
        pipeline.source_kind().as_str()
    );
    Ok((pipeline, source))
}

fn abort_on_error<T>(result: Result<T, PipelineError>, bars: &Path) -> Result<T> {
    result.map_err(|e| {
        error!("Run aborted, no signal emitted: {}", e);
        anyhow::Error::new(e).context(format!("failed to analyze {}", bars.display()))
    })
}

fn print_history(run: &PipelineRun, last: usize) {
    println!("\n=== Regime History ({}) ===", run.report.ticker);
    println!(
        "{:<12} {:>10} {:>8} {:<18} {:>6} {:>6} {:>6}",
        "Date", "Close", "Vol", "Regime", "Low", "Med", "High"
    );
    for row in run.history(last) {
        println!(
            "{:<12} {:>10.2} {:>7.1}% {:<18} {:>5.1}% {:>5.1}% {:>5.1}%",
            row.date.to_string(),
            row.close,
            row.annualized_vol * 100.0,
            row.regime.as_str(),
            row.posteriors[0] * 100.0,
            row.posteriors[1] * 100.0,
            row.posteriors[2] * 100.0
        );
    }
    println!("\nCurrent signal: {} {}", run.report.descriptor.icon, run.report.signal);
}
