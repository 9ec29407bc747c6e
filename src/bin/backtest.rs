//! Backtest runner.
//!
//! Merges the backtest and optimize config files, applies CLI overrides,
//! loads cached ticks for each symbol and replays every candidate strategy
//! config against them.

use anyhow::{Context, Result};
use clap::Parser;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use grid_lab::backtesting::{
    write_fills_csv, write_report_json, BacktestEngine, BacktestParams, BacktestReport,
};
use grid_lab::config::{
    self, add_market_settings, load_config_files, load_starting_configs, BacktestConfig,
    CliOverrides,
};
use grid_lab::data::{load_cached_ticks, sample_ticks, DEFAULT_SAMPLE_MS};
use grid_lab::market::Tick;
use grid_lab::strategy::StrategyParams;

#[derive(Parser)]
#[command(name = "backtest", about = "Replay cached ticks against grid strategy configs")]
struct Args {
    /// Live strategy config to evaluate; defaults to the strategy embedded
    /// in the backtest config.
    live_config_path: Option<PathBuf>,

    #[arg(
        short = 'b',
        long = "backtest_config",
        default_value = "configs/backtest/default.json"
    )]
    backtest_config_path: PathBuf,

    #[arg(
        short = 'o',
        long = "optimize_config",
        default_value = "configs/optimize/default.json"
    )]
    optimize_config_path: PathBuf,

    /// Only verify tick caches are present, do not run.
    #[arg(short = 'd', long = "download-only")]
    download_only: bool,

    /// Override symbol from the backtest config.
    #[arg(short = 's', long)]
    symbol: Option<String>,

    /// Override user (account name) from the backtest config.
    #[arg(short = 'u', long)]
    user: Option<String>,

    #[arg(long)]
    start_date: Option<String>,

    #[arg(long)]
    end_date: Option<String>,

    #[arg(long)]
    starting_balance: Option<f64>,

    /// futures (default) or spot.
    #[arg(short = 'm', long)]
    market_type: Option<String>,

    /// Base output directory for results.
    #[arg(long = "base_dir", visible_alias = "bd", default_value = "backtests")]
    base_dir: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    info!(version = grid_lab::VERSION, "grid_lab backtester");

    let merged = load_config_files(&[
        args.backtest_config_path.clone(),
        args.optimize_config_path.clone(),
    ])?;
    let overrides = CliOverrides {
        symbol: args.symbol.clone(),
        user: args.user.clone(),
        start_date: args.start_date.clone(),
        end_date: args.end_date.clone(),
        starting_balance: args.starting_balance,
        market_type: args.market_type.clone(),
        base_dir: Some(args.base_dir.clone()),
    };
    let mut configs = config::prep_config(merged, &overrides, Path::new("api-keys.json"))?;

    for config in &mut configs {
        // No venue adapter is wired into the runner; settings come from the
        // per-symbol cache written by a previous live session or download.
        add_market_settings(config, None)
            .await
            .with_context(|| format!("market settings for {}", config.symbol))?;
        run_symbol(config, args.live_config_path.as_deref(), args.download_only)?;
    }
    Ok(())
}

/// Directory the tick downloader fills for one symbol.
fn ticks_dir(config: &BacktestConfig) -> PathBuf {
    let market_dir = if config.spot() {
        "agg_trades_spot"
    } else {
        "agg_trades_futures"
    };
    Path::new("historical_data")
        .join(&config.exchange)
        .join(market_dir)
        .join(&config.symbol)
}

fn run_symbol(
    config: &BacktestConfig,
    live_config_path: Option<&Path>,
    download_only: bool,
) -> Result<()> {
    let dir = ticks_dir(config);
    info!(symbol = %config.symbol, dir = %dir.display(), "loading tick caches");
    let raw_ticks = load_cached_ticks(&dir, config.start_ts, config.end_ts)
        .with_context(|| format!("tick caches for {}", config.symbol))?;
    let ticks = sample_ticks(&raw_ticks, DEFAULT_SAMPLE_MS);
    info!(
        raw = raw_ticks.len(),
        samples = ticks.len(),
        "sampled tick stream"
    );
    if download_only {
        info!(symbol = %config.symbol, "tick caches verified, skipping replay");
        return Ok(());
    }

    let candidates = gather_candidates(config, live_config_path)?;
    info!(n = candidates.len(), "evaluating candidate configs");

    let spec = config
        .market
        .as_ref()
        .map(|m| m.spec())
        .context("market settings missing after preparation")?;
    let maker_fee = config.market.as_ref().map_or(0.0, |m| m.maker_fee);
    let params = BacktestParams {
        starting_balance: config.starting_balance,
        latency_simulation_ms: config.latency_simulation_ms,
        maker_fee,
    };
    let span_ms = ticks.last().map_or(0, |t| t.timestamp) - ticks.first().map_or(0, |t| t.timestamp);

    let results: Vec<(String, Result<BacktestReport>)> = candidates
        .into_par_iter()
        .map(|(name, strategy)| {
            let report = evaluate_candidate(
                config, &name, strategy, spec, params, &ticks, span_ms,
            );
            (name, report)
        })
        .collect();

    for (name, report) in results {
        match report {
            Ok(report) => info!(candidate = %name, "\n{}", report.summary_lines()),
            Err(e) => warn!(candidate = %name, error = %e, "candidate failed"),
        }
    }
    Ok(())
}

fn gather_candidates(
    config: &BacktestConfig,
    live_config_path: Option<&Path>,
) -> Result<Vec<(String, StrategyParams)>> {
    let mut candidates = Vec::new();
    if let Some(path) = live_config_path {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("live config {}", path.display()))?;
        let params: StrategyParams = serde_json::from_str(&text)
            .with_context(|| format!("live config {}", path.display()))?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("live_config")
            .to_string();
        candidates.push((name, params));
    }
    if let Some(dir) = &config.starting_configs {
        candidates.extend(load_starting_configs(dir));
    }
    if candidates.is_empty() {
        candidates.push(("config".to_string(), config.strategy.clone()));
    }
    Ok(candidates)
}

#[allow(clippy::too_many_arguments)]
fn evaluate_candidate(
    config: &BacktestConfig,
    name: &str,
    mut strategy: StrategyParams,
    spec: grid_lab::MarketSpec,
    params: BacktestParams,
    ticks: &[Tick],
    span_ms: i64,
) -> Result<BacktestReport> {
    if config.spot() {
        strategy.force_spot_sides();
    }
    let engine = BacktestEngine::new(spec, strategy, params);
    let (fills, summary) = engine.run(ticks)?;
    let report = BacktestReport::from_run(
        &fills,
        &summary,
        params.starting_balance,
        span_ms,
        config.periodic_gain_n_days,
    );

    let session_dir = config.plots_dirpath.join(&config.session_name);
    std::fs::create_dir_all(&session_dir)
        .with_context(|| format!("session dir {}", session_dir.display()))?;
    write_fills_csv(&session_dir.join(format!("fills_{name}.csv")), &fills)?;
    write_report_json(&session_dir.join(format!("result_{name}.json")), &report)?;
    Ok(report)
}
