//! Backtest configuration loading and preparation.
//!
//! Configs are plain JSON. Multiple files merge in order (later files win),
//! CLI overrides sit on top, and one prepared config is produced per symbol
//! in a comma-separated symbol list. Validation failures here abort startup
//! with a descriptive message; nothing downstream re-checks them.

use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::exchange::{ExchangeClient, ExchangeError};
use crate::market::MarketSettings;
use crate::strategy::StrategyParams;

const MARKET_SETTINGS_FILE: &str = "market_specific_settings.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config file {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("missing config key: {0}")]
    MissingKey(&'static str),
    #[error("invalid date {0}; expected e.g. 2021-03-01 or 2021-03-01T12:00")]
    InvalidDate(String),
    #[error("unknown market type {0}; expected futures or spot")]
    UnknownMarketType(String),
    #[error("using ~ to indicate the home directory is not supported")]
    HomeDirNotSupported,
    #[error("bybit linear USDT markets are not supported for backtesting")]
    UnsupportedVenueMarket,
    #[error("user {0} not found in {1}")]
    UnknownUser(String, PathBuf),
    #[error("no market settings available: adapter fetch failed ({fetch}) and no cache at {path}")]
    MissingMarketSettings {
        path: PathBuf,
        fetch: String,
    },
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketType {
    Futures,
    Spot,
}

impl MarketType {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s {
            "futures" => Ok(MarketType::Futures),
            "spot" => Ok(MarketType::Spot),
            other => Err(ConfigError::UnknownMarketType(other.to_string())),
        }
    }
}

/// Values the CLI may lay over the merged config files.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub symbol: Option<String>,
    pub user: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub starting_balance: Option<f64>,
    pub market_type: Option<String>,
    pub base_dir: Option<String>,
}

/// One fully prepared per-symbol backtest configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub symbol: String,
    pub user: String,
    pub exchange: String,
    pub start_date: String,
    pub end_date: String,
    pub start_ts: i64,
    pub end_ts: i64,
    pub starting_balance: f64,
    pub market_type: MarketType,
    pub base_dir: PathBuf,
    pub session_name: String,
    pub caches_dirpath: PathBuf,
    pub optimize_dirpath: PathBuf,
    pub plots_dirpath: PathBuf,
    pub latency_simulation_ms: i64,
    pub periodic_gain_n_days: f64,
    pub starting_configs: Option<PathBuf>,
    /// Optimiser search ranges, `param -> [lo, hi]`.
    pub ranges: HashMap<String, [f64; 2]>,
    pub strategy: StrategyParams,
    /// Populated by [`add_market_settings`].
    pub market: Option<MarketSettings>,
}

impl BacktestConfig {
    pub fn spot(&self) -> bool {
        self.market_type == MarketType::Spot
    }
}

/// Load and merge JSON config files; later files override earlier ones
/// key by key.
pub fn load_config_files(paths: &[PathBuf]) -> Result<Value, ConfigError> {
    let mut merged = Value::Object(Default::default());
    for path in paths {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Load {
            path: path.clone(),
            source,
        })?;
        let value: Value = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        if let (Value::Object(into), Value::Object(from)) = (&mut merged, value) {
            into.extend(from);
        }
    }
    Ok(merged)
}

fn str_key(config: &Value, key: &'static str) -> Result<String, ConfigError> {
    config
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(ConfigError::MissingKey(key))
}

/// Parse a config date into epoch milliseconds, UTC assumed.
pub fn parse_date_ms(s: &str) -> Result<i64, ConfigError> {
    let datetime = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
        })
        .map_err(|_| ConfigError::InvalidDate(s.to_string()))?;
    Ok(Utc.from_utc_datetime(&datetime).timestamp_millis())
}

fn session_token(date: &str) -> String {
    date.replace([' ', ':', '.'], "")
}

fn make_dirpath(path: PathBuf) -> Result<PathBuf, ConfigError> {
    std::fs::create_dir_all(&path).map_err(|source| ConfigError::CreateDir {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// The exchange each user's API key belongs to, from `api-keys.json`.
pub fn load_exchange_for_user(user: &str, keyfile: &Path) -> Result<String, ConfigError> {
    let text = std::fs::read_to_string(keyfile).map_err(|source| ConfigError::Load {
        path: keyfile.to_path_buf(),
        source,
    })?;
    let keys: Value = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: keyfile.to_path_buf(),
        source,
    })?;
    keys.get(user)
        .and_then(|entry| entry.get("exchange"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ConfigError::UnknownUser(user.to_string(), keyfile.to_path_buf()))
}

/// Expand the merged config + CLI overrides into one prepared config per
/// symbol.
pub fn prep_config(
    mut config: Value,
    overrides: &CliOverrides,
    keyfile: &Path,
) -> Result<Vec<BacktestConfig>, ConfigError> {
    if let Value::Object(map) = &mut config {
        let pairs: [(&str, Option<Value>); 7] = [
            ("symbol", overrides.symbol.clone().map(Value::from)),
            ("user", overrides.user.clone().map(Value::from)),
            ("start_date", overrides.start_date.clone().map(Value::from)),
            ("end_date", overrides.end_date.clone().map(Value::from)),
            (
                "starting_balance",
                overrides.starting_balance.map(Value::from),
            ),
            ("market_type", overrides.market_type.clone().map(Value::from)),
            ("base_dir", overrides.base_dir.clone().map(Value::from)),
        ];
        for (key, value) in pairs {
            if let Some(value) = value {
                map.insert(key.to_string(), value);
            }
        }
    }

    let symbols = str_key(&config, "symbol")?;
    let user = str_key(&config, "user")?;
    let start_date = str_key(&config, "start_date")?;
    let end_date = str_key(&config, "end_date")?;
    let market_type = MarketType::parse(
        config
            .get("market_type")
            .and_then(Value::as_str)
            .unwrap_or("futures"),
    )?;
    let base_dir = config
        .get("base_dir")
        .and_then(Value::as_str)
        .unwrap_or("backtests")
        .to_string();
    if base_dir.starts_with('~') {
        return Err(ConfigError::HomeDirNotSupported);
    }
    let starting_balance = config
        .get("starting_balance")
        .and_then(Value::as_f64)
        .ok_or(ConfigError::MissingKey("starting_balance"))?;
    let latency_simulation_ms = config
        .get("latency_simulation_ms")
        .and_then(Value::as_i64)
        .unwrap_or(1_000);
    let periodic_gain_n_days = config
        .get("periodic_gain_n_days")
        .and_then(Value::as_f64)
        .unwrap_or(7.0);
    let starting_configs = config
        .get("starting_configs")
        .and_then(Value::as_str)
        .map(PathBuf::from);
    let ranges: HashMap<String, [f64; 2]> = match config.get("ranges") {
        Some(value) => {
            serde_json::from_value(value.clone()).map_err(|source| ConfigError::Parse {
                path: PathBuf::from("<merged config>"),
                source,
            })?
        }
        None => HashMap::new(),
    };
    let mut strategy: StrategyParams = serde_json::from_value(
        config
            .get("strategy")
            .cloned()
            .ok_or(ConfigError::MissingKey("strategy"))?,
    )
    .map_err(|source| ConfigError::Parse {
        path: PathBuf::from("<merged config>"),
        source,
    })?;

    let exchange = load_exchange_for_user(&user, keyfile)?;
    if market_type == MarketType::Spot {
        strategy.force_spot_sides();
    }

    let start_ts = parse_date_ms(&start_date)?;
    let end_ts = parse_date_ms(&end_date)?;
    let session_name = format!("{}_{}", session_token(&start_date), session_token(&end_date));

    let mut prepared = Vec::new();
    for symbol in symbols.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if exchange == "bybit" && symbol.ends_with("USDT") {
            return Err(ConfigError::UnsupportedVenueMarket);
        }
        let venue_dir = if market_type == MarketType::Spot {
            format!("{exchange}_spot")
        } else {
            exchange.clone()
        };
        let symbol_dir = Path::new(&base_dir).join(&venue_dir).join(symbol);
        prepared.push(BacktestConfig {
            symbol: symbol.to_string(),
            user: user.clone(),
            exchange: exchange.clone(),
            start_date: start_date.clone(),
            end_date: end_date.clone(),
            start_ts,
            end_ts,
            starting_balance,
            market_type,
            base_dir: PathBuf::from(&base_dir),
            session_name: session_name.clone(),
            caches_dirpath: make_dirpath(symbol_dir.join("caches"))?,
            optimize_dirpath: make_dirpath(symbol_dir.join("optimize"))?,
            plots_dirpath: make_dirpath(symbol_dir.join("plots"))?,
            latency_simulation_ms,
            periodic_gain_n_days,
            starting_configs: starting_configs.clone(),
            ranges: ranges.clone(),
            strategy: strategy.clone(),
            market: None,
        });
    }
    Ok(prepared)
}

/// Fetch market settings from the adapter, falling back to the per-symbol
/// cache when the fetch fails; a successful fetch refreshes the cache.
/// Also clamps the `pbr_limit` optimiser range to the venue's max leverage.
pub async fn add_market_settings(
    config: &mut BacktestConfig,
    client: Option<&dyn ExchangeClient>,
) -> Result<(), ConfigError> {
    let cache_path = config.caches_dirpath.join(MARKET_SETTINGS_FILE);
    let fetched: Result<MarketSettings, ExchangeError> = match client {
        Some(client) => client.fetch_market_spec(&config.symbol).await,
        None => Err(ExchangeError::Transport("no adapter configured".into())),
    };
    let settings = match fetched {
        Ok(settings) => {
            if let Ok(json) = serde_json::to_string_pretty(&settings) {
                if let Err(e) = std::fs::write(&cache_path, json) {
                    warn!(path = %cache_path.display(), error = %e, "failed to cache market settings");
                }
            }
            settings
        }
        Err(fetch_err) => {
            info!(error = %fetch_err, "market settings fetch failed, trying cache");
            let text =
                std::fs::read_to_string(&cache_path).map_err(|_| {
                    ConfigError::MissingMarketSettings {
                        path: cache_path.clone(),
                        fetch: fetch_err.to_string(),
                    }
                })?;
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: cache_path.clone(),
                source,
            })?
        }
    };

    if let Some(range) = config.ranges.get_mut("pbr_limit") {
        range[1] = range[1].min(settings.max_leverage);
        range[0] = range[0].min(range[1]);
    }
    config.market = Some(settings);
    Ok(())
}

/// Candidate strategy configs to evaluate: a single file, or every `*.json`
/// in a directory. Unreadable candidates are skipped with a warning.
pub fn load_starting_configs(path: &Path) -> Vec<(String, StrategyParams)> {
    let mut paths: Vec<PathBuf> = if path.is_dir() {
        match std::fs::read_dir(path) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().map_or(false, |ext| ext == "json"))
                .collect(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not list starting configs");
                Vec::new()
            }
        }
    } else {
        vec![path.to_path_buf()]
    };
    paths.sort();
    let mut configs = Vec::new();
    for path in paths {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("candidate")
            .to_string();
        match std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str(&text).map_err(|e| e.to_string()))
        {
            Ok(params) => configs.push((name, params)),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable starting config"),
        }
    }
    configs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_ms() {
        assert_eq!(parse_date_ms("1970-01-01").unwrap(), 0);
        assert_eq!(parse_date_ms("1970-01-01T01:00").unwrap(), 3_600_000);
        assert!(parse_date_ms("yesterday").is_err());
    }

    #[test]
    fn test_market_type_parse() {
        assert_eq!(MarketType::parse("futures").unwrap(), MarketType::Futures);
        assert_eq!(MarketType::parse("spot").unwrap(), MarketType::Spot);
        assert!(MarketType::parse("margin").is_err());
    }

    #[test]
    fn test_session_token_strips_separators() {
        assert_eq!(session_token("2021-03-01 12:00"), "2021-03-011200");
    }

    #[test]
    fn test_merge_later_file_wins() {
        let dir = std::env::temp_dir().join("grid_lab_config_test");
        std::fs::create_dir_all(&dir).unwrap();
        let a = dir.join("a.json");
        let b = dir.join("b.json");
        std::fs::write(&a, r#"{"symbol": "BTCUSD", "starting_balance": 100.0}"#).unwrap();
        std::fs::write(&b, r#"{"starting_balance": 500.0}"#).unwrap();
        let merged = load_config_files(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(merged["symbol"], "BTCUSD");
        assert_eq!(merged["starting_balance"], 500.0);
        std::fs::remove_file(a).unwrap();
        std::fs::remove_file(b).unwrap();
    }

    #[test]
    fn test_home_dir_rejected() {
        let config = serde_json::json!({
            "symbol": "BTCUSD",
            "user": "tester",
            "start_date": "2021-01-01",
            "end_date": "2021-02-01",
            "starting_balance": 1000.0,
            "base_dir": "~/backtests",
        });
        let err = prep_config(config, &CliOverrides::default(), Path::new("api-keys.json"));
        assert!(matches!(err, Err(ConfigError::HomeDirNotSupported)));
    }
}
