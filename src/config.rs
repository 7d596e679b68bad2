//! Runtime Configuration
//! Mission: Every tunable in one place, loaded from the environment

use crate::profit_taker::ProfitTakerConfig;
use crate::risk::manager::RiskConfig;
use crate::risk::sizer::SizingConfig;
use serde::{Deserialize, Serialize};

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        .unwrap_or(default)
}

/// Full configuration surface of the trading core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Exchange access
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,

    // Position sizing
    pub kelly_fraction: f64,
    pub max_position_per_market: f64,
    pub max_cluster_allocation: f64,
    pub min_position_size: f64,
    pub correlation_adjustment_per_position: f64,

    // Signal generation
    pub min_edge_threshold: f64,
    pub safety_margin: f64,
    pub signal_ttl_seconds: i64,

    // Risk limits
    pub max_drawdown_warning: f64,
    pub max_drawdown_reduce: f64,
    pub max_drawdown_stop: f64,
    pub max_cluster_exposure: f64,
    pub max_single_position: f64,
    pub min_days_to_expiration: f64,
    pub correlation_spike_threshold: f64,

    // Loop cadence
    pub scan_interval_seconds: f64,
    pub cache_ttl_seconds: u64,

    // Profit taking
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    pub trailing_stop_pct: f64,
    pub use_trailing_stop: bool,
    pub min_hold_seconds: i64,
    /// Tiered targets as (profit_pct, close_fraction), evaluated in order.
    pub tiered_targets: Vec<(f64, f64)>,

    // Execution
    pub max_price_drift: f64,
    pub order_timeout_seconds: i64,
    pub paper_trading: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let api_key = std::env::var("EXCHANGE_API_KEY").unwrap_or_default();
        let api_secret = std::env::var("EXCHANGE_API_SECRET").unwrap_or_default();
        let base_url = std::env::var("EXCHANGE_BASE_URL")
            .unwrap_or_else(|_| "https://api.elections.kalshi.com/trade-api/v2".to_string());

        Ok(Self {
            api_key,
            api_secret,
            base_url,

            kelly_fraction: env_f64("KELLY_FRACTION", 0.25),
            max_position_per_market: env_f64("MAX_POSITION_PER_MARKET", 0.05),
            max_cluster_allocation: env_f64("MAX_CLUSTER_ALLOCATION", 0.10),
            min_position_size: env_f64("MIN_POSITION_SIZE", 10.0),
            correlation_adjustment_per_position: env_f64("CORRELATION_ADJUSTMENT", 0.20),

            min_edge_threshold: env_f64("MIN_EDGE_THRESHOLD", 0.01),
            safety_margin: env_f64("SAFETY_MARGIN", 0.005),
            signal_ttl_seconds: env_u64("SIGNAL_TTL_SECONDS", 300) as i64,

            max_drawdown_warning: env_f64("MAX_DRAWDOWN_WARNING", 0.10),
            max_drawdown_reduce: env_f64("MAX_DRAWDOWN_REDUCE", 0.20),
            max_drawdown_stop: env_f64("MAX_DRAWDOWN_STOP", 0.30),
            max_cluster_exposure: env_f64("MAX_CLUSTER_EXPOSURE", 0.50),
            max_single_position: env_f64("MAX_SINGLE_POSITION", 0.10),
            min_days_to_expiration: env_f64("MIN_DAYS_TO_EXPIRATION", 0.2),
            correlation_spike_threshold: env_f64("CORRELATION_SPIKE_THRESHOLD", 0.50),

            scan_interval_seconds: env_f64("SCAN_INTERVAL_SECONDS", 2.0),
            cache_ttl_seconds: env_u64("CACHE_TTL_SECONDS", 30),

            take_profit_pct: env_f64("TAKE_PROFIT_PCT", 0.15),
            stop_loss_pct: env_f64("STOP_LOSS_PCT", 0.10),
            trailing_stop_pct: env_f64("TRAILING_STOP_PCT", 0.05),
            use_trailing_stop: env_bool("USE_TRAILING_STOP", true),
            min_hold_seconds: env_u64("MIN_HOLD_SECONDS", 60) as i64,
            tiered_targets: vec![(0.10, 0.25), (0.20, 0.50), (0.30, 0.75)],

            max_price_drift: env_f64("MAX_PRICE_DRIFT", 0.02),
            order_timeout_seconds: env_u64("ORDER_TIMEOUT_SECONDS", 60) as i64,
            paper_trading: env_bool("PAPER_TRADING", true),
        })
    }

    pub fn sizing(&self) -> SizingConfig {
        SizingConfig {
            kelly_fraction: self.kelly_fraction,
            max_position_per_market: self.max_position_per_market,
            max_cluster_allocation: self.max_cluster_allocation,
            min_position_size: self.min_position_size,
            correlation_adjustment_per_position: self.correlation_adjustment_per_position,
        }
    }

    pub fn risk(&self) -> RiskConfig {
        RiskConfig {
            max_drawdown_warning: self.max_drawdown_warning,
            max_drawdown_reduce: self.max_drawdown_reduce,
            max_drawdown_stop: self.max_drawdown_stop,
            max_cluster_exposure: self.max_cluster_exposure,
            max_single_position: self.max_single_position,
            min_days_to_expiration: self.min_days_to_expiration,
            correlation_spike_threshold: self.correlation_spike_threshold,
            min_position_size: self.min_position_size,
        }
    }

    pub fn profit_taker(&self) -> ProfitTakerConfig {
        ProfitTakerConfig {
            enabled: true,
            take_profit_pct: self.take_profit_pct,
            stop_loss_pct: self.stop_loss_pct,
            trailing_stop_pct: self.trailing_stop_pct,
            use_trailing_stop: self.use_trailing_stop,
            tiered_targets: self.tiered_targets.clone(),
            min_hold_seconds: self.min_hold_seconds,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            base_url: "https://api.elections.kalshi.com/trade-api/v2".to_string(),

            kelly_fraction: 0.25,
            max_position_per_market: 0.05,
            max_cluster_allocation: 0.10,
            min_position_size: 10.0,
            correlation_adjustment_per_position: 0.20,

            min_edge_threshold: 0.01,
            safety_margin: 0.005,
            signal_ttl_seconds: 300,

            max_drawdown_warning: 0.10,
            max_drawdown_reduce: 0.20,
            max_drawdown_stop: 0.30,
            max_cluster_exposure: 0.50,
            max_single_position: 0.10,
            min_days_to_expiration: 0.2,
            correlation_spike_threshold: 0.50,

            scan_interval_seconds: 2.0,
            cache_ttl_seconds: 30,

            take_profit_pct: 0.15,
            stop_loss_pct: 0.10,
            trailing_stop_pct: 0.05,
            use_trailing_stop: true,
            min_hold_seconds: 60,
            tiered_targets: vec![(0.10, 0.25), (0.20, 0.50), (0.30, 0.75)],

            max_price_drift: 0.02,
            order_timeout_seconds: 60,
            paper_trading: true,
        }
    }
}
