//! Portfolio risk management.
//!
//! Drawdown action state machine, position/cluster caps, expiration cliff
//! policy and correlation spike watching. The state machine only ratchets
//! toward more restrictive states within a session; recovery is an explicit
//! operator action, never automatic.

use crate::models::{DirectionalSignal, Position};
use crate::ticker::extract_series;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::{error, warn};

const CORRELATION_WINDOW: usize = 30;

/// Action tier triggered by portfolio drawdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrawdownAction {
    None,
    Warning,
    Reduce,
    Stop,
}

/// Risk limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub max_drawdown_warning: f64,
    pub max_drawdown_reduce: f64,
    pub max_drawdown_stop: f64,

    pub max_cluster_exposure: f64,
    pub max_single_position: f64,
    pub min_days_to_expiration: f64,

    pub correlation_spike_threshold: f64,
    pub min_position_size: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_drawdown_warning: 0.10,
            max_drawdown_reduce: 0.20,
            max_drawdown_stop: 0.30,
            max_cluster_exposure: 0.50,
            max_single_position: 0.10,
            min_days_to_expiration: 0.2,
            correlation_spike_threshold: 0.50,
            min_position_size: 10.0,
        }
    }
}

/// Snapshot of current risk state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub timestamp: DateTime<Utc>,
    pub account_value: f64,
    pub peak_value: f64,
    pub current_drawdown: f64,
    pub max_drawdown: f64,

    pub position_count: usize,
    pub total_exposure: f64,
    pub cluster_exposures: HashMap<String, f64>,

    pub drawdown_action: DrawdownAction,
}

/// Outcome of a per-signal risk check: a verdict, the reason, and the size
/// that survives (halved under REDUCE).
#[derive(Debug, Clone)]
pub struct SignalApproval {
    pub approved: bool,
    pub reason: String,
    pub approved_size: f64,
}

impl SignalApproval {
    fn reject(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            reason: reason.into(),
            approved_size: 0.0,
        }
    }
}

pub struct RiskManager {
    pub config: RiskConfig,
    peak_value: f64,
    max_drawdown: f64,
    action: DrawdownAction,
    value_history: Vec<(DateTime<Utc>, f64)>,
    correlation_history: HashMap<String, VecDeque<f64>>,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            peak_value: 0.0,
            max_drawdown: 0.0,
            action: DrawdownAction::None,
            value_history: Vec::new(),
            correlation_history: HashMap::new(),
        }
    }

    pub fn drawdown_action(&self) -> DrawdownAction {
        self.action
    }

    /// Record a fresh account value, ratcheting the drawdown state machine.
    pub fn update_account_value(&mut self, value: f64) -> RiskMetrics {
        self.value_history.push((Utc::now(), value));

        if value > self.peak_value {
            self.peak_value = value;
        }

        let current_drawdown = if self.peak_value > 0.0 {
            (self.peak_value - value) / self.peak_value
        } else {
            0.0
        };
        if current_drawdown > self.max_drawdown {
            self.max_drawdown = current_drawdown;
        }

        let candidate = self.classify_drawdown(current_drawdown);
        // One-way ratchet: never step to a less restrictive tier in-session
        if candidate > self.action {
            match candidate {
                DrawdownAction::Stop => error!(
                    drawdown = %format!("{:.1}%", current_drawdown * 100.0),
                    "STOP: drawdown exceeds stop threshold, rejecting all new signals"
                ),
                DrawdownAction::Reduce => warn!(
                    drawdown = %format!("{:.1}%", current_drawdown * 100.0),
                    "REDUCE: drawdown exceeds reduce threshold, halving sizes"
                ),
                DrawdownAction::Warning => warn!(
                    drawdown = %format!("{:.1}%", current_drawdown * 100.0),
                    "WARNING: drawdown exceeds warning threshold"
                ),
                DrawdownAction::None => {}
            }
            self.action = candidate;
        }

        RiskMetrics {
            timestamp: Utc::now(),
            account_value: value,
            peak_value: self.peak_value,
            current_drawdown,
            max_drawdown: self.max_drawdown,
            position_count: 0,
            total_exposure: 0.0,
            cluster_exposures: HashMap::new(),
            drawdown_action: self.action,
        }
    }

    fn classify_drawdown(&self, drawdown: f64) -> DrawdownAction {
        if drawdown >= self.config.max_drawdown_stop {
            DrawdownAction::Stop
        } else if drawdown >= self.config.max_drawdown_reduce {
            DrawdownAction::Reduce
        } else if drawdown >= self.config.max_drawdown_warning {
            DrawdownAction::Warning
        } else {
            DrawdownAction::None
        }
    }

    /// Full portfolio risk snapshot.
    pub fn calculate_portfolio_risk(
        &mut self,
        positions: &[Position],
        account_value: f64,
    ) -> RiskMetrics {
        let mut metrics = self.update_account_value(account_value);

        metrics.position_count = positions.len();
        metrics.total_exposure = positions.iter().map(|p| p.cost_basis()).sum();
        metrics.cluster_exposures = Self::cluster_exposures(positions);

        metrics
    }

    /// Exposure grouped by series prefix (the correlation cluster key).
    pub fn cluster_exposures(positions: &[Position]) -> HashMap<String, f64> {
        let mut exposures: HashMap<String, f64> = HashMap::new();
        for position in positions {
            let series = extract_series(&position.ticker).to_string();
            *exposures.entry(series).or_default() += position.cost_basis();
        }
        exposures
    }

    /// Approve or reject a sized signal against all limits.
    pub fn approve_signal(
        &mut self,
        signal: &DirectionalSignal,
        proposed_size: f64,
        current_positions: &[Position],
        account_value: f64,
    ) -> SignalApproval {
        let metrics = self.calculate_portfolio_risk(current_positions, account_value);

        if metrics.drawdown_action == DrawdownAction::Stop {
            return SignalApproval::reject("trading stopped due to drawdown");
        }

        let mut size = proposed_size;
        if metrics.drawdown_action == DrawdownAction::Reduce {
            size *= 0.5;
            if size < self.config.min_position_size {
                return SignalApproval::reject("position too small after drawdown reduction");
            }
        }

        if account_value <= 0.0 {
            return SignalApproval::reject("no equity");
        }

        if size / account_value > self.config.max_single_position {
            return SignalApproval::reject(format!(
                "position exceeds {:.0}% single-market limit",
                self.config.max_single_position * 100.0
            ));
        }

        let series = extract_series(&signal.ticker);
        let current_cluster = metrics.cluster_exposures.get(series).copied().unwrap_or(0.0);
        if (current_cluster + size) / account_value > self.config.max_cluster_exposure {
            return SignalApproval::reject(format!(
                "cluster exposure exceeds {:.0}% limit",
                self.config.max_cluster_exposure * 100.0
            ));
        }

        SignalApproval {
            approved: true,
            reason: "approved".to_string(),
            approved_size: size,
        }
    }

    /// Tickers whose positions sit on the expiration cliff and must close.
    pub fn check_expiration_risk(
        &self,
        positions: &[Position],
        days_to_expiration: &HashMap<String, f64>,
    ) -> Vec<String> {
        let mut close_tickers = Vec::new();

        for position in positions {
            let days = days_to_expiration
                .get(&position.ticker)
                .copied()
                .unwrap_or(f64::INFINITY);

            if days < self.config.min_days_to_expiration {
                warn!(
                    ticker = %position.ticker,
                    days_remaining = %format!("{:.2}", days),
                    "expiration cliff: forcing close"
                );
                close_tickers.push(position.ticker.clone());
            }
        }

        close_tickers
    }

    /// Record a correlation reading for a cluster. Returns the relative
    /// change against the rolling window mean; a spike is logged.
    pub fn record_correlation(&mut self, cluster: &str, reading: f64) -> f64 {
        let history = self.correlation_history.entry(cluster.to_string()).or_default();
        history.push_back(reading);
        if history.len() > CORRELATION_WINDOW {
            history.pop_front();
        }

        if history.len() < 2 {
            return 0.0;
        }

        let prior: Vec<f64> = history.iter().take(history.len() - 1).copied().collect();
        let prior_mean = prior.iter().sum::<f64>() / prior.len() as f64;
        let change = (reading - prior_mean) / prior_mean.max(0.01);

        if change > self.config.correlation_spike_threshold {
            warn!(
                cluster = %cluster,
                change = %format!("{:.1}%", change * 100.0),
                "correlation spike detected"
            );
        }

        change
    }

    /// Stress loss probability assuming the given pairwise correlation.
    pub fn stress_test(&self, positions: &[Position], correlation: f64) -> f64 {
        if positions.is_empty() {
            return 0.0;
        }
        if correlation >= 1.0 {
            return 1.0;
        }
        correlation.powi(positions.len() as i32)
    }

    /// Positions to trim during drawdown, worst unrealized P&L first.
    pub fn position_reduction_targets(
        &self,
        positions: &[Position],
        reduction_pct: f64,
    ) -> Vec<(String, u32)> {
        let mut sorted: Vec<&Position> = positions.iter().collect();
        sorted.sort_by(|a, b| {
            a.unrealized_pnl
                .partial_cmp(&b.unrealized_pnl)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        sorted
            .into_iter()
            .filter_map(|p| {
                let contracts = (p.quantity as f64 * reduction_pct).floor() as u32;
                (contracts > 0).then(|| (p.ticker.clone(), contracts))
            })
            .collect()
    }

    /// Operator recovery action: clears the sticky state machine.
    pub fn reset(&mut self) {
        self.peak_value = 0.0;
        self.max_drawdown = 0.0;
        self.action = DrawdownAction::None;
        self.value_history.clear();
        self.correlation_history.clear();
    }
}
