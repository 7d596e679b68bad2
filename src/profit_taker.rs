//! Profit Taker
//! Mission: Exits are where the P&L is actually made
//!
//! Per-position state machine with fixed take-profit / stop-loss, an armed
//! trailing stop, and tiered partial closes. Rule order is part of the
//! contract and is evaluated exactly as listed in `evaluate_position`.

use crate::models::{OrderSide, Position};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Tracker state. Once armed, a tracker never disarms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerState {
    Hold,
    TrailingArmed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitTakerConfig {
    pub enabled: bool,

    /// Close when profit reaches this fraction of entry.
    pub take_profit_pct: f64,
    /// Close when loss reaches this fraction of entry.
    pub stop_loss_pct: f64,
    /// Give-back from peak profit that fires an armed trailing stop.
    pub trailing_stop_pct: f64,
    /// Arm a trailing stop at the take-profit level instead of closing.
    pub use_trailing_stop: bool,

    /// Tiered targets (profit_pct, close_fraction), evaluated in order.
    pub tiered_targets: Vec<(f64, f64)>,

    /// Gate on every action, stop-loss included.
    pub min_hold_seconds: i64,
}

impl Default for ProfitTakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            take_profit_pct: 0.15,
            stop_loss_pct: 0.10,
            trailing_stop_pct: 0.05,
            use_trailing_stop: true,
            tiered_targets: vec![(0.10, 0.25), (0.20, 0.50), (0.30, 0.75)],
            min_hold_seconds: 60,
        }
    }
}

/// Per-position tracking state.
///
/// `entry_price` is in YES terms for both sides, so profit math compares
/// like with like against the YES mark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionTracker {
    pub ticker: String,
    pub side: OrderSide,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,

    pub peak_price: f64,
    pub peak_profit_pct: f64,

    pub tiers_closed: Vec<usize>,
    pub state: TrackerState,
}

impl PositionTracker {
    /// Profit fraction at a YES mark: yes-side gains as the mark rises,
    /// no-side as it falls.
    pub fn profit_pct(&self, mark: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        match self.side {
            OrderSide::Yes => (mark - self.entry_price) / self.entry_price,
            OrderSide::No => (self.entry_price - mark) / self.entry_price,
        }
    }

    fn update_peak(&mut self, mark: f64) {
        let profit = self.profit_pct(mark);
        if profit > self.peak_profit_pct {
            self.peak_profit_pct = profit;
            self.peak_price = mark;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfitTakeKind {
    StopLoss,
    TrailingStop,
    TakeProfit,
    TierClose,
}

/// Action the layer above must execute. Actions are not re-emitted for the
/// same tick; the caller owns idempotency across ticks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitTakeAction {
    pub ticker: String,
    pub kind: ProfitTakeKind,
    pub quantity: u32,
    pub reason: String,
    pub current_profit_pct: f64,
}

pub struct ProfitTaker {
    pub config: ProfitTakerConfig,
    trackers: HashMap<String, PositionTracker>,
}

impl ProfitTaker {
    pub fn new(config: ProfitTakerConfig) -> Self {
        Self {
            config,
            trackers: HashMap::new(),
        }
    }

    /// Start tracking a position. A ticker already tracked keeps its state.
    pub fn track_position(&mut self, position: &Position, entry_time: DateTime<Utc>) {
        if self.trackers.contains_key(&position.ticker) {
            return;
        }

        // Positions carry held-side cost; convert NO entries to YES terms
        let entry_price = match position.side {
            OrderSide::Yes => position.average_price,
            OrderSide::No => 1.0 - position.average_price,
        };

        debug!(ticker = %position.ticker, entry = entry_price, "tracking position");
        self.trackers.insert(
            position.ticker.clone(),
            PositionTracker {
                ticker: position.ticker.clone(),
                side: position.side,
                entry_price,
                entry_time,
                peak_price: entry_price,
                peak_profit_pct: 0.0,
                tiers_closed: Vec::new(),
                state: TrackerState::Hold,
            },
        );
    }

    pub fn untrack_position(&mut self, ticker: &str) {
        self.trackers.remove(ticker);
    }

    pub fn tracker(&self, ticker: &str) -> Option<&PositionTracker> {
        self.trackers.get(ticker)
    }

    /// Evaluate all positions against current marks, pruning trackers whose
    /// positions are gone. At most one action per position per tick.
    pub fn check_positions(
        &mut self,
        positions: &[Position],
        current_prices: &HashMap<String, f64>,
        now: DateTime<Utc>,
    ) -> Vec<ProfitTakeAction> {
        if !self.config.enabled {
            return Vec::new();
        }

        let mut actions = Vec::new();

        for position in positions {
            if !self.trackers.contains_key(&position.ticker) {
                self.track_position(position, now);
            }

            let Some(&mark) = current_prices.get(&position.ticker) else {
                continue;
            };

            if let Some(action) = self.evaluate_position(position, mark, now) {
                actions.push(action);
            }
        }

        let live: std::collections::HashSet<&str> =
            positions.iter().map(|p| p.ticker.as_str()).collect();
        self.trackers.retain(|ticker, _| live.contains(ticker.as_str()));

        actions
    }

    /// Rule order, first match wins:
    /// 1. min-hold gate (applies to everything, stop-loss included)
    /// 2. stop loss, full close
    /// 3. armed trailing stop, full close
    /// 4. take profit: arm the trailing stop, or full close
    /// 5. tiers, in configured order, each at most once
    fn evaluate_position(
        &mut self,
        position: &Position,
        mark: f64,
        now: DateTime<Utc>,
    ) -> Option<ProfitTakeAction> {
        let tracker = self.trackers.get_mut(&position.ticker)?;

        tracker.update_peak(mark);
        let profit_pct = tracker.profit_pct(mark);

        let hold_seconds = (now - tracker.entry_time).num_seconds();
        if hold_seconds < self.config.min_hold_seconds {
            return None;
        }

        if profit_pct <= -self.config.stop_loss_pct {
            return Some(ProfitTakeAction {
                ticker: position.ticker.clone(),
                kind: ProfitTakeKind::StopLoss,
                quantity: position.quantity,
                reason: format!("stop loss at {:.1}%", profit_pct * 100.0),
                current_profit_pct: profit_pct,
            });
        }

        if tracker.state == TrackerState::TrailingArmed {
            let give_back = tracker.peak_profit_pct - profit_pct;
            if give_back >= self.config.trailing_stop_pct {
                return Some(ProfitTakeAction {
                    ticker: position.ticker.clone(),
                    kind: ProfitTakeKind::TrailingStop,
                    quantity: position.quantity,
                    reason: format!("trailing stop: {:.1}% off peak", give_back * 100.0),
                    current_profit_pct: profit_pct,
                });
            }
        }

        if profit_pct >= self.config.take_profit_pct {
            if self.config.use_trailing_stop && tracker.state == TrackerState::Hold {
                tracker.state = TrackerState::TrailingArmed;
                info!(
                    ticker = %position.ticker,
                    profit = %format!("{:.1}%", profit_pct * 100.0),
                    "trailing stop armed"
                );
                return None;
            }
            if !self.config.use_trailing_stop {
                return Some(ProfitTakeAction {
                    ticker: position.ticker.clone(),
                    kind: ProfitTakeKind::TakeProfit,
                    quantity: position.quantity,
                    reason: format!("take profit at {:.1}%", profit_pct * 100.0),
                    current_profit_pct: profit_pct,
                });
            }
        }

        for (i, &(target_pct, close_fraction)) in self.config.tiered_targets.iter().enumerate() {
            if tracker.tiers_closed.contains(&i) {
                continue;
            }
            if profit_pct >= target_pct {
                let close_quantity = (position.quantity as f64 * close_fraction).floor() as u32;
                if close_quantity > 0 {
                    tracker.tiers_closed.push(i);
                    return Some(ProfitTakeAction {
                        ticker: position.ticker.clone(),
                        kind: ProfitTakeKind::TierClose,
                        quantity: close_quantity,
                        reason: format!("tier {} hit at {:.0}%", i + 1, target_pct * 100.0),
                        current_profit_pct: profit_pct,
                    });
                }
            }
        }

        None
    }
}
