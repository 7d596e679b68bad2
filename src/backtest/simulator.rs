//! Deterministic event-driven replay of market snapshots.
//!
//! # Determinism Contract
//! - Snapshots are processed strictly in input order
//! - The only randomness is the slippage draw, pulled from a single seeded
//!   RNG owned by the backtester
//! - Fees use the exchange formula from `fees`, never an approximation
//!
//! Same data + same signal function + same seed = identical trades and
//! metrics, every run.

use crate::backtest::metrics::{self, BacktestMetrics};
use crate::fees::calculate_fee;
use crate::models::OrderSide;
use chrono::{DateTime, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Snapshot of one market at one instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketState {
    pub timestamp: DateTime<Utc>,
    pub ticker: String,
    pub bid: f64,
    pub ask: f64,
    pub last_price: f64,
    pub volume: u64,
    pub open_interest: u64,
}

impl MarketState {
    pub fn mid_price(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

/// Strategy output for one snapshot.
#[derive(Debug, Clone)]
pub struct SimSignal {
    pub action: SignalAction,
    pub side: Option<OrderSide>,
    pub quantity: u32,
    pub reason: String,
}

impl SimSignal {
    pub fn hold() -> Self {
        Self {
            action: SignalAction::Hold,
            side: None,
            quantity: 0,
            reason: String::new(),
        }
    }

    pub fn buy(side: OrderSide, quantity: u32, reason: impl Into<String>) -> Self {
        Self {
            action: SignalAction::Buy,
            side: Some(side),
            quantity,
            reason: reason.into(),
        }
    }

    pub fn sell(quantity: u32, reason: impl Into<String>) -> Self {
        Self {
            action: SignalAction::Sell,
            side: None,
            quantity,
            reason: reason.into(),
        }
    }
}

/// Open position inside the simulator.
#[derive(Debug, Clone)]
pub struct SimPosition {
    pub ticker: String,
    pub side: OrderSide,
    pub quantity: u32,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub current_value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
    Settle,
}

/// Executed trade record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub timestamp: DateTime<Utc>,
    pub ticker: String,
    pub action: TradeAction,
    pub side: OrderSide,
    pub quantity: u32,
    pub price: f64,
    pub cost: f64,
    pub fees: f64,
    pub pnl: f64,
}

/// Read-only view handed to the signal function each snapshot.
pub struct SimContext<'a> {
    pub capital: f64,
    pub positions: &'a HashMap<String, SimPosition>,
}

pub struct EventDrivenBacktester {
    pub initial_capital: f64,
    capital: f64,
    slippage: f64,
    rng: ChaCha8Rng,

    positions: HashMap<String, SimPosition>,
    trades: Vec<Trade>,
    equity_curve: Vec<(DateTime<Utc>, f64)>,

    peak_equity: f64,
    max_drawdown: f64,
}

impl EventDrivenBacktester {
    pub fn new(initial_capital: f64, slippage_bps: f64, seed: u64) -> Self {
        Self {
            initial_capital,
            capital: initial_capital,
            slippage: slippage_bps / 10_000.0,
            rng: ChaCha8Rng::seed_from_u64(seed),
            positions: HashMap::new(),
            trades: Vec::new(),
            equity_curve: Vec::new(),
            peak_equity: initial_capital,
            max_drawdown: 0.0,
        }
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn equity_curve(&self) -> &[(DateTime<Utc>, f64)] {
        &self.equity_curve
    }

    /// Replay the snapshots through a signal function, settle leftovers
    /// against `resolutions`, and report metrics.
    pub fn run<F>(
        &mut self,
        market_data: &[MarketState],
        mut signal_func: F,
        resolutions: &HashMap<String, bool>,
    ) -> BacktestMetrics
    where
        F: FnMut(&MarketState, &SimContext<'_>) -> SimSignal,
    {
        for state in market_data {
            let signal = {
                let context = SimContext {
                    capital: self.capital,
                    positions: &self.positions,
                };
                signal_func(state, &context)
            };

            match signal.action {
                SignalAction::Buy => {
                    if let Some(side) = signal.side {
                        self.execute_buy(state, side, signal.quantity);
                    }
                }
                SignalAction::Sell => self.execute_sell(state, signal.quantity),
                SignalAction::Hold => {}
            }

            self.mark_to_market(state);
            self.record_equity(state.timestamp);
        }

        self.settle_positions(resolutions, market_data.last().map(|s| s.timestamp));

        metrics::calculate(
            &self.trades,
            &self.equity_curve,
            self.initial_capital,
            self.capital,
            self.peak_equity,
            self.max_drawdown,
        )
    }

    /// One slippage draw in [0, slippage], from the seeded RNG.
    fn slippage_draw(&mut self) -> f64 {
        self.slippage * self.rng.gen::<f64>()
    }

    fn execute_buy(&mut self, state: &MarketState, side: OrderSide, quantity: u32) {
        if quantity == 0 {
            return;
        }

        let slip = self.slippage_draw();
        let raw_price = match side {
            OrderSide::Yes => state.ask * (1.0 + slip),
            OrderSide::No => (1.0 - state.bid) * (1.0 + slip),
        };
        let price = raw_price.clamp(0.01, 0.99);

        let mut quantity = quantity;
        let mut fees = calculate_fee(price, quantity);
        let mut cost = price * quantity as f64 + fees;

        // Shrink to what the cash can carry
        if cost > self.capital {
            let max_quantity = ((self.capital - fees) / price).floor();
            if max_quantity < 1.0 {
                return;
            }
            quantity = max_quantity as u32;
            fees = calculate_fee(price, quantity);
            cost = price * quantity as f64 + fees;
        }

        self.capital -= cost;

        match self.positions.get_mut(&state.ticker) {
            Some(position) => {
                let total = position.quantity + quantity;
                position.entry_price = (position.entry_price * position.quantity as f64
                    + price * quantity as f64)
                    / total as f64;
                position.quantity = total;
            }
            None => {
                self.positions.insert(
                    state.ticker.clone(),
                    SimPosition {
                        ticker: state.ticker.clone(),
                        side,
                        quantity,
                        entry_price: price,
                        entry_time: state.timestamp,
                        current_value: 0.0,
                    },
                );
            }
        }

        self.trades.push(Trade {
            timestamp: state.timestamp,
            ticker: state.ticker.clone(),
            action: TradeAction::Buy,
            side,
            quantity,
            price,
            cost,
            fees,
            pnl: 0.0,
        });
    }

    fn execute_sell(&mut self, state: &MarketState, quantity: u32) {
        let Some(position) = self.positions.get(&state.ticker).cloned() else {
            return;
        };

        let quantity = if quantity == 0 {
            position.quantity
        } else {
            quantity.min(position.quantity)
        };
        if quantity == 0 {
            return;
        }

        let slip = self.slippage_draw();
        let raw_price = match position.side {
            OrderSide::Yes => state.bid * (1.0 - slip),
            OrderSide::No => (1.0 - state.ask) * (1.0 - slip),
        };
        let price = raw_price.clamp(0.01, 0.99);

        let fees = calculate_fee(price, quantity);
        let proceeds = price * quantity as f64 - fees;
        let pnl = (price - position.entry_price) * quantity as f64 - fees;

        self.capital += proceeds;

        self.trades.push(Trade {
            timestamp: state.timestamp,
            ticker: state.ticker.clone(),
            action: TradeAction::Sell,
            side: position.side,
            quantity,
            price,
            cost: -proceeds,
            fees,
            pnl,
        });

        if quantity >= position.quantity {
            self.positions.remove(&state.ticker);
        } else if let Some(p) = self.positions.get_mut(&state.ticker) {
            p.quantity -= quantity;
        }
    }

    fn mark_to_market(&mut self, state: &MarketState) {
        if let Some(position) = self.positions.get_mut(&state.ticker) {
            let mid = state.mid_price();
            position.current_value = match position.side {
                OrderSide::Yes => position.quantity as f64 * mid,
                OrderSide::No => position.quantity as f64 * (1.0 - mid),
            };
        }
    }

    fn record_equity(&mut self, timestamp: DateTime<Utc>) {
        let position_value: f64 = self.positions.values().map(|p| p.current_value).sum();
        let equity = self.capital + position_value;

        self.equity_curve.push((timestamp, equity));

        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        if self.peak_equity > 0.0 {
            let drawdown = (self.peak_equity - equity) / self.peak_equity;
            if drawdown > self.max_drawdown {
                self.max_drawdown = drawdown;
            }
        }
    }

    /// Binary settlement: 1.00 per winning contract, 0 otherwise. Tickers
    /// missing from the map settle NO.
    fn settle_positions(
        &mut self,
        resolutions: &HashMap<String, bool>,
        at: Option<DateTime<Utc>>,
    ) {
        let timestamp = at.unwrap_or_else(Utc::now);
        let mut tickers: Vec<String> = self.positions.keys().cloned().collect();
        tickers.sort();

        for ticker in tickers {
            let Some(position) = self.positions.remove(&ticker) else {
                continue;
            };
            let resolved_yes = resolutions.get(&ticker).copied().unwrap_or(false);

            let wins = match position.side {
                OrderSide::Yes => resolved_yes,
                OrderSide::No => !resolved_yes,
            };
            let payout = if wins { position.quantity as f64 } else { 0.0 };
            let pnl = payout - position.entry_price * position.quantity as f64;

            self.capital += payout;

            self.trades.push(Trade {
                timestamp,
                ticker,
                action: TradeAction::Settle,
                side: position.side,
                quantity: position.quantity,
                price: if resolved_yes { 1.0 } else { 0.0 },
                cost: 0.0,
                fees: 0.0,
                pnl,
            });
        }
    }
}
