//! Shared Data Model
//! Mission: One source of truth for markets, books, orders, positions and signals
//!
//! All prices and probabilities are decimals in [0, 1]. Exchange wire values
//! in integer cents are converted at the exchange boundary, never here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Market status on the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    Open,
    Closed,
    Settled,
}

/// Terminal resolution of a binary contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Yes,
    No,
}

/// A binary contract: pays 1.00 if the underlying event resolves YES, 0 otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub ticker: String,
    pub series_ticker: String,
    pub title: String,
    pub category: String,

    pub open_time: Option<DateTime<Utc>>,
    pub close_time: Option<DateTime<Utc>>,
    pub expiration_time: Option<DateTime<Utc>>,

    pub status: MarketStatus,

    /// Last YES trade price as a decimal.
    pub last_price: f64,
    /// Best YES bid / ask. Absent while the market is closed.
    pub yes_bid: Option<f64>,
    pub yes_ask: Option<f64>,

    pub volume: u64,
    pub open_interest: u64,

    /// Set only once the market has settled.
    pub result: Option<Resolution>,
}

impl Market {
    /// Mid-market YES price, if both sides are quoted.
    pub fn mid_price(&self) -> Option<f64> {
        match (self.yes_bid, self.yes_ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => None,
        }
    }

    /// Bid-ask spread, if both sides are quoted.
    pub fn spread(&self) -> Option<f64> {
        match (self.yes_bid, self.yes_ask) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Days until expiration, floored at zero.
    pub fn days_to_expiration(&self, now: DateTime<Utc>) -> Option<f64> {
        self.expiration_time
            .map(|exp| ((exp - now).num_seconds() as f64 / 86_400.0).max(0.0))
    }

    pub fn is_open(&self) -> bool {
        self.status == MarketStatus::Open
    }
}

/// Single level in the YES-bid book. Prices are integer cents in 1..=99.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrderBookLevel {
    pub price: u32,
    pub quantity: u32,
}

/// Order book for a market, expressed as YES bids.
///
/// The NO side is symmetric: a NO bid at price q is a YES ask at 100 - q,
/// so the YES-bid ladder carries the whole book.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    pub ticker: String,
    pub yes_bids: Vec<OrderBookLevel>,
}

impl OrderBook {
    /// Best YES bid as a decimal.
    pub fn best_yes_bid(&self) -> Option<f64> {
        self.yes_bids
            .iter()
            .filter(|l| l.quantity > 0)
            .map(|l| l.price)
            .max()
            .map(|p| p as f64 / 100.0)
    }

    /// Best YES ask, derived from the lowest resting NO bid.
    pub fn best_yes_ask(&self) -> Option<f64> {
        self.yes_bids
            .iter()
            .filter(|l| l.quantity > 0)
            .map(|l| l.price)
            .min()
            .map(|p| (100 - p) as f64 / 100.0)
    }

    pub fn mid_price(&self) -> Option<f64> {
        match (self.best_yes_bid(), self.best_yes_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => None,
        }
    }

    pub fn spread(&self) -> Option<f64> {
        match (self.best_yes_bid(), self.best_yes_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Total resting quantity within `within_cents` of the best bid.
    pub fn total_depth(&self, within_cents: u32) -> u32 {
        let Some(best) = self
            .yes_bids
            .iter()
            .filter(|l| l.quantity > 0)
            .map(|l| l.price)
            .max()
        else {
            return 0;
        };
        self.yes_bids
            .iter()
            .filter(|l| l.price + within_cents >= best)
            .map(|l| l.quantity)
            .sum()
    }
}

/// Contract side held or traded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Yes,
    No,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderAction {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Open,
    Filled,
    PartiallyFilled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Terminal statuses freeze the order.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

/// Trading order. Always LIMIT in practice; price in integer cents 1..=99.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub ticker: String,
    pub side: OrderSide,
    pub action: OrderAction,
    pub order_type: OrderType,

    pub price: u32,
    pub quantity: u32,
    pub filled_quantity: u32,

    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,

    /// Signal that produced this order, for attribution.
    pub signal_id: String,
}

impl Order {
    pub fn is_complete(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn remaining_quantity(&self) -> u32 {
        self.quantity.saturating_sub(self.filled_quantity)
    }

    pub fn fill_rate(&self) -> f64 {
        if self.quantity == 0 {
            return 0.0;
        }
        self.filled_quantity as f64 / self.quantity as f64
    }

    pub fn price_decimal(&self) -> f64 {
        self.price as f64 / 100.0
    }
}

/// Open position in a single market.
///
/// `average_price` is the average cost per contract of the side actually
/// held: a NO position bought while YES traded at 0.60 carries 0.40 here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub ticker: String,
    pub side: OrderSide,
    pub quantity: u32,
    pub average_price: f64,

    pub realized_pnl: f64,
    pub unrealized_pnl: f64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn cost_basis(&self) -> f64 {
        self.quantity as f64 * self.average_price
    }

    pub fn total_pnl(&self) -> f64 {
        self.realized_pnl + self.unrealized_pnl
    }

    /// Recompute unrealized P&L from a YES-side mark: held-side value now
    /// minus what was paid.
    pub fn update_unrealized_pnl(&mut self, mark: f64) {
        self.unrealized_pnl = match self.side {
            OrderSide::Yes => self.quantity as f64 * (mark - self.average_price),
            OrderSide::No => self.quantity as f64 * ((1.0 - mark) - self.average_price),
        };
    }

    /// Mark value of the position (what settlement-now would pay at the mark).
    pub fn mark_value(&self, mark: f64) -> f64 {
        match self.side {
            OrderSide::Yes => self.quantity as f64 * mark,
            OrderSide::No => self.quantity as f64 * (1.0 - mark),
        }
    }
}

/// Direction of a trading signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalDirection {
    BuyYes,
    BuyNo,
}

impl SignalDirection {
    pub fn order_side(&self) -> OrderSide {
        match self {
            SignalDirection::BuyYes => OrderSide::Yes,
            SignalDirection::BuyNo => OrderSide::No,
        }
    }
}

/// Which detector emitted a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    ConstraintViolation,
    Rebalancing,
    Combinatorial,
}

/// Directional bet emitted when a market price violates its logical bounds.
///
/// Signals are value objects: created, ranked and consumed within one tick,
/// carrying only the id of the constraint they came from plus their own TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectionalSignal {
    pub ticker: String,
    pub direction: SignalDirection,
    pub kind: SignalKind,

    pub current_price: f64,
    pub bound_price: f64,

    /// Edge before costs.
    pub raw_edge: f64,
    pub estimated_fee: f64,
    pub estimated_spread: f64,
    /// Edge after fee, spread and safety margin.
    pub net_edge: f64,

    pub confidence: f64,
    pub source_id: String,

    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl DirectionalSignal {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(exp) => now < exp,
            None => true,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn total_costs(&self) -> f64 {
        self.estimated_fee + self.estimated_spread
    }

    /// Ranking score.
    pub fn score(&self) -> f64 {
        self.net_edge * self.confidence
    }
}

/// Paper account: cash plus exclusively-owned positions, marked each tick.
///
/// Buys deduct notional plus fees from cash; closes credit proceeds minus
/// fees and roll realized P&L into the surviving position record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Portfolio {
    pub cash: f64,
    pub positions: HashMap<String, Position>,
    pub peak_equity: f64,
    pub total_fees_paid: f64,
    pub trade_count: u64,
}

impl Portfolio {
    pub fn new(cash: f64) -> Self {
        Self {
            cash,
            peak_equity: cash,
            ..Default::default()
        }
    }

    /// Apply a buy fill. `price` is the per-contract execution price for the
    /// side actually bought (NO fills cost 1 - yes_price per contract).
    pub fn apply_buy(
        &mut self,
        ticker: &str,
        side: OrderSide,
        quantity: u32,
        price: f64,
        fees: f64,
        now: DateTime<Utc>,
    ) {
        if quantity == 0 || !(price > 0.0 && price < 1.0) {
            return;
        }

        let notional = quantity as f64 * price;
        self.cash -= notional + fees;
        self.total_fees_paid += fees;
        self.trade_count += 1;

        let entry = self
            .positions
            .entry(ticker.to_string())
            .or_insert_with(|| Position {
                ticker: ticker.to_string(),
                side,
                quantity: 0,
                average_price: price,
                realized_pnl: 0.0,
                unrealized_pnl: 0.0,
                created_at: now,
                updated_at: now,
            });

        let new_quantity = entry.quantity + quantity;
        entry.average_price =
            (entry.average_price * entry.quantity as f64 + notional) / new_quantity as f64;
        entry.quantity = new_quantity;
        entry.updated_at = now;
    }

    /// Apply a sell/close fill at `price` (execution price for the held side).
    /// Returns the realized P&L of the closed contracts.
    pub fn apply_sell(
        &mut self,
        ticker: &str,
        quantity: u32,
        price: f64,
        fees: f64,
        now: DateTime<Utc>,
    ) -> f64 {
        let Some(pos) = self.positions.get_mut(ticker) else {
            return 0.0;
        };

        let sold = quantity.min(pos.quantity);
        if sold == 0 {
            return 0.0;
        }

        let proceeds = sold as f64 * price - fees;
        let pnl = (price - pos.average_price) * sold as f64 - fees;

        self.cash += proceeds.max(0.0);
        self.total_fees_paid += fees;
        self.trade_count += 1;

        pos.quantity -= sold;
        pos.realized_pnl += pnl;
        pos.updated_at = now;

        if pos.quantity == 0 {
            self.positions.remove(ticker);
        }

        pnl
    }

    /// Total account equity given current YES marks.
    pub fn equity(&self, marks: &HashMap<String, f64>) -> f64 {
        let position_value: f64 = self
            .positions
            .values()
            .map(|p| {
                marks
                    .get(&p.ticker)
                    .map(|m| p.mark_value(*m))
                    .unwrap_or_else(|| p.cost_basis())
            })
            .sum();
        self.cash + position_value
    }

    /// Record a fresh equity reading, updating the running peak.
    pub fn record_equity(&mut self, equity: f64) {
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(price: u32, quantity: u32) -> OrderBookLevel {
        OrderBookLevel { price, quantity }
    }

    #[test]
    fn test_orderbook_derived_quotes() {
        let book = OrderBook {
            ticker: "TEST".to_string(),
            yes_bids: vec![level(40, 100), level(38, 250), level(35, 500)],
        };

        assert_eq!(book.best_yes_bid(), Some(0.40));
        // Lowest resting YES bid at 35c is a NO bid, so YES ask = 65c
        assert_eq!(book.best_yes_ask(), Some(0.65));
        assert_eq!(book.total_depth(2), 350);
    }

    #[test]
    fn test_orderbook_empty() {
        let book = OrderBook::default();
        assert_eq!(book.best_yes_bid(), None);
        assert_eq!(book.best_yes_ask(), None);
        assert_eq!(book.total_depth(5), 0);
    }

    #[test]
    fn test_position_pnl_by_side() {
        let now = Utc::now();
        let mut pos = Position {
            ticker: "TEST".to_string(),
            side: OrderSide::Yes,
            quantity: 100,
            average_price: 0.40,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            created_at: now,
            updated_at: now,
        };

        pos.update_unrealized_pnl(0.50);
        assert!((pos.unrealized_pnl - 10.0).abs() < 1e-9);

        // NO contracts bought at 0.40 are worth 1 - 0.50 = 0.50 each now
        pos.side = OrderSide::No;
        pos.update_unrealized_pnl(0.50);
        assert!((pos.unrealized_pnl - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_portfolio_buy_then_close() {
        let now = Utc::now();
        let mut portfolio = Portfolio::new(1000.0);

        portfolio.apply_buy("TEST", OrderSide::Yes, 100, 0.40, 2.0, now);
        assert!((portfolio.cash - 958.0).abs() < 1e-9);
        assert_eq!(portfolio.positions["TEST"].quantity, 100);

        // Average up
        portfolio.apply_buy("TEST", OrderSide::Yes, 100, 0.50, 2.0, now);
        assert!((portfolio.positions["TEST"].average_price - 0.45).abs() < 1e-9);

        let pnl = portfolio.apply_sell("TEST", 200, 0.55, 3.0, now);
        assert!((pnl - (0.10 * 200.0 - 3.0)).abs() < 1e-9);
        assert!(portfolio.positions.is_empty());
    }

    #[test]
    fn test_portfolio_equity_marks() {
        let now = Utc::now();
        let mut portfolio = Portfolio::new(1000.0);
        portfolio.apply_buy("TEST", OrderSide::No, 100, 0.60, 0.0, now);

        let mut marks = HashMap::new();
        marks.insert("TEST".to_string(), 0.30);

        // NO position marked at 1 - 0.30 = 0.70 per contract
        let equity = portfolio.equity(&marks);
        assert!((equity - (940.0 + 70.0)).abs() < 1e-9);
    }

    #[test]
    fn test_signal_expiry() {
        let now = Utc::now();
        let signal = DirectionalSignal {
            ticker: "TEST".to_string(),
            direction: SignalDirection::BuyYes,
            kind: SignalKind::ConstraintViolation,
            current_price: 0.40,
            bound_price: 0.50,
            raw_edge: 0.10,
            estimated_fee: 0.02,
            estimated_spread: 0.01,
            net_edge: 0.065,
            confidence: 1.0,
            source_id: "subset_1".to_string(),
            created_at: now,
            expires_at: Some(now + chrono::Duration::seconds(300)),
        };

        assert!(signal.is_valid_at(now + chrono::Duration::seconds(299)));
        assert!(!signal.is_valid_at(now + chrono::Duration::seconds(300)));
        assert!((signal.total_costs() - 0.03).abs() < 1e-9);
    }
}
