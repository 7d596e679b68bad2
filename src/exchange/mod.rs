//! Exchange Boundary
//! Mission: Keep wire quirks out of the core — cents, side strings and
//! status words all stop here
//!
//! The core consumes the `ExchangeApi` trait only. Auth, signing, retries
//! and rate limiting are the client's concern, not the trading loop's.

pub mod http;

use crate::models::{
    Market, MarketStatus, Order, OrderBook, OrderBookLevel, OrderSide, OrderStatus, OrderType,
    Position, Resolution,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

pub use http::RestClient;

/// One page of market records plus the cursor for the next.
#[derive(Debug, Clone)]
pub struct MarketsPage {
    pub markets: Vec<Market>,
    pub cursor: Option<String>,
}

/// What the core requires from an exchange client.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    async fn list_markets(
        &self,
        status: Option<&str>,
        series: Option<&str>,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<MarketsPage>;

    async fn get_market(&self, ticker: &str) -> Result<Market>;

    async fn get_orderbook(&self, ticker: &str, depth: Option<u32>) -> Result<OrderBook>;

    /// Cash balance in dollars.
    async fn get_balance(&self) -> Result<f64>;

    async fn get_positions(&self) -> Result<Vec<Position>>;

    /// Returns the exchange order id.
    async fn place_order(
        &self,
        ticker: &str,
        side: OrderSide,
        action: &str,
        count: u32,
        price_cents: u32,
        order_type: OrderType,
    ) -> Result<String>;

    async fn get_order(&self, order_id: &str) -> Result<Order>;

    async fn cancel_order(&self, order_id: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Wire records and mapping
// ---------------------------------------------------------------------------

/// Market record as it appears on the wire: prices in integer cents.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiMarket {
    pub ticker: String,
    #[serde(default)]
    pub series_ticker: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub category: String,

    pub open_time: Option<DateTime<Utc>>,
    pub close_time: Option<DateTime<Utc>>,
    pub expiration_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub last_price: i64,
    #[serde(default)]
    pub yes_bid: i64,
    #[serde(default)]
    pub yes_ask: i64,
    #[serde(default)]
    pub volume: u64,
    #[serde(default)]
    pub open_interest: u64,

    pub result: Option<String>,
}

impl ApiMarket {
    pub fn into_market(self) -> Market {
        let status = match self.status.as_str() {
            "closed" => MarketStatus::Closed,
            "settled" => MarketStatus::Settled,
            _ => MarketStatus::Open,
        };

        // Closed books quote nothing; 0/100 are the wire's empty markers
        let quotes_live = status == MarketStatus::Open;
        let yes_bid = (quotes_live && self.yes_bid > 0).then(|| self.yes_bid as f64 / 100.0);
        let yes_ask = (quotes_live && self.yes_ask < 100).then(|| self.yes_ask as f64 / 100.0);

        let result = match self.result.as_deref() {
            Some("yes") => Some(Resolution::Yes),
            Some("no") => Some(Resolution::No),
            _ => None,
        };

        Market {
            ticker: self.ticker,
            series_ticker: self.series_ticker,
            title: self.title,
            category: self.category,
            open_time: self.open_time,
            close_time: self.close_time,
            expiration_time: self.expiration_time,
            status,
            last_price: self.last_price as f64 / 100.0,
            yes_bid,
            yes_ask,
            volume: self.volume,
            open_interest: self.open_interest,
            result,
        }
    }
}

/// Wire order statuses: resting | canceled | executed | pending.
pub fn map_order_status(wire: &str) -> OrderStatus {
    match wire {
        "resting" => OrderStatus::Open,
        "canceled" => OrderStatus::Cancelled,
        "executed" => OrderStatus::Filled,
        _ => OrderStatus::Pending,
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiOrder {
    pub order_id: String,
    pub ticker: String,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub yes_price: i64,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub filled_count: u32,
    pub created_time: Option<DateTime<Utc>>,
}

impl ApiOrder {
    pub fn into_order(self) -> Order {
        Order {
            id: self.order_id,
            ticker: self.ticker,
            side: if self.side == "no" {
                OrderSide::No
            } else {
                OrderSide::Yes
            },
            action: if self.action == "sell" {
                crate::models::OrderAction::Sell
            } else {
                crate::models::OrderAction::Buy
            },
            order_type: OrderType::Limit,
            price: self.yes_price.clamp(1, 99) as u32,
            quantity: self.count,
            filled_quantity: self.filled_count,
            status: map_order_status(&self.status),
            created_at: self.created_time.unwrap_or_else(Utc::now),
            updated_at: None,
            signal_id: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiPosition {
    pub ticker: String,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub position: i64,
    /// Average entry price in cents.
    #[serde(default)]
    pub average_price: i64,
    #[serde(default)]
    pub realized_pnl: i64,
}

impl ApiPosition {
    pub fn into_position(self) -> Position {
        let now = Utc::now();
        Position {
            ticker: self.ticker,
            side: if self.side == "no" {
                OrderSide::No
            } else {
                OrderSide::Yes
            },
            quantity: self.position.max(0) as u32,
            average_price: self.average_price as f64 / 100.0,
            realized_pnl: self.realized_pnl as f64 / 100.0,
            unrealized_pnl: 0.0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Order book levels arrive as `[price_cents, quantity]` pairs of YES bids.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiOrderBook {
    #[serde(default)]
    pub yes: Vec<(u32, u32)>,
}

impl ApiOrderBook {
    pub fn into_orderbook(self, ticker: &str) -> OrderBook {
        OrderBook {
            ticker: ticker.to_string(),
            yes_bids: self
                .yes
                .into_iter()
                .filter(|&(price, _)| (1..=99).contains(&price))
                .map(|(price, quantity)| OrderBookLevel { price, quantity })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_wire_mapping() {
        let api = ApiMarket {
            ticker: "S-24JAN01-T1".to_string(),
            series_ticker: "S".to_string(),
            title: "Test".to_string(),
            category: String::new(),
            open_time: None,
            close_time: None,
            expiration_time: None,
            status: "open".to_string(),
            last_price: 42,
            yes_bid: 41,
            yes_ask: 43,
            volume: 1000,
            open_interest: 500,
            result: None,
        };

        let market = api.into_market();
        assert_eq!(market.status, MarketStatus::Open);
        assert!((market.last_price - 0.42).abs() < 1e-12);
        assert_eq!(market.yes_bid, Some(0.41));
        assert_eq!(market.yes_ask, Some(0.43));
    }

    #[test]
    fn test_closed_market_has_no_quotes() {
        let api = ApiMarket {
            ticker: "X".to_string(),
            series_ticker: String::new(),
            title: String::new(),
            category: String::new(),
            open_time: None,
            close_time: None,
            expiration_time: None,
            status: "settled".to_string(),
            last_price: 100,
            yes_bid: 99,
            yes_ask: 100,
            volume: 0,
            open_interest: 0,
            result: Some("yes".to_string()),
        };

        let market = api.into_market();
        assert_eq!(market.status, MarketStatus::Settled);
        assert_eq!(market.yes_bid, None);
        assert_eq!(market.yes_ask, None);
        assert_eq!(market.result, Some(Resolution::Yes));
    }

    #[test]
    fn test_order_status_mapping() {
        assert_eq!(map_order_status("resting"), OrderStatus::Open);
        assert_eq!(map_order_status("canceled"), OrderStatus::Cancelled);
        assert_eq!(map_order_status("executed"), OrderStatus::Filled);
        assert_eq!(map_order_status("pending"), OrderStatus::Pending);
        assert_eq!(map_order_status("anything-else"), OrderStatus::Pending);
    }

    #[test]
    fn test_orderbook_mapping_drops_bad_levels() {
        let api = ApiOrderBook {
            yes: vec![(42, 100), (0, 50), (100, 10), (38, 200)],
        };
        let book = api.into_orderbook("T");
        assert_eq!(book.yes_bids.len(), 2);
        assert_eq!(book.best_yes_bid(), Some(0.42));
    }
}
