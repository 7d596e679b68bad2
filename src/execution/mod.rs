//! Execution Coordinator
//! Mission: A signal is a hypothesis — revalidate, size, then commit
//!
//! Rules:
//! - Always LIMIT orders, price clamped to 1..=99 cents
//! - Cross the spread only when edge > 2x spread
//! - Revalidate price and bound immediately before submission
//! - OPEN orders past the timeout get cancelled, never resubmitted

use crate::exchange::ExchangeApi;
use crate::models::{
    DirectionalSignal, Order, OrderAction, OrderSide, OrderStatus, OrderType, SignalDirection,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of an execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success,
    Rejected,
    ValidationFailed,
    InsufficientBalance,
    MarketClosed,
}

/// One line of the execution audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub timestamp: DateTime<Utc>,
    pub ticker: String,
    pub direction: SignalDirection,
    pub net_edge: f64,
    pub order_id: Option<String>,
    pub quantity: u32,
    pub price_cents: u32,
    pub outcome: ExecutionOutcome,
    pub message: String,
}

pub struct ExecutionCoordinator {
    client: Arc<dyn ExchangeApi>,
    pub max_price_drift: f64,
    pub order_timeout_seconds: i64,
    pub paper_trading: bool,

    pending_orders: HashMap<String, Order>,
    execution_log: Vec<ExecutionRecord>,
    paper_seq: u64,
}

impl ExecutionCoordinator {
    pub fn new(
        client: Arc<dyn ExchangeApi>,
        max_price_drift: f64,
        order_timeout_seconds: i64,
        paper_trading: bool,
    ) -> Self {
        Self {
            client,
            max_price_drift,
            order_timeout_seconds,
            paper_trading,
            pending_orders: HashMap::new(),
            execution_log: Vec::new(),
            paper_seq: 0,
        }
    }

    /// Pre-flight revalidation against a fresh market fetch.
    pub async fn validate_signal(&self, signal: &DirectionalSignal) -> (bool, String) {
        if !signal.is_valid() {
            return (false, "signal expired".to_string());
        }

        let market = match self.client.get_market(&signal.ticker).await {
            Ok(market) => market,
            Err(e) => return (false, format!("validation fetch failed: {}", e)),
        };

        if !market.is_open() {
            return (false, "market not open".to_string());
        }

        let current_price = market.mid_price().unwrap_or(market.last_price);
        let drift = (current_price - signal.current_price).abs();
        if drift > self.max_price_drift {
            return (false, format!("price drifted {:.1}c", drift * 100.0));
        }

        // The bound may have shifted; the price must still violate it
        let still_violating = match signal.direction {
            SignalDirection::BuyYes => current_price < signal.bound_price,
            SignalDirection::BuyNo => current_price > signal.bound_price,
        };
        if !still_violating {
            return (false, "price no longer violates bound".to_string());
        }

        (true, "valid".to_string())
    }

    /// Limit price in cents, clamped to 1..=99.
    ///
    /// Aggressive orders cross toward the far side of the spread; passive
    /// ones sit at the signal's reference price. Buy-yes rounds down,
    /// buy-no rounds up, so rounding never pays more than intended.
    pub fn calculate_limit_price(&self, signal: &DirectionalSignal, aggressive: bool) -> u32 {
        let spread = if aggressive {
            signal.estimated_spread
        } else {
            0.0
        };
        // The 1e-9 nudges keep exact cent values from falling across the
        // floor/ceil boundary through f64 representation alone
        let cents = match signal.direction {
            SignalDirection::BuyYes => ((signal.current_price + spread) * 100.0 + 1e-9).floor(),
            SignalDirection::BuyNo => ((signal.current_price - spread) * 100.0 - 1e-9).ceil(),
        };
        (cents as i64).clamp(1, 99) as u32
    }

    /// Revalidate and submit one risk-approved, pre-sized signal.
    pub async fn execute_signal(
        &mut self,
        signal: &DirectionalSignal,
        contracts: u32,
        account_balance: f64,
    ) -> (ExecutionOutcome, Option<Order>) {
        let (valid, reason) = self.validate_signal(signal).await;
        if !valid {
            warn!(ticker = %signal.ticker, %reason, "signal failed revalidation");
            let outcome = if reason.contains("not open") {
                ExecutionOutcome::MarketClosed
            } else {
                ExecutionOutcome::ValidationFailed
            };
            self.log_execution(signal, None, outcome, &reason);
            return (outcome, None);
        }

        if contracts < 1 {
            self.log_execution(signal, None, ExecutionOutcome::Rejected, "size too small");
            return (ExecutionOutcome::Rejected, None);
        }

        let execution_price = match signal.direction {
            SignalDirection::BuyYes => signal.current_price,
            SignalDirection::BuyNo => 1.0 - signal.current_price,
        };
        let dollar_size = contracts as f64 * execution_price;
        if dollar_size > account_balance {
            self.log_execution(
                signal,
                None,
                ExecutionOutcome::InsufficientBalance,
                "insufficient balance",
            );
            return (ExecutionOutcome::InsufficientBalance, None);
        }

        let aggressive = signal.net_edge > 2.0 * signal.estimated_spread;
        let price_cents = self.calculate_limit_price(signal, aggressive);
        let side = signal.direction.order_side();

        let mut order = Order {
            id: String::new(),
            ticker: signal.ticker.clone(),
            side,
            action: OrderAction::Buy,
            order_type: OrderType::Limit,
            price: price_cents,
            quantity: contracts,
            filled_quantity: 0,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
            updated_at: None,
            signal_id: signal.source_id.clone(),
        };

        if self.paper_trading {
            self.paper_seq += 1;
            order.id = format!("paper_{}", self.paper_seq);
            order.status = OrderStatus::Filled;
            order.filled_quantity = contracts;
            info!(
                ticker = %signal.ticker,
                contracts,
                price_cents,
                side = ?side,
                "[PAPER] order filled"
            );
            self.log_execution(signal, Some(&order), ExecutionOutcome::Success, "paper fill");
            return (ExecutionOutcome::Success, Some(order));
        }

        match self
            .client
            .place_order(
                &signal.ticker,
                side,
                "buy",
                contracts,
                price_cents,
                OrderType::Limit,
            )
            .await
        {
            Ok(order_id) => {
                order.id = order_id.clone();
                order.status = OrderStatus::Open;
                self.pending_orders.insert(order_id.clone(), order.clone());
                info!(order_id = %order_id, ticker = %signal.ticker, "order placed");
                self.log_execution(signal, Some(&order), ExecutionOutcome::Success, "order placed");
                (ExecutionOutcome::Success, Some(order))
            }
            Err(e) => {
                warn!(ticker = %signal.ticker, error = %e, "order placement failed");
                self.log_execution(signal, None, ExecutionOutcome::Rejected, &e.to_string());
                (ExecutionOutcome::Rejected, None)
            }
        }
    }

    /// Submit a close (sell) for part or all of a held position. Paper mode
    /// fills immediately at the given price.
    pub async fn close_position(
        &mut self,
        ticker: &str,
        side: OrderSide,
        quantity: u32,
        price_cents: u32,
        reason: &str,
    ) -> (ExecutionOutcome, Option<Order>) {
        if quantity == 0 {
            return (ExecutionOutcome::Rejected, None);
        }
        let price_cents = price_cents.clamp(1, 99);

        let mut order = Order {
            id: String::new(),
            ticker: ticker.to_string(),
            side,
            action: OrderAction::Sell,
            order_type: OrderType::Limit,
            price: price_cents,
            quantity,
            filled_quantity: 0,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
            updated_at: None,
            signal_id: String::new(),
        };

        if self.paper_trading {
            self.paper_seq += 1;
            order.id = format!("paper_{}", self.paper_seq);
            order.status = OrderStatus::Filled;
            order.filled_quantity = quantity;
            info!(ticker, quantity, price_cents, reason, "[PAPER] position close filled");
            return (ExecutionOutcome::Success, Some(order));
        }

        match self
            .client
            .place_order(ticker, side, "sell", quantity, price_cents, OrderType::Limit)
            .await
        {
            Ok(order_id) => {
                order.id = order_id.clone();
                order.status = OrderStatus::Open;
                self.pending_orders.insert(order_id, order.clone());
                info!(ticker, quantity, reason, "close order placed");
                (ExecutionOutcome::Success, Some(order))
            }
            Err(e) => {
                warn!(ticker, error = %e, "close order failed");
                (ExecutionOutcome::Rejected, None)
            }
        }
    }

    /// Refresh one tracked order from the exchange. Terminal orders leave
    /// the pending map.
    pub async fn check_order_status(&mut self, order_id: &str) -> Option<Order> {
        if !self.pending_orders.contains_key(order_id) {
            return None;
        }

        if self.paper_trading {
            return self.pending_orders.get(order_id).cloned();
        }

        match self.client.get_order(order_id).await {
            Ok(fresh) => {
                let order = self.pending_orders.get_mut(order_id)?;
                order.status = fresh.status;
                order.filled_quantity = fresh.filled_quantity;
                order.updated_at = Some(Utc::now());
                let snapshot = order.clone();
                if snapshot.is_complete() {
                    self.pending_orders.remove(order_id);
                }
                Some(snapshot)
            }
            Err(e) => {
                warn!(order_id, error = %e, "order status check failed");
                self.pending_orders.get(order_id).cloned()
            }
        }
    }

    /// Cancel every OPEN order older than the configured timeout.
    pub async fn expire_stale_orders(&mut self, now: DateTime<Utc>) -> u32 {
        let stale: Vec<String> = self
            .pending_orders
            .values()
            .filter(|o| {
                o.status == OrderStatus::Open
                    && (now - o.created_at).num_seconds() > self.order_timeout_seconds
            })
            .map(|o| o.id.clone())
            .collect();

        let mut cancelled = 0;
        for order_id in stale {
            warn!(order_id = %order_id, "order timed out, cancelling");
            if self.cancel_order(&order_id).await {
                cancelled += 1;
            }
        }
        cancelled
    }

    pub async fn cancel_order(&mut self, order_id: &str) -> bool {
        if !self.pending_orders.contains_key(order_id) {
            return false;
        }

        if self.paper_trading {
            self.pending_orders.remove(order_id);
            return true;
        }

        match self.client.cancel_order(order_id).await {
            Ok(()) => {
                self.pending_orders.remove(order_id);
                true
            }
            Err(e) => {
                warn!(order_id, error = %e, "cancel failed");
                false
            }
        }
    }

    /// Cancel everything still pending. Used on drain/shutdown.
    pub async fn cancel_all_pending(&mut self) -> u32 {
        let ids: Vec<String> = self.pending_orders.keys().cloned().collect();
        let mut cancelled = 0;
        for order_id in ids {
            if self.cancel_order(&order_id).await {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Poll an order until it reaches a terminal status or the timeout
    /// elapses, then cancel it.
    pub async fn wait_for_fill(&mut self, order_id: &str, timeout_seconds: i64) -> Option<Order> {
        let deadline = Utc::now() + chrono::Duration::seconds(timeout_seconds);

        while Utc::now() < deadline {
            let order = self.check_order_status(order_id).await?;
            if order.is_complete() {
                return Some(order);
            }
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }

        self.cancel_order(order_id).await;
        self.pending_orders.get(order_id).cloned()
    }

    pub fn pending_orders(&self) -> Vec<&Order> {
        self.pending_orders.values().collect()
    }

    pub fn execution_log(&self) -> &[ExecutionRecord] {
        &self.execution_log
    }

    fn log_execution(
        &mut self,
        signal: &DirectionalSignal,
        order: Option<&Order>,
        outcome: ExecutionOutcome,
        message: &str,
    ) {
        self.execution_log.push(ExecutionRecord {
            timestamp: Utc::now(),
            ticker: signal.ticker.clone(),
            direction: signal.direction,
            net_edge: signal.net_edge,
            order_id: order.map(|o| o.id.clone()),
            quantity: order.map(|o| o.quantity).unwrap_or(0),
            price_cents: order.map(|o| o.price).unwrap_or(0),
            outcome,
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MarketsPage;
    use crate::models::{Market, MarketStatus, Position, SignalKind};
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use parking_lot::RwLock;

    /// Canned exchange for coordinator tests.
    struct StubExchange {
        markets: RwLock<HashMap<String, Market>>,
    }

    impl StubExchange {
        fn with_market(market: Market) -> Self {
            let mut markets = HashMap::new();
            markets.insert(market.ticker.clone(), market);
            Self {
                markets: RwLock::new(markets),
            }
        }
    }

    #[async_trait]
    impl ExchangeApi for StubExchange {
        async fn list_markets(
            &self,
            _status: Option<&str>,
            _series: Option<&str>,
            _limit: u32,
            _cursor: Option<&str>,
        ) -> Result<MarketsPage> {
            Ok(MarketsPage {
                markets: self.markets.read().values().cloned().collect(),
                cursor: None,
            })
        }

        async fn get_market(&self, ticker: &str) -> Result<Market> {
            self.markets
                .read()
                .get(ticker)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("unknown market"))
        }

        async fn get_orderbook(
            &self,
            _ticker: &str,
            _depth: Option<u32>,
        ) -> Result<crate::models::OrderBook> {
            Ok(crate::models::OrderBook::default())
        }

        async fn get_balance(&self) -> Result<f64> {
            Ok(10_000.0)
        }

        async fn get_positions(&self) -> Result<Vec<Position>> {
            Ok(Vec::new())
        }

        async fn place_order(
            &self,
            _ticker: &str,
            _side: OrderSide,
            _action: &str,
            _count: u32,
            _price_cents: u32,
            _order_type: OrderType,
        ) -> Result<String> {
            bail!("live orders not available in tests")
        }

        async fn get_order(&self, _order_id: &str) -> Result<Order> {
            bail!("no orders")
        }

        async fn cancel_order(&self, _order_id: &str) -> Result<()> {
            Ok(())
        }
    }

    fn open_market(ticker: &str, bid: f64, ask: f64) -> Market {
        Market {
            ticker: ticker.to_string(),
            series_ticker: String::new(),
            title: String::new(),
            category: String::new(),
            open_time: None,
            close_time: None,
            expiration_time: None,
            status: MarketStatus::Open,
            last_price: (bid + ask) / 2.0,
            yes_bid: Some(bid),
            yes_ask: Some(ask),
            volume: 0,
            open_interest: 0,
            result: None,
        }
    }

    fn signal(ticker: &str, price: f64, bound: f64, spread: f64) -> DirectionalSignal {
        let raw = bound - price;
        DirectionalSignal {
            ticker: ticker.to_string(),
            direction: SignalDirection::BuyYes,
            kind: SignalKind::ConstraintViolation,
            current_price: price,
            bound_price: bound,
            raw_edge: raw,
            estimated_fee: 0.02,
            estimated_spread: spread,
            net_edge: raw - 0.02 - spread - 0.005,
            confidence: 1.0,
            source_id: "subset_1".to_string(),
            created_at: Utc::now(),
            expires_at: Some(Utc::now() + chrono::Duration::seconds(300)),
        }
    }

    fn coordinator(market: Market) -> ExecutionCoordinator {
        ExecutionCoordinator::new(Arc::new(StubExchange::with_market(market)), 0.02, 60, true)
    }

    #[test]
    fn test_limit_price_clamped() {
        let coord = coordinator(open_market("T", 0.34, 0.36));

        let mut low = signal("T", 0.005, 0.10, 0.0);
        low.current_price = 0.005;
        assert_eq!(coord.calculate_limit_price(&low, false), 1);

        let mut high = signal("T", 0.999, 1.0, 0.0);
        high.current_price = 0.999;
        assert_eq!(coord.calculate_limit_price(&high, false), 99);
    }

    #[test]
    fn test_limit_price_rounding_by_direction() {
        let coord = coordinator(open_market("T", 0.34, 0.36));

        let buy_yes = signal("T", 0.35, 0.45, 0.012);
        // Aggressive buy-yes: floor((0.35 + 0.012) * 100) = 36
        assert_eq!(coord.calculate_limit_price(&buy_yes, true), 36);
        assert_eq!(coord.calculate_limit_price(&buy_yes, false), 35);

        let mut buy_no = buy_yes.clone();
        buy_no.direction = SignalDirection::BuyNo;
        // Aggressive buy-no: ceil((0.35 - 0.012) * 100) = 34
        assert_eq!(coord.calculate_limit_price(&buy_no, true), 34);
    }

    #[tokio::test]
    async fn test_paper_execution_fills_at_limit() {
        let mut coord = coordinator(open_market("T", 0.34, 0.36));
        let s = signal("T", 0.35, 0.45, 0.01);

        let (outcome, order) = coord.execute_signal(&s, 500, 10_000.0).await;
        assert_eq!(outcome, ExecutionOutcome::Success);
        let order = order.unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_quantity, 500);
        assert!(order.id.starts_with("paper_"));
    }

    #[tokio::test]
    async fn test_insufficient_balance() {
        let mut coord = coordinator(open_market("T", 0.34, 0.36));
        let s = signal("T", 0.35, 0.45, 0.01);

        // 500 contracts at 0.35 cost $175 against a $100 account
        let (outcome, order) = coord.execute_signal(&s, 500, 100.0).await;
        assert_eq!(outcome, ExecutionOutcome::InsufficientBalance);
        assert!(order.is_none());
    }

    #[tokio::test]
    async fn test_zero_contracts_rejected() {
        let mut coord = coordinator(open_market("T", 0.34, 0.36));
        let s = signal("T", 0.35, 0.45, 0.01);

        let (outcome, _) = coord.execute_signal(&s, 0, 10_000.0).await;
        assert_eq!(outcome, ExecutionOutcome::Rejected);
    }

    #[tokio::test]
    async fn test_drifted_signal_rejected() {
        // Market mid is 0.35 but the signal was cut at 0.40
        let mut coord = coordinator(open_market("T", 0.34, 0.36));
        let s = signal("T", 0.40, 0.50, 0.01);

        let (outcome, order) = coord.execute_signal(&s, 100, 10_000.0).await;
        assert_eq!(outcome, ExecutionOutcome::ValidationFailed);
        assert!(order.is_none());
    }

    #[tokio::test]
    async fn test_closed_market_rejected() {
        let mut market = open_market("T", 0.34, 0.36);
        market.status = MarketStatus::Closed;
        let mut coord = coordinator(market);
        let s = signal("T", 0.35, 0.45, 0.01);

        let (outcome, _) = coord.execute_signal(&s, 100, 10_000.0).await;
        assert_eq!(outcome, ExecutionOutcome::MarketClosed);
    }

    #[tokio::test]
    async fn test_recovered_price_rejected() {
        // Mid 0.46 no longer violates the 0.45 floor
        let mut coord = coordinator(open_market("T", 0.45, 0.47));
        let s = signal("T", 0.46, 0.45, 0.01);

        let (outcome, _) = coord.execute_signal(&s, 100, 10_000.0).await;
        assert_eq!(outcome, ExecutionOutcome::ValidationFailed);
    }

    #[tokio::test]
    async fn test_paper_close_position() {
        let mut coord = coordinator(open_market("T", 0.34, 0.36));
        let (outcome, order) = coord
            .close_position("T", OrderSide::Yes, 50, 44, "take profit")
            .await;
        assert_eq!(outcome, ExecutionOutcome::Success);
        let order = order.unwrap();
        assert_eq!(order.action, OrderAction::Sell);
        assert_eq!(order.filled_quantity, 50);
    }

    #[tokio::test]
    async fn test_execution_log_records_rejections() {
        let mut coord = coordinator(open_market("T", 0.34, 0.36));
        let mut s = signal("T", 0.35, 0.45, 0.01);
        s.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));

        let (outcome, _) = coord.execute_signal(&s, 100, 10_000.0).await;
        assert_eq!(outcome, ExecutionOutcome::ValidationFailed);
        assert_eq!(coord.execution_log().len(), 1);
        assert!(coord.execution_log()[0].message.contains("expired"));
    }
}
