//! Intra-market rebalancing detector.
//!
//! For a partition of outcomes the YES prices must sum to 1. When they do
//! not, buying the whole basket (sum < 1) or the complementary NO basket
//! (sum > 1) locks in the gap at settlement, net of fees.

use crate::fees::calculate_total_fees;
use crate::models::{Market, OrderBook};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Ignore deviations below this - they never survive fees.
const MIN_DEVIATION: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BasketSide {
    /// Sum of YES prices below 1: buy every YES leg.
    Long,
    /// Sum above 1: buy every complementary NO leg.
    Short,
}

/// Detected basket mispricing in a multi-condition market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalancingOpportunity {
    pub market_id: String,
    pub side: BasketSide,
    pub conditions: Vec<String>,
    pub prices: Vec<f64>,

    pub price_sum: f64,
    pub deviation: f64,

    pub profit_pre_fee: f64,
    pub total_fees: f64,
    pub profit_post_fee: f64,

    /// Minimum depth across conditions; zero when depths were not supplied.
    pub min_liquidity: u32,
    pub created_at: DateTime<Utc>,
}

impl RebalancingOpportunity {
    pub fn is_long(&self) -> bool {
        self.side == BasketSide::Long
    }

    /// Ranking score: profit weighted by depth saturation at 1000 contracts.
    pub fn score(&self) -> f64 {
        let liquidity_factor = (self.min_liquidity as f64 / 1000.0).min(1.0);
        self.profit_post_fee * liquidity_factor
    }
}

pub struct RebalancingDetector {
    pub min_profit_threshold: f64,
}

impl Default for RebalancingDetector {
    fn default() -> Self {
        Self {
            min_profit_threshold: 0.01,
        }
    }
}

impl RebalancingDetector {
    pub fn new(min_profit_threshold: f64) -> Self {
        Self {
            min_profit_threshold,
        }
    }

    /// Scan one multi-condition market given per-condition YES prices.
    pub fn scan_market(
        &self,
        market_id: &str,
        conditions: &[String],
        prices: &[f64],
        quantities: Option<&[u32]>,
    ) -> Option<RebalancingOpportunity> {
        if conditions.len() < 2 || conditions.len() != prices.len() {
            return None;
        }

        let price_sum: f64 = prices.iter().sum();
        let deviation = (price_sum - 1.0).abs();
        if deviation < MIN_DEVIATION {
            return None;
        }

        let total_fees = calculate_total_fees(prices, 1);

        let (side, profit_pre_fee) = if price_sum < 1.0 {
            (BasketSide::Long, 1.0 - price_sum)
        } else {
            (BasketSide::Short, price_sum - 1.0)
        };
        let profit_post_fee = profit_pre_fee - total_fees;

        if profit_post_fee < self.min_profit_threshold {
            return None;
        }

        let min_liquidity = quantities
            .and_then(|qs| qs.iter().copied().min())
            .unwrap_or(0);

        Some(RebalancingOpportunity {
            market_id: market_id.to_string(),
            side,
            conditions: conditions.to_vec(),
            prices: prices.to_vec(),
            price_sum,
            deviation,
            profit_pre_fee,
            total_fees,
            profit_post_fee,
            min_liquidity,
            created_at: Utc::now(),
        })
    }

    /// Scan a series of partition markets using mid prices.
    ///
    /// Mids are fine for detection; execution sizing should come from the
    /// order-book scan below, which prices each side off the touchable book.
    pub fn scan_series(
        &self,
        series_ticker: &str,
        markets: &[&Market],
    ) -> Option<RebalancingOpportunity> {
        if markets.len() < 2 {
            return None;
        }

        let mut conditions = Vec::with_capacity(markets.len());
        let mut prices = Vec::with_capacity(markets.len());
        for market in markets {
            let mid = market.mid_price()?;
            conditions.push(market.ticker.clone());
            prices.push(mid);
        }

        self.scan_market(series_ticker, &conditions, &prices, None)
    }

    /// Scan with order books: a long basket is priced off per-condition asks,
    /// a short basket off per-condition bids. The two are independent.
    pub fn scan_orderbook_market(
        &self,
        market_id: &str,
        orderbooks: &HashMap<String, OrderBook>,
    ) -> (
        Option<RebalancingOpportunity>,
        Option<RebalancingOpportunity>,
    ) {
        if orderbooks.len() < 2 {
            return (None, None);
        }

        let mut conditions: Vec<String> = orderbooks.keys().cloned().collect();
        conditions.sort();

        let mut ask_prices = Vec::with_capacity(conditions.len());
        let mut bid_prices = Vec::with_capacity(conditions.len());
        let mut depths = Vec::with_capacity(conditions.len());

        for ticker in &conditions {
            let book = &orderbooks[ticker];
            ask_prices.push(book.best_yes_ask().unwrap_or(1.0));
            bid_prices.push(book.best_yes_bid().unwrap_or(0.0));
            depths.push(book.total_depth(1));
        }

        let long = if ask_prices.iter().sum::<f64>() < 1.0 {
            self.scan_market(
                &format!("{}_long", market_id),
                &conditions,
                &ask_prices,
                Some(&depths),
            )
        } else {
            None
        };

        let short = if bid_prices.iter().sum::<f64>() > 1.0 {
            self.scan_market(
                &format!("{}_short", market_id),
                &conditions,
                &bid_prices,
                Some(&depths),
            )
        } else {
            None
        };

        (long, short)
    }

    /// Haircut the detected profit by expected per-leg slippage.
    pub fn estimate_execution_profit(
        &self,
        opportunity: &RebalancingOpportunity,
        slippage_per_leg: f64,
    ) -> f64 {
        opportunity.profit_post_fee - slippage_per_leg * opportunity.conditions.len() as f64
    }

    /// Rank by profit weighted by depth.
    pub fn rank_opportunities(
        &self,
        mut opportunities: Vec<RebalancingOpportunity>,
    ) -> Vec<RebalancingOpportunity> {
        opportunities.sort_by(|a, b| {
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        opportunities
    }
}
