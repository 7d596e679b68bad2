//! Directional signal generator from constraint violations.
//!
//! A signal is emitted when a market price sits outside its logical bounds
//! by more than fee + spread + safety margin. Signals carry their own TTL
//! and are revalidated against live prices before any order goes out.

use crate::engine::{ConstraintEngine, ProbabilityBound};
use crate::fees::calculate_fee;
use crate::models::{
    DirectionalSignal, Market, SignalDirection, SignalKind,
};
use crate::signals::rebalancing::RebalancingOpportunity;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

pub struct SignalGenerator {
    pub min_edge_threshold: f64,
    pub safety_margin: f64,
    pub signal_ttl_seconds: i64,
}

impl Default for SignalGenerator {
    fn default() -> Self {
        Self {
            min_edge_threshold: 0.01,
            safety_margin: 0.005,
            signal_ttl_seconds: 300,
        }
    }
}

impl SignalGenerator {
    pub fn new(min_edge_threshold: f64, safety_margin: f64, signal_ttl_seconds: i64) -> Self {
        Self {
            min_edge_threshold,
            safety_margin,
            signal_ttl_seconds,
        }
    }

    /// Signal from a single bound violation, or None when the net edge does
    /// not clear the threshold.
    pub fn generate_signal(
        &self,
        ticker: &str,
        current_price: f64,
        bound: &ProbabilityBound,
        spread: f64,
        now: DateTime<Utc>,
    ) -> Option<DirectionalSignal> {
        let violation = bound.violation(current_price);
        if violation <= 0.0 {
            return None;
        }

        let fee = calculate_fee(current_price, 1);

        let (direction, bound_price, raw_edge) = if current_price < bound.lower {
            (
                SignalDirection::BuyYes,
                bound.lower,
                bound.lower - current_price,
            )
        } else {
            (
                SignalDirection::BuyNo,
                bound.upper,
                current_price - bound.upper,
            )
        };

        let net_edge = raw_edge - fee - spread - self.safety_margin;
        if net_edge < self.min_edge_threshold {
            return None;
        }

        Some(DirectionalSignal {
            ticker: ticker.to_string(),
            direction,
            kind: SignalKind::ConstraintViolation,
            current_price,
            bound_price,
            raw_edge,
            estimated_fee: fee,
            estimated_spread: spread,
            net_edge,
            confidence: bound.confidence,
            source_id: bound.source_constraint_id.clone(),
            created_at: now,
            expires_at: Some(now + Duration::seconds(self.signal_ttl_seconds)),
        })
    }

    /// Signals for every constrained market, sorted by net edge descending.
    pub fn generate_signals(
        &self,
        engine: &ConstraintEngine,
        markets: &[Market],
        spreads: &HashMap<String, f64>,
    ) -> Vec<DirectionalSignal> {
        let now = Utc::now();
        let prices: HashMap<String, f64> = markets
            .iter()
            .filter_map(|m| m.mid_price().map(|p| (m.ticker.clone(), p)))
            .collect();

        let bounds = engine.all_bounds(&prices);
        let mut signals = Vec::new();

        for (ticker, bound) in &bounds {
            let Some(&current_price) = prices.get(ticker) else {
                continue;
            };
            let spread = spreads.get(ticker).copied().unwrap_or(0.0);

            if let Some(signal) = self.generate_signal(ticker, current_price, bound, spread, now) {
                signals.push(signal);
            }
        }

        signals.sort_by(|a, b| {
            b.net_edge
                .partial_cmp(&a.net_edge)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        signals
    }

    /// Fan a rebalancing opportunity out into per-leg directional signals:
    /// BUY YES for a long basket, BUY NO for a short one, each leg carrying
    /// an equal slice of the post-fee profit.
    pub fn generate_from_rebalancing(
        &self,
        opportunity: &RebalancingOpportunity,
    ) -> Vec<DirectionalSignal> {
        let now = Utc::now();
        let direction = if opportunity.is_long() {
            SignalDirection::BuyYes
        } else {
            SignalDirection::BuyNo
        };

        let legs = opportunity.conditions.len();
        if legs == 0 {
            return Vec::new();
        }
        let edge_per_leg = opportunity.profit_post_fee / legs as f64;

        opportunity
            .conditions
            .iter()
            .zip(opportunity.prices.iter())
            .map(|(ticker, &price)| {
                let fee = calculate_fee(price, 1);
                DirectionalSignal {
                    ticker: ticker.clone(),
                    direction,
                    kind: SignalKind::Rebalancing,
                    current_price: price,
                    bound_price: 1.0 / legs as f64,
                    raw_edge: edge_per_leg + fee,
                    estimated_fee: fee,
                    estimated_spread: 0.0,
                    net_edge: edge_per_leg,
                    confidence: 1.0,
                    source_id: opportunity.market_id.clone(),
                    created_at: now,
                    expires_at: Some(now + Duration::seconds(self.signal_ttl_seconds)),
                }
            })
            .collect()
    }

    /// Check a previously emitted signal against a fresh price.
    pub fn validate_signal(
        &self,
        signal: &DirectionalSignal,
        current_price: f64,
        max_price_drift: f64,
        now: DateTime<Utc>,
    ) -> bool {
        if !signal.is_valid_at(now) {
            return false;
        }

        if (current_price - signal.current_price).abs() > max_price_drift {
            return false;
        }

        // The price must still violate the bound in the signal's direction
        match signal.direction {
            SignalDirection::BuyYes => current_price < signal.bound_price,
            SignalDirection::BuyNo => current_price > signal.bound_price,
        }
    }

    /// Execution-rule filter:
    /// - never cross the spread for an edge under 2x the spread
    /// - inside the final hour, require at least 3% net edge
    pub fn filter_by_execution_rules(
        &self,
        signals: Vec<DirectionalSignal>,
        markets: &HashMap<String, Market>,
        now: DateTime<Utc>,
    ) -> Vec<DirectionalSignal> {
        signals
            .into_iter()
            .filter(|signal| {
                let Some(market) = markets.get(&signal.ticker) else {
                    return false;
                };

                if signal.estimated_spread > 0.0
                    && signal.net_edge < 2.0 * signal.estimated_spread
                {
                    return false;
                }

                if let Some(days) = market.days_to_expiration(now) {
                    if days * 24.0 < 1.0 && signal.net_edge < 0.03 {
                        return false;
                    }
                }

                true
            })
            .collect()
    }

    /// Rank by `net_edge * confidence`, best first.
    pub fn rank_signals(&self, mut signals: Vec<DirectionalSignal>) -> Vec<DirectionalSignal> {
        signals.sort_by(|a, b| {
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        signals
    }
}
