//! Position sizing via fractional Kelly.
//!
//! Kelly formula: f* = (p * b - q) / b
//! Where:
//!   p = win probability
//!   q = 1 - p
//!   b = odds (net profit ratio; (1 - price) / price for a binary contract)
//!
//! Full Kelly is too violent for binary books, so the raw fraction is scaled
//! down (quarter Kelly by default), then discounted for correlated exposure
//! and execution costs, then capped per market and per cluster.

use crate::models::{DirectionalSignal, SignalDirection};
use serde::{Deserialize, Serialize};

/// Sizing knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingConfig {
    /// Fractional Kelly multiplier (0.25 = quarter Kelly).
    pub kelly_fraction: f64,
    /// Hard cap per market as a fraction of equity.
    pub max_position_per_market: f64,
    /// Cap for same-series exposure as a fraction of equity.
    pub max_cluster_allocation: f64,
    /// Orders below this many dollars are not worth the fees.
    pub min_position_size: f64,
    /// Size discount per correlated open position.
    pub correlation_adjustment_per_position: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            kelly_fraction: 0.25,
            max_position_per_market: 0.05,
            max_cluster_allocation: 0.10,
            min_position_size: 10.0,
            correlation_adjustment_per_position: 0.20,
        }
    }
}

pub struct PositionSizer {
    pub config: SizingConfig,
}

impl PositionSizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    /// Full Kelly fraction for a given win probability and odds.
    pub fn calculate_kelly(&self, win_probability: f64, odds: f64) -> f64 {
        if win_probability <= 0.0 || win_probability >= 1.0 || odds <= 0.0 {
            return 0.0;
        }

        let q = 1.0 - win_probability;
        let kelly = (win_probability * odds - q) / odds;
        kelly.clamp(0.0, 1.0)
    }

    /// Kelly fraction from a net edge at an execution price.
    ///
    /// Buying at price p with edge e implies win_prob = p + e (capped at
    /// 0.99) and odds b = (1 - p) / p.
    pub fn calculate_kelly_from_edge(&self, edge: f64, price: f64) -> f64 {
        if edge <= 0.0 || price <= 0.0 || price >= 1.0 {
            return 0.0;
        }

        let win_prob = (price + edge).clamp(0.0, 0.99);
        let odds = (1.0 - price) / price;
        self.calculate_kelly(win_prob, odds)
    }

    /// Discount for correlated open positions in the same cluster.
    pub fn adjust_for_correlation(&self, fraction: f64, correlated_positions: u32) -> f64 {
        if correlated_positions == 0 {
            return fraction;
        }
        let adjustment = 1.0
            - self.config.correlation_adjustment_per_position * correlated_positions as f64;
        fraction * adjustment.max(0.1)
    }

    /// Discount for round-trip execution costs.
    pub fn adjust_for_costs(&self, fraction: f64, spread: f64, fee: f64) -> f64 {
        let cost_factor = 1.0 - 2.0 * spread - fee;
        fraction * cost_factor.max(0.5)
    }

    /// Execution price for the side actually bought.
    fn execution_price(signal: &DirectionalSignal) -> f64 {
        match signal.direction {
            SignalDirection::BuyYes => signal.current_price,
            SignalDirection::BuyNo => 1.0 - signal.current_price,
        }
    }

    /// Final dollar size for a signal. Zero when the edge, equity or
    /// resulting size is too small to trade.
    pub fn calculate_position_size(
        &self,
        signal: &DirectionalSignal,
        account_balance: f64,
        correlated_positions: u32,
    ) -> f64 {
        if account_balance <= 0.0 {
            return 0.0;
        }

        let price = Self::execution_price(signal);
        let kelly = self.calculate_kelly_from_edge(signal.net_edge, price);
        let fractional = kelly * self.config.kelly_fraction;

        let adjusted = self.adjust_for_correlation(fractional, correlated_positions);
        let adjusted =
            self.adjust_for_costs(adjusted, signal.estimated_spread, signal.estimated_fee);

        let max_size = account_balance * self.config.max_position_per_market;
        let position_size = (adjusted * account_balance).min(max_size);

        if position_size < self.config.min_position_size {
            return 0.0;
        }

        position_size
    }

    /// Dollar size to whole contracts at the execution price, rounded down.
    pub fn calculate_contracts(&self, position_size: f64, price: f64) -> u32 {
        if price <= 0.0 || position_size <= 0.0 {
            return 0;
        }
        (position_size / price).floor() as u32
    }

    /// Both dollar size and contract count for a signal.
    pub fn size_signal(
        &self,
        signal: &DirectionalSignal,
        account_balance: f64,
        correlated_positions: u32,
    ) -> (f64, u32) {
        let dollar_size =
            self.calculate_position_size(signal, account_balance, correlated_positions);
        let price = Self::execution_price(signal);
        let contracts = self.calculate_contracts(dollar_size, price);
        (dollar_size, contracts)
    }

    /// Clamp a proposed size to the cluster headroom.
    pub fn validate_cluster_limits(
        &self,
        new_size: f64,
        cluster_exposure: f64,
        account_balance: f64,
    ) -> f64 {
        let max_cluster = account_balance * self.config.max_cluster_allocation;
        let available = max_cluster - cluster_exposure;
        if available <= 0.0 {
            return 0.0;
        }
        new_size.min(available)
    }

    /// Rough risk-of-ruin estimate: RoR = (q / p)^(1 / bet_fraction),
    /// assuming independent even-sized bets.
    pub fn calculate_risk_of_ruin(&self, win_rate: f64, bet_fraction: f64) -> f64 {
        if win_rate <= 0.0 || win_rate >= 1.0 {
            return 1.0;
        }
        if bet_fraction <= 0.0 {
            return 0.0;
        }

        let q = 1.0 - win_rate;
        if win_rate <= q {
            return 1.0;
        }

        let ror = (q / win_rate).powf(1.0 / bet_fraction);
        ror.min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SignalKind;
    use chrono::Utc;

    fn signal(direction: SignalDirection, price: f64, net_edge: f64) -> DirectionalSignal {
        DirectionalSignal {
            ticker: "TEST".to_string(),
            direction,
            kind: SignalKind::ConstraintViolation,
            current_price: price,
            bound_price: price + net_edge,
            raw_edge: net_edge,
            estimated_fee: 0.0,
            estimated_spread: 0.0,
            net_edge,
            confidence: 1.0,
            source_id: String::new(),
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    #[test]
    fn test_kelly_reference_case() {
        // p = 0.60 at even odds: f* = (0.6 - 0.4) / 1 = 0.20
        let sizer = PositionSizer::new(SizingConfig::default());
        let kelly = sizer.calculate_kelly(0.60, 1.0);
        assert!((kelly - 0.20).abs() < 1e-12);
    }

    #[test]
    fn test_full_sizing_chain() {
        // Edge 0.10 at price 0.50: win_prob 0.60 at even odds -> f* = 0.20.
        // Quarter Kelly -> 0.05; two correlated positions -> x0.60 = 0.03;
        // equity 10k -> $300; at price 0.50 -> 600 contracts
        let sizer = PositionSizer::new(SizingConfig::default());
        let s = signal(SignalDirection::BuyYes, 0.50, 0.10);

        let (dollars, contracts) = sizer.size_signal(&s, 10_000.0, 2);
        assert!((dollars - 300.0).abs() < 1e-9);
        assert_eq!(contracts, 600);
    }

    #[test]
    fn test_zero_cases() {
        let sizer = PositionSizer::new(SizingConfig::default());

        let no_edge = signal(SignalDirection::BuyYes, 0.40, 0.0);
        assert_eq!(sizer.calculate_position_size(&no_edge, 10_000.0, 0), 0.0);

        let good = signal(SignalDirection::BuyYes, 0.40, 0.10);
        assert_eq!(sizer.calculate_position_size(&good, 0.0, 0), 0.0);

        // Tiny balance: size falls below the $10 minimum
        assert_eq!(sizer.calculate_position_size(&good, 100.0, 0), 0.0);
    }

    #[test]
    fn test_monotone_in_edge() {
        let sizer = PositionSizer::new(SizingConfig::default());
        let mut last = 0.0;
        for i in 1..=10 {
            let edge = i as f64 * 0.01;
            let s = signal(SignalDirection::BuyYes, 0.40, edge);
            let size = sizer.calculate_position_size(&s, 100_000.0, 0);
            assert!(size >= last, "sizing decreased as edge grew");
            last = size;
        }
    }

    #[test]
    fn test_monotone_in_correlation_and_costs() {
        let sizer = PositionSizer::new(SizingConfig::default());
        let base = signal(SignalDirection::BuyYes, 0.40, 0.08);

        let mut last = f64::MAX;
        for k in 0..5 {
            let size = sizer.calculate_position_size(&base, 100_000.0, k);
            assert!(size <= last, "sizing grew with correlated positions");
            last = size;
        }

        let mut costly = base.clone();
        costly.estimated_spread = 0.03;
        costly.estimated_fee = 0.02;
        assert!(
            sizer.calculate_position_size(&costly, 100_000.0, 0)
                <= sizer.calculate_position_size(&base, 100_000.0, 0)
        );
    }

    #[test]
    fn test_correlation_floor() {
        let sizer = PositionSizer::new(SizingConfig::default());
        // 10 correlated positions would go negative without the 0.1 floor
        let adjusted = sizer.adjust_for_correlation(1.0, 10);
        assert!((adjusted - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_buy_no_prices_the_other_side() {
        let sizer = PositionSizer::new(SizingConfig::default());
        let s = signal(SignalDirection::BuyNo, 0.80, 0.10);

        // NO contracts at a YES price of 0.80 cost 0.20 each
        let (dollars, contracts) = sizer.size_signal(&s, 10_000.0, 0);
        assert!(dollars > 0.0);
        assert_eq!(contracts, (dollars / 0.20).floor() as u32);
    }

    #[test]
    fn test_cluster_headroom() {
        let sizer = PositionSizer::new(SizingConfig::default());
        // Cap 10% of 10k = 1000; 800 used -> 200 headroom
        assert_eq!(sizer.validate_cluster_limits(500.0, 800.0, 10_000.0), 200.0);
        assert_eq!(sizer.validate_cluster_limits(500.0, 1_000.0, 10_000.0), 0.0);
        assert_eq!(sizer.validate_cluster_limits(150.0, 800.0, 10_000.0), 150.0);
    }

    #[test]
    fn test_risk_of_ruin() {
        let sizer = PositionSizer::new(SizingConfig::default());
        assert_eq!(sizer.calculate_risk_of_ruin(0.40, 0.05), 1.0);
        let ror = sizer.calculate_risk_of_ruin(0.60, 0.05);
        assert!(ror > 0.0 && ror < 1e-3);
        assert_eq!(sizer.calculate_risk_of_ruin(0.60, 0.0), 0.0);
    }
}
