//! Exchange Fee Model
//! Mission: Accurate cost math — a profitable trade on paper must be profitable in reality
//!
//! Per-contract fee: 0.07 * p * (1 - p), rounded UP to the next cent, with a
//! one-cent floor. The round-up matters for tight-edge signals: it is the
//! exchange's rounding, and using anything else overstates edge.

/// Fee rate applied to p * (1 - p).
pub const FEE_RATE: f64 = 0.07;

/// Fee for a single contract at `price`. Prices outside (0, 1) carry no fee.
pub fn calculate_fee(price: f64, contracts: u32) -> f64 {
    if !(price > 0.0 && price < 1.0) {
        return 0.0;
    }

    let per_contract = FEE_RATE * price * (1.0 - price);
    let cents = (per_contract * 100.0).ceil();
    (cents / 100.0).max(0.01) * contracts as f64
}

/// Total fee across a basket of prices, `contracts` per leg.
pub fn calculate_total_fees(prices: &[f64], contracts: u32) -> f64 {
    prices.iter().map(|&p| calculate_fee(p, contracts)).sum()
}

/// Fee as a fraction of the contract cost.
pub fn fee_as_percentage(price: f64) -> f64 {
    if !(price > 0.0 && price < 1.0) {
        return 0.0;
    }
    calculate_fee(price, 1) / price
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-12;

    #[test]
    fn test_pinned_values() {
        // 0.07 * 0.25 = 0.0175 -> ceil to 2 cents
        assert!((calculate_fee(0.50, 1) - 0.02).abs() < EPS);
        // 0.07 * 0.09 = 0.0063 -> ceil to 1 cent
        assert!((calculate_fee(0.10, 1) - 0.01).abs() < EPS);
        assert!((calculate_fee(0.90, 1) - 0.01).abs() < EPS);
    }

    #[test]
    fn test_boundary_prices() {
        assert_eq!(calculate_fee(0.0, 1), 0.0);
        assert_eq!(calculate_fee(1.0, 1), 0.0);
        assert_eq!(calculate_fee(-0.5, 100), 0.0);
        assert_eq!(calculate_fee(1.5, 100), 0.0);
    }

    #[test]
    fn test_symmetry() {
        for i in 1..100 {
            let p = i as f64 / 100.0;
            assert!(
                (calculate_fee(p, 1) - calculate_fee(1.0 - p, 1)).abs() < EPS,
                "fee not symmetric at p = {}",
                p
            );
        }
    }

    #[test]
    fn test_bounded_and_floored() {
        for i in 1..100 {
            let p = i as f64 / 100.0;
            let fee = calculate_fee(p, 1);
            assert!(fee >= 0.01, "fee below floor at p = {}", p);
            assert!(fee <= 0.02, "fee above ceiling-rule max at p = {}", p);
        }
    }

    #[test]
    fn test_total_fees_scales() {
        // 3 legs at 0.30: fee(0.30) = ceil(0.07 * 0.21 * 100)/100 = 0.02 each
        let total = calculate_total_fees(&[0.30, 0.30, 0.30], 1);
        assert!((total - 0.06).abs() < EPS);

        let total_ten = calculate_total_fees(&[0.30, 0.30, 0.30], 10);
        assert!((total_ten - 0.60).abs() < EPS);
    }

    #[test]
    fn test_fee_percentage() {
        // At low prices the cent floor dominates the percentage
        assert!((fee_as_percentage(0.10) - 0.10).abs() < EPS);
        assert_eq!(fee_as_percentage(0.0), 0.0);
    }
}
