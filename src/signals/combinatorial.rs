//! Inter-market combinatorial detector.
//!
//! A dependency between two markets pins their relative prices: if A ⊂ B
//! (or A expires before B in the same series) then p(A) <= p(B) must hold.
//! When the market prices the pair the other way around, buying YES on the
//! cheap leg and NO on the rich leg locks the gap in.

use crate::fees::calculate_total_fees;
use crate::models::{DirectionalSignal, Market, SignalDirection, SignalKind};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Candidate pair of markets worth a dependency check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketPair {
    pub market_a: String,
    pub market_b: String,
    pub similarity_score: f64,
    pub same_category: bool,
    pub date_proximity_days: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    Calendar,
    Subset,
}

/// Inter-market arbitrage opportunity on a dependent pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinatorialOpportunity {
    pub market_a: String,
    pub market_b: String,
    pub dependency: DependencyKind,
    pub price_a: f64,
    pub price_b: f64,
    pub price_gap: f64,
    pub profit_pre_fee: f64,
    pub profit_post_fee: f64,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

pub struct CombinatorialDetector {
    pub min_profit_threshold: f64,
    pub max_date_proximity_days: f64,
    pub signal_ttl_seconds: i64,
    known_dependencies: HashMap<String, Vec<String>>,
}

impl Default for CombinatorialDetector {
    fn default() -> Self {
        Self {
            min_profit_threshold: 0.02,
            max_date_proximity_days: 1.0,
            signal_ttl_seconds: 300,
            known_dependencies: HashMap::new(),
        }
    }
}

impl CombinatorialDetector {
    pub fn new(min_profit_threshold: f64) -> Self {
        Self {
            min_profit_threshold,
            ..Default::default()
        }
    }

    /// Manually register a known `subset ⊂ superset` dependency.
    pub fn register_dependency(&mut self, subset_ticker: &str, superset_ticker: &str) {
        self.known_dependencies
            .entry(subset_ticker.to_string())
            .or_default()
            .push(superset_ticker.to_string());
    }

    /// Candidate pairs by category, expiration proximity and title overlap.
    pub fn find_candidate_pairs(&self, markets: &[Market]) -> Vec<MarketPair> {
        let mut by_category: HashMap<&str, Vec<&Market>> = HashMap::new();
        for market in markets {
            by_category
                .entry(market.category.as_str())
                .or_default()
                .push(market);
        }

        let mut pairs = Vec::new();

        for (_, group) in by_category {
            if group.len() < 2 {
                continue;
            }

            for (i, m1) in group.iter().enumerate() {
                for m2 in group.iter().skip(i + 1) {
                    let days = match (m1.expiration_time, m2.expiration_time) {
                        (Some(e1), Some(e2)) => {
                            let days = (e1 - e2).num_seconds().abs() as f64 / 86_400.0;
                            if days > self.max_date_proximity_days {
                                continue;
                            }
                            days
                        }
                        _ => 0.0,
                    };

                    let similarity = title_similarity(&m1.title, &m2.title);
                    if similarity > 0.3 {
                        pairs.push(MarketPair {
                            market_a: m1.ticker.clone(),
                            market_b: m2.ticker.clone(),
                            similarity_score: similarity,
                            same_category: true,
                            date_proximity_days: days,
                        });
                    }
                }
            }
        }

        pairs
    }

    /// Calendar arbitrage: earlier YES implies later YES, so
    /// p(earlier) <= p(later). A positive gap the other way is tradeable.
    pub fn check_calendar_dependency(
        &self,
        earlier: &Market,
        later: &Market,
    ) -> Option<CombinatorialOpportunity> {
        let (e_exp, l_exp) = (earlier.expiration_time?, later.expiration_time?);
        if e_exp >= l_exp {
            return None;
        }

        let price_earlier = earlier.mid_price()?;
        let price_later = later.mid_price()?;

        self.build_opportunity(
            &earlier.ticker,
            &later.ticker,
            DependencyKind::Calendar,
            price_earlier,
            price_later,
        )
    }

    /// Subset arbitrage on a registered dependency.
    pub fn check_subset_dependency(
        &self,
        subset_ticker: &str,
        superset_ticker: &str,
        prices: &HashMap<String, f64>,
    ) -> Option<CombinatorialOpportunity> {
        let price_subset = *prices.get(subset_ticker)?;
        let price_superset = *prices.get(superset_ticker)?;

        self.build_opportunity(
            subset_ticker,
            superset_ticker,
            DependencyKind::Subset,
            price_subset,
            price_superset,
        )
    }

    fn build_opportunity(
        &self,
        market_a: &str,
        market_b: &str,
        dependency: DependencyKind,
        price_a: f64,
        price_b: f64,
    ) -> Option<CombinatorialOpportunity> {
        // The dependency demands p(A) <= p(B); no gap, no trade
        if price_a <= price_b {
            return None;
        }

        let price_gap = price_a - price_b;
        let fees = calculate_total_fees(&[price_a, price_b], 1);
        let profit = price_gap - fees;

        if profit < self.min_profit_threshold {
            return None;
        }

        Some(CombinatorialOpportunity {
            market_a: market_a.to_string(),
            market_b: market_b.to_string(),
            dependency,
            price_a,
            price_b,
            price_gap,
            profit_pre_fee: price_gap,
            profit_post_fee: profit,
            confidence: 1.0,
            created_at: Utc::now(),
        })
    }

    /// Scan all registered subset dependencies.
    pub fn scan_known_dependencies(
        &self,
        prices: &HashMap<String, f64>,
    ) -> Vec<CombinatorialOpportunity> {
        let mut opportunities = Vec::new();
        for (subset, supersets) in &self.known_dependencies {
            for superset in supersets {
                if let Some(opp) = self.check_subset_dependency(subset, superset, prices) {
                    opportunities.push(opp);
                }
            }
        }
        opportunities
    }

    /// Scan calendar pairs within each series, expiration-ordered.
    pub fn scan_calendar_opportunities(
        &self,
        markets: &[Market],
    ) -> Vec<CombinatorialOpportunity> {
        let mut by_series: HashMap<&str, Vec<&Market>> = HashMap::new();
        for market in markets {
            if !market.series_ticker.is_empty() {
                by_series
                    .entry(market.series_ticker.as_str())
                    .or_default()
                    .push(market);
            }
        }

        let mut opportunities = Vec::new();

        for (_, mut series_markets) in by_series {
            if series_markets.len() < 2 {
                continue;
            }
            series_markets.sort_by_key(|m| m.expiration_time);

            for (i, earlier) in series_markets.iter().enumerate() {
                for later in series_markets.iter().skip(i + 1) {
                    if let Some(opp) = self.check_calendar_dependency(earlier, later) {
                        opportunities.push(opp);
                    }
                }
            }
        }

        opportunities
    }

    /// All scans, sorted by post-fee profit descending.
    pub fn scan_all(
        &self,
        markets: &[Market],
        prices: &HashMap<String, f64>,
    ) -> Vec<CombinatorialOpportunity> {
        let mut opportunities = self.scan_known_dependencies(prices);
        opportunities.extend(self.scan_calendar_opportunities(markets));
        opportunities.sort_by(|a, b| {
            b.profit_post_fee
                .partial_cmp(&a.profit_post_fee)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        opportunities
    }

    /// Two legs per opportunity: buy YES on the underpriced leg (B) and buy
    /// NO on the overpriced leg (A), each carrying half the net edge.
    pub fn generate_signals(
        &self,
        opportunity: &CombinatorialOpportunity,
    ) -> Vec<DirectionalSignal> {
        let now = Utc::now();
        let source_id = format!(
            "comb_{}_{}",
            opportunity.market_a, opportunity.market_b
        );
        let half_edge = opportunity.profit_post_fee / 2.0;
        let leg_fees = calculate_total_fees(&[opportunity.price_a, opportunity.price_b], 1) / 2.0;

        vec![
            DirectionalSignal {
                ticker: opportunity.market_b.clone(),
                direction: SignalDirection::BuyYes,
                kind: SignalKind::Combinatorial,
                current_price: opportunity.price_b,
                bound_price: opportunity.price_a,
                raw_edge: opportunity.price_gap,
                estimated_fee: leg_fees,
                estimated_spread: 0.0,
                net_edge: half_edge,
                confidence: opportunity.confidence,
                source_id: source_id.clone(),
                created_at: now,
                expires_at: Some(now + Duration::seconds(self.signal_ttl_seconds)),
            },
            DirectionalSignal {
                ticker: opportunity.market_a.clone(),
                direction: SignalDirection::BuyNo,
                kind: SignalKind::Combinatorial,
                current_price: opportunity.price_a,
                bound_price: opportunity.price_b,
                raw_edge: opportunity.price_gap,
                estimated_fee: leg_fees,
                estimated_spread: 0.0,
                net_edge: half_edge,
                confidence: opportunity.confidence,
                source_id,
                created_at: now,
                expires_at: Some(now + Duration::seconds(self.signal_ttl_seconds)),
            },
        ]
    }
}

/// Keyword-overlap similarity between two titles, stop words removed.
fn title_similarity(title1: &str, title2: &str) -> f64 {
    const STOP_WORDS: [&str; 10] = ["will", "the", "a", "an", "be", "by", "on", "in", "to", "?"];

    let words = |title: &str| -> std::collections::HashSet<String> {
        title
            .to_lowercase()
            .split_whitespace()
            .filter(|w| !STOP_WORDS.contains(w))
            .map(|w| w.to_string())
            .collect()
    };

    let w1 = words(title1);
    let w2 = words(title2);
    if w1.is_empty() || w2.is_empty() {
        return 0.0;
    }

    let intersection = w1.intersection(&w2).count();
    let union = w1.union(&w2).count();
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarketStatus;

    fn market(
        ticker: &str,
        series: &str,
        title: &str,
        bid: f64,
        ask: f64,
        expires_days: i64,
    ) -> Market {
        Market {
            ticker: ticker.to_string(),
            series_ticker: series.to_string(),
            title: title.to_string(),
            category: "crypto".to_string(),
            open_time: None,
            close_time: None,
            expiration_time: Some(Utc::now() + Duration::days(expires_days)),
            status: MarketStatus::Open,
            last_price: (bid + ask) / 2.0,
            yes_bid: Some(bid),
            yes_ask: Some(ask),
            volume: 0,
            open_interest: 0,
            result: None,
        }
    }

    #[test]
    fn test_calendar_dependency_detects_inversion() {
        let detector = CombinatorialDetector::default();
        // Earlier leg priced 0.50, later leg 0.38: gap 0.12 minus two fees
        let earlier = market("BTC-24JAN15-T1", "BTC", "BTC above 100k", 0.49, 0.51, 5);
        let later = market("BTC-24FEB01-T1", "BTC", "BTC above 100k", 0.37, 0.39, 20);

        let opp = detector
            .check_calendar_dependency(&earlier, &later)
            .expect("opportunity");
        assert_eq!(opp.dependency, DependencyKind::Calendar);
        assert!((opp.price_gap - 0.12).abs() < 1e-12);
        assert!(opp.profit_post_fee > 0.02);
    }

    #[test]
    fn test_calendar_dependency_respects_order() {
        let detector = CombinatorialDetector::default();
        let earlier = market("A", "S", "t", 0.30, 0.32, 5);
        let later = market("B", "S", "t", 0.49, 0.51, 20);

        // Correctly ordered prices: no opportunity
        assert!(detector.check_calendar_dependency(&earlier, &later).is_none());
        // Swapped expirations: pair is invalid, not an opportunity
        assert!(detector.check_calendar_dependency(&later, &earlier).is_none());
    }

    #[test]
    fn test_subset_dependency_scan() {
        let mut detector = CombinatorialDetector::default();
        detector.register_dependency("TRUMP", "GOP");

        let mut prices = HashMap::new();
        prices.insert("TRUMP".to_string(), 0.55);
        prices.insert("GOP".to_string(), 0.45);

        let opps = detector.scan_known_dependencies(&prices);
        assert_eq!(opps.len(), 1);
        assert_eq!(opps[0].dependency, DependencyKind::Subset);
        assert!((opps[0].price_gap - 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_thin_gap_rejected() {
        let mut detector = CombinatorialDetector::default();
        detector.register_dependency("A", "B");

        let mut prices = HashMap::new();
        prices.insert("A".to_string(), 0.51);
        prices.insert("B".to_string(), 0.49);

        // Gap 0.02 minus fees 0.04 is underwater
        assert!(detector.scan_known_dependencies(&prices).is_empty());
    }

    #[test]
    fn test_signal_fanout_directions() {
        let detector = CombinatorialDetector::default();
        let opp = CombinatorialOpportunity {
            market_a: "EARLY".to_string(),
            market_b: "LATE".to_string(),
            dependency: DependencyKind::Calendar,
            price_a: 0.50,
            price_b: 0.38,
            price_gap: 0.12,
            profit_pre_fee: 0.12,
            profit_post_fee: 0.08,
            confidence: 1.0,
            created_at: Utc::now(),
        };

        let signals = detector.generate_signals(&opp);
        assert_eq!(signals.len(), 2);

        let buy_yes = signals
            .iter()
            .find(|s| s.direction == SignalDirection::BuyYes)
            .unwrap();
        assert_eq!(buy_yes.ticker, "LATE");
        assert!((buy_yes.net_edge - 0.04).abs() < 1e-12);

        let buy_no = signals
            .iter()
            .find(|s| s.direction == SignalDirection::BuyNo)
            .unwrap();
        assert_eq!(buy_no.ticker, "EARLY");
    }

    #[test]
    fn test_candidate_pairs_use_title_overlap() {
        let detector = CombinatorialDetector::default();
        let markets = vec![
            market("A", "S1", "Bitcoin above 100k in January", 0.4, 0.42, 10),
            market("B", "S2", "Bitcoin above 100k in February", 0.3, 0.32, 10),
            market("C", "S3", "Completely unrelated question", 0.5, 0.52, 10),
        ];

        let pairs = detector.find_candidate_pairs(&markets);
        assert!(pairs
            .iter()
            .any(|p| (p.market_a == "A" && p.market_b == "B")
                || (p.market_a == "B" && p.market_b == "A")));
        assert!(!pairs
            .iter()
            .any(|p| p.market_a == "C" || p.market_b == "C"));
    }
}
