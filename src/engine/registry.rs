//! Constraint registry: ownership, indexing and the public bound API.

use crate::engine::bounds::BoundCalculator;
use crate::engine::constraint::{
    Constraint, ConstraintKind, ConstraintViolation, ProbabilityBound,
};
use crate::models::Market;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Flat record for registry persistence. Serialising the registry is the
/// caller's job; the engine only converts to and from this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintRecord {
    pub id: String,
    pub kind: ConstraintKind,
    pub lhs_tickers: Vec<String>,
    pub rhs_tickers: Vec<String>,
    pub description: String,
}

/// Owns all constraints, indexes them by ticker, and answers bound queries.
///
/// All queries are pure over the supplied price vector. Mutation happens
/// only through register/remove, serialised with the trading loop.
pub struct ConstraintEngine {
    constraints: HashMap<String, Constraint>,
    ticker_index: HashMap<String, HashSet<String>>,
    calculator: BoundCalculator,
    next_id: u64,
}

impl Default for ConstraintEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstraintEngine {
    pub fn new() -> Self {
        Self {
            constraints: HashMap::new(),
            ticker_index: HashMap::new(),
            calculator: BoundCalculator,
            next_id: 1,
        }
    }

    /// Register a constraint, validating its shape for the kind.
    pub fn register(
        &mut self,
        kind: ConstraintKind,
        lhs_tickers: Vec<String>,
        rhs_tickers: Vec<String>,
        description: impl Into<String>,
    ) -> Result<Constraint> {
        let id = format!("{}_{}", kind, self.next_id);
        self.next_id += 1;
        self.register_with_id(id, kind, lhs_tickers, rhs_tickers, description)
    }

    /// Register with an explicit id. An already-present id overwrites.
    pub fn register_with_id(
        &mut self,
        id: String,
        kind: ConstraintKind,
        lhs_tickers: Vec<String>,
        rhs_tickers: Vec<String>,
        description: impl Into<String>,
    ) -> Result<Constraint> {
        match kind {
            ConstraintKind::Subset | ConstraintKind::Temporal => {
                if lhs_tickers.len() != 1 || rhs_tickers.len() != 1 {
                    bail!(
                        "{} constraint requires exactly one ticker per side, got {}/{}",
                        kind,
                        lhs_tickers.len(),
                        rhs_tickers.len()
                    );
                }
            }
            ConstraintKind::Partition => {
                if lhs_tickers.len() < 2 || !rhs_tickers.is_empty() {
                    bail!(
                        "partition constraint requires >= 2 lhs tickers and empty rhs, got {}/{}",
                        lhs_tickers.len(),
                        rhs_tickers.len()
                    );
                }
            }
        }

        let constraint = Constraint {
            id: id.clone(),
            kind,
            lhs_tickers,
            rhs_tickers,
            description: description.into(),
        };

        // Overwriting an id: scrub the old index entries first
        if self.constraints.contains_key(&id) {
            self.remove(&id);
        }

        for ticker in constraint.all_tickers() {
            self.ticker_index
                .entry(ticker.to_string())
                .or_default()
                .insert(id.clone());
        }

        self.constraints.insert(id, constraint.clone());
        Ok(constraint)
    }

    /// Register `subset ⊂ superset`, e.g. "Trump wins" ⊂ "GOP wins".
    pub fn register_subset(&mut self, subset: &str, superset: &str) -> Result<Constraint> {
        self.register(
            ConstraintKind::Subset,
            vec![subset.to_string()],
            vec![superset.to_string()],
            format!("{} is a subset of {}", subset, superset),
        )
    }

    /// Register a partition of mutually exclusive, exhaustive outcomes.
    pub fn register_partition(&mut self, tickers: &[&str]) -> Result<Constraint> {
        self.register(
            ConstraintKind::Partition,
            tickers.iter().map(|t| t.to_string()).collect(),
            vec![],
            format!("partition of {}", tickers.join(", ")),
        )
    }

    /// Register earlier-expiry ⊂ later-expiry.
    pub fn register_temporal(&mut self, earlier: &str, later: &str) -> Result<Constraint> {
        self.register(
            ConstraintKind::Temporal,
            vec![earlier.to_string()],
            vec![later.to_string()],
            format!("{} expires before {}", earlier, later),
        )
    }

    /// Remove a constraint, scrubbing the ticker index. Returns false for an
    /// unknown id.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(constraint) = self.constraints.remove(id) else {
            return false;
        };

        for ticker in constraint.all_tickers() {
            if let Some(ids) = self.ticker_index.get_mut(ticker) {
                ids.remove(id);
                if ids.is_empty() {
                    self.ticker_index.remove(ticker);
                }
            }
        }

        true
    }

    pub fn get(&self, id: &str) -> Option<&Constraint> {
        self.constraints.get(id)
    }

    /// All constraints involving a ticker.
    pub fn constraints_for(&self, ticker: &str) -> Vec<&Constraint> {
        self.ticker_index
            .get(ticker)
            .map(|ids| ids.iter().filter_map(|id| self.constraints.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn all(&self) -> Vec<&Constraint> {
        self.constraints.values().collect()
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Merged bound for one ticker from every constraint that touches it.
    /// Returns the unconstrained [0, 1] bound when nothing applies.
    pub fn bounds_for(&self, ticker: &str, prices: &HashMap<String, f64>) -> ProbabilityBound {
        let mut merged: Option<ProbabilityBound> = None;

        for constraint in self.constraints_for(ticker) {
            for bound in self.calculator.calculate_bounds(constraint, prices) {
                if bound.ticker != ticker {
                    continue;
                }
                merged = Some(match merged {
                    Some(existing) => existing.merge(&bound),
                    None => bound,
                });
            }
        }

        merged.unwrap_or_else(|| ProbabilityBound::unconstrained(ticker))
    }

    /// Merged bounds for every constrained ticker. Single pass: derivation
    /// uses only current prices, never derived bounds.
    pub fn all_bounds(&self, prices: &HashMap<String, f64>) -> HashMap<String, ProbabilityBound> {
        let mut all = Vec::new();
        for constraint in self.constraints.values() {
            all.extend(self.calculator.calculate_bounds(constraint, prices));
        }
        self.calculator.merge_bounds(all)
    }

    /// All violations at current prices, at least `min_magnitude`, sorted by
    /// magnitude descending.
    pub fn violations(
        &self,
        prices: &HashMap<String, f64>,
        min_magnitude: f64,
    ) -> Vec<ConstraintViolation> {
        let bounds = self.all_bounds(prices);
        let mut violations = self.calculator.detect_violations(&bounds, prices);

        if min_magnitude > 0.0 {
            violations.retain(|v| v.magnitude >= min_magnitude);
        }

        violations.sort_by(|a, b| {
            b.magnitude
                .partial_cmp(&a.magnitude)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        violations
    }

    /// Derive temporal constraints from series calendars: within each series,
    /// sort by expiration and chain each adjacent pair. Pairs already
    /// registered are skipped, so repeated scans are idempotent.
    pub fn auto_derive_temporal(&mut self, markets: &[Market]) -> Vec<Constraint> {
        let mut by_series: HashMap<&str, Vec<&Market>> = HashMap::new();
        for market in markets {
            if !market.series_ticker.is_empty() && market.expiration_time.is_some() {
                by_series
                    .entry(market.series_ticker.as_str())
                    .or_default()
                    .push(market);
            }
        }

        let mut derived = Vec::new();

        for (_, mut series_markets) in by_series {
            series_markets.sort_by_key(|m| m.expiration_time);

            for pair in series_markets.windows(2) {
                let (earlier, later) = (pair[0], pair[1]);
                if earlier.expiration_time == later.expiration_time {
                    continue;
                }
                if self.has_temporal_pair(&earlier.ticker, &later.ticker) {
                    continue;
                }
                if let Ok(constraint) = self.register_temporal(&earlier.ticker, &later.ticker) {
                    derived.push(constraint);
                }
            }
        }

        derived
    }

    fn has_temporal_pair(&self, earlier: &str, later: &str) -> bool {
        self.constraints_for(earlier).iter().any(|c| {
            c.kind == ConstraintKind::Temporal
                && c.lhs_tickers.first().map(|t| t.as_str()) == Some(earlier)
                && c.rhs_tickers.first().map(|t| t.as_str()) == Some(later)
        })
    }

    /// Export the registry as flat records for external persistence.
    pub fn to_records(&self) -> Vec<ConstraintRecord> {
        let mut records: Vec<ConstraintRecord> = self
            .constraints
            .values()
            .map(|c| ConstraintRecord {
                id: c.id.clone(),
                kind: c.kind,
                lhs_tickers: c.lhs_tickers.clone(),
                rhs_tickers: c.rhs_tickers.clone(),
                description: c.description.clone(),
            })
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Rebuild a registry from records. Invalid records are rejected.
    pub fn from_records(records: Vec<ConstraintRecord>) -> Result<Self> {
        let mut engine = Self::new();
        for record in records {
            engine.register_with_id(
                record.id,
                record.kind,
                record.lhs_tickers,
                record.rhs_tickers,
                record.description,
            )?;
        }
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarketStatus;
    use chrono::{Duration, Utc};

    fn prices(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(t, p)| (t.to_string(), *p)).collect()
    }

    fn market(ticker: &str, series: &str, expires_in_days: i64) -> Market {
        Market {
            ticker: ticker.to_string(),
            series_ticker: series.to_string(),
            title: String::new(),
            category: String::new(),
            open_time: None,
            close_time: None,
            expiration_time: Some(Utc::now() + Duration::days(expires_in_days)),
            status: MarketStatus::Open,
            last_price: 0.50,
            yes_bid: Some(0.49),
            yes_ask: Some(0.51),
            volume: 0,
            open_interest: 0,
            result: None,
        }
    }

    #[test]
    fn test_register_validates_shape() {
        let mut engine = ConstraintEngine::new();

        assert!(engine.register_subset("A", "B").is_ok());
        assert!(engine.register_partition(&["A", "B", "C"]).is_ok());

        assert!(engine
            .register(
                ConstraintKind::Subset,
                vec!["A".to_string(), "B".to_string()],
                vec!["C".to_string()],
                "",
            )
            .is_err());
        assert!(engine
            .register(ConstraintKind::Partition, vec!["A".to_string()], vec![], "")
            .is_err());
    }

    #[test]
    fn test_remove_scrubs_index() {
        let mut engine = ConstraintEngine::new();
        let c = engine.register_subset("A", "B").unwrap();

        assert_eq!(engine.constraints_for("A").len(), 1);
        assert!(engine.remove(&c.id));
        assert!(engine.constraints_for("A").is_empty());
        assert!(!engine.remove(&c.id));
    }

    #[test]
    fn test_bounds_for_merges_across_constraints() {
        let mut engine = ConstraintEngine::new();
        engine.register_subset("A", "B").unwrap();
        engine.register_partition(&["B", "C"]).unwrap();

        let p = prices(&[("A", 0.30), ("B", 0.50), ("C", 0.40)]);
        let bound = engine.bounds_for("B", &p);

        // Subset gives lower = 0.30; partition gives upper = 1 - 0.40 = 0.60
        assert!((bound.lower - 0.30).abs() < 1e-12);
        assert!((bound.upper - 0.60).abs() < 1e-12);
    }

    #[test]
    fn test_bounds_for_unconstrained_ticker() {
        let engine = ConstraintEngine::new();
        let bound = engine.bounds_for("UNKNOWN", &prices(&[]));
        assert_eq!(bound.lower, 0.0);
        assert_eq!(bound.upper, 1.0);
    }

    #[test]
    fn test_violations_sorted_and_filtered() {
        let mut engine = ConstraintEngine::new();
        engine.register_subset("A", "B").unwrap();
        engine.register_subset("C", "D").unwrap();

        // Each inverted pair flags both legs: A/B by 0.04, C/D by 0.10
        let p = prices(&[("A", 0.42), ("B", 0.38), ("C", 0.60), ("D", 0.50)]);

        let violations = engine.violations(&p, 0.0);
        assert_eq!(violations.len(), 4);
        assert!((violations[0].magnitude - 0.10).abs() < 1e-12);
        assert!(violations
            .windows(2)
            .all(|w| w[0].magnitude >= w[1].magnitude));

        let filtered = engine.violations(&p, 0.05);
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|v| v.magnitude >= 0.05));
    }

    #[test]
    fn test_auto_derive_temporal() {
        let mut engine = ConstraintEngine::new();
        let markets = vec![
            market("S-24JAN15-T1", "S", 5),
            market("S-24FEB01-T1", "S", 20),
            market("S-24MAR01-T1", "S", 50),
            market("OTHER-24JAN15-T1", "OTHER", 5),
        ];

        let derived = engine.auto_derive_temporal(&markets);
        // Two adjacent pairs within series S, none for the singleton series
        assert_eq!(derived.len(), 2);
        assert!(derived.iter().all(|c| c.kind == ConstraintKind::Temporal));

        // Idempotent on re-scan
        let again = engine.auto_derive_temporal(&markets);
        assert!(again.is_empty());
    }

    #[test]
    fn test_records_round_trip() {
        let mut engine = ConstraintEngine::new();
        engine.register_subset("A", "B").unwrap();
        engine.register_partition(&["X", "Y", "Z"]).unwrap();

        let records = engine.to_records();
        assert_eq!(records.len(), 2);

        let restored = ConstraintEngine::from_records(records).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.constraints_for("A").len(), 1);
        assert_eq!(restored.constraints_for("Y").len(), 1);
    }
}
