//! Probability bound derivation from constraints.
//!
//! One pass over current prices suffices: derivation reads prices only,
//! never previously derived bounds, so there is no fixed point to chase.

use crate::engine::constraint::{
    Constraint, ConstraintViolation, ProbabilityBound, Relation,
};
use chrono::Utc;
use std::collections::HashMap;
use tracing::warn;

/// Derives and merges probability bounds from a price vector.
pub struct BoundCalculator;

impl BoundCalculator {
    /// Bounds implied by a single constraint at current prices.
    ///
    /// Subset `A ⊂ B`:
    ///   p(B) >= p(A)  ->  bound(B).lower = p(A)
    ///   p(A) <= p(B)  ->  bound(A).upper = p(B)
    ///
    /// Partition {T_i}: each p_i <= 1 - Σ(j != i) p_j, clamped to [0, 1].
    ///
    /// Tickers with no price simply contribute nothing.
    pub fn calculate_bounds(
        &self,
        constraint: &Constraint,
        prices: &HashMap<String, f64>,
    ) -> Vec<ProbabilityBound> {
        match constraint.relation() {
            Relation::Subset { subset, superset } => {
                let mut bounds = Vec::with_capacity(2);

                if let Some(&subset_price) = prices.get(subset) {
                    bounds.push(ProbabilityBound {
                        ticker: superset.to_string(),
                        lower: subset_price,
                        upper: 1.0,
                        source_constraint_id: constraint.id.clone(),
                        confidence: 1.0,
                    });
                }

                if let Some(&superset_price) = prices.get(superset) {
                    bounds.push(ProbabilityBound {
                        ticker: subset.to_string(),
                        lower: 0.0,
                        upper: superset_price,
                        source_constraint_id: constraint.id.clone(),
                        confidence: 1.0,
                    });
                }

                bounds
            }
            Relation::Partition(tickers) => {
                let priced: Vec<(&String, f64)> = tickers
                    .iter()
                    .filter_map(|t| prices.get(t).map(|&p| (t, p)))
                    .collect();

                // A partition bound needs at least two priced legs
                if priced.len() < 2 {
                    return Vec::new();
                }

                let total: f64 = priced.iter().map(|(_, p)| p).sum();

                priced
                    .iter()
                    .map(|(ticker, price)| {
                        let other_sum = total - price;
                        let implied_upper = (1.0 - other_sum).clamp(0.0, 1.0);
                        ProbabilityBound {
                            ticker: (*ticker).clone(),
                            lower: 0.0,
                            upper: implied_upper,
                            source_constraint_id: constraint.id.clone(),
                            confidence: 1.0,
                        }
                    })
                    .collect()
            }
        }
    }

    /// Merge a batch of bounds per ticker by intersection.
    ///
    /// An infeasible result (lower > upper) is logged and kept as-is so
    /// downstream violation magnitudes stay positive at any price.
    pub fn merge_bounds(
        &self,
        bounds: Vec<ProbabilityBound>,
    ) -> HashMap<String, ProbabilityBound> {
        let mut merged: HashMap<String, ProbabilityBound> = HashMap::new();

        for bound in bounds {
            match merged.get_mut(&bound.ticker) {
                Some(existing) => {
                    let combined = existing.merge(&bound);
                    if !combined.is_feasible() && existing.is_feasible() {
                        warn!(
                            ticker = %combined.ticker,
                            lower = combined.lower,
                            upper = combined.upper,
                            "infeasible bound configuration"
                        );
                    }
                    *existing = combined;
                }
                None => {
                    merged.insert(bound.ticker.clone(), bound);
                }
            }
        }

        merged
    }

    /// Scan merged bounds against prices, returning every positive violation.
    pub fn detect_violations(
        &self,
        bounds: &HashMap<String, ProbabilityBound>,
        prices: &HashMap<String, f64>,
    ) -> Vec<ConstraintViolation> {
        let now = Utc::now();
        let mut violations = Vec::new();

        for (ticker, bound) in bounds {
            let Some(&current_price) = prices.get(ticker) else {
                continue;
            };

            let magnitude = bound.violation(current_price);
            if magnitude > 0.0 {
                violations.push(ConstraintViolation {
                    ticker: ticker.clone(),
                    magnitude,
                    current_price,
                    bound: bound.clone(),
                    source_constraint_id: bound.source_constraint_id.clone(),
                    detected_at: now,
                });
            }
        }

        violations
    }
}
