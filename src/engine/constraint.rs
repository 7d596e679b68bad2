//! Constraint and probability bound models.
//!
//! Three kinds of relation:
//! - Subset: A ⊂ B means p(A) <= p(B)
//! - Partition: mutually exclusive outcomes, Σ p_i = 1
//! - Temporal: earlier expiration ⊂ later expiration (same logic as subset)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintKind {
    Subset,
    Partition,
    Temporal,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintKind::Subset => write!(f, "subset"),
            ConstraintKind::Partition => write!(f, "partition"),
            ConstraintKind::Temporal => write!(f, "temporal"),
        }
    }
}

/// Logical constraint between markets.
///
/// Shape is validated at registration: subset/temporal have exactly one
/// ticker on each side, partitions have at least two on the left and none
/// on the right.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constraint {
    pub id: String,
    pub kind: ConstraintKind,
    pub lhs_tickers: Vec<String>,
    pub rhs_tickers: Vec<String>,
    pub description: String,
}

/// Structural view of a constraint. Bound derivation is a total match on
/// this — temporal collapses into subset, so there is no third arm.
pub enum Relation<'a> {
    Subset { subset: &'a str, superset: &'a str },
    Partition(&'a [String]),
}

impl Constraint {
    /// All tickers this constraint touches.
    pub fn all_tickers(&self) -> Vec<&str> {
        let mut tickers: Vec<&str> = self
            .lhs_tickers
            .iter()
            .chain(self.rhs_tickers.iter())
            .map(|s| s.as_str())
            .collect();
        tickers.sort_unstable();
        tickers.dedup();
        tickers
    }

    /// Structural view used by the bound calculator. Relies on the shape
    /// invariants enforced at registration.
    pub fn relation(&self) -> Relation<'_> {
        match self.kind {
            ConstraintKind::Subset | ConstraintKind::Temporal => Relation::Subset {
                subset: &self.lhs_tickers[0],
                superset: &self.rhs_tickers[0],
            },
            ConstraintKind::Partition => Relation::Partition(&self.lhs_tickers),
        }
    }

    pub fn is_partition(&self) -> bool {
        self.kind == ConstraintKind::Partition
    }
}

/// Probability bound derived from constraints.
///
/// These are hard bounds the market must respect at resolution. A merged
/// bound with `lower > upper` marks an infeasible configuration; it is kept
/// (not clamped) so that every market price registers as a violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbabilityBound {
    pub ticker: String,
    pub lower: f64,
    pub upper: f64,
    pub source_constraint_id: String,
    pub confidence: f64,
}

impl ProbabilityBound {
    pub fn unconstrained(ticker: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
            lower: 0.0,
            upper: 1.0,
            source_constraint_id: String::new(),
            confidence: 1.0,
        }
    }

    /// Width of the allowed range.
    pub fn range(&self) -> f64 {
        self.upper - self.lower
    }

    pub fn midpoint(&self) -> f64 {
        (self.lower + self.upper) / 2.0
    }

    pub fn contains(&self, price: f64) -> bool {
        self.lower <= price && price <= self.upper
    }

    pub fn is_feasible(&self) -> bool {
        self.lower <= self.upper
    }

    /// Distance by which `price` sits outside the bound; zero when inside.
    pub fn violation(&self, price: f64) -> f64 {
        if price < self.lower {
            self.lower - price
        } else if price > self.upper {
            price - self.upper
        } else {
            0.0
        }
    }

    /// Intersection with another bound for the same ticker: tightest lower,
    /// tightest upper, least confidence.
    pub fn merge(&self, other: &ProbabilityBound) -> ProbabilityBound {
        debug_assert_eq!(self.ticker, other.ticker, "merging bounds across tickers");
        let source = if self.source_constraint_id.is_empty() {
            other.source_constraint_id.clone()
        } else if other.source_constraint_id.is_empty() {
            self.source_constraint_id.clone()
        } else {
            format!("{}+{}", self.source_constraint_id, other.source_constraint_id)
        };
        ProbabilityBound {
            ticker: self.ticker.clone(),
            lower: self.lower.max(other.lower),
            upper: self.upper.min(other.upper),
            source_constraint_id: source,
            confidence: self.confidence.min(other.confidence),
        }
    }
}

/// Detected violation of a derived bound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintViolation {
    pub ticker: String,
    pub magnitude: f64,
    pub current_price: f64,
    pub bound: ProbabilityBound,
    pub source_constraint_id: String,
    pub detected_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound(lower: f64, upper: f64) -> ProbabilityBound {
        ProbabilityBound {
            ticker: "T".to_string(),
            lower,
            upper,
            source_constraint_id: "c1".to_string(),
            confidence: 1.0,
        }
    }

    #[test]
    fn test_violation_zero_iff_inside() {
        let b = bound(0.30, 0.60);
        assert_eq!(b.violation(0.45), 0.0);
        assert_eq!(b.violation(0.30), 0.0);
        assert_eq!(b.violation(0.60), 0.0);
        assert!((b.violation(0.25) - 0.05).abs() < 1e-12);
        assert!((b.violation(0.70) - 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_merge_is_intersection() {
        let a = bound(0.20, 0.80);
        let b = bound(0.35, 0.90);
        let merged = a.merge(&b);
        assert_eq!(merged.lower, 0.35);
        assert_eq!(merged.upper, 0.80);
    }

    #[test]
    fn test_merge_commutative_and_associative() {
        let a = bound(0.10, 0.70);
        let b = bound(0.25, 0.95);
        let c = bound(0.00, 0.60);

        let ab = a.merge(&b);
        let ba = b.merge(&a);
        assert_eq!(ab.lower, ba.lower);
        assert_eq!(ab.upper, ba.upper);

        let abc = a.merge(&b).merge(&c);
        let bca = b.merge(&c).merge(&a);
        assert_eq!(abc.lower, bca.lower);
        assert_eq!(abc.upper, bca.upper);
        assert_eq!(abc.lower, 0.25);
        assert_eq!(abc.upper, 0.60);
    }

    #[test]
    fn test_infeasible_merge_violates_everywhere() {
        let merged = bound(0.60, 1.0).merge(&bound(0.0, 0.40));
        assert!(!merged.is_feasible());
        for i in 0..=100 {
            let p = i as f64 / 100.0;
            assert!(merged.violation(p) > 0.0, "price {} escaped infeasible bound", p);
        }
    }

    #[test]
    fn test_merge_takes_min_confidence() {
        let mut a = bound(0.1, 0.9);
        a.confidence = 0.8;
        let b = bound(0.2, 0.7);
        assert_eq!(a.merge(&b).confidence, 0.8);
    }
}
