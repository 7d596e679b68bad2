//! Monte Carlo validation for backtest robustness.
//!
//! Shuffles realised trade outcomes to ask whether the recorded edge
//! survives reordering or was sequencing luck. All draws come from one
//! seeded RNG so a report can be reproduced exactly.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonteCarloResult {
    pub num_simulations: usize,
    pub pessimistic_5th: f64,
    pub median: f64,
    pub optimistic_95th: f64,
    pub probability_profitable: f64,
    pub mean_return: f64,
    pub std_return: f64,
    pub confidence_interval_95: (f64, f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawdownDistribution {
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
    pub p99: f64,
}

pub struct MonteCarloValidator {
    pub num_simulations: usize,
    rng: ChaCha8Rng,
}

impl MonteCarloValidator {
    pub fn new(num_simulations: usize, seed: u64) -> Self {
        Self {
            num_simulations,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Shuffle trade P&Ls and measure the distribution of final returns
    /// (as multiples of initial capital).
    pub fn validate_trades(
        &mut self,
        trade_pnls: &[f64],
        initial_capital: f64,
    ) -> MonteCarloResult {
        if trade_pnls.is_empty() || initial_capital <= 0.0 {
            return MonteCarloResult {
                num_simulations: 0,
                pessimistic_5th: 1.0,
                median: 1.0,
                optimistic_95th: 1.0,
                probability_profitable: 0.0,
                mean_return: 0.0,
                std_return: 0.0,
                confidence_interval_95: (1.0, 1.0),
            };
        }

        let mut final_returns = Vec::with_capacity(self.num_simulations);
        let mut pnls = trade_pnls.to_vec();

        for _ in 0..self.num_simulations {
            pnls.shuffle(&mut self.rng);
            let equity: f64 = initial_capital + pnls.iter().sum::<f64>();
            final_returns.push(equity / initial_capital);
        }

        let mut sorted = final_returns.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let p5 = percentile(&sorted, 5.0);
        let p50 = percentile(&sorted, 50.0);
        let p95 = percentile(&sorted, 95.0);

        let profitable = final_returns.iter().filter(|r| **r > 1.0).count();

        MonteCarloResult {
            num_simulations: self.num_simulations,
            pessimistic_5th: p5,
            median: p50,
            optimistic_95th: p95,
            probability_profitable: profitable as f64 / final_returns.len() as f64,
            mean_return: final_returns.iter().mean(),
            std_return: if final_returns.len() > 1 {
                final_returns.iter().std_dev()
            } else {
                0.0
            },
            confidence_interval_95: (p5, p95),
        }
    }

    /// Bootstrap confidence interval for the annualised Sharpe ratio.
    /// Returns (lower, point estimate, upper).
    pub fn bootstrap_sharpe(
        &mut self,
        returns: &[f64],
        num_bootstrap: usize,
    ) -> (f64, f64, f64) {
        if returns.len() < 2 {
            return (0.0, 0.0, 0.0);
        }

        let mut sharpes = Vec::with_capacity(num_bootstrap);
        for _ in 0..num_bootstrap {
            let sample: Vec<f64> = (0..returns.len())
                .map(|_| *returns.choose(&mut self.rng).unwrap())
                .collect();
            let std = sample.iter().std_dev();
            if std > 0.0 {
                sharpes.push(sample.iter().mean() / std * 252f64.sqrt());
            }
        }

        if sharpes.is_empty() {
            return (0.0, 0.0, 0.0);
        }

        sharpes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let point = {
            let std = returns.iter().std_dev();
            if std > 0.0 {
                returns.iter().mean() / std * 252f64.sqrt()
            } else {
                0.0
            }
        };

        (percentile(&sharpes, 5.0), point, percentile(&sharpes, 95.0))
    }

    /// Max-drawdown distribution across shuffled orderings.
    pub fn drawdown_distribution(
        &mut self,
        trade_pnls: &[f64],
        initial_capital: f64,
    ) -> DrawdownDistribution {
        if trade_pnls.is_empty() || initial_capital <= 0.0 {
            return DrawdownDistribution {
                p50: 0.0,
                p75: 0.0,
                p95: 0.0,
                p99: 0.0,
            };
        }

        let mut pnls = trade_pnls.to_vec();
        let mut max_drawdowns = Vec::with_capacity(self.num_simulations);

        for _ in 0..self.num_simulations {
            pnls.shuffle(&mut self.rng);

            let mut equity = initial_capital;
            let mut peak = initial_capital;
            let mut max_dd: f64 = 0.0;

            for pnl in &pnls {
                equity += pnl;
                if equity > peak {
                    peak = equity;
                }
                if peak > 0.0 {
                    max_dd = max_dd.max((peak - equity) / peak);
                }
            }

            max_drawdowns.push(max_dd);
        }

        max_drawdowns.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        DrawdownDistribution {
            p50: percentile(&max_drawdowns, 50.0),
            p75: percentile(&max_drawdowns, 75.0),
            p95: percentile(&max_drawdowns, 95.0),
            p99: percentile(&max_drawdowns, 99.0),
        }
    }
}

impl MonteCarloResult {
    /// Formatted text report with a plain-language verdict.
    pub fn report(&self) -> String {
        let verdict = if self.probability_profitable >= 0.95 {
            "strong edge: >95% of orderings profitable"
        } else if self.probability_profitable >= 0.80 {
            "moderate edge: 80-95% of orderings profitable"
        } else if self.probability_profitable >= 0.60 {
            "weak edge: 60-80% profitable, may be luck"
        } else {
            "no edge: <60% profitable, likely random"
        };

        [
            "==================================================".to_string(),
            "MONTE CARLO VALIDATION REPORT".to_string(),
            "==================================================".to_string(),
            format!("Simulations:            {}", self.num_simulations),
            format!("5th pct (pessimistic):  {:.2}x", self.pessimistic_5th),
            format!("Median:                 {:.2}x", self.median),
            format!("95th pct (optimistic):  {:.2}x", self.optimistic_95th),
            format!("Mean return:            {:.2}x", self.mean_return),
            format!("Std dev:                {:.4}", self.std_return),
            format!(
                "Probability profitable: {:.1}%",
                self.probability_profitable * 100.0
            ),
            format!("Verdict: {}", verdict),
            "==================================================".to_string(),
        ]
        .join("\n")
    }
}

/// Nearest-rank percentile over a sorted slice.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (pct / 100.0 * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
