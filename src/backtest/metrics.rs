//! Backtest performance metrics.
//!
//! Returns are computed from the equity curve; Sharpe and Sortino annualise
//! per-snapshot returns with the usual sqrt(252) convention.

use crate::backtest::simulator::Trade;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub total_return: f64,
    pub annualized_return: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: f64,

    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,

    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub avg_trade_pnl: f64,
    pub edge_per_contract: f64,

    pub kelly_optimal: f64,

    pub final_equity: f64,
    pub peak_equity: f64,
}

/// Compute the full metrics record from raw simulation output.
pub fn calculate(
    trades: &[Trade],
    equity_curve: &[(DateTime<Utc>, f64)],
    initial_capital: f64,
    final_capital: f64,
    peak_equity: f64,
    max_drawdown: f64,
) -> BacktestMetrics {
    if equity_curve.is_empty() {
        return BacktestMetrics {
            final_equity: final_capital,
            peak_equity,
            ..Default::default()
        };
    }

    let total_return = if initial_capital > 0.0 {
        (final_capital - initial_capital) / initial_capital
    } else {
        0.0
    };

    let days = (equity_curve.last().unwrap().0 - equity_curve.first().unwrap().0)
        .num_seconds() as f64
        / 86_400.0;
    let annualized_return = if days > 0.0 {
        (1.0 + total_return).powf(365.0 / days) - 1.0
    } else {
        0.0
    };

    // Per-snapshot simple returns
    let returns: Vec<f64> = equity_curve
        .windows(2)
        .filter(|w| w[0].1 > 0.0)
        .map(|w| (w[1].1 - w[0].1) / w[0].1)
        .collect();

    let sharpe_ratio = if returns.len() > 1 {
        let mean = returns.iter().mean();
        let std = returns.iter().std_dev();
        if std > 0.0 {
            mean / std * 252f64.sqrt()
        } else {
            0.0
        }
    } else {
        0.0
    };

    let negative: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    let sortino_ratio = if returns.len() > 1 && negative.len() > 1 {
        let mean = returns.iter().mean();
        let downside = negative.iter().std_dev();
        if downside > 0.0 {
            mean / downside * 252f64.sqrt()
        } else {
            0.0
        }
    } else {
        0.0
    };

    let pnls: Vec<f64> = trades.iter().map(|t| t.pnl).filter(|p| *p != 0.0).collect();
    let wins: Vec<f64> = pnls.iter().copied().filter(|p| *p > 0.0).collect();
    let losses: Vec<f64> = pnls.iter().copied().filter(|p| *p < 0.0).collect();

    let win_rate = if pnls.is_empty() {
        0.0
    } else {
        wins.len() as f64 / pnls.len() as f64
    };
    let avg_win = if wins.is_empty() { 0.0 } else { wins.iter().mean() };
    let avg_loss = if losses.is_empty() {
        0.0
    } else {
        losses.iter().mean().abs()
    };
    let gross_loss: f64 = losses.iter().sum::<f64>().abs();
    let profit_factor = if gross_loss > 0.0 {
        wins.iter().sum::<f64>() / gross_loss
    } else {
        0.0
    };

    let total_contracts: u64 = trades.iter().map(|t| t.quantity as u64).sum();
    let edge_per_contract = if total_contracts > 0 {
        pnls.iter().sum::<f64>() / total_contracts as f64
    } else {
        0.0
    };

    // Realised Kelly from the observed win/loss profile
    let kelly_optimal = if win_rate > 0.0 && win_rate < 1.0 && avg_win > 0.0 && avg_loss > 0.0 {
        let b = avg_win / avg_loss;
        win_rate - (1.0 - win_rate) / b
    } else {
        0.0
    };

    BacktestMetrics {
        total_return,
        annualized_return,
        sharpe_ratio,
        sortino_ratio,
        max_drawdown,
        total_trades: trades.len(),
        winning_trades: wins.len(),
        losing_trades: losses.len(),
        win_rate,
        profit_factor,
        avg_win,
        avg_loss,
        avg_trade_pnl: if pnls.is_empty() {
            0.0
        } else {
            pnls.iter().mean()
        },
        edge_per_contract,
        kelly_optimal,
        final_equity: final_capital,
        peak_equity,
    }
}

impl BacktestMetrics {
    /// Formatted text report.
    pub fn report(&self) -> String {
        let lines = [
            "============================================================".to_string(),
            "BACKTEST PERFORMANCE REPORT".to_string(),
            "============================================================".to_string(),
            String::new(),
            "RETURNS".to_string(),
            "------------------------------".to_string(),
            format!("Total Return:      {:>10.2}%", self.total_return * 100.0),
            format!("Annualized Return: {:>10.2}%", self.annualized_return * 100.0),
            format!("Final Equity:      ${:>9.2}", self.final_equity),
            format!("Peak Equity:       ${:>9.2}", self.peak_equity),
            String::new(),
            "RISK".to_string(),
            "------------------------------".to_string(),
            format!("Sharpe Ratio:      {:>10.2}", self.sharpe_ratio),
            format!("Sortino Ratio:     {:>10.2}", self.sortino_ratio),
            format!("Max Drawdown:      {:>10.2}%", self.max_drawdown * 100.0),
            String::new(),
            "TRADES".to_string(),
            "------------------------------".to_string(),
            format!("Total Trades:      {:>10}", self.total_trades),
            format!("Winning Trades:    {:>10}", self.winning_trades),
            format!("Losing Trades:     {:>10}", self.losing_trades),
            format!("Win Rate:          {:>10.1}%", self.win_rate * 100.0),
            format!("Profit Factor:     {:>10.2}", self.profit_factor),
            format!("Avg Win:           ${:>9.2}", self.avg_win),
            format!("Avg Loss:          ${:>9.2}", self.avg_loss),
            format!("Edge/Contract:     ${:>9.4}", self.edge_per_contract),
            format!("Kelly Optimal:     {:>10.2}%", self.kelly_optimal * 100.0),
            "============================================================".to_string(),
        ];
        lines.join("\n")
    }
}
