//! Event-Driven Backtesting
//! Mission: The reference semantics for the live loop — same fees, same
//! ordering, reproducible to the last cent

pub mod metrics;
pub mod monte_carlo;
pub mod simulator;

#[cfg(test)]
mod simulator_tests;

pub use metrics::BacktestMetrics;
pub use monte_carlo::{MonteCarloResult, MonteCarloValidator};
pub use simulator::{
    EventDrivenBacktester, MarketState, SimContext, SimSignal, SignalAction, Trade, TradeAction,
};
