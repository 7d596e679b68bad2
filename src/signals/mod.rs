//! Signal Generation
//! Mission: Detect priced-in logical inconsistencies faster than they close

pub mod combinatorial;
pub mod generator;
pub mod rebalancing;

pub use combinatorial::{CombinatorialDetector, CombinatorialOpportunity, MarketPair};
pub use generator::SignalGenerator;
pub use rebalancing::{BasketSide, RebalancingDetector, RebalancingOpportunity};
