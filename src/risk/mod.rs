//! Risk Management
//! Mission: Binary payoffs make sizing the risk control — cap it, then cap it again

pub mod manager;
pub mod sizer;

pub use manager::{DrawdownAction, RiskConfig, RiskManager, RiskMetrics, SignalApproval};
pub use sizer::{PositionSizer, SizingConfig};
