//! System Monitor
//! Mission: Know what the loop is doing without attaching a debugger

use crate::models::DirectionalSignal;
use crate::risk::RiskMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time status of the trading loop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemStatus {
    pub is_running: bool,
    pub is_draining: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub last_scan_at: Option<DateTime<Utc>>,

    pub markets_monitored: usize,
    pub constraints_active: usize,

    pub scans_completed: u64,
    pub scan_errors: u64,
    pub signals_generated: u64,
    pub signals_executed: u64,
    pub orders_cancelled: u64,

    pub current_positions: usize,
    pub current_drawdown: f64,
}

/// Counters and status tracking for the trading loop.
#[derive(Debug, Default)]
pub struct Monitor {
    status: SystemStatus,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        self.status.is_running = true;
        self.status.is_draining = false;
        self.status.started_at = Some(Utc::now());
    }

    pub fn stop(&mut self) {
        self.status.is_running = false;
    }

    pub fn set_draining(&mut self, draining: bool) {
        self.status.is_draining = draining;
    }

    pub fn record_scan(&mut self, markets: usize, constraints: usize) {
        self.status.last_scan_at = Some(Utc::now());
        self.status.markets_monitored = markets;
        self.status.constraints_active = constraints;
        self.status.scans_completed += 1;
    }

    pub fn record_scan_error(&mut self) {
        self.status.scan_errors += 1;
    }

    pub fn record_signal(&mut self, _signal: &DirectionalSignal) {
        self.status.signals_generated += 1;
    }

    pub fn record_execution(&mut self, success: bool) {
        if success {
            self.status.signals_executed += 1;
        }
    }

    pub fn record_cancellations(&mut self, count: u32) {
        self.status.orders_cancelled += count as u64;
    }

    pub fn record_risk_metrics(&mut self, metrics: &RiskMetrics) {
        self.status.current_drawdown = metrics.current_drawdown;
        self.status.current_positions = metrics.position_count;
    }

    pub fn status(&self) -> &SystemStatus {
        &self.status
    }

    /// One-line status for periodic logging.
    pub fn status_line(&self) -> String {
        format!(
            "scans={} markets={} constraints={} signals={}/{} positions={} dd={:.1}% errors={}",
            self.status.scans_completed,
            self.status.markets_monitored,
            self.status.constraints_active,
            self.status.signals_executed,
            self.status.signals_generated,
            self.status.current_positions,
            self.status.current_drawdown * 100.0,
            self.status.scan_errors,
        )
    }
}
