//! Trading Bot
//! Mission: One deterministic loop — snapshot, bounds, signals, size, approve, execute, manage
//!
//! Single-threaded cooperative loop per account. Suspension happens only at
//! exchange calls and the inter-tick sleep; every detector, sizer and risk
//! decision is synchronous so a tick is reproducible under the simulator.

use crate::config::Config;
use crate::engine::ConstraintEngine;
use crate::exchange::ExchangeApi;
use crate::execution::{ExecutionCoordinator, ExecutionOutcome};
use crate::models::{DirectionalSignal, Market, Portfolio, Position};
use crate::monitor::Monitor;
use crate::profit_taker::ProfitTaker;
use crate::risk::{PositionSizer, RiskManager};
use crate::signals::{CombinatorialDetector, RebalancingDetector, SignalGenerator};
use crate::ticker::extract_series;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Signals executed per tick, best first.
const MAX_SIGNALS_PER_TICK: usize = 10;

/// Loop control shared with the supervisor/signal handler.
#[derive(Debug, Default)]
pub struct LoopFlags {
    pub running: bool,
    /// Draining: no new entries, but profit-taking and order reconciliation
    /// continue until shutdown.
    pub draining: bool,
}

pub struct TradingBot {
    config: Config,
    client: Arc<dyn ExchangeApi>,

    pub engine: ConstraintEngine,
    signal_generator: SignalGenerator,
    rebalancing_detector: RebalancingDetector,
    combinatorial_detector: CombinatorialDetector,
    sizer: PositionSizer,
    pub risk_manager: RiskManager,
    profit_taker: ProfitTaker,
    coordinator: ExecutionCoordinator,
    pub monitor: Monitor,

    flags: Arc<RwLock<LoopFlags>>,

    markets: HashMap<String, Market>,
    last_fetch_at: Option<DateTime<Utc>>,
    portfolio: Portfolio,
    positions: Vec<Position>,
    account_balance: f64,
}

impl TradingBot {
    pub fn new(config: Config, client: Arc<dyn ExchangeApi>) -> Self {
        let signal_generator = SignalGenerator::new(
            config.min_edge_threshold,
            config.safety_margin,
            config.signal_ttl_seconds,
        );
        let coordinator = ExecutionCoordinator::new(
            client.clone(),
            config.max_price_drift,
            config.order_timeout_seconds,
            config.paper_trading,
        );

        Self {
            engine: ConstraintEngine::new(),
            signal_generator,
            rebalancing_detector: RebalancingDetector::new(config.min_edge_threshold),
            combinatorial_detector: CombinatorialDetector::default(),
            sizer: PositionSizer::new(config.sizing()),
            risk_manager: RiskManager::new(config.risk()),
            profit_taker: ProfitTaker::new(config.profit_taker()),
            coordinator,
            monitor: Monitor::new(),
            flags: Arc::new(RwLock::new(LoopFlags::default())),
            markets: HashMap::new(),
            last_fetch_at: None,
            portfolio: Portfolio::new(10_000.0),
            positions: Vec::new(),
            account_balance: 10_000.0,
            config,
            client,
        }
    }

    /// Shared loop flags, for the supervisor to flip draining/stop.
    pub fn flags(&self) -> Arc<RwLock<LoopFlags>> {
        self.flags.clone()
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    /// Run until the running flag is cleared, then shut down gracefully.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            paper = self.config.paper_trading,
            scan_interval = self.config.scan_interval_seconds,
            "starting trading loop"
        );
        self.flags.write().running = true;
        self.monitor.start();

        if !self.config.paper_trading {
            self.reconcile_account().await?;
        }

        while self.flags.read().running {
            if let Err(e) = self.scan_cycle().await {
                // A failed tick never corrupts state: no writes land before
                // risk approval, so skip it and move on
                warn!(error = %e, "scan cycle failed, skipping tick");
                self.monitor.record_scan_error();
            }

            tokio::time::sleep(std::time::Duration::from_secs_f64(
                self.config.scan_interval_seconds,
            ))
            .await;
        }

        self.shutdown().await;
        Ok(())
    }

    pub fn stop(&self) {
        self.flags.write().running = false;
    }

    /// Graceful shutdown: cancel all non-terminal orders before returning.
    pub async fn shutdown(&mut self) {
        info!("shutting down trading loop");
        let cancelled = self.coordinator.cancel_all_pending().await;
        if cancelled > 0 {
            info!(cancelled, "cancelled pending orders on shutdown");
        }
        self.monitor.record_cancellations(cancelled);
        self.monitor.stop();
    }

    /// One full tick. Public so the integration suite can drive the loop
    /// deterministically without sleeping.
    pub async fn scan_cycle(&mut self) -> Result<()> {
        let now = Utc::now();
        let draining = self.flags.read().draining;
        self.monitor.set_draining(draining);

        self.fetch_markets(now).await?;
        self.reconcile_account().await?;

        self.monitor.record_scan(self.markets.len(), self.engine.len());

        if !draining {
            let signals = self.generate_signals(now);
            self.execute_signals(signals).await;
        }

        self.run_profit_taker(now).await;
        self.enforce_expiration_cliff(now).await;

        let cancelled = self.coordinator.expire_stale_orders(now).await;
        self.monitor.record_cancellations(cancelled);

        let metrics = self
            .risk_manager
            .calculate_portfolio_risk(&self.positions, self.account_balance);
        self.monitor.record_risk_metrics(&metrics);

        debug!(status = %self.monitor.status_line(), "tick complete");
        Ok(())
    }

    /// Refresh the market snapshot, falling back to the cached one inside
    /// the freshness horizon when the exchange misbehaves.
    async fn fetch_markets(&mut self, now: DateTime<Utc>) -> Result<()> {
        let mut fetched: HashMap<String, Market> = HashMap::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = match self
                .client
                .list_markets(Some("open"), None, 1000, cursor.as_deref())
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    let cache_age = self
                        .last_fetch_at
                        .map(|t| (now - t).num_seconds())
                        .unwrap_or(i64::MAX);
                    if !self.markets.is_empty()
                        && cache_age <= self.config.cache_ttl_seconds as i64
                    {
                        warn!(error = %e, cache_age, "market fetch failed, reusing snapshot");
                        return Ok(());
                    }
                    return Err(e).context("market fetch failed with stale cache");
                }
            };

            for market in page.markets {
                fetched.insert(market.ticker.clone(), market);
            }

            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        self.markets = fetched;
        self.last_fetch_at = Some(now);
        Ok(())
    }

    /// Reconcile cash and positions. Paper mode owns its own ledger; live
    /// mode trusts the exchange.
    async fn reconcile_account(&mut self) -> Result<()> {
        if self.config.paper_trading {
            let marks = self.current_marks();
            self.account_balance = self.portfolio.equity(&marks);
            self.portfolio.record_equity(self.account_balance);
            self.positions = self.portfolio.positions.values().cloned().collect();
            for position in &mut self.positions {
                if let Some(&mark) = marks.get(&position.ticker) {
                    position.update_unrealized_pnl(mark);
                }
            }
            return Ok(());
        }

        self.account_balance = self
            .client
            .get_balance()
            .await
            .context("balance fetch failed")?;
        self.positions = self
            .client
            .get_positions()
            .await
            .context("positions fetch failed")?;
        Ok(())
    }

    fn current_marks(&self) -> HashMap<String, f64> {
        self.markets
            .iter()
            .filter_map(|(ticker, m)| m.mid_price().map(|p| (ticker.clone(), p)))
            .collect()
    }

    /// All three detectors, merged, filtered and ranked.
    fn generate_signals(&mut self, now: DateTime<Utc>) -> Vec<DirectionalSignal> {
        let markets: Vec<Market> = self.markets.values().cloned().collect();
        let spreads: HashMap<String, f64> = markets
            .iter()
            .filter_map(|m| m.spread().map(|s| (m.ticker.clone(), s)))
            .collect();
        let prices: HashMap<String, f64> = markets
            .iter()
            .filter_map(|m| m.mid_price().map(|p| (m.ticker.clone(), p)))
            .collect();

        let mut signals = self
            .signal_generator
            .generate_signals(&self.engine, &markets, &spreads);

        // Partition baskets per series (mid-price detection pass)
        let mut by_series: HashMap<&str, Vec<&Market>> = HashMap::new();
        for market in &markets {
            if !market.series_ticker.is_empty() {
                by_series
                    .entry(market.series_ticker.as_str())
                    .or_default()
                    .push(market);
            }
        }
        for (series, series_markets) in by_series {
            if series_markets.len() < 2 {
                continue;
            }
            if let Some(opp) = self.rebalancing_detector.scan_series(series, &series_markets) {
                debug!(
                    series,
                    deviation = %format!("{:.3}", opp.deviation),
                    net = %format!("{:.3}", opp.profit_post_fee),
                    "rebalancing opportunity"
                );
                signals.extend(self.signal_generator.generate_from_rebalancing(&opp));
            }
        }

        for opp in self.combinatorial_detector.scan_all(&markets, &prices) {
            signals.extend(self.combinatorial_detector.generate_signals(&opp));
        }

        for signal in &signals {
            self.monitor.record_signal(signal);
        }

        let filtered = self
            .signal_generator
            .filter_by_execution_rules(signals, &self.markets, now);
        let mut ranked = self.signal_generator.rank_signals(filtered);
        ranked.truncate(MAX_SIGNALS_PER_TICK);
        ranked
    }

    /// Size, risk-approve and submit the ranked signals in order.
    async fn execute_signals(&mut self, signals: Vec<DirectionalSignal>) {
        for signal in signals {
            let correlated = self.count_correlated_positions(&signal.ticker);
            let (dollar_size, _) =
                self.sizer
                    .size_signal(&signal, self.account_balance, correlated);
            if dollar_size <= 0.0 {
                continue;
            }

            // Cluster headroom clamp before the risk gate
            let series = extract_series(&signal.ticker);
            let cluster_exposure = RiskManager::cluster_exposures(&self.positions)
                .get(series)
                .copied()
                .unwrap_or(0.0);
            let clamped = self.sizer.validate_cluster_limits(
                dollar_size,
                cluster_exposure,
                self.account_balance,
            );
            if clamped <= 0.0 {
                debug!(ticker = %signal.ticker, "no cluster headroom");
                continue;
            }

            let approval = self.risk_manager.approve_signal(
                &signal,
                clamped,
                &self.positions,
                self.account_balance,
            );
            if !approval.approved {
                debug!(ticker = %signal.ticker, reason = %approval.reason, "signal rejected");
                continue;
            }

            let execution_price = match signal.direction {
                crate::models::SignalDirection::BuyYes => signal.current_price,
                crate::models::SignalDirection::BuyNo => 1.0 - signal.current_price,
            };
            let contracts = self
                .sizer
                .calculate_contracts(approval.approved_size, execution_price);

            let (outcome, order) = self
                .coordinator
                .execute_signal(&signal, contracts, self.account_balance)
                .await;
            self.monitor
                .record_execution(outcome == ExecutionOutcome::Success);

            if let Some(order) = order {
                if order.filled_quantity > 0 && self.config.paper_trading {
                    self.apply_paper_fill(&order);
                }
            }
        }
    }

    /// Book a paper fill into the ledger at the limit price plus the fee.
    fn apply_paper_fill(&mut self, order: &crate::models::Order) {
        let now = Utc::now();
        let yes_price = order.price_decimal();
        let execution_price = match order.side {
            crate::models::OrderSide::Yes => yes_price,
            crate::models::OrderSide::No => 1.0 - yes_price,
        };
        let fees = crate::fees::calculate_fee(execution_price, order.filled_quantity);

        match order.action {
            crate::models::OrderAction::Buy => {
                self.portfolio.apply_buy(
                    &order.ticker,
                    order.side,
                    order.filled_quantity,
                    execution_price,
                    fees,
                    now,
                );
            }
            crate::models::OrderAction::Sell => {
                let pnl = self.portfolio.apply_sell(
                    &order.ticker,
                    order.filled_quantity,
                    execution_price,
                    fees,
                    now,
                );
                info!(
                    ticker = %order.ticker,
                    quantity = order.filled_quantity,
                    pnl = %format!("{:.2}", pnl),
                    "position closed"
                );
            }
        }

        self.positions = self.portfolio.positions.values().cloned().collect();
    }

    /// Evaluate the profit-taker and execute its close actions.
    async fn run_profit_taker(&mut self, now: DateTime<Utc>) {
        let marks = self.current_marks();
        let positions = self.positions.clone();
        let actions = self.profit_taker.check_positions(&positions, &marks, now);

        for action in actions {
            let Some(position) = positions.iter().find(|p| p.ticker == action.ticker) else {
                continue;
            };
            let Some(&mark) = marks.get(&action.ticker) else {
                continue;
            };

            info!(
                ticker = %action.ticker,
                kind = ?action.kind,
                quantity = action.quantity,
                reason = %action.reason,
                "profit-take action"
            );

            // Limit prices are always YES-terms cents; the fill books the
            // held side off this
            let price_cents = ((mark * 100.0).round() as i64).clamp(1, 99) as u32;

            let (_, order) = self
                .coordinator
                .close_position(
                    &action.ticker,
                    position.side,
                    action.quantity,
                    price_cents,
                    &action.reason,
                )
                .await;

            if let Some(order) = order {
                if order.filled_quantity > 0 && self.config.paper_trading {
                    self.apply_paper_fill(&order);
                    if self
                        .portfolio
                        .positions
                        .get(&action.ticker)
                        .is_none()
                    {
                        self.profit_taker.untrack_position(&action.ticker);
                    }
                }
            }
        }
    }

    /// Force-close anything sitting on the expiration cliff.
    async fn enforce_expiration_cliff(&mut self, now: DateTime<Utc>) {
        let days: HashMap<String, f64> = self
            .positions
            .iter()
            .filter_map(|p| {
                self.markets
                    .get(&p.ticker)
                    .and_then(|m| m.days_to_expiration(now))
                    .map(|d| (p.ticker.clone(), d))
            })
            .collect();

        let closes = self.risk_manager.check_expiration_risk(&self.positions, &days);
        let marks = self.current_marks();

        for ticker in closes {
            let Some(position) = self.positions.iter().find(|p| p.ticker == ticker).cloned()
            else {
                continue;
            };
            let Some(&mark) = marks.get(&ticker) else {
                continue;
            };

            let price_cents = ((mark * 100.0).round() as i64).clamp(1, 99) as u32;

            let (_, order) = self
                .coordinator
                .close_position(
                    &ticker,
                    position.side,
                    position.quantity,
                    price_cents,
                    "expiration cliff",
                )
                .await;

            if let Some(order) = order {
                if order.filled_quantity > 0 && self.config.paper_trading {
                    self.apply_paper_fill(&order);
                    self.profit_taker.untrack_position(&ticker);
                }
            }
        }
    }

    fn count_correlated_positions(&self, ticker: &str) -> u32 {
        let series = extract_series(ticker);
        self.positions
            .iter()
            .filter(|p| extract_series(&p.ticker) == series)
            .count() as u32
    }
}
