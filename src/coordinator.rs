//! GridCoordinator (C12): composes every other component and owns the
//! fill-routing path — the one place in the crate where an exchange event
//! turns into an order decision. The composition shape and the way a
//! halt propagates outward from one failing check both follow the same
//! pattern used for this crate's execution engine.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::Mutex;

use crate::config::GridConfig;
use crate::error::{GridError, GridResult};
use crate::exchange::ExchangeAdapter;
use crate::execution::ExecutionEngine;
use crate::health::{HealthVerdict, OrderHealthChecker};
use crate::position::PositionTracker;
use crate::reserve::ReserveGate;
use crate::reset::GridResetManager;
use crate::risk::{CapitalProtectionMode, ModeManager, PriceLockMode, ScalpingMode, SmartScalpingMode, StopLossMode, TakeProfitMode};
use crate::state::GridState;
use crate::strategy;
use crate::types::{GridOrder, OrderEvent, OrderStatus, OrderWireStatus, PauseReason, Side};

/// A fill this recent means the book is still settling; health diagnosis
/// waits rather than racing a reconciliation that hasn't happened yet.
const FILL_SETTLE_WINDOW_SECS: i64 = 5;

pub struct GridCoordinator {
    config: GridConfig,
    exchange: Arc<dyn ExchangeAdapter>,
    execution: ExecutionEngine,
    reset: GridResetManager,
    reserve: Box<dyn ReserveGate>,
    state: Mutex<GridState>,
    tracker: Mutex<PositionTracker>,
    initial_capital: Mutex<Decimal>,
    pause_reason: Mutex<Option<PauseReason>>,
    scalping: Mutex<ScalpingMode>,
    smart_scalping: Mutex<SmartScalpingMode>,
    capital_protection: Mutex<CapitalProtectionMode>,
    take_profit: Mutex<TakeProfitMode>,
    price_lock: Mutex<PriceLockMode>,
    stop_loss: Mutex<StopLossMode>,
    /// Tracks each resting order's opposite-side completion for cycle PnL:
    /// when a BUY at level N fills and its reverse SELL later fills, the
    /// pair's PnL accrues once both legs are known.
    open_legs: Mutex<HashMap<u32, GridOrder>>,
    /// When the most recent fill was recorded; the health checker defers
    /// diagnosis while this is fresh rather than racing reconciliation.
    last_fill_at: Mutex<Option<DateTime<Utc>>>,
}

impl GridCoordinator {
    pub fn new(config: GridConfig, exchange: Arc<dyn ExchangeAdapter>, reserve: Box<dyn ReserveGate>) -> Self {
        let symbol = config.symbol.clone();
        let lower = config.lower_price.unwrap_or(Decimal::ZERO);
        let upper = config.upper_price.unwrap_or(Decimal::ZERO);
        let grid_count = config.grid_count();
        let state = GridState::new(lower, upper, grid_count, |i| config.price_at_index(i, lower, upper));

        let scalping = ScalpingMode::new(config.scalping_enabled, config.scalping_trigger_percent, config.scalping_take_profit_grids as u32);
        let smart_scalping = SmartScalpingMode::new(
            config.smart_scalping_enabled,
            config.allowed_deep_drops,
            config.min_drop_threshold_percent,
            config.scalping_trigger_grid(grid_count) as i64,
        );
        let capital_protection = CapitalProtectionMode::new(config.capital_protection_enabled, config.capital_protection_trigger_grid(grid_count) as i64);
        let take_profit = TakeProfitMode::new(config.take_profit_enabled, config.take_profit_percentage);
        let price_lock = PriceLockMode::new(config.price_lock_enabled, config.price_lock_threshold, config.price_lock_start_at_threshold);
        let stop_loss = StopLossMode::new(
            config.stop_loss_protection_enabled,
            config.stop_loss_trigger_percent,
            config.stop_loss_escape_timeout as i64,
            config.stop_loss_apr_threshold,
        );

        Self {
            execution: ExecutionEngine::new(exchange.clone(), symbol),
            config,
            exchange,
            reset: GridResetManager::new(),
            reserve,
            state: Mutex::new(state),
            tracker: Mutex::new(PositionTracker::new()),
            initial_capital: Mutex::new(Decimal::ZERO),
            pause_reason: Mutex::new(None),
            scalping: Mutex::new(scalping),
            smart_scalping: Mutex::new(smart_scalping),
            capital_protection: Mutex::new(capital_protection),
            take_profit: Mutex::new(take_profit),
            price_lock: Mutex::new(price_lock),
            stop_loss: Mutex::new(stop_loss),
            open_legs: Mutex::new(HashMap::new()),
            last_fill_at: Mutex::new(None),
        }
    }

    /// Places the initial order set and anchors initial capital from the
    /// current balance. Refuses if configuration validation failed.
    pub async fn startup(&self) -> GridResult<()> {
        self.config.validate()?;
        if let Some(advisory) = self.config.margin_mode_advisory() {
            log::warn!("{advisory}");
        }

        let balances = self.exchange.get_balances().await.map_err(|e| GridError::Transient { context: "fetching starting balance".into(), source: e.into() })?;
        let total: Decimal = balances.iter().map(|b| b.total).sum();
        *self.initial_capital.lock().await = total;

        let positions = self.exchange.get_positions(Some(&self.config.symbol)).await.map_err(|e| GridError::Transient { context: "fetching starting position".into(), source: e.into() })?;
        if let Some(p) = positions.into_iter().find(|p| p.symbol == self.config.symbol) {
            let signed = match p.side {
                crate::exchange::PositionSide::Long => p.size,
                crate::exchange::PositionSide::Short => -p.size,
            };
            self.tracker.lock().await.sync_initial_position(signed, p.entry_price);
        }

        let (lower, upper) = {
            let st = self.state.lock().await;
            (st.lower_price, st.upper_price)
        };
        let orders = strategy::initialise(&self.config, lower, upper);
        for order in orders {
            let placed = self.execution.place(order).await.map_err(|e| GridError::Transient { context: "placing initial grid orders".into(), source: e.into() })?;
            self.state.lock().await.insert_order(placed);
        }
        Ok(())
    }

    pub async fn is_paused(&self) -> bool {
        self.pause_reason.lock().await.is_some()
    }

    pub async fn pause(&self, reason: PauseReason) {
        *self.pause_reason.lock().await = Some(reason);
    }

    pub async fn resume(&self) {
        *self.pause_reason.lock().await = None;
    }

    /// Routes one normalised order event to its effect on the grid. Order:
    /// 1. deferred during a reset
    /// 2. ignored if not a fill
    /// 3. trade recorded for history/fees
    /// 4. cycle PnL accrued if this closes a leg opened earlier
    /// 5. level marked complete
    /// 6. mode triggers evaluated (scalping / capital protection / take profit)
    /// 7. reverse order computed
    /// 8. reverse order placement skipped if paused or capital-protected
    /// 9. grid state updated with the new resting order
    pub async fn handle_order_event(&self, event: OrderEvent) -> GridResult<()> {
        let update = match event {
            OrderEvent::Update(u) if u.status == OrderWireStatus::Filled => u,
            OrderEvent::Update(_) => return Ok(()),
            OrderEvent::CancelledUnsolicited { order_id } => {
                return Err(GridError::StateAnomaly(format!("unsolicited cancellation of order {order_id}")));
            }
        };

        let filled = match update.client_id.clone() {
            Some(client_id) => {
                let mut st = self.state.lock().await;
                st.remove_order(&client_id)
            }
            None => None,
        };
        let Some(mut filled) = filled else { return Ok(()) };
        filled.mark_filled(update.price, update.filled);
        filled.status = OrderStatus::Filled;

        if self.reset.is_resetting().await {
            self.reset.defer_fill(filled).await?;
            return Ok(());
        }

        self.tracker.lock().await.record_trade_only(filled.side, update.price, update.filled, self.config.fee_rate);
        *self.last_fill_at.lock().await = Some(chrono::Utc::now());

        let grid_id = filled.grid_id;
        let opening_leg = {
            let mut legs = self.open_legs.lock().await;
            legs.remove(&grid_id)
        };
        if let Some(opening) = opening_leg {
            let (buy_price, sell_price) = match opening.side {
                Side::Buy => (opening.filled_price.unwrap_or(opening.price), filled.filled_price.unwrap_or(filled.price)),
                Side::Sell => (filled.filled_price.unwrap_or(filled.price), opening.filled_price.unwrap_or(opening.price)),
            };
            self.tracker.lock().await.accrue_cycle_pnl(buy_price, sell_price, filled.filled_amount.unwrap_or(filled.amount), self.config.fee_rate);
        } else {
            self.open_legs.lock().await.insert(grid_id, filled.clone());
        }

        let reference_price = filled.filled_price.unwrap_or(filled.price);
        if self.evaluate_capital_protection(reference_price).await? {
            return Ok(());
        }

        if self.scalping.lock().await.is_active() {
            // Scalping closes the whole accumulated position with its own
            // take-profit order instead of a reverse order per level.
            return Ok(());
        }

        let (side, price, reverse_grid_id) = strategy::reverse_of(&self.config, &filled);
        let now = chrono::Utc::now();
        let reverse_order = GridOrder::new(uuid::Uuid::new_v4().to_string(), reverse_grid_id, side, price, filled.filled_amount.unwrap_or(filled.amount), now);

        if self.is_paused().await {
            return Ok(());
        }

        if reverse_order.side == Side::Sell {
            let available_base = self.tracker.lock().await.current_position.max(Decimal::ZERO);
            if !self.reserve.can_commit(available_base, reverse_order.amount) {
                return Ok(());
            }
        }

        let placed = self.execution.place(reverse_order).await.map_err(|e| GridError::Transient { context: "placing reverse order".into(), source: e.into() })?;
        self.state.lock().await.insert_order(placed);
        Ok(())
    }

    async fn current_equity(&self) -> Decimal {
        self.exchange
            .get_balances()
            .await
            .map(|balances| balances.iter().map(|b| b.total).sum())
            .unwrap_or(Decimal::ZERO)
    }

    /// The 1-based grid index `price` falls within, against the grid's
    /// current range (not the configured one — follow modes move the range).
    async fn grid_index_at(&self, price: Decimal) -> i64 {
        let st = self.state.lock().await;
        self.config.index_at_price(price, st.lower_price, st.upper_price)
    }

    /// Arms capital protection once price falls to the configured trigger
    /// grid, pausing new placement; clears it once equity has recovered back
    /// near initial capital and replays the grid via a full reset. A price
    /// lock in effect holds the armed state rather than letting it clear
    /// out from under a pinned range. Returns whether the mode is armed
    /// after this evaluation.
    pub async fn evaluate_capital_protection(&self, reference_price: Decimal) -> GridResult<bool> {
        let current_grid_index = self.grid_index_at(reference_price).await;
        let initial = *self.initial_capital.lock().await;
        let equity = self.current_equity().await;

        let should_arm = self.capital_protection.lock().await.should_arm(current_grid_index);
        if should_arm {
            self.capital_protection.lock().await.arm();
            self.pause(PauseReason::Error).await;
            return Ok(true);
        }

        let recovered = self.capital_protection.lock().await.has_recovered(initial, equity);
        if recovered && !self.price_lock.lock().await.is_active() {
            self.trigger_reset(self.is_network_fault().await).await?;
            self.capital_protection.lock().await.disarm();
            self.resume().await;
        }

        Ok(self.capital_protection.lock().await.is_active())
    }

    /// Market-closes any residual position, cancels every resting order,
    /// and verifies both are actually gone before returning — retrying the
    /// whole sequence up to three times. Used by stop-loss and take-profit,
    /// which need the position itself closed, not just new placement paused.
    async fn close_all_positions_and_verify(&self) -> GridResult<()> {
        for attempt in 1..=3u32 {
            let position = self.tracker.lock().await.current_position;
            if position != Decimal::ZERO {
                let side = if position > Decimal::ZERO { Side::Sell } else { Side::Buy };
                self.exchange
                    .place_market_order(&self.config.symbol, side, position.abs(), true)
                    .await
                    .map_err(|e| GridError::Transient { context: "market-closing residual position".into(), source: e.into() })?;
            }
            self.execution.cancel_all().await.map_err(|e| GridError::Transient { context: "cancelling orders during close-out".into(), source: e.into() })?;

            let positions = self
                .exchange
                .get_positions(Some(&self.config.symbol))
                .await
                .map_err(|e| GridError::Transient { context: "verifying close-out".into(), source: e.into() })?;
            let residual = positions.into_iter().find(|p| p.symbol == self.config.symbol).map(|p| p.size).unwrap_or(Decimal::ZERO);
            let open_orders = self.execution.resting_count().await;
            if residual == Decimal::ZERO && open_orders == 0 {
                return Ok(());
            }
            log::warn!("close-out attempt {attempt}/3 left a residual position of {residual} and {open_orders} resting orders");
        }
        Err(GridError::StateAnomaly("failed to fully close positions and cancel orders after 3 attempts".into()))
    }

    /// Whether the most recent fill happened within the settle window — the
    /// health checker defers diagnosis while true rather than racing a book
    /// that hasn't finished reconciling yet.
    async fn recently_filled(&self) -> bool {
        match *self.last_fill_at.lock().await {
            Some(t) => (chrono::Utc::now() - t).num_seconds() < FILL_SETTLE_WINDOW_SECS,
            None => false,
        }
    }

    /// Compares the REST-confirmed position against the size implied by the
    /// grid's own open legs (one order's worth per unmatched fill),
    /// tolerating `position_tolerance.tolerance_multiplier` times one
    /// level's order amount before flagging a mismatch.
    async fn check_position_alignment(&self) -> GridResult<bool> {
        let rest_position = self.tracker.lock().await.current_position;
        let open_legs_position: Decimal = {
            let legs = self.open_legs.lock().await;
            legs.values()
                .map(|o| match o.side {
                    Side::Buy => o.filled_amount.unwrap_or(o.amount),
                    Side::Sell => -o.filled_amount.unwrap_or(o.amount),
                })
                .sum()
        };
        let tolerance = self.config.order_amount * Decimal::from_f64(self.config.position_tolerance.tolerance_multiplier).unwrap_or(Decimal::ONE);
        Ok((rest_position - open_legs_position).abs() <= tolerance)
    }

    /// Cancels the resting orders on the side scalping no longer needs,
    /// flips scalping active, and places its single take-profit order.
    async fn activate_scalping(&self) -> GridResult<()> {
        let is_long = self.config.grid_type.is_long_family();
        let cancel_side = self.scalping.lock().await.cancel_side(is_long);

        let resting = self.execution.resting_orders().await;
        for order in resting.iter().filter(|o| o.side == cancel_side) {
            self.execution
                .cancel(&order.client_id)
                .await
                .map_err(|e| GridError::Transient { context: "cancelling profit-side orders for scalping".into(), source: e.into() })?;
            self.state.lock().await.remove_order(&order.client_id);
        }

        self.scalping.lock().await.activate();
        self.refresh_scalping_take_profit().await
    }

    /// Recomputes scalping's take-profit price against the position's
    /// current average cost and replaces the resting order if it's gone
    /// stale. A no-op once the position is flat or the price hasn't moved.
    async fn refresh_scalping_take_profit(&self) -> GridResult<()> {
        let is_long = self.config.grid_type.is_long_family();
        let (average_cost, position_size) = {
            let tracker = self.tracker.lock().await;
            (tracker.average_cost, tracker.current_position.abs())
        };
        let spec = self.scalping.lock().await.calculate_take_profit_order(average_cost, position_size, self.config.grid_interval, is_long);
        let Some(spec) = spec else { return Ok(()) };

        let existing_id = self.scalping.lock().await.take_profit_client_id().map(|s| s.to_string());
        if let Some(existing_id) = &existing_id {
            let resting = self.execution.resting_orders().await;
            if let Some(existing_order) = resting.iter().find(|o| &o.client_id == existing_id) {
                let outdated = self.scalping.lock().await.is_take_profit_order_outdated(existing_order.price, spec.price);
                if !outdated {
                    return Ok(());
                }
                self.execution.cancel(existing_id).await.map_err(|e| GridError::Transient { context: "cancelling stale take-profit order".into(), source: e.into() })?;
                self.state.lock().await.remove_order(existing_id);
            }
        }

        let order = GridOrder::new(uuid::Uuid::new_v4().to_string(), 0, spec.side, spec.price, spec.amount, chrono::Utc::now());
        let client_id = order.client_id.clone();
        let placed = self.execution.place(order).await.map_err(|e| GridError::Transient { context: "placing scalping take-profit order".into(), source: e.into() })?;
        self.state.lock().await.insert_order(placed);
        self.scalping.lock().await.set_take_profit_client_id(Some(client_id));
        Ok(())
    }

    /// Runs the reset workflow and places the reverse orders it returns for
    /// fills that arrived while the reset was in flight — dropping those
    /// specs silently would leave the grid under-hedged on every level a
    /// mid-reset fill touched. Also clears the scalping modes, since the
    /// reset just cancelled and replaced the whole book out from under them.
    pub async fn trigger_reset(&self, network_fault: bool) -> GridResult<()> {
        let specs = self.reset.run(&self.execution, &self.state, &self.config, network_fault).await?;
        for spec in specs {
            let order = GridOrder::new(uuid::Uuid::new_v4().to_string(), spec.grid_id, spec.side, spec.price, spec.amount, chrono::Utc::now());
            let placed = self
                .execution
                .place(order)
                .await
                .map_err(|e| GridError::Transient { context: "placing deferred reverse order after reset".into(), source: e.into() })?;
            self.state.lock().await.insert_order(placed);
        }
        self.scalping.lock().await.reset();
        self.smart_scalping.lock().await.reset();
        Ok(())
    }

    pub async fn resting_order_count(&self) -> usize {
        self.execution.resting_count().await
    }

    pub async fn is_network_fault(&self) -> bool {
        self.execution.is_network_fault().await
    }

    /// Polls `monitor` and writes the result into this coordinator's own
    /// position tracker, pausing new order placement on an implausible
    /// jump rather than trusting it.
    pub async fn sync_position(&self, monitor: &crate::position_monitor::PositionMonitor) -> crate::position_monitor::PositionAnomaly {
        let verdict = monitor.poll(&self.tracker).await;
        if verdict != crate::position_monitor::PositionAnomaly::None {
            self.pause(PauseReason::Error).await;
        }
        verdict
    }

    /// Runs an order-health diagnosis against the resting book and repairs
    /// anything other than `Healthy`. Skipped entirely while a fill is
    /// still settling, since a diagnosis racing reconciliation sees a book
    /// that looks broken but isn't.
    pub async fn diagnose_and_repair(&self, checker: &OrderHealthChecker, expected_count: usize) -> GridResult<HealthVerdict> {
        if self.recently_filled().await {
            return Ok(HealthVerdict::Healthy);
        }
        let (lower, upper) = {
            let st = self.state.lock().await;
            (st.lower_price, st.upper_price)
        };
        let scalping_active = self.scalping.lock().await.is_active();
        let verdict = checker.diagnose(&self.execution, &self.config, expected_count, lower, upper, scalping_active).await;
        if verdict != HealthVerdict::Healthy {
            log::warn!("order health check failed ({:?}), repairing", verdict);
            self.repair_health_issue(verdict).await?;
        }
        Ok(verdict)
    }

    /// Repairs a health verdict. A wrong order count can't be localised to
    /// specific levels, so it falls back to a full reset; everything else
    /// gets a surgical repair that only touches the misbehaving orders.
    async fn repair_health_issue(&self, verdict: HealthVerdict) -> GridResult<()> {
        if matches!(verdict, HealthVerdict::WrongCount { .. }) {
            self.trigger_reset(self.is_network_fault().await).await?;
            return Ok(());
        }
        self.surgical_repair().await
    }

    /// Cancels only the orders sitting at the wrong price or duplicating a
    /// level, then fills the vacated slots — skipping a BUY slot if the
    /// position looks misaligned with the grid's own record of open legs,
    /// rather than adding to a position that's already drifted.
    async fn surgical_repair(&self) -> GridResult<()> {
        let (lower, upper, grid_count) = {
            let st = self.state.lock().await;
            (st.lower_price, st.upper_price, st.grid_count())
        };
        let tolerance = self.config.grid_interval * dec!(0.01);

        let resting = self.execution.resting_orders().await;
        let mut seen_levels = HashSet::new();
        let mut bad_client_ids = Vec::new();
        for order in &resting {
            let nearest_index = self.config.index_at_price(order.price, lower, upper).max(1) as u32;
            let expected_price = self.config.price_at_index(nearest_index, lower, upper);
            let off_grid = (order.price - expected_price).abs() > tolerance;
            let out_of_range = order.price < lower || order.price > upper;
            let duplicate = !seen_levels.insert(order.grid_id);
            if off_grid || out_of_range || duplicate {
                bad_client_ids.push(order.client_id.clone());
            }
        }

        for client_id in &bad_client_ids {
            self.execution.cancel(client_id).await.map_err(|e| GridError::Transient { context: "cancelling misplaced grid order".into(), source: e.into() })?;
            self.state.lock().await.remove_order(client_id);
        }

        let occupied: HashSet<u32> = self.execution.resting_orders().await.iter().map(|o| o.grid_id).collect();
        let aligned = self.check_position_alignment().await?;
        for i in 1..=grid_count {
            if occupied.contains(&i) {
                continue;
            }
            let price = self.config.price_at_index(i, lower, upper);
            let amount = self.config.amount_at_index(i, grid_count);
            let side = self.config.grid_type.initial_side();
            if side == Side::Buy && !aligned {
                log::warn!("skipping repair buy at grid level {i}, position is outside tolerance");
                continue;
            }
            let order = GridOrder::new(uuid::Uuid::new_v4().to_string(), i, side, price, amount, chrono::Utc::now());
            let placed = self.execution.place(order).await.map_err(|e| GridError::Transient { context: "placing replacement grid order during repair".into(), source: e.into() })?;
            self.state.lock().await.insert_order(placed);
        }
        Ok(())
    }

    pub async fn current_price(&self) -> Decimal {
        self.state.lock().await.current_price
    }

    /// Records a fresh mark price and returns the one it replaces, so a
    /// caller can feed both into mode evaluation without a second lookup.
    pub async fn observe_price(&self, price: Decimal) -> Decimal {
        let mut st = self.state.lock().await;
        let previous = st.current_price;
        st.current_price = price;
        previous
    }

    /// Switches between trusting a live stream and falling back to REST
    /// polling for order updates.
    pub async fn set_monitoring_mode(&self, mode: crate::types::MonitoringMode) {
        self.execution.set_monitoring_mode(mode).await;
    }

    pub async fn monitoring_mode(&self) -> crate::types::MonitoringMode {
        self.execution.monitoring_mode().await
    }

    /// Routes one streamed order update through the same normalisation the
    /// REST reconciliation path uses before handing it to `handle_order_event`.
    pub async fn handle_stream_update(&self, update: crate::types::OrderUpdate) -> GridResult<()> {
        let event = self.execution.handle_stream_order(update).await;
        self.handle_order_event(event).await
    }

    /// Polls exchange truth for orders the local book thinks are still
    /// resting and routes any dark fill or cancel it finds through the
    /// same path a streamed event would take. Used both as the fallback
    /// loop while `MonitoringMode::RestPoll` is active and periodically
    /// alongside streaming to catch anything a disconnect hid.
    pub async fn poll_rest_events(&self) -> GridResult<()> {
        match self.execution.reconcile_against_rest().await {
            Ok(events) => {
                self.execution.record_success().await;
                for event in events {
                    self.handle_order_event(event).await?;
                }
                Ok(())
            }
            Err(e) => {
                self.execution.record_failure().await;
                Err(GridError::Transient { context: "reconciling orders against rest".into(), source: e.into() })
            }
        }
    }

    /// Snapshot for the dashboard: current levels/PnL plus which risk
    /// modes are currently latched.
    pub async fn capture_stats(&self) -> crate::stats::GridStatistics {
        let state = self.state.lock().await;
        let tracker = self.tracker.lock().await;
        let initial = *self.initial_capital.lock().await;
        let mut modes = Vec::new();
        if self.scalping.lock().await.is_active() {
            modes.push("scalping");
        }
        if self.smart_scalping.lock().await.is_active() {
            modes.push("smart_scalping");
        }
        if self.capital_protection.lock().await.is_active() {
            modes.push("capital_protection");
        }
        if self.take_profit.lock().await.is_active() {
            modes.push("take_profit");
        }
        if self.price_lock.lock().await.is_active() {
            modes.push("price_lock");
        }
        if self.stop_loss.lock().await.is_active() {
            modes.push("stop_loss");
        }
        crate::stats::GridStatistics::capture(&self.config.symbol, &state, &tracker, initial, modes)
    }

    /// Re-evaluates every latched risk mode against a fresh price point.
    /// Stop-loss and take-profit close the position outright and reset the
    /// grid; capital protection arms/recovers against the grid index; both
    /// stay hands-off while a price lock holds the range in place. Smart
    /// scalping and plain scalping hand off into the same scalping
    /// take-profit machinery once triggered. A latching error (exhausting
    /// the close-out retries) propagates so the caller can decide whether
    /// to keep running.
    pub async fn evaluate_risk_modes(&self, current_price: Decimal, previous_price: Decimal) -> GridResult<()> {
        let initial = *self.initial_capital.lock().await;
        let equity = self.current_equity().await;
        let price_locked = self.price_lock.lock().await.is_active();

        self.evaluate_capital_protection(current_price).await?;

        if !price_locked {
            if self.stop_loss.lock().await.triggers_on_drawdown(initial, equity) {
                self.stop_loss.lock().await.activate();
                self.pause(PauseReason::Error).await;
                self.close_all_positions_and_verify().await?;
                self.trigger_reset(self.is_network_fault().await).await?;
                self.stop_loss.lock().await.reset();
                self.resume().await;
            } else {
                let stats = self.capture_stats().await;
                if self.stop_loss.lock().await.tick_apr(stats.apr_realtime_10m, chrono::Utc::now()) {
                    self.stop_loss.lock().await.activate();
                    self.pause(PauseReason::Error).await;
                    self.close_all_positions_and_verify().await?;
                    self.trigger_reset(self.is_network_fault().await).await?;
                    self.stop_loss.lock().await.reset();
                    self.resume().await;
                }
            }

            let total_pnl = self.tracker.lock().await.realised_pnl;
            if self.take_profit.lock().await.triggers(initial, total_pnl) {
                self.take_profit.lock().await.activate();
                self.pause(PauseReason::Manual).await;
                self.close_all_positions_and_verify().await?;
                self.trigger_reset(self.is_network_fault().await).await?;
                self.take_profit.lock().await.reset();
                self.resume().await;
            }
        }

        if self.price_lock.lock().await.triggers(current_price, previous_price) {
            self.price_lock.lock().await.activate();
        }

        if !self.scalping.lock().await.is_active() {
            let current_grid_index = self.grid_index_at(current_price).await;
            let step_drop_percent = if previous_price > Decimal::ZERO && current_price < previous_price {
                ((previous_price - current_price) / previous_price * Decimal::from(100)).round().to_u32().unwrap_or(0)
            } else {
                0
            };
            let activated_now = self.smart_scalping.lock().await.update(current_grid_index, step_drop_percent);
            if activated_now {
                self.activate_scalping().await?;
            }

            if !self.scalping.lock().await.is_active() {
                let (buys, sells) = {
                    let st = self.state.lock().await;
                    (st.pending_buy_count(), st.pending_sell_count())
                };
                let total = buys + sells;
                if total > 0 {
                    let filled_one_side = total.saturating_sub(buys.min(sells)) as u32;
                    if self.scalping.lock().await.triggers(filled_one_side, total as u32) {
                        self.activate_scalping().await?;
                    }
                }
            }
        } else {
            self.refresh_scalping_take_profit().await?;
        }

        Ok(())
    }

    pub async fn shutdown(&self) -> GridResult<()> {
        if self.config.exit_cleanup_enabled {
            self.execution.cancel_all().await.map_err(|e| GridError::Transient { context: "cancelling orders on shutdown".into(), source: e.into() })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PositionToleranceConfig, SpotReserveConfig};
    use crate::exchange::MockExchange;
    use crate::reserve::NoReserve;
    use crate::types::GridType;
    use rust_decimal_macros::dec;

    fn cfg() -> GridConfig {
        GridConfig {
            exchange: "backpack".into(),
            symbol: "BTC_USDC_PERP".into(),
            grid_type: GridType::Long,
            lower_price: Some(dec!(100.0)),
            upper_price: Some(dec!(200.0)),
            grid_interval: dec!(10),
            order_amount: dec!(0.001),
            quantity_precision: 3,
            price_decimals: 1,
            fee_rate: dec!(0.0001),
            max_position: None,
            martingale_increment: None,
            follow_grid_count: None,
            follow_timeout: 300,
            follow_distance: 1,
            price_offset_grids: 0,
            reverse_order_grid_distance: 1,
            scalping_enabled: false,
            scalping_trigger_percent: 80,
            scalping_take_profit_grids: 2,
            smart_scalping_enabled: false,
            allowed_deep_drops: 1,
            min_drop_threshold_percent: 10,
            capital_protection_enabled: false,
            capital_protection_trigger_percent: 50,
            take_profit_enabled: false,
            take_profit_percentage: dec!(0.01),
            price_lock_enabled: false,
            price_lock_threshold: None,
            price_lock_start_at_threshold: false,
            stop_loss_protection_enabled: false,
            stop_loss_trigger_percent: dec!(100.0),
            stop_loss_escape_timeout: 300,
            stop_loss_apr_threshold: dec!(50.0),
            order_health_check_enabled: true,
            order_health_check_interval: 300,
            health_check_snapshot_count: 2,
            rest_position_query_interval: 60,
            margin_mode: "isolated".into(),
            leverage: 10,
            exit_cleanup_enabled: true,
            spot_reserve: SpotReserveConfig::default(),
            position_tolerance: PositionToleranceConfig::default(),
        }
    }

    #[tokio::test]
    async fn startup_places_one_order_per_level() {
        let exchange = Arc::new(MockExchange::new(dec!(10_000), dec!(150)));
        let coordinator = GridCoordinator::new(cfg(), exchange, Box::new(NoReserve));
        coordinator.startup().await.unwrap();
        assert_eq!(coordinator.resting_order_count().await, 10);
    }

    #[tokio::test]
    async fn a_buy_fill_places_a_sell_one_interval_above() {
        let exchange = Arc::new(MockExchange::new(dec!(10_000), dec!(150)));
        let coordinator = GridCoordinator::new(cfg(), exchange, Box::new(NoReserve));
        coordinator.startup().await.unwrap();

        let orders = coordinator.execution.resting_orders().await;
        let buy_at_130 = orders.iter().find(|o| o.price == dec!(130.0)).unwrap().clone();

        let update = crate::types::OrderUpdate {
            order_id: buy_at_130.order_id.clone().unwrap(),
            client_id: Some(buy_at_130.client_id.clone()),
            status: OrderWireStatus::Filled,
            side: Side::Buy,
            price: dec!(130.0),
            amount: dec!(0.001),
            filled: dec!(0.001),
        };
        coordinator.handle_order_event(OrderEvent::Update(update)).await.unwrap();

        let after = coordinator.execution.resting_orders().await;
        assert!(after.iter().any(|o| o.price == dec!(140.0) && o.side == Side::Sell));
    }

    #[tokio::test]
    async fn scalping_activates_once_one_side_of_the_book_is_mostly_filled() {
        let mut c = cfg();
        c.scalping_enabled = true;
        c.scalping_trigger_percent = 50;
        let exchange = Arc::new(MockExchange::new(dec!(10_000), dec!(150)));
        let coordinator = GridCoordinator::new(c, exchange, Box::new(NoReserve));
        coordinator.startup().await.unwrap();

        coordinator.evaluate_risk_modes(dec!(150), Decimal::ZERO).await.unwrap();

        let stats = coordinator.capture_stats().await;
        assert!(stats.active_modes.contains(&"scalping"));
    }

    #[tokio::test]
    async fn price_lock_pins_the_range_the_moment_price_crosses_its_threshold() {
        let mut c = cfg();
        c.price_lock_enabled = true;
        c.price_lock_threshold = Some(dec!(150));
        let exchange = Arc::new(MockExchange::new(dec!(10_000), dec!(150)));
        let coordinator = GridCoordinator::new(c, exchange, Box::new(NoReserve));
        coordinator.startup().await.unwrap();

        coordinator.evaluate_risk_modes(dec!(155), dec!(145)).await.unwrap();

        let stats = coordinator.capture_stats().await;
        assert!(stats.active_modes.contains(&"price_lock"));
    }

    #[tokio::test]
    async fn sync_position_accepts_the_first_reading_without_pausing() {
        let exchange = Arc::new(MockExchange::new(dec!(10_000), dec!(150)));
        let coordinator = GridCoordinator::new(cfg(), exchange.clone(), Box::new(NoReserve));
        coordinator.startup().await.unwrap();
        let monitor = crate::position_monitor::PositionMonitor::new(exchange, "BTC_USDC_PERP".into(), std::time::Duration::from_secs(60));

        coordinator.sync_position(&monitor).await;

        assert!(!coordinator.is_paused().await);
    }

    #[tokio::test]
    async fn shutdown_cancels_everything_when_exit_cleanup_is_enabled() {
        let exchange = Arc::new(MockExchange::new(dec!(10_000), dec!(150)));
        let coordinator = GridCoordinator::new(cfg(), exchange, Box::new(NoReserve));
        coordinator.startup().await.unwrap();
        coordinator.shutdown().await.unwrap();
        assert_eq!(coordinator.resting_order_count().await, 0);
    }
}
