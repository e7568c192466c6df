//! GridResetManager (C11): the atomic workflow that moves the grid onto a
//! new price range. Fills that arrive while a reset is in flight are
//! buffered rather than processed inline, then replayed in arrival order
//! once the new range is live, using each fill's *submitted* price so
//! spacing stays exact, following the cancel-then-refetch-then-resume
//! shape this crate uses for reconnect reconciliation.

use std::collections::VecDeque;

use tokio::sync::Mutex;

use crate::config::GridConfig;
use crate::error::{GridError, GridResult};
use crate::execution::ExecutionEngine;
use crate::state::GridState;
use crate::strategy;
use crate::types::GridOrder;

/// Hard cap on fills buffered during a single reset. If the exchange keeps
/// firing fills faster than the reset can complete, something upstream is
/// badly wrong and this is treated as fatal rather than grown unboundedly.
const MAX_DEFERRED_FILLS: usize = 1024;

pub struct GridResetManager {
    resetting: Mutex<bool>,
    deferred_fills: Mutex<VecDeque<GridOrder>>,
}

impl Default for GridResetManager {
    fn default() -> Self {
        Self { resetting: Mutex::new(false), deferred_fills: Mutex::new(VecDeque::new()) }
    }
}

impl GridResetManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_resetting(&self) -> bool {
        *self.resetting.lock().await
    }

    /// Called from the fill handler while a reset is in flight; the fill
    /// is parked instead of driving a reverse order immediately.
    pub async fn defer_fill(&self, order: GridOrder) -> GridResult<()> {
        let mut queue = self.deferred_fills.lock().await;
        if queue.len() >= MAX_DEFERRED_FILLS {
            return Err(GridError::StateAnomaly("deferred fill queue overflowed during reset".into()));
        }
        queue.push_back(order);
        Ok(())
    }

    /// Runs the reset workflow:
    /// 1. refuse if the network is currently faulted or a reset is already running
    /// 2. raise the resetting flag so concurrent fills get deferred
    /// 3. cancel every resting order
    /// 4. recompute the price range (follow mode) or keep the configured range
    /// 5. rebuild grid levels for the new range
    /// 6. place the initial order set for the new range
    /// 7. replay deferred fills, in arrival order, against the *old* submitted prices
    /// 8. clear the resetting flag
    pub async fn run(
        &self,
        engine: &ExecutionEngine,
        state: &Mutex<GridState>,
        config: &GridConfig,
        network_fault: bool,
    ) -> GridResult<Vec<strategy::ReverseOrderSpec>> {
        if network_fault {
            return Err(GridError::ResetConflict);
        }
        {
            let mut resetting = self.resetting.lock().await;
            if *resetting {
                return Err(GridError::ResetConflict);
            }
            *resetting = true;
        }

        let result = self.run_inner(engine, state, config).await;

        *self.resetting.lock().await = false;
        result
    }

    async fn run_inner(&self, engine: &ExecutionEngine, state: &Mutex<GridState>, config: &GridConfig) -> GridResult<Vec<strategy::ReverseOrderSpec>> {
        engine.cancel_all().await.map_err(|e| GridError::Transient { context: "cancel_all during reset".into(), source: e.into() })?;

        let (lower, upper) = {
            let mut st = state.lock().await;
            if config.grid_type.is_follow() {
                config.update_price_range_for_follow_mode(st.current_price)
            } else {
                (st.lower_price, st.upper_price)
            }
        };

        {
            let mut st = state.lock().await;
            st.lower_price = lower;
            st.upper_price = upper;
            let grid_count = config.grid_count();
            st.rebuild_levels(grid_count, |i| config.price_at_index(i, lower, upper));
            st.clear_orders();
        }

        let fresh_orders = strategy::initialise(config, lower, upper);
        for order in fresh_orders {
            let placed = engine.place(order).await.map_err(|e| GridError::Transient { context: "placing fresh grid orders".into(), source: e.into() })?;
            state.lock().await.insert_order(placed);
        }

        let deferred: Vec<GridOrder> = {
            let mut queue = self.deferred_fills.lock().await;
            queue.drain(..).collect()
        };
        Ok(strategy::reverse_of_batch(config, &deferred))
    }

    #[cfg(test)]
    pub async fn deferred_count(&self) -> usize {
        self.deferred_fills.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PositionToleranceConfig, SpotReserveConfig};
    use crate::exchange::MockExchange;
    use crate::types::{GridType, OrderStatus, Side};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

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
            exit_cleanup_enabled: false,
            spot_reserve: SpotReserveConfig::default(),
            position_tolerance: PositionToleranceConfig::default(),
        }
    }

    #[tokio::test]
    async fn a_reset_while_network_faulted_is_refused() {
        let manager = GridResetManager::new();
        let exchange = Arc::new(MockExchange::default());
        let engine = ExecutionEngine::new(exchange, "BTC_USDC_PERP".into());
        let config = cfg();
        let state = Mutex::new(GridState::new(dec!(100), dec!(200), config.grid_count(), |i| config.price_at_index(i, dec!(100), dec!(200))));
        let result = manager.run(&engine, &state, &config, true).await;
        assert!(matches!(result, Err(GridError::ResetConflict)));
    }

    #[tokio::test]
    async fn deferred_fills_drain_into_reverse_order_specs_after_reset() {
        let manager = GridResetManager::new();
        let mut filled = GridOrder::new("c1".into(), 3, Side::Buy, dec!(120.0), dec!(0.001), Utc::now());
        filled.status = OrderStatus::Filled;
        filled.mark_filled(dec!(120.0), dec!(0.001));
        manager.defer_fill(filled).await.unwrap();
        assert_eq!(manager.deferred_count().await, 1);

        let exchange = Arc::new(MockExchange::default());
        let engine = ExecutionEngine::new(exchange, "BTC_USDC_PERP".into());
        let config = cfg();
        let state = Mutex::new(GridState::new(dec!(100), dec!(200), config.grid_count(), |i| config.price_at_index(i, dec!(100), dec!(200))));
        let specs = manager.run(&engine, &state, &config, false).await.unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].price, dec!(130.0));
        assert_eq!(manager.deferred_count().await, 0);
    }
}
