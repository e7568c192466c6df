//! Scalping mode: once one side of the grid has filled past
//! `trigger_percent` of its levels, the grid stops waiting for the full
//! range to cycle. The untaken profit-side orders are cancelled and
//! replaced with a single take-profit order priced `take_profit_grids`
//! intervals away from the average cost of the position the fills built
//! up, closing the whole position in one order instead of level by level.

use rust_decimal::Decimal;

use crate::types::Side;

use super::ModeManager;

pub struct TakeProfitOrderSpec {
    pub side: Side,
    pub price: Decimal,
    pub amount: Decimal,
}

pub struct ScalpingMode {
    enabled: bool,
    trigger_percent: u32,
    take_profit_grids: u32,
    active: bool,
    take_profit_client_id: Option<String>,
}

impl ScalpingMode {
    pub fn new(enabled: bool, trigger_percent: u32, take_profit_grids: u32) -> Self {
        Self { enabled, trigger_percent, take_profit_grids, active: false, take_profit_client_id: None }
    }

    pub fn take_profit_grids(&self) -> u32 {
        self.take_profit_grids
    }

    /// `filled_one_side` / `total_levels` expressed as levels filled on a
    /// single side of the grid vs. its total level count.
    pub fn triggers(&self, filled_one_side: u32, total_levels: u32) -> bool {
        if !self.enabled || total_levels == 0 {
            return false;
        }
        let filled_percent = filled_one_side * 100 / total_levels;
        filled_percent >= self.trigger_percent
    }

    /// The side still resting on the book that gets cancelled once scalping
    /// triggers: the profit side a LONG family waits on is SELL, a SHORT
    /// family's is BUY.
    pub fn cancel_side(&self, is_long_family: bool) -> Side {
        if is_long_family {
            Side::Sell
        } else {
            Side::Buy
        }
    }

    /// Prices the single order that closes the whole accumulated position:
    /// `take_profit_grids` intervals above average cost for a long position,
    /// below it for a short one. `None` once the position the fills built is
    /// flat (nothing left to close).
    pub fn calculate_take_profit_order(&self, average_cost: Decimal, position_size: Decimal, grid_interval: Decimal, is_long_family: bool) -> Option<TakeProfitOrderSpec> {
        if position_size <= Decimal::ZERO {
            return None;
        }
        let offset = Decimal::from(self.take_profit_grids) * grid_interval;
        let (side, price) = if is_long_family { (Side::Sell, average_cost + offset) } else { (Side::Buy, average_cost - offset) };
        Some(TakeProfitOrderSpec { side, price, amount: position_size })
    }

    pub fn take_profit_client_id(&self) -> Option<&str> {
        self.take_profit_client_id.as_deref()
    }

    pub fn set_take_profit_client_id(&mut self, id: Option<String>) {
        self.take_profit_client_id = id;
    }

    /// A resting take-profit order is outdated once a fresh fill moves the
    /// position's average cost enough to change its price — it needs
    /// cancelling and replacing rather than left resting at a stale level.
    pub fn is_take_profit_order_outdated(&self, resting_price: Decimal, recalculated_price: Decimal) -> bool {
        self.take_profit_client_id.is_some() && resting_price != recalculated_price
    }
}

impl ModeManager for ScalpingMode {
    fn is_active(&self) -> bool {
        self.active
    }

    fn activate(&mut self) {
        self.active = true;
    }

    fn deactivate(&mut self) {
        self.active = false;
    }

    fn reset(&mut self) {
        self.active = false;
        self.take_profit_client_id = None;
    }
}
