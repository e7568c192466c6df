//! Strategy (C4): pure computation, no I/O — a pure function from market
//! state and config to a set of orders, generalised from a 3-tier quote
//! ladder to the grid's full level set and reverse-order algebra.

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::config::GridConfig;
use crate::types::{GridOrder, Side};

/// Builds the initial resting order set: one BUY per level for LONG
/// families, one SELL per level for SHORT families.
pub fn initialise(config: &GridConfig, lower: Decimal, upper: Decimal) -> Vec<GridOrder> {
    let grid_count = config.grid_count();
    let now = Utc::now();
    (1..=grid_count)
        .map(|i| {
            let price = config.price_at_index(i, lower, upper);
            let amount = config.amount_at_index(i, grid_count);
            GridOrder::new(Uuid::new_v4().to_string(), i, config.grid_type.initial_side(), price, amount, now)
        })
        .collect()
}

/// Reverse-order parameters for a single fill. Uses the order's *submitted*
/// price, never the executed price, so inter-level spacing stays exact even
/// when a market order slips during a reset.
pub fn reverse_of(config: &GridConfig, filled: &GridOrder) -> (Side, Decimal, u32) {
    let distance = Decimal::from(config.reverse_order_grid_distance);
    let offset = distance * config.grid_interval;
    let (side, price) = match filled.side {
        Side::Buy => (Side::Sell, filled.price + offset),
        Side::Sell => (Side::Buy, filled.price - offset),
    };
    (side, crate::decimal::quantize_price(price, config.price_decimals), filled.grid_id)
}

pub struct ReverseOrderSpec {
    pub side: Side,
    pub price: Decimal,
    pub grid_id: u32,
    pub amount: Decimal,
}

/// Batch form used when replaying fills deferred during a reset: amount
/// falls back to the order's configured amount if it was never actually
/// filled with a different size.
pub fn reverse_of_batch(config: &GridConfig, filled_orders: &[GridOrder]) -> Vec<ReverseOrderSpec> {
    filled_orders
        .iter()
        .map(|filled| {
            let (side, price, grid_id) = reverse_of(config, filled);
            let amount = filled.filled_amount.unwrap_or(filled.amount);
            ReverseOrderSpec { side, price, grid_id, amount }
        })
        .collect()
}
