//! GridState (C2): in-memory snapshot of levels and active orders. Only the
//! coordinator mutates this; monitors read it.

use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::types::{GridLevel, GridOrder, Side};

#[derive(Debug, Clone)]
pub struct GridState {
    pub grid_levels: Vec<GridLevel>,
    pub active_orders: HashMap<String, GridOrder>,
    pub current_price: Decimal,
    pub current_grid_id: u32,
    pub initial_price: Decimal,
    pub cycle_count: u64,
    pub lower_price: Decimal,
    pub upper_price: Decimal,
}

impl GridState {
    pub fn new(lower_price: Decimal, upper_price: Decimal, grid_count: u32, prices: impl Fn(u32) -> Decimal) -> Self {
        let grid_levels = (1..=grid_count).map(|i| GridLevel::new(i, prices(i))).collect();
        Self {
            grid_levels,
            active_orders: HashMap::new(),
            current_price: Decimal::ZERO,
            current_grid_id: 0,
            initial_price: Decimal::ZERO,
            cycle_count: 0,
            lower_price,
            upper_price,
        }
    }

    pub fn rebuild_levels(&mut self, grid_count: u32, prices: impl Fn(u32) -> Decimal) {
        self.grid_levels = (1..=grid_count).map(|i| GridLevel::new(i, prices(i))).collect();
    }

    /// Pending-buy count: must equal the side-partitioned size of
    /// `active_orders`.
    pub fn pending_buy_count(&self) -> usize {
        self.active_orders.values().filter(|o| o.side == Side::Buy).count()
    }

    pub fn pending_sell_count(&self) -> usize {
        self.active_orders.values().filter(|o| o.side == Side::Sell).count()
    }

    pub fn insert_order(&mut self, order: GridOrder) {
        self.active_orders.insert(order.client_id.clone(), order);
    }

    pub fn remove_order(&mut self, client_id: &str) -> Option<GridOrder> {
        self.active_orders.remove(client_id)
    }

    pub fn clear_orders(&mut self) {
        self.active_orders.clear();
    }

    pub fn grid_count(&self) -> u32 {
        self.grid_levels.len() as u32
    }
}
