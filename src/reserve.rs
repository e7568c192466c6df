//! ReserveManager (C13): on spot venues a grid needs a reserve of the base
//! asset set aside so SELL levels can fill without borrowing. This sits
//! behind its own small interface so the coordinator never has to branch
//! on venue type in a hot path — a perpetual venue just gets a manager
//! that is permanently satisfied.

use rust_decimal::Decimal;

use crate::config::SpotReserveConfig;

pub trait ReserveGate: Send + Sync {
    /// Whether `amount` of base asset can be committed to a new SELL
    /// without dipping into the reserve.
    fn can_commit(&self, available_base: Decimal, amount: Decimal) -> bool;
    /// Whether the reserve itself has fallen below its configured floor.
    fn needs_replenish(&self, available_base: Decimal) -> bool;
}

/// Perpetual and other non-spot venues have no reserve requirement.
pub struct NoReserve;

impl ReserveGate for NoReserve {
    fn can_commit(&self, _available_base: Decimal, _amount: Decimal) -> bool {
        true
    }

    fn needs_replenish(&self, _available_base: Decimal) -> bool {
        false
    }
}

pub struct SpotReserve {
    reserve_amount: Decimal,
}

impl SpotReserve {
    pub fn from_config(config: &SpotReserveConfig) -> Self {
        Self { reserve_amount: config.reserve_amount }
    }
}

impl ReserveGate for SpotReserve {
    fn can_commit(&self, available_base: Decimal, amount: Decimal) -> bool {
        available_base - amount >= self.reserve_amount
    }

    fn needs_replenish(&self, available_base: Decimal) -> bool {
        available_base < self.reserve_amount
    }
}
