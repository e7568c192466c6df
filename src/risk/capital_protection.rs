//! Capital protection: arms once the grid has fallen to (or past) a
//! configured grid index — the point at which `trigger_percent` of the
//! ladder has been consumed on the downside — and stays armed, pausing new
//! order placement, until equity recovers back to (within a cent of)
//! initial capital. It's a brake on adding risk while price is deep in the
//! grid, not a liquidation.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::ModeManager;

/// Equity within this of initial capital counts as "recovered" — avoids
/// flapping on sub-cent noise from fee accrual.
const RECOVERY_EPSILON: Decimal = dec!(-0.01);

pub struct CapitalProtectionMode {
    enabled: bool,
    trigger_grid_index: i64,
    armed: bool,
}

impl CapitalProtectionMode {
    pub fn new(enabled: bool, trigger_grid_index: i64) -> Self {
        Self { enabled, trigger_grid_index, armed: false }
    }

    /// Arms the instant the current grid index reaches or passes the
    /// trigger index (grid indices climb as price falls in a LONG family).
    pub fn should_arm(&self, current_grid_index: i64) -> bool {
        self.enabled && !self.armed && current_grid_index <= self.trigger_grid_index
    }

    pub fn arm(&mut self) {
        self.armed = true;
    }

    /// Recovered once equity has climbed back to (within a cent of)
    /// initial capital.
    pub fn has_recovered(&self, initial_capital: Decimal, current_equity: Decimal) -> bool {
        self.armed && current_equity - initial_capital >= RECOVERY_EPSILON
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl ModeManager for CapitalProtectionMode {
    fn is_active(&self) -> bool {
        self.armed
    }

    fn activate(&mut self) {
        self.armed = true;
    }

    fn deactivate(&mut self) {
        self.armed = false;
    }

    fn reset(&mut self) {
        self.armed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arms_once_the_current_grid_index_reaches_the_trigger() {
        let mode = CapitalProtectionMode::new(true, 5);
        assert!(!mode.should_arm(6));
        assert!(mode.should_arm(5));
        assert!(mode.should_arm(3));
    }

    #[test]
    fn a_disabled_mode_never_arms() {
        let mode = CapitalProtectionMode::new(false, 5);
        assert!(!mode.should_arm(1));
    }

    #[test]
    fn recovery_requires_equity_back_near_initial_capital() {
        let mut mode = CapitalProtectionMode::new(true, 5);
        mode.arm();
        assert!(!mode.has_recovered(dec!(1000), dec!(950)));
        assert!(mode.has_recovered(dec!(1000), dec!(999.995)));
        assert!(mode.has_recovered(dec!(1000), dec!(1000)));
    }

    #[test]
    fn an_unarmed_mode_is_never_considered_recovered() {
        let mode = CapitalProtectionMode::new(true, 5);
        assert!(!mode.has_recovered(dec!(1000), dec!(1000)));
    }
}
