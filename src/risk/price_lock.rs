//! Price lock: once price crosses `threshold`, the grid's range is
//! pinned at that crossing rather than continuing to follow price, so a
//! runaway move doesn't drag the range along with it. If
//! `start_at_threshold` is set the lock can also be the grid's initial
//! anchor rather than something it grows into later.

use rust_decimal::Decimal;

use super::ModeManager;

pub struct PriceLockMode {
    enabled: bool,
    threshold: Option<Decimal>,
    start_at_threshold: bool,
    active: bool,
    locked_price: Option<Decimal>,
}

impl PriceLockMode {
    pub fn new(enabled: bool, threshold: Option<Decimal>, start_at_threshold: bool) -> Self {
        Self { enabled, threshold, start_at_threshold, active: false, locked_price: None }
    }

    pub fn start_at_threshold(&self) -> bool {
        self.start_at_threshold
    }

    pub fn locked_price(&self) -> Option<Decimal> {
        self.locked_price
    }

    /// Returns true the moment price first crosses the threshold, in
    /// either direction, and records the lock price.
    pub fn triggers(&mut self, current_price: Decimal, previous_price: Decimal) -> bool {
        if !self.enabled || self.locked_price.is_some() {
            return false;
        }
        let Some(threshold) = self.threshold else { return false };
        let crossed = (previous_price < threshold && current_price >= threshold) || (previous_price > threshold && current_price <= threshold);
        if crossed {
            self.locked_price = Some(current_price);
        }
        crossed
    }
}

impl ModeManager for PriceLockMode {
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
        self.locked_price = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn locks_the_instant_price_crosses_the_threshold_upward() {
        let mut mode = PriceLockMode::new(true, Some(dec!(150)), false);
        assert!(!mode.triggers(dec!(140), dec!(130)));
        assert!(mode.triggers(dec!(151), dec!(149)));
        assert_eq!(mode.locked_price(), Some(dec!(151)));
    }

    #[test]
    fn a_second_crossing_does_not_relock_once_already_locked() {
        let mut mode = PriceLockMode::new(true, Some(dec!(150)), false);
        mode.triggers(dec!(151), dec!(149));
        assert!(!mode.triggers(dec!(149), dec!(151)));
        assert_eq!(mode.locked_price(), Some(dec!(151)));
    }
}
