//! Take profit: once realised plus unrealised PnL reaches
//! `take_profit_percentage` of initial capital, the grid closes out and
//! stops, banking the gain rather than giving it back to a reversal.

use rust_decimal::Decimal;

use super::ModeManager;

pub struct TakeProfitMode {
    enabled: bool,
    take_profit_percentage: Decimal,
    active: bool,
}

impl TakeProfitMode {
    pub fn new(enabled: bool, take_profit_percentage: Decimal) -> Self {
        Self { enabled, take_profit_percentage, active: false }
    }

    pub fn triggers(&self, initial_capital: Decimal, total_pnl: Decimal) -> bool {
        if !self.enabled || initial_capital <= Decimal::ZERO {
            return false;
        }
        let pnl_fraction = total_pnl / initial_capital;
        pnl_fraction >= self.take_profit_percentage
    }
}

impl ModeManager for TakeProfitMode {
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
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn triggers_once_pnl_reaches_the_configured_fraction_of_capital() {
        let mode = TakeProfitMode::new(true, dec!(0.01));
        assert!(!mode.triggers(dec!(1000), dec!(5)));
        assert!(mode.triggers(dec!(1000), dec!(10)));
    }
}
