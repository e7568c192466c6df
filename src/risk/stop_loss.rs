//! Stop loss: activates outright once drawdown crosses
//! `trigger_percent`, and separately once the realised APR has sat below
//! `apr_threshold` for longer than `escape_timeout` — a grid that's merely
//! grinding at an uneconomic rate gets an escape window before it's
//! forced to close, rather than an instant halt.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::ModeManager;

pub struct StopLossMode {
    enabled: bool,
    trigger_percent: Decimal,
    escape_timeout_secs: i64,
    apr_threshold: Decimal,
    active: bool,
    low_apr_since: Option<DateTime<Utc>>,
}

impl StopLossMode {
    pub fn new(enabled: bool, trigger_percent: Decimal, escape_timeout_secs: i64, apr_threshold: Decimal) -> Self {
        Self {
            enabled,
            trigger_percent,
            escape_timeout_secs,
            apr_threshold,
            active: false,
            low_apr_since: None,
        }
    }

    pub fn triggers_on_drawdown(&self, initial_capital: Decimal, current_equity: Decimal) -> bool {
        if !self.enabled || initial_capital <= Decimal::ZERO {
            return false;
        }
        let loss = initial_capital - current_equity;
        if loss <= Decimal::ZERO {
            return false;
        }
        loss / initial_capital * Decimal::from(100) >= self.trigger_percent
    }

    /// Call once per evaluation tick with the current realised APR. Returns
    /// true only after the APR has stayed below threshold continuously for
    /// the full escape window.
    pub fn tick_apr(&mut self, current_apr: Decimal, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        if current_apr >= self.apr_threshold {
            self.low_apr_since = None;
            return false;
        }
        let since = *self.low_apr_since.get_or_insert(now);
        (now - since).num_seconds() >= self.escape_timeout_secs
    }
}

impl ModeManager for StopLossMode {
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
        self.low_apr_since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    #[test]
    fn drawdown_trigger_fires_once_loss_crosses_the_threshold() {
        let mode = StopLossMode::new(true, dec!(100.0), 300, dec!(50.0));
        assert!(!mode.triggers_on_drawdown(dec!(1000), dec!(500)));
        assert!(mode.triggers_on_drawdown(dec!(1000), dec!(0)));
    }

    #[test]
    fn low_apr_only_triggers_after_the_full_escape_window_elapses() {
        let mut mode = StopLossMode::new(true, dec!(100.0), 300, dec!(50.0));
        let t0 = Utc::now();
        assert!(!mode.tick_apr(dec!(10.0), t0));
        assert!(!mode.tick_apr(dec!(10.0), t0 + Duration::seconds(100)));
        assert!(mode.tick_apr(dec!(10.0), t0 + Duration::seconds(301)));
    }

    #[test]
    fn apr_recovering_above_threshold_resets_the_clock() {
        let mut mode = StopLossMode::new(true, dec!(100.0), 300, dec!(50.0));
        let t0 = Utc::now();
        mode.tick_apr(dec!(10.0), t0);
        assert!(!mode.tick_apr(dec!(60.0), t0 + Duration::seconds(100)));
        assert!(!mode.tick_apr(dec!(10.0), t0 + Duration::seconds(200)));
    }
}
