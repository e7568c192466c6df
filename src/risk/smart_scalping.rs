//! Smart scalping: a four-state tracker (`Idle` -> `Tracking` ->
//! `WaitingRebound` -> `Activated`) that tolerates a bounded number of deep
//! drops once price has fallen into the bottom percentage of the grid
//! before handing control to plain scalping. A "deep drop" is a
//! single-step decline of at least `min_drop_threshold_percent`; tracking
//! follows the lowest grid index seen (the "extreme"), a rebound above it
//! parks the tracker waiting to see whether the drop resumes or the grid
//! recovers outright, and the allowance counts down once per confirmed
//! deep drop until it activates at the grid index where the last allowance
//! was spent.

use super::ModeManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SmartScalpingState {
    Idle,
    Tracking,
    WaitingRebound,
    Activated,
}

pub struct SmartScalpingMode {
    enabled: bool,
    initial_trigger_grid: i64,
    min_drop_threshold_percent: u32,
    allowed_deep_drops: u32,
    state: SmartScalpingState,
    extreme_grid: i64,
    remaining_allowance: u32,
    activation_grid: Option<i64>,
}

impl SmartScalpingMode {
    pub fn new(enabled: bool, allowed_deep_drops: u32, min_drop_threshold_percent: u32, initial_trigger_grid: i64) -> Self {
        Self {
            enabled,
            initial_trigger_grid,
            min_drop_threshold_percent,
            allowed_deep_drops,
            state: SmartScalpingState::Idle,
            extreme_grid: 0,
            remaining_allowance: 0,
            activation_grid: None,
        }
    }

    /// Advances the tracker by one price observation. `current_grid_index`
    /// is the grid index the latest price maps to; `step_drop_percent` is
    /// the magnitude of decline since the previous observation (0 if price
    /// rose or held). Returns `true` the instant the tracker transitions
    /// into `Activated`, the edge the coordinator hands off to scalping on.
    pub fn update(&mut self, current_grid_index: i64, step_drop_percent: u32) -> bool {
        if !self.enabled {
            return false;
        }
        let is_deep = step_drop_percent >= self.min_drop_threshold_percent;
        match self.state {
            SmartScalpingState::Idle => {
                if current_grid_index <= self.initial_trigger_grid && is_deep {
                    self.enter_tracking(current_grid_index);
                }
                false
            }
            SmartScalpingState::Tracking => {
                if current_grid_index < self.extreme_grid {
                    self.update_extreme_grid(current_grid_index, is_deep)
                } else if current_grid_index > self.extreme_grid {
                    self.state = SmartScalpingState::WaitingRebound;
                    false
                } else {
                    false
                }
            }
            SmartScalpingState::WaitingRebound => {
                if current_grid_index <= self.extreme_grid {
                    self.confirm_drop_and_reset(current_grid_index)
                } else if current_grid_index >= self.initial_trigger_grid {
                    self.to_idle();
                    false
                } else {
                    false
                }
            }
            SmartScalpingState::Activated => false,
        }
    }

    fn enter_tracking(&mut self, grid: i64) {
        self.state = SmartScalpingState::Tracking;
        self.extreme_grid = grid;
        self.remaining_allowance = self.allowed_deep_drops;
    }

    fn update_extreme_grid(&mut self, grid: i64, is_deep: bool) -> bool {
        self.extreme_grid = grid;
        if is_deep {
            self.remaining_allowance = self.remaining_allowance.saturating_sub(1);
            if self.remaining_allowance == 0 {
                return self.prepare_for_activation(grid);
            }
        }
        false
    }

    fn confirm_drop_and_reset(&mut self, grid: i64) -> bool {
        self.extreme_grid = grid.min(self.extreme_grid);
        self.remaining_allowance = self.remaining_allowance.saturating_sub(1);
        if self.remaining_allowance == 0 {
            self.prepare_for_activation(grid)
        } else {
            self.state = SmartScalpingState::Tracking;
            false
        }
    }

    fn prepare_for_activation(&mut self, grid: i64) -> bool {
        self.state = SmartScalpingState::Activated;
        self.activation_grid = Some(grid);
        true
    }

    fn to_idle(&mut self) {
        self.state = SmartScalpingState::Idle;
        self.remaining_allowance = 0;
        self.extreme_grid = 0;
    }

    /// The grid index at which the tracker last activated, if any.
    pub fn activation_grid(&self) -> Option<i64> {
        self.activation_grid
    }
}

impl ModeManager for SmartScalpingMode {
    fn is_active(&self) -> bool {
        self.state == SmartScalpingState::Activated
    }

    fn activate(&mut self) {
        self.state = SmartScalpingState::Activated;
    }

    fn deactivate(&mut self) {
        self.to_idle();
        self.activation_grid = None;
    }

    fn reset(&mut self) {
        self.to_idle();
        self.activation_grid = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_shallow_drop_inside_the_trigger_grid_never_enters_tracking() {
        let mut mode = SmartScalpingMode::new(true, 1, 10, 5);
        assert!(!mode.update(4, 3));
        assert!(!mode.is_active());
    }

    #[test]
    fn consecutive_deep_drops_exhaust_the_allowance_and_activate() {
        let mut mode = SmartScalpingMode::new(true, 1, 10, 5);
        assert!(!mode.update(5, 12)); // enters tracking at grid 5, allowance 1
        assert!(mode.update(4, 15)); // extreme moves to 4, allowance exhausted -> activates
        assert!(mode.is_active());
        assert_eq!(mode.activation_grid(), Some(4));
    }

    #[test]
    fn a_rebound_without_a_confirmed_second_drop_returns_to_idle() {
        let mut mode = SmartScalpingMode::new(true, 1, 10, 5);
        assert!(!mode.update(5, 12)); // tracking, extreme 5
        assert!(!mode.update(6, 0)); // rebounds above extreme -> waiting
        assert!(!mode.update(7, 0)); // recovers back past the trigger grid -> idle
        assert!(!mode.is_active());
    }

    #[test]
    fn a_rebound_that_resumes_dropping_confirms_and_keeps_tracking_until_the_allowance_runs_out() {
        let mut mode = SmartScalpingMode::new(true, 2, 10, 5);
        assert!(!mode.update(5, 12)); // tracking, extreme 5, allowance 2
        assert!(!mode.update(6, 0)); // waiting rebound
        assert!(!mode.update(5, 0)); // drop resumes, confirmed: allowance 1, back to tracking
        assert!(mode.update(4, 11)); // deep drop again: allowance exhausted -> activates
        assert!(mode.is_active());
    }

    #[test]
    fn a_disabled_mode_never_tracks() {
        let mut mode = SmartScalpingMode::new(false, 1, 10, 5);
        assert!(!mode.update(1, 50));
        assert!(!mode.is_active());
    }

    #[test]
    fn reset_clears_activation_and_returns_to_idle() {
        let mut mode = SmartScalpingMode::new(true, 1, 10, 5);
        mode.update(5, 12);
        mode.update(4, 15);
        assert!(mode.is_active());
        mode.reset();
        assert!(!mode.is_active());
        assert_eq!(mode.activation_grid(), None);
    }
}
