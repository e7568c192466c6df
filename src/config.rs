//! GridConfig (C1): immutable-after-init parameters, plus the YAML loading
//! YAML loading path, laid out the way this crate structures a plain
//! `Deserialize` struct with `Default`-backed optional fields
//! (`MmEngineConfig` in `execution.rs`), generalised to the grid's much
//! larger parameter surface.

use std::env;
use std::fs;
use std::path::Path;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::decimal::{quantize_price, quantize_qty, round_to_i64};
use crate::error::GridError;
use crate::types::GridType;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupCheck {
    pub auto_buy_on_startup: bool,
    pub continue_on_failure: bool,
}

impl Default for StartupCheck {
    fn default() -> Self {
        Self { auto_buy_on_startup: false, continue_on_failure: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotReserveConfig {
    pub enabled: bool,
    pub reserve_amount: Decimal,
    pub spot_buy_fee_rate: Decimal,
    pub startup_check: StartupCheck,
}

impl Default for SpotReserveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            reserve_amount: Decimal::ZERO,
            spot_buy_fee_rate: dec!(0.0001),
            startup_check: StartupCheck::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionToleranceConfig {
    pub tolerance_multiplier: f64,
}

impl Default for PositionToleranceConfig {
    fn default() -> Self {
        Self { tolerance_multiplier: 1.0 }
    }
}

fn default_fee_rate() -> Decimal {
    dec!(0.0001)
}
fn default_reverse_order_grid_distance() -> i64 {
    1
}
fn default_health_check_interval() -> u64 {
    300
}
fn default_health_check_snapshot_count() -> usize {
    3
}
fn default_rest_position_query_interval() -> u64 {
    60
}
fn default_leverage() -> u32 {
    10
}
fn default_follow_timeout() -> u64 {
    300
}
fn default_follow_distance() -> i64 {
    1
}
fn default_scalping_trigger_percent() -> u32 {
    80
}
fn default_scalping_take_profit_grids() -> i64 {
    2
}
fn default_allowed_deep_drops() -> u32 {
    1
}
fn default_min_drop_threshold_percent() -> u32 {
    10
}
fn default_capital_protection_trigger_percent() -> u32 {
    50
}
fn default_take_profit_percentage() -> Decimal {
    dec!(0.01)
}
fn default_stop_loss_trigger_percent() -> Decimal {
    dec!(100.0)
}
fn default_stop_loss_escape_timeout() -> u64 {
    300
}
fn default_stop_loss_apr_threshold() -> Decimal {
    dec!(50.0)
}
fn default_margin_mode() -> String {
    "isolated".to_string()
}
fn default_true() -> bool {
    true
}

/// Top-level `grid_system` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    pub exchange: String,
    pub symbol: String,
    pub grid_type: GridType,

    pub lower_price: Option<Decimal>,
    pub upper_price: Option<Decimal>,
    pub grid_interval: Decimal,
    pub order_amount: Decimal,

    pub quantity_precision: u32,
    pub price_decimals: u32,

    #[serde(default = "default_fee_rate")]
    pub fee_rate: Decimal,
    pub max_position: Option<Decimal>,

    pub martingale_increment: Option<Decimal>,

    pub follow_grid_count: Option<u32>,
    #[serde(default = "default_follow_timeout")]
    pub follow_timeout: u64,
    #[serde(default = "default_follow_distance")]
    pub follow_distance: i64,
    #[serde(default)]
    pub price_offset_grids: i64,

    #[serde(default = "default_reverse_order_grid_distance")]
    pub reverse_order_grid_distance: i64,

    #[serde(default)]
    pub scalping_enabled: bool,
    #[serde(default = "default_scalping_trigger_percent")]
    pub scalping_trigger_percent: u32,
    #[serde(default = "default_scalping_take_profit_grids")]
    pub scalping_take_profit_grids: i64,

    #[serde(default)]
    pub smart_scalping_enabled: bool,
    #[serde(default = "default_allowed_deep_drops")]
    pub allowed_deep_drops: u32,
    #[serde(default = "default_min_drop_threshold_percent")]
    pub min_drop_threshold_percent: u32,

    #[serde(default)]
    pub capital_protection_enabled: bool,
    #[serde(default = "default_capital_protection_trigger_percent")]
    pub capital_protection_trigger_percent: u32,

    #[serde(default)]
    pub take_profit_enabled: bool,
    #[serde(default = "default_take_profit_percentage")]
    pub take_profit_percentage: Decimal,

    #[serde(default)]
    pub price_lock_enabled: bool,
    pub price_lock_threshold: Option<Decimal>,
    #[serde(default)]
    pub price_lock_start_at_threshold: bool,

    #[serde(default)]
    pub stop_loss_protection_enabled: bool,
    #[serde(default = "default_stop_loss_trigger_percent")]
    pub stop_loss_trigger_percent: Decimal,
    #[serde(default = "default_stop_loss_escape_timeout")]
    pub stop_loss_escape_timeout: u64,
    #[serde(default = "default_stop_loss_apr_threshold")]
    pub stop_loss_apr_threshold: Decimal,

    #[serde(default = "default_true")]
    pub order_health_check_enabled: bool,
    #[serde(default = "default_health_check_interval")]
    pub order_health_check_interval: u64,
    #[serde(default = "default_health_check_snapshot_count")]
    pub health_check_snapshot_count: usize,

    #[serde(default = "default_rest_position_query_interval")]
    pub rest_position_query_interval: u64,

    #[serde(default = "default_margin_mode")]
    pub margin_mode: String,
    #[serde(default = "default_leverage")]
    pub leverage: u32,

    #[serde(default)]
    pub exit_cleanup_enabled: bool,

    #[serde(default)]
    pub spot_reserve: SpotReserveConfig,

    #[serde(default)]
    pub position_tolerance: PositionToleranceConfig,
}

#[derive(Debug, Clone, Deserialize)]
struct GridSystemDocument {
    grid_system: GridConfig,
}

#[derive(Debug, Clone, Default)]
pub struct VenueCredentials {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub wallet_address: Option<String>,
}

impl GridConfig {
    pub fn load_yaml(path: impl AsRef<Path>) -> Result<Self, GridError> {
        let raw = fs::read_to_string(path)
            .map_err(|e| GridError::Permanent(format!("cannot read config file: {e}")))?;
        let doc: GridSystemDocument = serde_yaml::from_str(&raw)
            .map_err(|e| GridError::Permanent(format!("cannot parse config file: {e}")))?;
        doc.grid_system.validate()?;
        Ok(doc.grid_system)
    }

    /// Venue credentials from `<VENUE>_API_KEY` / `_API_SECRET` /
    /// `_WALLET_ADDRESS` environment variables.
    pub fn venue_credentials(&self) -> VenueCredentials {
        let prefix = self.exchange.to_uppercase();
        VenueCredentials {
            api_key: env::var(format!("{prefix}_API_KEY")).ok(),
            api_secret: env::var(format!("{prefix}_API_SECRET")).ok(),
            wallet_address: env::var(format!("{prefix}_WALLET_ADDRESS")).ok(),
        }
    }

    /// Validates invariants that must hold before the coordinator starts.
    /// Crossing price bounds or a spot/short mismatch are Permanent errors
    /// log and exit, never attempt to run with bad geometry.
    pub fn validate(&self) -> Result<(), GridError> {
        if self.grid_interval <= Decimal::ZERO {
            return Err(GridError::Permanent("grid_interval must be > 0".into()));
        }
        if self.order_amount <= Decimal::ZERO {
            return Err(GridError::Permanent("order_amount must be > 0".into()));
        }
        if !self.grid_type.is_follow() {
            let (lower, upper) = (self.lower_price, self.upper_price);
            match (lower, upper) {
                (Some(l), Some(u)) if l < u => {}
                (Some(_), Some(_)) => {
                    return Err(GridError::Permanent("lower_price must be < upper_price".into()))
                }
                _ => {
                    return Err(GridError::Permanent(
                        "lower_price/upper_price are mandatory outside follow modes".into(),
                    ))
                }
            }
        } else if self.follow_grid_count.is_none() {
            return Err(GridError::Permanent(
                "follow_grid_count is mandatory for follow-mode grids".into(),
            ));
        }
        if self.health_check_snapshot_count < 2 {
            return Err(GridError::Permanent(
                "health_check_snapshot_count must be >= 2".into(),
            ));
        }
        Ok(())
    }

    /// Some venues reject order placement outright if `margin_mode` isn't
    /// set explicitly (Lighter's error code 21613), rather than falling
    /// back to an account default like most venues do. Non-fatal: this is
    /// advisory only, the exchange's own rejection is what actually stops
    /// things if the operator hasn't configured it.
    pub fn margin_mode_advisory(&self) -> Option<String> {
        if self.exchange.eq_ignore_ascii_case("lighter") {
            Some(format!(
                "exchange 'lighter' requires margin_mode to be set explicitly (currently '{}'); order placement fails with code 21613 otherwise",
                self.margin_mode
            ))
        } else {
            None
        }
    }

    /// Number of price levels. Fixed modes derive it from the range; follow
    /// modes take the user-specified count directly.
    pub fn grid_count(&self) -> u32 {
        if let Some(n) = self.follow_grid_count {
            return n;
        }
        let (lower, upper) = (self.lower_price.unwrap_or_default(), self.upper_price.unwrap_or_default());
        let span = upper - lower;
        if self.grid_interval <= Decimal::ZERO {
            return 0;
        }
        (span / self.grid_interval).floor().to_string().parse::<u32>().unwrap_or(0)
    }

    /// `price(i)`: LONG families index from the low end, SHORT families
    /// from the high end. `i` is 1-based.
    pub fn price_at_index(&self, i: u32, lower: Decimal, upper: Decimal) -> Decimal {
        let offset = Decimal::from(i.saturating_sub(1)) * self.grid_interval;
        let raw = if self.grid_type.is_long_family() {
            lower + offset
        } else {
            upper - offset
        };
        quantize_price(raw, self.price_decimals)
    }

    /// `index(p)`: the inverse of `price_at_index`, rounding (not
    /// truncating) to absorb float-to-decimal conversion noise.
    pub fn index_at_price(&self, price: Decimal, lower: Decimal, upper: Decimal) -> i64 {
        if self.grid_interval <= Decimal::ZERO {
            return 0;
        }
        let ratio = if self.grid_type.is_long_family() {
            (price - lower) / self.grid_interval
        } else {
            (upper - price) / self.grid_interval
        };
        round_to_i64(ratio) + 1
    }

    /// Per-level amount, including martingale increment when configured.
    /// `k(i) = grid_count - i` for LONG families (larger at the low end),
    /// `k(i) = i - 1` for SHORT families. Quantised after the increment is
    /// applied — quantisation is not distributive over the increment
    /// series, so callers summing several levels must sum the already
    /// quantised per-level amounts.
    pub fn amount_at_index(&self, i: u32, grid_count: u32) -> Decimal {
        let base = self.order_amount;
        let amount = match self.martingale_increment {
            Some(inc) if inc > Decimal::ZERO => {
                let k = if self.grid_type.is_long_family() {
                    Decimal::from(grid_count.saturating_sub(i))
                } else {
                    Decimal::from(i.saturating_sub(1))
                };
                base + k * inc
            }
            _ => base,
        };
        quantize_qty(amount, self.quantity_precision)
    }

    /// Shared by capital protection and scalping: the grid index at which a
    /// percentage-of-range trigger arms, counting down from the top of the
    /// ladder. Never below 1.
    fn trigger_grid_from_percent(grid_count: u32, trigger_percent: u32) -> u32 {
        let dropped = (Decimal::from(grid_count) * Decimal::from(trigger_percent) / Decimal::from(100)).floor().to_u32().unwrap_or(0);
        grid_count.saturating_sub(dropped).max(1)
    }

    /// Capital protection arms once price has fallen to or below this grid
    /// index (i.e. `trigger_percent` of the ladder has been consumed).
    pub fn capital_protection_trigger_grid(&self, grid_count: u32) -> u32 {
        Self::trigger_grid_from_percent(grid_count, self.capital_protection_trigger_percent)
    }

    /// Scalping/smart-scalping's own percentage-of-range trigger grid.
    pub fn scalping_trigger_grid(&self, grid_count: u32) -> u32 {
        Self::trigger_grid_from_percent(grid_count, self.scalping_trigger_percent)
    }

    /// Follow-mode range recompute: LONG extends the upper bound
    /// above the current price, SHORT extends the lower bound below it.
    /// Both re-quantise so the span stays exact in quantised arithmetic.
    pub fn update_price_range_for_follow_mode(&self, current_price: Decimal) -> (Decimal, Decimal) {
        let grid_count = Decimal::from(self.grid_count());
        let offset = Decimal::from(self.price_offset_grids);
        if self.grid_type.is_long_family() {
            let upper = quantize_price(current_price + offset * self.grid_interval, self.price_decimals);
            let lower = quantize_price(upper - grid_count * self.grid_interval, self.price_decimals);
            (lower, upper)
        } else {
            let lower = quantize_price(current_price - offset * self.grid_interval, self.price_decimals);
            let upper = quantize_price(lower + grid_count * self.grid_interval, self.price_decimals);
            (lower, upper)
        }
    }
}
