//! GridStatistics: the dashboard snapshot published on a fixed cadence.
//! The dashboard itself is an external consumer; this module only builds
//! the snapshot and ships it over Redis pub/sub, reusing this crate's
//! connect-then-publish adapter generalised from a string-message bus to
//! one typed JSON snapshot per tick.

use std::error::Error;

use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::position::PositionTracker;
use crate::state::GridState;

const CHANNEL_GRID_STATS: &str = "grid:stats";

#[derive(Debug, Clone, Serialize)]
pub struct GridStatistics {
    pub symbol: String,
    pub current_price: Decimal,
    pub grid_count: u32,
    pub pending_buy_count: usize,
    pub pending_sell_count: usize,
    pub current_position: Decimal,
    pub realised_pnl: Decimal,
    pub total_fees: Decimal,
    pub completed_cycles: u64,
    pub apr_lifetime: Decimal,
    pub apr_realtime_10m: Decimal,
    pub active_modes: Vec<&'static str>,
    pub generated_at: DateTime<Utc>,
}

impl GridStatistics {
    pub fn capture(symbol: &str, state: &GridState, tracker: &PositionTracker, initial_capital: Decimal, active_modes: Vec<&'static str>) -> Self {
        let apr_lifetime = apr_over_window(tracker.realised_pnl, initial_capital, tracker.trade_history().next().map(|t| t.at).unwrap_or_else(Utc::now), Utc::now());
        let ten_minutes_ago = Utc::now() - chrono::Duration::minutes(10);
        let recent_pnl: Decimal = tracker
            .trade_history()
            .filter(|t| t.at >= ten_minutes_ago)
            .fold(Decimal::ZERO, |acc, t| acc - t.fee);
        let apr_realtime_10m = apr_over_window(recent_pnl, initial_capital, ten_minutes_ago, Utc::now());

        Self {
            symbol: symbol.to_string(),
            current_price: state.current_price,
            grid_count: state.grid_count(),
            pending_buy_count: state.pending_buy_count(),
            pending_sell_count: state.pending_sell_count(),
            current_position: tracker.current_position,
            realised_pnl: tracker.realised_pnl,
            total_fees: tracker.total_fees,
            completed_cycles: tracker.completed_cycles,
            apr_lifetime,
            apr_realtime_10m,
            active_modes,
            generated_at: Utc::now(),
        }
    }
}

/// Annualises PnL over `initial_capital` across the elapsed window between
/// `since` and `now`; zero capital or a zero-length window reports 0% APR
/// rather than dividing by zero.
fn apr_over_window(pnl: Decimal, initial_capital: Decimal, since: DateTime<Utc>, now: DateTime<Utc>) -> Decimal {
    if initial_capital <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let elapsed_secs = (now - since).num_seconds();
    if elapsed_secs <= 0 {
        return Decimal::ZERO;
    }
    let seconds_per_year = Decimal::from(365 * 24 * 3600);
    let elapsed = Decimal::from(elapsed_secs);
    (pnl / initial_capital) * (seconds_per_year / elapsed) * Decimal::from(100)
}

pub struct StatsPublisher {
    client: redis::Client,
    con: Option<redis::aio::Connection>,
}

impl StatsPublisher {
    pub fn new(redis_url: &str) -> Result<Self, Box<dyn Error>> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client, con: None })
    }

    pub async fn connect(&mut self) -> Result<(), Box<dyn Error>> {
        self.con = Some(self.client.get_async_connection().await?);
        Ok(())
    }

    pub async fn publish(&mut self, stats: &GridStatistics) -> Result<(), Box<dyn Error>> {
        if self.con.is_none() {
            self.connect().await?;
        }
        if let Some(con) = &mut self.con {
            let payload = serde_json::to_string(stats)?;
            let _: () = con.publish(CHANNEL_GRID_STATS, payload).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn apr_is_zero_for_a_zero_capital_account() {
        assert_eq!(apr_over_window(dec!(10), Decimal::ZERO, Utc::now() - chrono::Duration::days(1), Utc::now()), Decimal::ZERO);
    }

    #[test]
    fn apr_annualises_a_one_day_gain() {
        let since = Utc::now() - chrono::Duration::days(1);
        let apr = apr_over_window(dec!(10), dec!(1000), since, Utc::now());
        assert!(apr > dec!(300) && apr < dec!(400));
    }
}
