//! PositionMonitor (C6): the sole writer of authoritative position size.
//! Polls REST on a cadence, debounces bursts of fills into one query, and
//! flags implausible jumps as anomalies rather than trusting them blindly.
//! Uses the same rolling-history-to-verdict shape as the order health
//! checker, generalised from PnL feedback to position-drift detection,
//! and the internal-vs-live diff pattern the execution engine uses for
//! reconciliation.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::exchange::ExchangeAdapter;
use crate::position::PositionTracker;

/// A position jump counts as an anomaly only after this much time has
/// passed since startup, so the very first query never trips it.
const GRACE_PERIOD_SECS: i64 = 60;
/// A jump larger than this multiple of the prior size, or with no prior
/// size to compare against a swing this large, is an anomaly.
const GROWTH_MULTIPLE: Decimal = Decimal::from_parts(10, 0, 0, false, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionAnomaly {
    None,
    ImplausibleGrowth,
}

pub struct PositionMonitor {
    exchange: Arc<dyn ExchangeAdapter>,
    symbol: String,
    interval: Duration,
    started_at: DateTime<Utc>,
    /// Scaled by 10^8 to avoid storing a non-atomic Decimal under a lock-free counter.
    last_known_scaled: AtomicI64,
    consecutive_failures: Mutex<u32>,
    network_fault: Mutex<bool>,
}

const SCALE: i64 = 100_000_000;

fn to_scaled(d: Decimal) -> i64 {
    (d * Decimal::from(SCALE)).try_into().unwrap_or(i64::MAX)
}

fn from_scaled(v: i64) -> Decimal {
    Decimal::from(v) / Decimal::from(SCALE)
}

impl PositionMonitor {
    pub fn new(exchange: Arc<dyn ExchangeAdapter>, symbol: String, interval: Duration) -> Self {
        Self {
            exchange,
            symbol,
            interval,
            started_at: Utc::now(),
            last_known_scaled: AtomicI64::new(0),
            consecutive_failures: Mutex::new(0),
            network_fault: Mutex::new(false),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Fetches the live position, classifies it against the last known
    /// value, and — if plausible — writes it into `tracker`. Returns the
    /// verdict so the coordinator can decide whether to pause.
    pub async fn poll(&self, tracker: &Mutex<PositionTracker>) -> PositionAnomaly {
        let live = match self.exchange.get_positions(Some(&self.symbol)).await {
            Ok(positions) => positions.into_iter().find(|p| p.symbol == self.symbol),
            Err(_) => {
                let mut failures = self.consecutive_failures.lock().await;
                *failures += 1;
                if *failures >= 3 {
                    *self.network_fault.lock().await = true;
                }
                return PositionAnomaly::None;
            }
        };
        *self.consecutive_failures.lock().await = 0;
        *self.network_fault.lock().await = false;

        let live_size = match live {
            Some(p) => match p.side {
                crate::exchange::PositionSide::Long => p.size,
                crate::exchange::PositionSide::Short => -p.size,
            },
            None => Decimal::ZERO,
        };

        let last_known = from_scaled(self.last_known_scaled.load(Ordering::SeqCst));
        let elapsed = Utc::now().signed_duration_since(self.started_at).num_seconds();
        let anomaly = if elapsed < GRACE_PERIOD_SECS {
            PositionAnomaly::None
        } else if last_known == Decimal::ZERO {
            PositionAnomaly::None
        } else {
            let relative_change = (live_size - last_known).abs() / last_known.abs();
            let size_multiple = (live_size.abs() / last_known.abs()).max(last_known.abs() / live_size.abs().max(Decimal::new(1, 8)));
            if relative_change >= Decimal::ONE || size_multiple >= GROWTH_MULTIPLE {
                PositionAnomaly::ImplausibleGrowth
            } else {
                PositionAnomaly::None
            }
        };

        if anomaly == PositionAnomaly::None {
            self.last_known_scaled.store(to_scaled(live_size), Ordering::SeqCst);
            let mut t = tracker.lock().await;
            let average_cost = t.average_cost;
            t.sync_initial_position(live_size, average_cost);
        }
        anomaly
    }

    pub async fn is_network_fault(&self) -> bool {
        *self.network_fault.lock().await
    }
}
