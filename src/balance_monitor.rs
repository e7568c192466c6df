//! BalanceMonitor (C7): periodically refreshes free/used/total balances,
//! falling back to the last streamed value when a REST call fails so a
//! transient network blip never reports a zero balance. Grounded on the
//! starting-balance bookkeeping this crate's execution layer already
//! performs, generalised into its own polling component.

use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::exchange::ExchangeAdapter;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Rest,
    StreamCache,
}

#[derive(Debug, Clone)]
pub struct BalanceSnapshot {
    pub free: Decimal,
    pub used: Decimal,
    pub total: Decimal,
    pub source: DataSource,
}

pub struct BalanceMonitor {
    exchange: Arc<dyn ExchangeAdapter>,
    currency: String,
    interval: Duration,
    initial_capital: Mutex<Option<Decimal>>,
    last_known: Mutex<Option<BalanceSnapshot>>,
}

impl BalanceMonitor {
    pub fn new(exchange: Arc<dyn ExchangeAdapter>, currency: String, interval: Duration) -> Self {
        Self {
            exchange,
            currency,
            interval,
            initial_capital: Mutex::new(None),
            last_known: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn refresh(&self) -> BalanceSnapshot {
        match self.exchange.get_balances().await {
            Ok(balances) => {
                if let Some(b) = balances.into_iter().find(|b| b.currency == self.currency) {
                    let snapshot = BalanceSnapshot { free: b.free, used: b.used, total: b.total, source: DataSource::Rest };
                    self.record_initial_capital(snapshot.total).await;
                    *self.last_known.lock().await = Some(snapshot.clone());
                    return snapshot;
                }
                self.fallback().await
            }
            Err(_) => self.fallback().await,
        }
    }

    async fn fallback(&self) -> BalanceSnapshot {
        let cached = self.last_known.lock().await.clone();
        match cached {
            Some(mut snapshot) => {
                snapshot.source = DataSource::StreamCache;
                snapshot
            }
            None => BalanceSnapshot { free: Decimal::ZERO, used: Decimal::ZERO, total: Decimal::ZERO, source: DataSource::StreamCache },
        }
    }

    async fn record_initial_capital(&self, total: Decimal) {
        let mut initial = self.initial_capital.lock().await;
        if initial.is_none() {
            *initial = Some(total);
        }
    }

    pub async fn initial_capital(&self) -> Option<Decimal> {
        *self.initial_capital.lock().await
    }
}
