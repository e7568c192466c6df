//! ExecutionEngine (C5): owns every order the grid has resting, keyed both
//! by venue id and by client id, and turns stream/REST events into the
//! normalised `OrderEvent` the coordinator consumes. Follows the
//! cancel-all / reconcile-after-reconnect shape this crate already uses
//! for execution, generalised from a single shadow-mode quoting engine to
//! a venue-agnostic grid order book with dual-mode (stream or REST-poll)
//! monitoring.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::exchange::{AdapterError, ExchangeAdapter, OrderParams, OrderType, WireStatus};
use crate::types::{GridOrder, MonitoringMode, OrderEvent, OrderStatus, OrderUpdate, OrderWireStatus, Side};

/// Consecutive failures (or successes) required before the monitor flips
/// its network-fault flag, in either direction.
const FAULT_STREAK: u32 = 3;

pub struct ExecutionEngine {
    exchange: Arc<dyn ExchangeAdapter>,
    symbol: String,
    /// Resting orders keyed by client id, the identifier the grid assigns
    /// at submission time and the one it uses to look itself back up.
    by_client_id: Mutex<HashMap<String, GridOrder>>,
    /// Secondary index: venue-assigned id -> client id, populated once the
    /// exchange acknowledges an order.
    by_venue_id: Mutex<HashMap<String, String>>,
    /// Cancels the coordinator issued that haven't been confirmed yet;
    /// an unsolicited-cancel event for one of these is expected, not an
    /// anomaly.
    expected_cancellations: Mutex<HashSet<String>>,
    monitoring_mode: Mutex<MonitoringMode>,
    consecutive_failures: Mutex<u32>,
    consecutive_successes: Mutex<u32>,
    network_fault: Mutex<bool>,
    submission_lock: Mutex<()>,
}

impl ExecutionEngine {
    pub fn new(exchange: Arc<dyn ExchangeAdapter>, symbol: String) -> Self {
        Self {
            exchange,
            symbol,
            by_client_id: Mutex::new(HashMap::new()),
            by_venue_id: Mutex::new(HashMap::new()),
            expected_cancellations: Mutex::new(HashSet::new()),
            monitoring_mode: Mutex::new(MonitoringMode::Stream),
            consecutive_failures: Mutex::new(0),
            consecutive_successes: Mutex::new(0),
            network_fault: Mutex::new(false),
            submission_lock: Mutex::new(()),
        }
    }

    /// Submits one grid order. Venues that require monotonic nonces get a
    /// venue-wide lock held across the whole request.
    pub async fn place(&self, mut order: GridOrder) -> Result<GridOrder, AdapterError> {
        let _serial_guard = if self.exchange.requires_serialised_submission() {
            Some(self.submission_lock.lock().await)
        } else {
            None
        };

        let price = if matches!(order.side, Side::Buy | Side::Sell) { Some(order.price) } else { None };
        let result = self
            .exchange
            .create_order(
                &self.symbol,
                order.side,
                OrderType::Limit,
                order.amount,
                price,
                OrderParams { client_id: Some(order.client_id.clone()), ..Default::default() },
            )
            .await?;

        order.order_id = Some(result.id.clone());
        self.by_venue_id.lock().await.insert(result.id, order.client_id.clone());
        self.by_client_id.lock().await.insert(order.client_id.clone(), order.clone());
        Ok(order)
    }

    pub async fn place_batch(&self, orders: Vec<GridOrder>) -> Vec<Result<GridOrder, AdapterError>> {
        let mut results = Vec::with_capacity(orders.len());
        for order in orders {
            results.push(self.place(order).await);
        }
        results
    }

    /// Cancels one order, first recording it as expected so the stream
    /// handler doesn't misread the resulting cancel as unsolicited.
    pub async fn cancel(&self, client_id: &str) -> Result<(), AdapterError> {
        let venue_id = {
            let cache = self.by_client_id.lock().await;
            cache.get(client_id).and_then(|o| o.order_id.clone())
        };
        let Some(venue_id) = venue_id else { return Ok(()) };
        self.expected_cancellations.lock().await.insert(venue_id.clone());
        self.exchange.cancel_order(&venue_id, &self.symbol).await?;
        self.by_client_id.lock().await.remove(client_id);
        self.by_venue_id.lock().await.remove(&venue_id);
        Ok(())
    }

    /// Cancels everything currently resting. Used at the start of a reset
    /// and on shutdown.
    pub async fn cancel_all(&self) -> Result<u32, AdapterError> {
        let venue_ids: Vec<String> = self.by_venue_id.lock().await.keys().cloned().collect();
        {
            let mut expected = self.expected_cancellations.lock().await;
            expected.extend(venue_ids.iter().cloned());
        }
        let cancelled = self.exchange.cancel_all_orders(&self.symbol).await?;
        self.by_client_id.lock().await.clear();
        self.by_venue_id.lock().await.clear();
        Ok(cancelled.len() as u32)
    }

    pub async fn resting_orders(&self) -> Vec<GridOrder> {
        self.by_client_id.lock().await.values().cloned().collect()
    }

    pub async fn resting_count(&self) -> usize {
        self.by_client_id.lock().await.len()
    }

    /// Normalises a raw stream update into an `OrderEvent`, resolving by
    /// client id first (the grid's own key) and falling back to venue id.
    pub async fn handle_stream_order(&self, update: OrderUpdate) -> OrderEvent {
        let client_id = match &update.client_id {
            Some(id) => Some(id.clone()),
            None => self.by_venue_id.lock().await.get(&update.order_id).cloned(),
        };

        if update.status == OrderWireStatus::Cancelled {
            if self.expected_cancellations.lock().await.remove(&update.order_id) {
                if let Some(id) = &client_id {
                    self.by_client_id.lock().await.remove(id);
                }
                self.by_venue_id.lock().await.remove(&update.order_id);
                return OrderEvent::Update(update);
            }
            self.by_venue_id.lock().await.remove(&update.order_id);
            if let Some(id) = &client_id {
                self.by_client_id.lock().await.remove(id);
            }
            return OrderEvent::CancelledUnsolicited { order_id: update.order_id };
        }

        if matches!(update.status, OrderWireStatus::Filled | OrderWireStatus::PartiallyFilled) {
            if let Some(id) = &client_id {
                let mut cache = self.by_client_id.lock().await;
                if let Some(order) = cache.get_mut(id) {
                    // Trust the filled quantity over the wire status label: a
                    // partial fill that happens to reach the full amount is
                    // still a completion, and a "Filled" label that somehow
                    // under-reports quantity must not drop the resting order.
                    if update.filled >= order.amount {
                        order.mark_filled(update.price, update.filled);
                        cache.remove(id);
                        self.by_venue_id.lock().await.remove(&update.order_id);
                    } else {
                        order.filled_price = Some(update.price);
                        order.filled_amount = Some(update.filled);
                    }
                }
            }
        }

        OrderEvent::Update(update)
    }

    /// Polls exchange-truth open orders and synthesises fill/cancel events
    /// for anything the local cache still thinks is resting. Used in
    /// `MonitoringMode::RestPoll` and for periodic reconciliation even while
    /// streaming, to catch dark fills that happened during a disconnect.
    pub async fn reconcile_against_rest(&self) -> Result<Vec<OrderEvent>, AdapterError> {
        let live = self.exchange.get_open_orders(&self.symbol).await?;
        let live_ids: HashSet<String> = live.iter().map(|o| o.id.clone()).collect();

        let missing: Vec<(String, String)> = {
            let cache = self.by_client_id.lock().await;
            cache
                .iter()
                .filter_map(|(cid, o)| o.order_id.as_ref().filter(|oid| !live_ids.contains(oid.as_str())).map(|oid| (cid.clone(), oid.clone())))
                .collect()
        };

        let mut events = Vec::new();
        for (client_id, venue_id) in missing {
            match self.exchange.get_order(&venue_id, &self.symbol).await? {
                Some(order) if order.status == WireStatus::Filled => {
                    let update = OrderUpdate {
                        order_id: venue_id.clone(),
                        client_id: Some(client_id.clone()),
                        status: OrderWireStatus::Filled,
                        side: order.side,
                        price: order.average.unwrap_or(order.price),
                        amount: order.amount,
                        filled: order.filled,
                    };
                    self.by_client_id.lock().await.remove(&client_id);
                    self.by_venue_id.lock().await.remove(&venue_id);
                    events.push(OrderEvent::Update(update));
                }
                _ => {
                    self.by_client_id.lock().await.remove(&client_id);
                    self.by_venue_id.lock().await.remove(&venue_id);
                    events.push(OrderEvent::CancelledUnsolicited { order_id: venue_id });
                }
            }
        }
        Ok(events)
    }

    pub async fn record_failure(&self) {
        let mut failures = self.consecutive_failures.lock().await;
        *failures += 1;
        *self.consecutive_successes.lock().await = 0;
        if *failures >= FAULT_STREAK {
            *self.network_fault.lock().await = true;
        }
    }

    pub async fn record_success(&self) {
        let mut successes = self.consecutive_successes.lock().await;
        *successes += 1;
        *self.consecutive_failures.lock().await = 0;
        if *successes >= FAULT_STREAK {
            *self.network_fault.lock().await = false;
        }
    }

    pub async fn is_network_fault(&self) -> bool {
        *self.network_fault.lock().await
    }

    pub async fn set_monitoring_mode(&self, mode: MonitoringMode) {
        *self.monitoring_mode.lock().await = mode;
    }

    pub async fn monitoring_mode(&self) -> MonitoringMode {
        *self.monitoring_mode.lock().await
    }
}
