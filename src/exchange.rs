//! Exchange adapter contract: the only interface the core depends on.
//! Concrete venue adapters (REST + streaming) are external collaborators
//! and live outside this crate; this module defines the trait they must
//! implement plus a `MockExchange` used by the engine's own test suite,
//! generalised to decimal arithmetic and a venue-agnostic trait surface.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::Side;

/// Invoked by a venue's own stream task whenever an order update arrives.
/// `Fn`, not `FnMut` — a callback that needs mutable state owns a `Mutex`
/// of its own, the same convention this crate uses everywhere a closure
/// crosses a thread boundary.
pub type OrderStreamCallback = Arc<dyn Fn(OrderData) + Send + Sync>;
pub type TickerStreamCallback = Arc<dyn Fn(Ticker) + Send + Sync>;
pub type PositionStreamCallback = Arc<dyn Fn(PositionData) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireStatus {
    Open,
    Filled,
    Cancelled,
    PartiallyFilled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarginMode {
    Cross,
    Isolated,
}

#[derive(Debug, Clone, Default)]
pub struct OrderParams {
    pub margin_mode: Option<MarginMode>,
    pub reduce_only: bool,
    pub client_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OrderData {
    pub id: String,
    pub client_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub status: WireStatus,
    pub price: Decimal,
    pub amount: Decimal,
    pub filled: Decimal,
    pub average: Option<Decimal>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionSide {
    Long,
    Short,
}

#[derive(Debug, Clone)]
pub struct PositionData {
    pub symbol: String,
    pub side: PositionSide,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub unrealized_pnl: Decimal,
}

#[derive(Debug, Clone)]
pub struct BalanceData {
    pub currency: String,
    pub free: Decimal,
    pub used: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: Decimal,
    pub timestamp: i64,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("network error: {0}")]
    Network(String),
    #[error("exchange rejected request: {0}")]
    Rejected(String),
    #[error("rate limited")]
    RateLimited,
    #[error("order not found")]
    NotFound,
}

pub type AdapterResult<T> = Result<T, AdapterError>;

/// The contract the core consumes from any venue adapter. Adapters are
/// expected to be `Send + Sync` so the execution engine can hold one behind
/// a single `Arc` shared across its supervisory tasks.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn connect(&self) -> AdapterResult<()>;
    async fn disconnect(&self) -> AdapterResult<()>;
    fn is_connected(&self) -> bool;

    async fn create_order(
        &self,
        symbol: &str,
        side: Side,
        order_type: OrderType,
        amount: Decimal,
        price: Option<Decimal>,
        params: OrderParams,
    ) -> AdapterResult<OrderData>;

    async fn cancel_order(&self, id: &str, symbol: &str) -> AdapterResult<()>;
    async fn cancel_all_orders(&self, symbol: &str) -> AdapterResult<Vec<OrderData>>;
    async fn get_order(&self, id: &str, symbol: &str) -> AdapterResult<Option<OrderData>>;
    async fn get_open_orders(&self, symbol: &str) -> AdapterResult<Vec<OrderData>>;
    async fn get_positions(&self, symbol: Option<&str>) -> AdapterResult<Vec<PositionData>>;
    async fn get_balances(&self) -> AdapterResult<Vec<BalanceData>>;
    async fn get_ticker(&self, symbol: &str) -> AdapterResult<Ticker>;

    /// Preferred for close/reduce operations over a limit order at market.
    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        reduce_only: bool,
    ) -> AdapterResult<OrderData>;

    /// Venues with monotonic nonce requirements need a venue-wide
    /// submission lock; most don't.
    fn requires_serialised_submission(&self) -> bool {
        false
    }

    /// Subscribes to this account's own order updates. Defaults to
    /// rejecting so an adapter that hasn't implemented streaming naturally
    /// falls back to REST polling rather than silently never firing.
    async fn subscribe_user_data(&self, _callback: OrderStreamCallback) -> AdapterResult<()> {
        Err(AdapterError::Rejected("streaming user data is not supported by this adapter".into()))
    }

    /// Subscribes to mark-price ticks for `symbol`.
    async fn subscribe_ticker(&self, _symbol: &str, _callback: TickerStreamCallback) -> AdapterResult<()> {
        Err(AdapterError::Rejected("streaming ticker data is not supported by this adapter".into()))
    }

    /// Subscribes to this account's position updates.
    async fn subscribe_positions(&self, _callback: PositionStreamCallback) -> AdapterResult<()> {
        Err(AdapterError::Rejected("streaming position data is not supported by this adapter".into()))
    }
}

/// In-memory adapter used by the engine's own tests.
pub struct MockExchange {
    state: Mutex<MockState>,
}

struct MockState {
    connected: bool,
    orders: HashMap<String, OrderData>,
    next_id: u64,
    positions: HashMap<String, PositionData>,
    balances: HashMap<String, BalanceData>,
    last_price: Decimal,
    order_callback: Option<OrderStreamCallback>,
}

impl MockExchange {
    pub fn new(starting_balance: Decimal, starting_price: Decimal) -> Self {
        let mut balances = HashMap::new();
        balances.insert(
            "USD".to_string(),
            BalanceData { currency: "USD".into(), free: starting_balance, used: Decimal::ZERO, total: starting_balance },
        );
        Self {
            state: Mutex::new(MockState {
                connected: true,
                orders: HashMap::new(),
                next_id: 1,
                positions: HashMap::new(),
                balances,
                last_price: starting_price,
                order_callback: None,
            }),
        }
    }

    pub fn set_price(&self, price: Decimal) {
        self.state.lock().unwrap().last_price = price;
    }

    /// Test helper: overwrites a currency's balance snapshot, e.g. to
    /// simulate equity moving against an open position.
    pub fn set_balance(&self, currency: &str, total: Decimal) {
        let mut st = self.state.lock().unwrap();
        st.balances.insert(currency.to_string(), BalanceData { currency: currency.to_string(), free: total, used: Decimal::ZERO, total });
    }

    /// Test helper: marks a resting order filled as if the exchange matched it.
    pub fn fill_order(&self, id: &str, fill_price: Decimal) -> Option<OrderData> {
        let mut st = self.state.lock().unwrap();
        if let Some(order) = st.orders.get_mut(id) {
            order.status = WireStatus::Filled;
            order.filled = order.amount;
            order.average = Some(fill_price);
            return Some(order.clone());
        }
        None
    }

    /// Test helper: feeds an order update straight to whatever callback
    /// `subscribe_user_data` registered, as a real venue's stream would.
    pub fn push_order_update(&self, order: OrderData) {
        let callback = self.state.lock().unwrap().order_callback.clone();
        if let Some(callback) = callback {
            callback(order);
        }
    }
}

impl Default for MockExchange {
    fn default() -> Self {
        Self::new(Decimal::from(10_000), Decimal::from(100))
    }
}

#[async_trait]
impl ExchangeAdapter for MockExchange {
    async fn connect(&self) -> AdapterResult<()> {
        self.state.lock().unwrap().connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> AdapterResult<()> {
        self.state.lock().unwrap().connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    async fn create_order(
        &self,
        symbol: &str,
        side: Side,
        order_type: OrderType,
        amount: Decimal,
        price: Option<Decimal>,
        params: OrderParams,
    ) -> AdapterResult<OrderData> {
        let mut st = self.state.lock().unwrap();
        let id = format!("ex-{}", st.next_id);
        st.next_id += 1;
        let price = price.unwrap_or(st.last_price);
        let order = OrderData {
            id: id.clone(),
            client_id: params.client_id,
            symbol: symbol.to_string(),
            side,
            order_type,
            status: WireStatus::Open,
            price,
            amount,
            filled: Decimal::ZERO,
            average: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        st.orders.insert(id, order.clone());
        Ok(order)
    }

    async fn cancel_order(&self, id: &str, _symbol: &str) -> AdapterResult<()> {
        let mut st = self.state.lock().unwrap();
        if let Some(order) = st.orders.get_mut(id) {
            order.status = WireStatus::Cancelled;
            Ok(())
        } else {
            Err(AdapterError::NotFound)
        }
    }

    async fn cancel_all_orders(&self, symbol: &str) -> AdapterResult<Vec<OrderData>> {
        let mut st = self.state.lock().unwrap();
        let mut cancelled = Vec::new();
        for order in st.orders.values_mut() {
            if order.symbol == symbol && order.status == WireStatus::Open {
                order.status = WireStatus::Cancelled;
                cancelled.push(order.clone());
            }
        }
        Ok(cancelled)
    }

    async fn get_order(&self, id: &str, _symbol: &str) -> AdapterResult<Option<OrderData>> {
        Ok(self.state.lock().unwrap().orders.get(id).cloned())
    }

    async fn get_open_orders(&self, symbol: &str) -> AdapterResult<Vec<OrderData>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .orders
            .values()
            .filter(|o| o.symbol == symbol && o.status == WireStatus::Open)
            .cloned()
            .collect())
    }

    async fn get_positions(&self, symbol: Option<&str>) -> AdapterResult<Vec<PositionData>> {
        let st = self.state.lock().unwrap();
        Ok(st
            .positions
            .values()
            .filter(|p| symbol.map(|s| s == p.symbol).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn get_balances(&self) -> AdapterResult<Vec<BalanceData>> {
        Ok(self.state.lock().unwrap().balances.values().cloned().collect())
    }

    async fn get_ticker(&self, symbol: &str) -> AdapterResult<Ticker> {
        let st = self.state.lock().unwrap();
        Ok(Ticker { symbol: symbol.to_string(), last_price: st.last_price, timestamp: chrono::Utc::now().timestamp_millis() })
    }

    async fn place_market_order(&self, symbol: &str, side: Side, quantity: Decimal, reduce_only: bool) -> AdapterResult<OrderData> {
        self.create_order(
            symbol,
            side,
            OrderType::Market,
            quantity,
            None,
            OrderParams { reduce_only, ..Default::default() },
        )
        .await
    }

    async fn subscribe_user_data(&self, callback: OrderStreamCallback) -> AdapterResult<()> {
        self.state.lock().unwrap().order_callback = Some(callback);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn create_then_cancel_marks_order_cancelled() {
        let ex = MockExchange::default();
        let order = ex
            .create_order("BTC_USDC_PERP", Side::Buy, OrderType::Limit, dec!(0.01), Some(dec!(100)), OrderParams::default())
            .await
            .unwrap();
        ex.cancel_order(&order.id, "BTC_USDC_PERP").await.unwrap();
        let fetched = ex.get_order(&order.id, "BTC_USDC_PERP").await.unwrap().unwrap();
        assert_eq!(fetched.status, WireStatus::Cancelled);
    }

    #[tokio::test]
    async fn filling_a_resting_order_reports_average_and_size() {
        let ex = MockExchange::default();
        let order = ex
            .create_order("BTC_USDC_PERP", Side::Sell, OrderType::Limit, dec!(0.01), Some(dec!(110)), OrderParams::default())
            .await
            .unwrap();
        let filled = ex.fill_order(&order.id, dec!(110)).unwrap();
        assert_eq!(filled.status, WireStatus::Filled);
        assert_eq!(filled.filled, dec!(0.01));
        assert_eq!(filled.average, Some(dec!(110)));
    }

    #[tokio::test]
    async fn cancel_all_only_touches_open_orders_for_the_symbol() {
        let ex = MockExchange::default();
        let a = ex.create_order("BTC_USDC_PERP", Side::Buy, OrderType::Limit, dec!(0.01), Some(dec!(100)), OrderParams::default()).await.unwrap();
        let b = ex.create_order("ETH_USDC_PERP", Side::Buy, OrderType::Limit, dec!(0.1), Some(dec!(3000)), OrderParams::default()).await.unwrap();
        let cancelled = ex.cancel_all_orders("BTC_USDC_PERP").await.unwrap();
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].id, a.id);
        let other = ex.get_order(&b.id, "ETH_USDC_PERP").await.unwrap().unwrap();
        assert_eq!(other.status, WireStatus::Open);
    }

    #[tokio::test]
    async fn a_subscribed_callback_receives_pushed_order_updates() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let ex = MockExchange::default();
        let seen = Arc::new(AtomicBool::new(false));
        let seen_clone = seen.clone();
        ex.subscribe_user_data(Arc::new(move |_order| seen_clone.store(true, Ordering::SeqCst))).await.unwrap();

        let order = ex
            .create_order("BTC_USDC_PERP", Side::Buy, OrderType::Limit, dec!(0.01), Some(dec!(100)), OrderParams::default())
            .await
            .unwrap();
        ex.push_order_update(order);

        assert!(seen.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn an_adapter_without_streaming_support_rejects_subscription() {
        struct NoStream(MockExchange);

        #[async_trait]
        impl ExchangeAdapter for NoStream {
            async fn connect(&self) -> AdapterResult<()> {
                self.0.connect().await
            }
            async fn disconnect(&self) -> AdapterResult<()> {
                self.0.disconnect().await
            }
            fn is_connected(&self) -> bool {
                self.0.is_connected()
            }
            async fn create_order(&self, symbol: &str, side: Side, order_type: OrderType, amount: Decimal, price: Option<Decimal>, params: OrderParams) -> AdapterResult<OrderData> {
                self.0.create_order(symbol, side, order_type, amount, price, params).await
            }
            async fn cancel_order(&self, id: &str, symbol: &str) -> AdapterResult<()> {
                self.0.cancel_order(id, symbol).await
            }
            async fn cancel_all_orders(&self, symbol: &str) -> AdapterResult<Vec<OrderData>> {
                self.0.cancel_all_orders(symbol).await
            }
            async fn get_order(&self, id: &str, symbol: &str) -> AdapterResult<Option<OrderData>> {
                self.0.get_order(id, symbol).await
            }
            async fn get_open_orders(&self, symbol: &str) -> AdapterResult<Vec<OrderData>> {
                self.0.get_open_orders(symbol).await
            }
            async fn get_positions(&self, symbol: Option<&str>) -> AdapterResult<Vec<PositionData>> {
                self.0.get_positions(symbol).await
            }
            async fn get_balances(&self) -> AdapterResult<Vec<BalanceData>> {
                self.0.get_balances().await
            }
            async fn get_ticker(&self, symbol: &str) -> AdapterResult<Ticker> {
                self.0.get_ticker(symbol).await
            }
            async fn place_market_order(&self, symbol: &str, side: Side, quantity: Decimal, reduce_only: bool) -> AdapterResult<OrderData> {
                self.0.place_market_order(symbol, side, quantity, reduce_only).await
            }
        }

        let adapter = NoStream(MockExchange::default());
        let result = adapter.subscribe_user_data(Arc::new(|_| {})).await;
        assert!(matches!(result, Err(AdapterError::Rejected(_))));
    }
}
