//! Shared data model: grid orders, levels, and the stream-event
//! shape adapters are normalised into before they reach the core.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridType {
    Long,
    Short,
    MartingaleLong,
    MartingaleShort,
    FollowLong,
    FollowShort,
}

impl GridType {
    /// LONG families place BUYs at the initial fill and climb in price
    /// index from the low end; SHORT families place SELLs and climb from
    /// the high end. Martingale/Follow variants inherit the base family.
    pub fn is_long_family(self) -> bool {
        matches!(self, GridType::Long | GridType::MartingaleLong | GridType::FollowLong)
    }

    pub fn is_martingale(self) -> bool {
        matches!(self, GridType::MartingaleLong | GridType::MartingaleShort)
    }

    pub fn is_follow(self) -> bool {
        matches!(self, GridType::FollowLong | GridType::FollowShort)
    }

    /// The side of the initial resting order placed at each level.
    pub fn initial_side(self) -> Side {
        if self.is_long_family() {
            Side::Buy
        } else {
            Side::Sell
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridOrder {
    pub order_id: Option<String>,
    pub client_id: String,
    pub grid_id: u32,
    pub side: Side,
    pub price: Decimal,
    pub amount: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub filled_price: Option<Decimal>,
    pub filled_amount: Option<Decimal>,
    pub parent_order_id: Option<String>,
    pub reverse_order_id: Option<String>,
}

impl GridOrder {
    pub fn new(client_id: String, grid_id: u32, side: Side, price: Decimal, amount: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            order_id: None,
            client_id,
            grid_id,
            side,
            price,
            amount,
            status: OrderStatus::Pending,
            created_at: now,
            filled_price: None,
            filled_amount: None,
            parent_order_id: None,
            reverse_order_id: None,
        }
    }

    /// Invariant: on FILLED, `filled_amount > 0` and `filled_price > 0`.
    pub fn mark_filled(&mut self, filled_price: Decimal, filled_amount: Decimal) {
        debug_assert!(filled_amount > Decimal::ZERO);
        debug_assert!(filled_price > Decimal::ZERO);
        self.status = OrderStatus::Filled;
        self.filled_price = Some(filled_price);
        self.filled_amount = Some(filled_amount);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LevelStatus {
    Idle,
    PendingBuy,
    PendingSell,
    FilledBuy,
    FilledSell,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridLevel {
    pub grid_id: u32,
    pub price: Decimal,
    pub status: LevelStatus,
    pub current_order: Option<String>,
    pub buy_count: u64,
    pub sell_count: u64,
    pub completed_cycles: u64,
    pub realised_profit: Decimal,
}

impl GridLevel {
    pub fn new(grid_id: u32, price: Decimal) -> Self {
        Self {
            grid_id,
            price,
            status: LevelStatus::Idle,
            current_order: None,
            buy_count: 0,
            sell_count: 0,
            completed_cycles: 0,
            realised_profit: Decimal::ZERO,
        }
    }
}

/// Design note: "Dynamic message shapes from stream." Adapters normalise
/// whatever wire shape they receive into this tagged value; raw adapter
/// payloads never leak past this boundary.
#[derive(Debug, Clone)]
pub enum OrderEvent {
    /// A resting order reached a terminal or partial state.
    Update(OrderUpdate),
    /// An id the engine did not recognise was cancelled; carried separately
    /// from `Update` because it never resolves to a cached order.
    CancelledUnsolicited { order_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderWireStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct OrderUpdate {
    pub order_id: String,
    pub client_id: Option<String>,
    pub status: OrderWireStatus,
    pub side: Side,
    pub price: Decimal,
    pub amount: Decimal,
    pub filled: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitoringMode {
    Stream,
    RestPoll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    Network,
    Error,
    Manual,
}
