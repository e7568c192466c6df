//! PositionTracker (C3): derived bookkeeping view. Position itself is
//! authoritative from REST via the PositionMonitor (C6) — this tracker only
//! records trade history, counts, and PnL; it never integrates a fill into
//! the position field. Fee/PnL accrual is generalised with a bounded
//! ring buffer, the same way a reconciler bounds its own drift history.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::types::Side;

const TRADE_HISTORY_CAP: usize = 1000;

#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub side: Side,
    pub price: Decimal,
    pub amount: Decimal,
    pub fee: Decimal,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PositionTracker {
    /// Authoritative, REST-sourced position. Written only by PositionMonitor.
    pub current_position: Decimal,
    pub average_cost: Decimal,
    pub realised_pnl: Decimal,
    pub total_fees: Decimal,
    pub buy_count: u64,
    pub sell_count: u64,
    pub completed_cycles: u64,
    trade_history: VecDeque<TradeRecord>,
}

impl Default for PositionTracker {
    fn default() -> Self {
        Self {
            current_position: Decimal::ZERO,
            average_cost: Decimal::ZERO,
            realised_pnl: Decimal::ZERO,
            total_fees: Decimal::ZERO,
            buy_count: 0,
            sell_count: 0,
            completed_cycles: 0,
            trade_history: VecDeque::new(),
        }
    }
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sole writer of position (called by PositionMonitor, never by a fill
    /// handler).
    pub fn sync_initial_position(&mut self, size: Decimal, average_cost: Decimal) {
        self.current_position = size;
        self.average_cost = average_cost;
    }

    /// Records a fill for history/PnL purposes only — never mutates
    /// `current_position`.
    pub fn record_trade_only(&mut self, side: Side, price: Decimal, amount: Decimal, fee_rate: Decimal) {
        let fee = price * amount * fee_rate;
        self.total_fees += fee;
        match side {
            Side::Buy => self.buy_count += 1,
            Side::Sell => self.sell_count += 1,
        }
        self.completed_cycles = self.buy_count.min(self.sell_count);

        if self.trade_history.len() >= TRADE_HISTORY_CAP {
            self.trade_history.pop_front();
        }
        self.trade_history.push_back(TradeRecord { side, price, amount, fee, at: Utc::now() });
    }

    /// Realised PnL for one BUY/SELL pair at the given prices, net of fees
    /// on both legs.
    pub fn accrue_cycle_pnl(&mut self, buy_price: Decimal, sell_price: Decimal, amount: Decimal, fee_rate: Decimal) {
        let gross = (sell_price - buy_price) * amount;
        let fees = (buy_price + sell_price) * amount * fee_rate;
        self.realised_pnl += gross - fees;
    }

    pub fn trade_history(&self) -> impl Iterator<Item = &TradeRecord> {
        self.trade_history.iter()
    }

    pub fn last_cycle_timestamp(&self) -> Option<DateTime<Utc>> {
        self.trade_history.back().map(|t| t.at)
    }
}
