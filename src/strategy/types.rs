//! Shared value types produced by the strategy engine and consumed by the trade journal.

use crate::models::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub time_s: i64,
    pub bar_index: usize,
    #[serde(rename = "type")]
    pub event_type: String,
    pub side: Side,
    pub price: f64,
    pub target_price: Option<f64>,
    pub initial_stop_price: f64,
    pub context: Context,
}

impl TradeEvent {
    /// Trade ID is the entry time as a decimal string (see spec §9 on collisions).
    pub fn trade_id(&self) -> String {
        self.time_s.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StopSegment {
    pub start_time_s: i64,
    pub end_time_s: i64,
    pub price: f64,
    pub side: Side,
}
