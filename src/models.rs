//! Core data model shared across the indicator pipeline, strategy engine, and stream hub.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Immutable OHLCV record. `time_ms` is the bar's start time, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn time_s(&self) -> i64 {
        if self.time_ms >= 1_000_000_000_000 {
            self.time_ms / 1000
        } else {
            self.time_ms
        }
    }
}

/// Push message from the upstream exchange describing the current or just-closed bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BarUpdate {
    pub start_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// `true` once the exchange considers the bar closed.
    pub confirm: bool,
}

impl From<BarUpdate> for Candle {
    fn from(u: BarUpdate) -> Self {
        Candle {
            time_ms: u.start_ms,
            open: u.open,
            high: u.high,
            low: u.low,
            close: u.close,
            volume: u.volume,
        }
    }
}

/// One of the exchange's supported kline intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    Min1,
    Min3,
    Min5,
    Min15,
    Min30,
    Min60,
    Min120,
    Min240,
    Min360,
    Min720,
    Day,
    Week,
    Month,
}

impl Interval {
    pub const ALL: [Interval; 13] = [
        Interval::Min1,
        Interval::Min3,
        Interval::Min5,
        Interval::Min15,
        Interval::Min30,
        Interval::Min60,
        Interval::Min120,
        Interval::Min240,
        Interval::Min360,
        Interval::Min720,
        Interval::Day,
        Interval::Week,
        Interval::Month,
    ];

    /// Bybit's wire representation (`/v5/market/kline?interval=`).
    pub fn as_wire(self) -> &'static str {
        match self {
            Interval::Min1 => "1",
            Interval::Min3 => "3",
            Interval::Min5 => "5",
            Interval::Min15 => "15",
            Interval::Min30 => "30",
            Interval::Min60 => "60",
            Interval::Min120 => "120",
            Interval::Min240 => "240",
            Interval::Min360 => "360",
            Interval::Min720 => "720",
            Interval::Day => "D",
            Interval::Week => "W",
            Interval::Month => "M",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Interval::ALL.iter().copied().find(|i| i.as_wire() == raw)
    }

    /// Interval length in milliseconds, used for rollover detection. Calendar intervals
    /// (D/W/M) use their nominal fixed-length approximation, matching the upstream's own
    /// bar-boundary behavior closely enough for resync purposes.
    pub fn millis(self) -> i64 {
        let minute = 60_000;
        match self {
            Interval::Min1 => minute,
            Interval::Min3 => 3 * minute,
            Interval::Min5 => 5 * minute,
            Interval::Min15 => 15 * minute,
            Interval::Min30 => 30 * minute,
            Interval::Min60 => 60 * minute,
            Interval::Min120 => 120 * minute,
            Interval::Min240 => 240 * minute,
            Interval::Min360 => 360 * minute,
            Interval::Min720 => 720 * minute,
            Interval::Day => 24 * 60 * minute,
            Interval::Week => 7 * 24 * 60 * minute,
            Interval::Month => 30 * 24 * 60 * minute,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_wire())
    }
}

/// Identifies one logical stream: a symbol at a given interval.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub symbol: String,
    pub interval: Interval,
}

impl StreamKey {
    pub fn new(symbol: impl Into<String>, interval: Interval) -> Self {
        Self { symbol: symbol.into(), interval }
    }

    /// Directory-safe key used for trade-journal paths: `<SYMBOL>_<INTERVAL>`.
    pub fn log_dir_name(&self) -> String {
        format!("{}_{}", self.symbol, self.interval)
    }
}

/// How strategy output is attached to outbound payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyMarkers {
    Off,
    Simulation,
    Trade,
}

impl StrategyMarkers {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "off" => Some(StrategyMarkers::Off),
            "simulation" => Some(StrategyMarkers::Simulation),
            "trade" => Some(StrategyMarkers::Trade),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    #[serde(rename = "baseCoin")]
    pub base_coin: String,
    #[serde(rename = "quoteCoin")]
    pub quote_coin: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerTick {
    pub symbol: String,
    pub price: f64,
    #[serde(rename = "change24hPercent")]
    pub change_24h_percent: f64,
    #[serde(rename = "volume24h")]
    pub volume_24h: f64,
    pub ts: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerSnapshot {
    pub symbol: String,
    pub price: f64,
    #[serde(rename = "change24hPercent")]
    pub change_24h_percent: f64,
    #[serde(rename = "volume24h")]
    pub volume_24h: f64,
}

pub type Context = HashMap<String, serde_json::Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_round_trips_through_wire_form() {
        for i in Interval::ALL {
            assert_eq!(Interval::parse(i.as_wire()), Some(i));
        }
    }

    #[test]
    fn interval_parse_rejects_unknown() {
        assert_eq!(Interval::parse("2"), None);
    }

    #[test]
    fn bar_update_into_candle_preserves_fields() {
        let u = BarUpdate { start_ms: 5, open: 1.0, high: 2.0, low: 0.5, close: 1.5, volume: 10.0, confirm: true };
        let c: Candle = u.into();
        assert_eq!(c.time_ms, 5);
        assert_eq!(c.close, 1.5);
    }
}
