//! Deterministic trade-outcome labeling: walks forward from each entry bar and decides
//! whether the stop, the take-profit, or end-of-data closed the trade.

use crate::models::Candle;
use crate::strategy::types::{Side, StopSegment, TradeEvent};
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TradeResult {
    pub trade_id: String,
    pub close_price: f64,
    pub close_bar_index: usize,
    pub close_time_s: i64,
    pub close_reason: &'static str,
    pub points: f64,
}

/// Effective stop for a bar: a segment covering the bar wins; failing that, the most
/// recently ended segment before the bar; failing that, the trade's initial stop.
fn stop_price_for_bar(bar_time_s: i64, side: Side, initial_stop: f64, segments: &[StopSegment]) -> f64 {
    let matching: Vec<&StopSegment> = segments.iter().filter(|s| s.side == side).collect();
    if matching.is_empty() {
        return initial_stop;
    }
    if let Some(covering) = matching.iter().find(|s| s.start_time_s <= bar_time_s && bar_time_s <= s.end_time_s) {
        return covering.price;
    }
    if matching.iter().all(|s| s.start_time_s > bar_time_s) {
        return initial_stop;
    }
    matching
        .iter()
        .filter(|s| s.end_time_s < bar_time_s)
        .max_by_key(|s| s.end_time_s)
        .map(|s| s.price)
        .unwrap_or(initial_stop)
}

fn close_result(ev: &TradeEvent, bar: &Candle, bar_idx: usize, reason: &'static str) -> TradeResult {
    let points = match ev.side {
        Side::Long => bar.close - ev.price,
        Side::Short => ev.price - bar.close,
        Side::None => 0.0,
    };
    TradeResult {
        trade_id: ev.trade_id(),
        close_price: bar.close,
        close_bar_index: bar_idx,
        close_time_s: bar.time_s(),
        close_reason: reason,
        points,
    }
}

pub fn compute_trade_results(events: &[TradeEvent], candles: &[Candle], stop_segments: &[StopSegment]) -> Vec<TradeResult> {
    let mut results = Vec::new();

    for ev in events {
        if ev.side == Side::None || ev.bar_index >= candles.len() {
            continue;
        }
        let entry_bar_index = ev.bar_index;
        let mut closed = false;

        for i in (entry_bar_index + 1)..candles.len() {
            let bar = &candles[i];
            let stop_price = stop_price_for_bar(bar.time_s(), ev.side, ev.initial_stop_price, stop_segments);

            let (stop_hit, tp_hit) = match ev.side {
                Side::Long => (bar.low <= stop_price, ev.target_price.is_some_and(|t| bar.high >= t)),
                Side::Short => (bar.high >= stop_price, ev.target_price.is_some_and(|t| bar.low <= t)),
                Side::None => unreachable!(),
            };

            if stop_hit {
                results.push(close_result(ev, bar, i, "stop"));
                closed = true;
                break;
            }
            if tp_hit {
                results.push(close_result(ev, bar, i, "take_profit"));
                closed = true;
                break;
            }
        }

        if !closed && entry_bar_index < candles.len() - 1 {
            let last_idx = candles.len() - 1;
            results.push(close_result(ev, &candles[last_idx], last_idx, "end_of_data"));
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn candle(time_s: i64, o: f64, h: f64, l: f64, c: f64) -> Candle {
        Candle { time_ms: time_s * 1000, open: o, high: h, low: l, close: c, volume: 1.0 }
    }

    fn long_event(bar_index: usize, time_s: i64, price: f64, stop: f64) -> TradeEvent {
        TradeEvent {
            time_s,
            bar_index,
            event_type: "OB_TREND_BUY".into(),
            side: Side::Long,
            price,
            target_price: None,
            initial_stop_price: stop,
            context: HashMap::new(),
        }
    }

    #[test]
    fn stop_hit_takes_priority_over_take_profit_same_bar() {
        let mut ev = long_event(0, 0, 100.0, 95.0);
        ev.target_price = Some(105.0);
        let candles = vec![
            candle(0, 100.0, 100.0, 100.0, 100.0),
            candle(60, 100.0, 106.0, 94.0, 99.0), // both stop and tp hit this bar
        ];
        let results = compute_trade_results(&[ev], &candles, &[]);
        assert_eq!(results[0].close_reason, "stop");
        assert_eq!(results[0].close_bar_index, 1);
    }

    #[test]
    fn end_of_data_closes_at_last_bar() {
        let ev = long_event(0, 0, 100.0, 90.0);
        let candles = vec![
            candle(0, 100.0, 100.0, 100.0, 100.0),
            candle(60, 100.0, 102.0, 98.0, 101.0),
            candle(120, 101.0, 103.0, 99.0, 102.0),
        ];
        let results = compute_trade_results(&[ev], &candles, &[]);
        assert_eq!(results[0].close_reason, "end_of_data");
        assert_eq!(results[0].close_bar_index, 2);
        assert_eq!(results[0].points, 2.0);
    }

    #[test]
    fn short_trade_stop_above_entry_hit_on_high() {
        let ev = TradeEvent { side: Side::Short, ..long_event(0, 0, 100.0, 105.0) };
        let candles = vec![
            candle(0, 100.0, 100.0, 100.0, 100.0),
            candle(60, 100.0, 106.0, 98.0, 99.0),
        ];
        let results = compute_trade_results(&[ev], &candles, &[]);
        assert_eq!(results[0].close_reason, "stop");
        assert_eq!(results[0].points, 100.0 - 99.0);
    }
}
