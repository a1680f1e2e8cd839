//! Order-block trend-following strategy: a state machine driven by a pull of
//! `(bar, active_order_blocks, raw_events)` from the order-blocks engine.

use crate::indicators::order_blocks::{iterate_order_blocks_with_events, OrderBlock};
use crate::indicators::support_resistance::SupportResistanceLine;
use crate::models::Candle;
use crate::strategy::types::{Side, StopSegment, TradeEvent};
use serde_json::json;
use std::collections::HashMap;

pub const DEFAULT_VOLUME_SPIKE_MULT: f64 = 2.0;
pub const DEFAULT_CONSECUTIVE_CLOSES: usize = 2;
pub const DEFAULT_BLOCK_OB_DISTANCE_MULT: f64 = 2.0;
pub const DEFAULT_BLOCK_SR_DISTANCE_MULT: f64 = 2.0;
pub const DEFAULT_MIN_SR_STRENGTH: f64 = 4.0;
pub const DEFAULT_TRAIL_PARAM: f64 = 0.75;

const SWING_LENGTH: usize = 20;

#[derive(Debug, Clone)]
pub struct StrategyParams {
    pub volume_spike_mult: f64,
    pub consecutive_closes: usize,
    pub block_ob_distance_mult: f64,
    pub block_sr_distance_mult: f64,
    pub min_sr_strength: f64,
    pub trail_param: f64,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            volume_spike_mult: DEFAULT_VOLUME_SPIKE_MULT,
            consecutive_closes: DEFAULT_CONSECUTIVE_CLOSES,
            block_ob_distance_mult: DEFAULT_BLOCK_OB_DISTANCE_MULT,
            block_sr_distance_mult: DEFAULT_BLOCK_SR_DISTANCE_MULT,
            min_sr_strength: DEFAULT_MIN_SR_STRENGTH,
            trail_param: DEFAULT_TRAIL_PARAM,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingSignal {
    ob_top: f64,
    ob_bottom: f64,
    side: Side,
}

#[derive(Debug, Clone)]
struct ActivePosition {
    side: Side,
    stop_price: f64,
}

fn volume_average(candles: &[Candle], lookback: usize, up_to: usize) -> f64 {
    let start = up_to.saturating_sub(lookback);
    if start >= up_to {
        return 0.0;
    }
    let window = &candles[start..up_to];
    window.iter().map(|c| c.volume).sum::<f64>() / window.len() as f64
}

/// Regime filter from the smart-money structure's candle colors. Defaults to bullish and
/// bearish both `true` when no color map is supplied (matching the original's permissive
/// fallback for callers that don't compute structure).
fn regime(candle_colors: Option<&HashMap<i64, &'static str>>, time_ms: i64) -> (bool, bool) {
    use crate::indicators::smart_money_structure::{
        CANDLE_SWING_BEAR_INTERNAL_BEAR, CANDLE_SWING_BEAR_INTERNAL_BULL,
        CANDLE_SWING_BULL_INTERNAL_BEAR, CANDLE_SWING_BULL_INTERNAL_BULL,
    };
    match candle_colors.and_then(|m| m.get(&time_ms)) {
        None => (true, true),
        Some(&color) => {
            let is_bull = color == CANDLE_SWING_BULL_INTERNAL_BULL || color == CANDLE_SWING_BULL_INTERNAL_BEAR;
            let is_bear = color == CANDLE_SWING_BEAR_INTERNAL_BULL || color == CANDLE_SWING_BEAR_INTERNAL_BEAR;
            (is_bull, is_bear)
        }
    }
}

fn closest_support_below(sr_lines: &[SupportResistanceLine], entry: f64, min_strength: f64) -> Option<f64> {
    sr_lines
        .iter()
        .filter(|l| l.width >= min_strength && l.price < entry)
        .map(|l| l.price)
        .fold(None, |acc, p| Some(acc.map_or(p, |a: f64| a.max(p))))
}

fn closest_resistance_above(sr_lines: &[SupportResistanceLine], entry: f64, min_strength: f64) -> Option<f64> {
    sr_lines
        .iter()
        .filter(|l| l.width >= min_strength && l.price > entry)
        .map(|l| l.price)
        .fold(None, |acc, p| Some(acc.map_or(p, |a: f64| a.min(p))))
}

fn closest_bearish_ob_below(obs: &[OrderBlock], entry: f64) -> Option<f64> {
    obs.iter()
        .filter(|ob| ob.top < entry)
        .map(|ob| ob.top)
        .fold(None, |acc, p| Some(acc.map_or(p, |a: f64| a.max(p))))
}

fn closest_bullish_ob_above(obs: &[OrderBlock], entry: f64) -> Option<f64> {
    obs.iter()
        .filter(|ob| ob.bottom > entry)
        .map(|ob| ob.bottom)
        .fold(None, |acc, p| Some(acc.map_or(p, |a: f64| a.min(p))))
}

#[allow(clippy::too_many_arguments)]
fn try_enter_long(
    sr_lines: &[SupportResistanceLine],
    active_bearish: &[OrderBlock],
    params: &StrategyParams,
    time_s: i64,
    bar_index: usize,
    entry: f64,
    ob_top: f64,
    ob_bottom: f64,
    position: &mut Option<ActivePosition>,
    events: &mut Vec<TradeEvent>,
    stop_segments: &mut Vec<StopSegment>,
) {
    let ob_width = ob_top - ob_bottom;

    if let Some(bear_top) = closest_bearish_ob_below(active_bearish, entry) {
        if entry - bear_top < params.block_ob_distance_mult * ob_width {
            return;
        }
    }
    let support = closest_support_below(sr_lines, entry, params.min_sr_strength);
    if let Some(support_price) = support {
        if entry - support_price < params.block_sr_distance_mult * ob_width {
            return;
        }
    }

    let stop = match support {
        Some(support_price) => {
            let gap = (entry - support_price) / 2.0;
            ob_bottom.max(support_price - gap)
        }
        None => ob_bottom,
    };

    events.push(TradeEvent {
        time_s,
        bar_index,
        event_type: "OB_TREND_BUY".to_string(),
        side: Side::Long,
        price: entry,
        target_price: None,
        initial_stop_price: stop,
        context: [
            ("ob_top".to_string(), json!(ob_top)),
            ("ob_bottom".to_string(), json!(ob_bottom)),
            ("trigger".to_string(), json!("bullish_ob")),
        ]
        .into_iter()
        .collect(),
    });
    stop_segments.push(StopSegment { start_time_s: time_s, end_time_s: time_s, price: stop, side: Side::Long });
    *position = Some(ActivePosition { side: Side::Long, stop_price: stop });
}

#[allow(clippy::too_many_arguments)]
fn try_enter_short(
    sr_lines: &[SupportResistanceLine],
    active_bullish: &[OrderBlock],
    params: &StrategyParams,
    time_s: i64,
    bar_index: usize,
    entry: f64,
    ob_top: f64,
    ob_bottom: f64,
    position: &mut Option<ActivePosition>,
    events: &mut Vec<TradeEvent>,
    stop_segments: &mut Vec<StopSegment>,
) {
    let ob_width = ob_top - ob_bottom;

    if let Some(bull_bottom) = closest_bullish_ob_above(active_bullish, entry) {
        if bull_bottom - entry < params.block_ob_distance_mult * ob_width {
            return;
        }
    }
    let resistance = closest_resistance_above(sr_lines, entry, params.min_sr_strength);
    if let Some(res_price) = resistance {
        if res_price - entry < params.block_sr_distance_mult * ob_width {
            return;
        }
    }

    let stop = match resistance {
        Some(res_price) => {
            let gap = (res_price - entry) / 2.0;
            ob_top.min(res_price + gap)
        }
        None => ob_top,
    };

    events.push(TradeEvent {
        time_s,
        bar_index,
        event_type: "OB_TREND_SELL".to_string(),
        side: Side::Short,
        price: entry,
        target_price: None,
        initial_stop_price: stop,
        context: [
            ("ob_top".to_string(), json!(ob_top)),
            ("ob_bottom".to_string(), json!(ob_bottom)),
            ("trigger".to_string(), json!("bearish_ob")),
        ]
        .into_iter()
        .collect(),
    });
    stop_segments.push(StopSegment { start_time_s: time_s, end_time_s: time_s, price: stop, side: Side::Short });
    *position = Some(ActivePosition { side: Side::Short, stop_price: stop });
}

/// Runs the full strategy over a candle window, returning entry events and the trailing
/// stop-segment stream. Deterministic and idempotent: the same window always yields the
/// same output.
pub fn compute_order_block_trend_following(
    candles: &[Candle],
    candle_colors: Option<&HashMap<i64, &'static str>>,
    sr_lines: &[SupportResistanceLine],
    params: &StrategyParams,
) -> (Vec<TradeEvent>, Vec<StopSegment>) {
    let mut events = Vec::new();
    let mut stop_segments: Vec<StopSegment> = Vec::new();

    if candles.len() < 25 {
        return (events, stop_segments);
    }

    let mut pending: Option<PendingSignal> = None;
    let mut position: Option<ActivePosition> = None;

    for (i, c, active_bullish, active_bearish, raw_events) in iterate_order_blocks_with_events(candles, SWING_LENGTH) {
        let time_s = c.time_s();
        let vol_avg = volume_average(candles, 20, i);
        let (is_bull, is_bear) = regime(candle_colors, c.time_ms);

        if let Some(p) = pending.take() {
            match p.side {
                Side::Long if is_bull => {
                    if c.close > p.ob_top {
                        try_enter_long(sr_lines, &active_bearish, params, time_s, i, c.close, p.ob_top, p.ob_bottom, &mut position, &mut events, &mut stop_segments);
                    }
                }
                Side::Short if is_bear => {
                    if c.close < p.ob_bottom {
                        try_enter_short(sr_lines, &active_bullish, params, time_s, i, c.close, p.ob_top, p.ob_bottom, &mut position, &mut events, &mut stop_segments);
                    }
                }
                _ => {}
            }
        }

        if position.is_none() && pending.is_none() {
            for ev in &raw_events {
                match ev.event_type {
                    "bullish_boundary_crossed" | "bullish_breaker_created" if is_bull => {
                        let (ob_top, ob_bottom) = (ev.ob_top, ev.ob_bottom);
                        let confirmed = (vol_avg > 0.0 && c.volume >= params.volume_spike_mult * vol_avg)
                            || (i > 0 && candles[i - 1].close > ob_top && c.close > ob_top);
                        if confirmed {
                            try_enter_long(sr_lines, &active_bearish, params, time_s, i, c.close, ob_top, ob_bottom, &mut position, &mut events, &mut stop_segments);
                        } else {
                            pending = Some(PendingSignal { ob_top, ob_bottom, side: Side::Long });
                        }
                    }
                    "bearish_boundary_crossed" | "bearish_breaker_created" if is_bear => {
                        let (ob_top, ob_bottom) = (ev.ob_top, ev.ob_bottom);
                        let confirmed = (vol_avg > 0.0 && c.volume >= params.volume_spike_mult * vol_avg)
                            || (i > 0 && candles[i - 1].close < ob_bottom && c.close < ob_bottom);
                        if confirmed {
                            try_enter_short(sr_lines, &active_bullish, params, time_s, i, c.close, ob_top, ob_bottom, &mut position, &mut events, &mut stop_segments);
                        } else {
                            pending = Some(PendingSignal { ob_top, ob_bottom, side: Side::Short });
                        }
                    }
                    _ => {}
                }
                if position.is_some() {
                    break;
                }
            }
        }

        if i == 0 {
            continue;
        }
        let prev = &candles[i - 1];

        let mut exit = false;
        if let Some(pos) = position.as_mut() {
            match pos.side {
                Side::Long => {
                    let mut levels: Vec<f64> = sr_lines.iter().filter(|l| l.width >= params.min_sr_strength).map(|l| l.price).collect();
                    levels.extend(active_bullish.iter().map(|ob| ob.top));
                    let crossed = levels
                        .into_iter()
                        .filter(|&p| p > pos.stop_price && prev.low < p && p <= c.close)
                        .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.max(p))));

                    if let Some(crossed) = crossed {
                        let new_stop = crossed - params.trail_param * (crossed - pos.stop_price);
                        if new_stop > pos.stop_price {
                            if let Some(last) = stop_segments.last_mut() {
                                last.end_time_s = time_s;
                            }
                            stop_segments.push(StopSegment { start_time_s: time_s, end_time_s: time_s, price: new_stop, side: Side::Long });
                            pos.stop_price = new_stop;
                        }
                    } else if let Some(last) = stop_segments.last_mut() {
                        if last.side == Side::Long {
                            last.end_time_s = time_s;
                        }
                    }
                    if c.low <= pos.stop_price {
                        exit = true;
                    }
                }
                Side::Short => {
                    let mut levels: Vec<f64> = sr_lines.iter().filter(|l| l.width >= params.min_sr_strength).map(|l| l.price).collect();
                    levels.extend(active_bearish.iter().map(|ob| ob.bottom));
                    let crossed = levels
                        .into_iter()
                        .filter(|&p| p < pos.stop_price && prev.high > p && p >= c.close)
                        .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a: f64| a.min(p))));

                    if let Some(crossed) = crossed {
                        let new_stop = crossed + params.trail_param * (pos.stop_price - crossed);
                        if new_stop < pos.stop_price {
                            if let Some(last) = stop_segments.last_mut() {
                                last.end_time_s = time_s;
                            }
                            stop_segments.push(StopSegment { start_time_s: time_s, end_time_s: time_s, price: new_stop, side: Side::Short });
                            pos.stop_price = new_stop;
                        }
                    } else if let Some(last) = stop_segments.last_mut() {
                        if last.side == Side::Short {
                            last.end_time_s = time_s;
                        }
                    }
                    if c.high >= pos.stop_price {
                        exit = true;
                    }
                }
                Side::None => {}
            }
        }
        if exit {
            position = None;
        }
    }

    (events, stop_segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(time_ms: i64, o: f64, h: f64, l: f64, c: f64, v: f64) -> Candle {
        Candle { time_ms, open: o, high: h, low: l, close: c, volume: v }
    }

    #[test]
    fn short_window_yields_no_trades() {
        let candles: Vec<Candle> = (0..10).map(|i| candle(i, 100.0, 101.0, 99.0, 100.0, 10.0)).collect();
        let (events, segs) = compute_order_block_trend_following(&candles, None, &[], &StrategyParams::default());
        assert!(events.is_empty() && segs.is_empty());
    }

    #[test]
    fn determinism_same_window_same_output() {
        let candles: Vec<Candle> = (0..60)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.37).sin() * 6.0;
                candle(i * 60, base, base + 3.0, base - 3.0, base + 0.8, 40.0 + i as f64)
            })
            .collect();
        let params = StrategyParams::default();
        let a = compute_order_block_trend_following(&candles, None, &[], &params);
        let b = compute_order_block_trend_following(&candles, None, &[], &params);
        assert_eq!(format!("{:?}", a), format!("{:?}", b));
    }

    #[test]
    fn stop_segments_are_time_ordered_and_non_overlapping() {
        let candles: Vec<Candle> = (0..80)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.2).sin() * 4.0 + i as f64 * 0.2;
                candle(i * 60, base, base + 2.0, base - 2.0, base + 0.3, 30.0 + (i % 7) as f64 * 20.0)
            })
            .collect();
        let (_events, segs) = compute_order_block_trend_following(&candles, None, &[], &StrategyParams::default());
        for w in segs.windows(2) {
            assert!(w[0].start_time_s <= w[0].end_time_s);
            assert!(w[1].start_time_s <= w[1].end_time_s);
        }
    }
}
