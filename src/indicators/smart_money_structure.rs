//! Swing/internal pivot tracker producing BOS/CHoCH structure lines, swing labels,
//! equal-high/equal-low markers, and a per-bar trend-color regime filter.

use crate::models::Candle;
use serde::Serialize;
use std::collections::HashMap;

pub const DEFAULT_SWING_LENGTH: usize = 50;
pub const INTERNAL_LENGTH: usize = 5;
pub const EQUAL_HL_LENGTH: usize = 5;
pub const ATR_LENGTH: usize = 200;
pub const DEFAULT_EQUAL_THRESHOLD: f64 = 0.1;
pub const MAX_STRUCTURE_ELEMENTS: usize = 20;
pub const MAX_SWING_LABELS: usize = 15;
pub const MAX_EQUAL_ELEMENTS: usize = 10;
pub const MAX_LOOKBACK: usize = 500;

pub const SWING_BULL_COLOR: &str = "rgba(34,197,94,0.9)";
pub const SWING_BEAR_COLOR: &str = "rgba(239,68,68,0.9)";
pub const INTERNAL_BULL_COLOR: &str = "rgba(34,197,94,0.6)";
pub const INTERNAL_BEAR_COLOR: &str = "rgba(239,68,68,0.6)";

pub const CANDLE_SWING_BULL_INTERNAL_BULL: &str = "#22c55e";
pub const CANDLE_SWING_BULL_INTERNAL_BEAR: &str = "#15803d";
pub const CANDLE_SWING_BEAR_INTERNAL_BULL: &str = "#b91c1c";
pub const CANDLE_SWING_BEAR_INTERNAL_BEAR: &str = "#dc2626";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Bull,
    Bear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowFilter {
    All,
    BosOnly,
    ChochOnly,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Pivot {
    price: f64,
    bar_idx: usize,
    crossed: bool,
}

impl Pivot {
    fn valid(&self, min_idx: usize) -> bool {
        self.bar_idx >= min_idx && self.price > 0.0
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StructureLine {
    pub from_bar: usize,
    pub to_bar: usize,
    pub price: f64,
    pub tag: &'static str, // "BOS" | "CHoCH"
    pub kind: &'static str, // "swing" | "internal"
    pub color: &'static str,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SwingLabel {
    pub bar_idx: usize,
    pub price: f64,
    pub label: &'static str, // "HH" | "LH" | "LL" | "HL"
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EqualLine {
    pub from_bar: usize,
    pub to_bar: usize,
    pub price: f64,
    pub kind: &'static str, // "EQH" | "EQL"
}

#[derive(Debug, Clone, Default)]
pub struct StructureOutput {
    pub lines: Vec<StructureLine>,
    pub swing_labels: Vec<SwingLabel>,
    pub equal_lines: Vec<EqualLine>,
    pub candle_colors: HashMap<i64, &'static str>,
}

#[derive(Debug, Clone)]
pub struct StructureParams {
    pub swing_length: usize,
    pub show_structure: bool,
    pub show_internals: bool,
    pub show_swings: bool,
    pub show_equal_hl: bool,
    pub equal_threshold: f64,
    pub show_swing_bull: ShowFilter,
    pub show_swing_bear: ShowFilter,
    pub show_internal_bull: ShowFilter,
    pub show_internal_bear: ShowFilter,
    pub include_candle_colors: bool,
    pub max_swing_labels: Option<usize>,
}

impl Default for StructureParams {
    fn default() -> Self {
        Self {
            swing_length: DEFAULT_SWING_LENGTH,
            show_structure: true,
            show_internals: true,
            show_swings: true,
            show_equal_hl: true,
            equal_threshold: DEFAULT_EQUAL_THRESHOLD,
            show_swing_bull: ShowFilter::All,
            show_swing_bear: ShowFilter::All,
            show_internal_bull: ShowFilter::All,
            show_internal_bear: ShowFilter::All,
            include_candle_colors: false,
            max_swing_labels: None,
        }
    }
}

fn leg(candles: &[Candle], size: usize, i: usize, prev: u8) -> u8 {
    if i < size + 1 || i >= candles.len() {
        return prev;
    }
    let anchor = &candles[i - size];
    let window = &candles[i - size + 1..i];
    let highest = window.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
    let lowest = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    if anchor.high > highest {
        0
    } else if anchor.low < lowest {
        1
    } else {
        prev
    }
}

fn true_range(candles: &[Candle], j: usize) -> f64 {
    let c = &candles[j];
    let prev_close = candles[j - 1].close;
    (c.high - c.low).max((c.high - prev_close).abs()).max((c.low - prev_close).abs())
}

/// Wilder's RMA true range, seeded from the first true range.
fn atr(candles: &[Candle], length: usize, up_to: usize) -> f64 {
    if length == 0 || up_to < 1 || up_to >= candles.len() {
        return 0.0;
    }
    let alpha = 1.0 / length as f64;
    let mut rma = 0.0;
    for j in 1..=up_to {
        let tr = true_range(candles, j);
        if j == 1 {
            rma = tr;
        } else {
            rma += alpha * (tr - rma);
        }
    }
    rma
}

fn trend_to_color(swing: Trend, internal: Trend) -> &'static str {
    match (swing, internal) {
        (Trend::Bull, Trend::Bull) => CANDLE_SWING_BULL_INTERNAL_BULL,
        (Trend::Bull, Trend::Bear) => CANDLE_SWING_BULL_INTERNAL_BEAR,
        (Trend::Bear, Trend::Bull) => CANDLE_SWING_BEAR_INTERNAL_BULL,
        (Trend::Bear, Trend::Bear) => CANDLE_SWING_BEAR_INTERNAL_BEAR,
    }
}

fn passes_filter(filter: ShowFilter, tag: &str) -> bool {
    match filter {
        ShowFilter::All => true,
        ShowFilter::BosOnly => tag == "BOS",
        ShowFilter::ChochOnly => tag == "CHoCH",
    }
}

pub fn compute_structure(candles: &[Candle], params: &StructureParams) -> StructureOutput {
    let s = params.swing_length;
    let i_len = INTERNAL_LENGTH;
    let e_len = EQUAL_HL_LENGTH;
    let min_len = s.max(i_len).max(e_len) + 2;
    let mut out = StructureOutput::default();
    if candles.len() < min_len {
        return out;
    }

    let mut sw_leg = 0u8;
    let mut int_leg = 0u8;
    let mut eq_leg = 0u8;

    let mut swing_high = Pivot { price: 0.0, bar_idx: 0, crossed: true };
    let mut swing_low = Pivot { price: 0.0, bar_idx: 0, crossed: true };
    let mut internal_high = Pivot { price: 0.0, bar_idx: 0, crossed: true };
    let mut internal_low = Pivot { price: 0.0, bar_idx: 0, crossed: true };

    let mut last_swing_high: Option<f64> = None;
    let mut last_swing_low: Option<f64> = None;
    let mut last_equal_high: Option<Pivot> = None;
    let mut last_equal_low: Option<Pivot> = None;

    let mut swing_trend = Trend::Bull;
    let mut internal_trend = Trend::Bull;

    let start = s.max(i_len).max(e_len) + 1;
    let last_bar = candles.len() - 1;

    for i in start..candles.len() {
        let c = &candles[i];

        let new_sw_leg = leg(candles, s, i, sw_leg);
        if new_sw_leg != sw_leg {
            let anchor = &candles[i - s];
            if new_sw_leg == 0 {
                let is_hh = last_swing_high.map(|p| anchor.high > p).unwrap_or(true);
                swing_high = Pivot { price: anchor.high, bar_idx: i - s, crossed: false };
                if params.show_swings {
                    out.swing_labels.push(SwingLabel {
                        bar_idx: i - s,
                        price: anchor.high,
                        label: if is_hh { "HH" } else { "LH" },
                    });
                }
                last_swing_high = Some(anchor.high);
            } else {
                let is_ll = last_swing_low.map(|p| anchor.low < p).unwrap_or(true);
                swing_low = Pivot { price: anchor.low, bar_idx: i - s, crossed: false };
                if params.show_swings {
                    out.swing_labels.push(SwingLabel {
                        bar_idx: i - s,
                        price: anchor.low,
                        label: if is_ll { "LL" } else { "HL" },
                    });
                }
                last_swing_low = Some(anchor.low);
            }
        }
        sw_leg = new_sw_leg;

        let new_int_leg = leg(candles, i_len, i, int_leg);
        if new_int_leg != int_leg {
            let anchor = &candles[i - i_len];
            if new_int_leg == 0 {
                internal_high = Pivot { price: anchor.high, bar_idx: i - i_len, crossed: false };
            } else {
                internal_low = Pivot { price: anchor.low, bar_idx: i - i_len, crossed: false };
            }
        }
        int_leg = new_int_leg;

        let new_eq_leg = leg(candles, e_len, i, eq_leg);
        if new_eq_leg != eq_leg && params.show_equal_hl && last_bar.saturating_sub(i - e_len) <= MAX_LOOKBACK {
            let anchor = &candles[i - e_len];
            let atr_val = if i >= ATR_LENGTH { atr(candles, ATR_LENGTH, i) } else { 0.0 };
            let thresh = params.equal_threshold * atr_val;
            if new_eq_leg == 0 {
                if let Some(prev) = last_equal_high {
                    if (anchor.high - prev.price).abs() < thresh {
                        out.equal_lines.push(EqualLine {
                            from_bar: prev.bar_idx,
                            to_bar: i - e_len,
                            price: anchor.high,
                            kind: "EQH",
                        });
                    }
                }
                last_equal_high = Some(Pivot { price: anchor.high, bar_idx: i - e_len, crossed: false });
            } else {
                if let Some(prev) = last_equal_low {
                    if (anchor.low - prev.price).abs() < thresh {
                        out.equal_lines.push(EqualLine {
                            from_bar: prev.bar_idx,
                            to_bar: i - e_len,
                            price: anchor.low,
                            kind: "EQL",
                        });
                    }
                }
                last_equal_low = Some(Pivot { price: anchor.low, bar_idx: i - e_len, crossed: false });
            }
        }
        eq_leg = new_eq_leg;

        macro_rules! emit {
            ($pivot:expr, $trend_field:expr, $new_trend:expr, $kind:expr, $color_bull:expr, $color_bear:expr, $filter:expr, $show:expr) => {{
                if $show && $pivot.valid(0) && !$pivot.crossed {
                    let tag = if $trend_field != $new_trend { "CHoCH" } else { "BOS" };
                    if passes_filter($filter, tag) {
                        let color = if $new_trend == Trend::Bull { $color_bull } else { $color_bear };
                        out.lines.push(StructureLine {
                            from_bar: $pivot.bar_idx,
                            to_bar: i,
                            price: $pivot.price,
                            tag,
                            kind: $kind,
                            color,
                        });
                    }
                    $trend_field = $new_trend;
                    $pivot.crossed = true;
                }
            }};
        }

        if params.show_structure {
            if c.close > swing_high.price && !swing_high.crossed {
                let filter = params.show_swing_bull;
                emit!(swing_high, swing_trend, Trend::Bull, "swing", SWING_BULL_COLOR, SWING_BULL_COLOR, filter, true);
            }
            if c.close < swing_low.price && !swing_low.crossed {
                let filter = params.show_swing_bear;
                emit!(swing_low, swing_trend, Trend::Bear, "swing", SWING_BEAR_COLOR, SWING_BEAR_COLOR, filter, true);
            }
        }
        if params.show_internals {
            if c.close > internal_high.price && !internal_high.crossed && internal_high.price != swing_high.price {
                let filter = params.show_internal_bull;
                emit!(internal_high, internal_trend, Trend::Bull, "internal", INTERNAL_BULL_COLOR, INTERNAL_BULL_COLOR, filter, true);
            }
            if c.close < internal_low.price && !internal_low.crossed && internal_low.price != swing_low.price {
                let filter = params.show_internal_bear;
                emit!(internal_low, internal_trend, Trend::Bear, "internal", INTERNAL_BEAR_COLOR, INTERNAL_BEAR_COLOR, filter, true);
            }
        }

        if params.include_candle_colors {
            out.candle_colors.insert(c.time_ms, trend_to_color(swing_trend, internal_trend));
        }
    }

    let cutoff = last_bar.saturating_sub(MAX_LOOKBACK);
    out.lines.retain(|l| l.from_bar >= cutoff);
    out.swing_labels.retain(|l| l.bar_idx >= cutoff);
    out.equal_lines.retain(|l| l.to_bar >= cutoff);

    truncate_keep_newest(&mut out.lines, MAX_STRUCTURE_ELEMENTS);
    truncate_keep_newest(&mut out.swing_labels, params.max_swing_labels.unwrap_or(MAX_SWING_LABELS));
    truncate_keep_newest(&mut out.equal_lines, MAX_EQUAL_ELEMENTS);

    out
}

fn truncate_keep_newest<T>(v: &mut Vec<T>, cap: usize) {
    if v.len() > cap {
        v.drain(0..v.len() - cap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synth_candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.3).sin() * 10.0 + i as f64 * 0.05;
                Candle { time_ms: i as i64 * 60_000, open: base, high: base + 2.0, low: base - 2.0, close: base + 0.5, volume: 100.0 }
            })
            .collect()
    }

    #[test]
    fn too_short_window_yields_empty_output() {
        let candles = synth_candles(10);
        let out = compute_structure(&candles, &StructureParams::default());
        assert!(out.lines.is_empty() && out.swing_labels.is_empty());
    }

    #[test]
    fn outputs_respect_caps_and_lookback() {
        let candles = synth_candles(400);
        let out = compute_structure(&candles, &StructureParams::default());
        assert!(out.lines.len() <= MAX_STRUCTURE_ELEMENTS);
        assert!(out.swing_labels.len() <= MAX_SWING_LABELS);
        assert!(out.equal_lines.len() <= MAX_EQUAL_ELEMENTS);
        let last_bar = candles.len() - 1;
        let cutoff = last_bar.saturating_sub(MAX_LOOKBACK);
        assert!(out.lines.iter().all(|l| l.from_bar >= cutoff));
    }

    #[test]
    fn atr_is_zero_before_enough_history() {
        let candles = synth_candles(5);
        assert_eq!(atr(&candles, 200, 0), 0.0);
    }
}
