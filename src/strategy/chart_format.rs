//! Converts strategy output into chart-ready marker/line primitives.

use crate::strategy::types::{Side, StopSegment, TradeEvent};
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Marker {
    pub time_s: i64,
    pub shape: &'static str,
    pub color: &'static str,
    pub position: &'static str,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StopLine {
    pub start_time_s: i64,
    pub end_time_s: i64,
    pub price: f64,
    pub color: &'static str,
    pub width: u8,
    pub style: &'static str,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ChartOutput {
    pub markers: Vec<Marker>,
    pub stop_lines: Vec<StopLine>,
}

pub fn strategy_output_to_chart(events: &[TradeEvent], stop_segments: &[StopSegment]) -> ChartOutput {
    let markers = events
        .iter()
        .filter_map(|ev| match ev.side {
            Side::Long => Some(Marker { time_s: ev.time_s, shape: "arrowUp", color: "#22c55e", position: "below" }),
            Side::Short => Some(Marker { time_s: ev.time_s, shape: "arrowDown", color: "#dc2626", position: "above" }),
            Side::None => None,
        })
        .collect();

    let stop_lines = stop_segments
        .iter()
        .map(|seg| StopLine {
            start_time_s: seg.start_time_s,
            end_time_s: seg.end_time_s,
            price: seg.price,
            color: "#f59e0b",
            width: 2,
            style: "dashed",
        })
        .collect();

    ChartOutput { markers, stop_lines }
}
