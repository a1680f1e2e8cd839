//! Builds the human-readable `entry_<tradeId>.md` snapshot written alongside each journal entry.

use crate::indicators::order_blocks::OrderBlocksOutput;
use crate::indicators::support_resistance::SupportResistanceLine;
use crate::indicators::volume_profile::VolumeProfile;
use crate::models::Candle;
use crate::strategy::types::TradeEvent;
use std::fmt::Write as _;

const VOLUME_PROFILE_MAX_ROWS: usize = 50;
const BAR_DATA_ROWS: usize = 20;

#[derive(Debug, Clone, Copy, Default)]
pub struct StructureSummary {
    pub structure_lines: usize,
    pub swing_labels: usize,
    pub equal_lines: usize,
}

pub struct EntrySnapshotInputs<'a> {
    pub volume_profile: Option<&'a VolumeProfile>,
    pub sr_lines: &'a [SupportResistanceLine],
    pub order_blocks: &'a OrderBlocksOutput,
    pub structure_summary: StructureSummary,
}

pub fn build_entry_snapshot_markdown(event: &TradeEvent, candles: &[Candle], inputs: &EntrySnapshotInputs) -> String {
    let mut md = String::new();

    writeln!(md, "# Trade Entry Snapshot — {}\n", event.trade_id()).ok();

    writeln!(md, "## 1. Bar Data (OHLCV)\n").ok();
    writeln!(md, "| time | open | high | low | close | volume |").ok();
    writeln!(md, "|---|---|---|---|---|---|").ok();
    let start = candles.len().saturating_sub(BAR_DATA_ROWS);
    for c in &candles[start..] {
        writeln!(md, "| {} | {} | {} | {} | {} | {} |", c.time_s(), c.open, c.high, c.low, c.close, c.volume).ok();
    }
    writeln!(md).ok();

    writeln!(md, "## 2. Calculated Indicators\n").ok();

    writeln!(md, "### 2.1 Volume Profile\n").ok();
    match inputs.volume_profile {
        Some(vp) => {
            writeln!(md, "| price | vol |").ok();
            writeln!(md, "|---|---|").ok();
            let mut rows: Vec<_> = vp.profile.iter().collect();
            rows.sort_by(|a, b| b.vol.partial_cmp(&a.vol).unwrap());
            for level in rows.iter().take(VOLUME_PROFILE_MAX_ROWS) {
                writeln!(md, "| {} | {} |", level.price, level.vol).ok();
            }
            if rows.len() > VOLUME_PROFILE_MAX_ROWS {
                writeln!(md, "\n_truncated: {} of {} levels shown_", VOLUME_PROFILE_MAX_ROWS, rows.len()).ok();
            }
        }
        None => {
            writeln!(md, "_unavailable_").ok();
        }
    }
    writeln!(md).ok();

    writeln!(md, "### 2.2 Support/Resistance\n").ok();
    if inputs.sr_lines.is_empty() {
        writeln!(md, "_unavailable_").ok();
    } else {
        writeln!(md, "| price | width |").ok();
        writeln!(md, "|---|---|").ok();
        for line in inputs.sr_lines {
            writeln!(md, "| {} | {} |", line.price, line.width).ok();
        }
    }
    writeln!(md).ok();

    writeln!(md, "### 2.3 Order Blocks\n").ok();
    writeln!(md, "| list | top | bottom | loc | breaker |").ok();
    writeln!(md, "|---|---|---|---|---|").ok();
    for (label, obs) in [
        ("bullish", &inputs.order_blocks.bullish),
        ("bearish", &inputs.order_blocks.bearish),
        ("bullishBreakers", &inputs.order_blocks.bullish_breakers),
        ("bearishBreakers", &inputs.order_blocks.bearish_breakers),
    ] {
        for ob in obs {
            writeln!(md, "| {} | {} | {} | {} | {} |", label, ob.top, ob.bottom, ob.loc, ob.breaker).ok();
        }
    }
    writeln!(md).ok();

    writeln!(md, "### 2.4 Smart Money Structure\n").ok();
    writeln!(
        md,
        "structure lines: {}, swing labels: {}, equal highs/lows: {}\n",
        inputs.structure_summary.structure_lines, inputs.structure_summary.swing_labels, inputs.structure_summary.equal_lines
    )
    .ok();

    writeln!(md, "## 3. Trade Orders (Entry Signals)\n").ok();
    writeln!(md, "| side | price | initialStopPrice | targetPrice |").ok();
    writeln!(md, "|---|---|---|---|").ok();
    writeln!(
        md,
        "| {:?} | {} | {} | {} |\n",
        event.side,
        event.price,
        event.initial_stop_price,
        event.target_price.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string())
    )
    .ok();

    writeln!(md, "## 4. Trailing Stop Events\n").ok();
    writeln!(md, "(none yet)\n").ok();

    writeln!(md, "*End of export. AI: Use this data to review the strategy logic and propose improvements.*").ok();

    md
}
