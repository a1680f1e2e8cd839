//! Append-only trade journal: `index.jsonl` history, an atomically-rewritten
//! `current.json` of open trades, and per-entry markdown snapshots.

pub mod outcome_simulator;
pub mod snapshot;

use crate::errors::JournalError;
use crate::models::{Candle, Context, StreamKey};
use crate::strategy::chart_format::{Marker, StopLine};
use crate::strategy::types::{Side, StopSegment, TradeEvent};
use serde::{Deserialize, Serialize};
use snapshot::{build_entry_snapshot_markdown, EntrySnapshotInputs};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JournalRecord {
    Entry {
        #[serde(rename = "tradeId")]
        trade_id: String,
        time: i64,
        #[serde(rename = "barIndex")]
        bar_index: usize,
        side: Side,
        price: f64,
        #[serde(rename = "initialStopPrice")]
        initial_stop_price: f64,
        #[serde(rename = "targetPrice")]
        target_price: Option<f64>,
        context: Context,
        #[serde(rename = "snapshotFile")]
        snapshot_file: String,
    },
    StopMove {
        #[serde(rename = "tradeId")]
        trade_id: String,
        time: i64,
        price: f64,
        side: Side,
    },
    Exit {
        #[serde(rename = "tradeId")]
        trade_id: String,
        time: i64,
        #[serde(rename = "closePrice")]
        close_price: f64,
        #[serde(rename = "closeReason")]
        close_reason: String,
        points: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentTrade {
    #[serde(rename = "tradeId")]
    pub trade_id: String,
    #[serde(rename = "entryTime")]
    pub entry_time: i64,
    #[serde(rename = "entryPrice")]
    pub entry_price: f64,
    #[serde(rename = "initialStopPrice")]
    pub initial_stop_price: f64,
    #[serde(rename = "currentStopPrice")]
    pub current_stop_price: f64,
    pub side: Side,
    #[serde(rename = "targetPrice")]
    pub target_price: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CurrentTrades {
    pub trades: Vec<CurrentTrade>,
}

#[derive(Debug, Clone)]
pub struct ClosedTrade {
    pub trade_id: String,
    pub entry_time: i64,
    pub entry_price: f64,
    pub side: Side,
    pub initial_stop_price: f64,
    pub exit_time: i64,
    pub exit_price: f64,
    pub close_reason: String,
    pub points: f64,
    pub stop_segments: Vec<StopSegment>,
    pub markers: Vec<Marker>,
    pub stop_lines: Vec<StopLine>,
}

/// Per-(symbol, interval) journal. Callers are expected to serialize access through the
/// same per-key mutex the stream hub already holds — the journal itself does no locking.
pub struct Journal {
    dir: PathBuf,
}

impl Journal {
    pub fn new(trade_log_dir: &str, key: &StreamKey) -> Self {
        Self { dir: PathBuf::from(trade_log_dir).join(key.log_dir_name()) }
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("index.jsonl")
    }

    fn current_path(&self) -> PathBuf {
        self.dir.join("current.json")
    }

    fn snapshot_path(&self, trade_id: &str) -> PathBuf {
        self.dir.join(format!("entry_{trade_id}.md"))
    }

    pub fn load_current_trades(&self) -> CurrentTrades {
        match fs::read_to_string(self.current_path()) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                log::warn!("journal: current.json unreadable ({e}), treating as empty");
                CurrentTrades::default()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => CurrentTrades::default(),
            Err(e) => {
                log::warn!("journal: failed to read current.json: {e}, treating as empty");
                CurrentTrades::default()
            }
        }
    }

    fn save_current_trades(&self, trades: &CurrentTrades) -> Result<(), JournalError> {
        fs::create_dir_all(&self.dir)?;
        let tmp_path = self.dir.join(format!("current.json.tmp.{}", uuid::Uuid::new_v4()));
        fs::write(&tmp_path, serde_json::to_vec_pretty(trades)?)?;
        fs::rename(&tmp_path, self.current_path())?;
        Ok(())
    }

    fn append_record(&self, record: &JournalRecord) -> Result<(), JournalError> {
        fs::create_dir_all(&self.dir)?;
        let mut f = OpenOptions::new().create(true).append(true).open(self.index_path())?;
        writeln!(f, "{}", serde_json::to_string(record)?)?;
        Ok(())
    }

    pub fn append_entry(
        &self,
        event: &TradeEvent,
        candles: &[Candle],
        snapshot_inputs: &EntrySnapshotInputs,
    ) -> Result<String, JournalError> {
        let trade_id = event.trade_id();
        let snapshot_file = format!("entry_{trade_id}.md");

        fs::create_dir_all(&self.dir)?;
        fs::write(self.snapshot_path(&trade_id), build_entry_snapshot_markdown(event, candles, snapshot_inputs))?;

        self.append_record(&JournalRecord::Entry {
            trade_id: trade_id.clone(),
            time: event.time_s,
            bar_index: event.bar_index,
            side: event.side,
            price: event.price,
            initial_stop_price: event.initial_stop_price,
            target_price: event.target_price,
            context: event.context.clone(),
            snapshot_file,
        })?;

        let mut trades = self.load_current_trades();
        trades.trades.push(CurrentTrade {
            trade_id: trade_id.clone(),
            entry_time: event.time_s,
            entry_price: event.price,
            initial_stop_price: event.initial_stop_price,
            current_stop_price: event.initial_stop_price,
            side: event.side,
            target_price: event.target_price,
        });
        self.save_current_trades(&trades)?;
        log::info!("journal: entry {trade_id} logged ({:?} @ {})", event.side, event.price);
        Ok(trade_id)
    }

    pub fn append_stop_move(&self, trade_id: &str, time_s: i64, price: f64, side: Side) -> Result<(), JournalError> {
        self.append_record(&JournalRecord::StopMove { trade_id: trade_id.to_string(), time: time_s, price, side })?;

        let mut trades = self.load_current_trades();
        if let Some(t) = trades.trades.iter_mut().find(|t| t.trade_id == trade_id) {
            t.current_stop_price = price;
        }
        self.save_current_trades(&trades)?;
        log::debug!("journal: stop move {trade_id} -> {price}");
        Ok(())
    }

    pub fn append_exit(&self, trade_id: &str, time_s: i64, close_price: f64, close_reason: &str, points: f64) -> Result<(), JournalError> {
        self.append_record(&JournalRecord::Exit {
            trade_id: trade_id.to_string(),
            time: time_s,
            close_price,
            close_reason: close_reason.to_string(),
            points,
        })?;

        let mut trades = self.load_current_trades();
        trades.trades.retain(|t| t.trade_id != trade_id);
        self.save_current_trades(&trades)?;
        log::info!("journal: exit {trade_id} ({close_reason})");
        Ok(())
    }

    /// Reads the full append-only history and reconstructs every *closed* trade (both an
    /// entry and an exit present), with its walked stop-segment history and chart markers.
    pub fn get_trades(&self, since: Option<i64>) -> Result<Vec<ClosedTrade>, JournalError> {
        let content = match fs::read_to_string(self.index_path()) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        #[derive(Clone)]
        struct EntryView {
            time: i64,
            price: f64,
            side: Side,
            initial_stop_price: f64,
        }
        #[derive(Clone)]
        struct ExitView {
            time: i64,
            close_price: f64,
            close_reason: String,
            points: f64,
        }
        #[derive(Clone)]
        struct StopMoveView {
            time: i64,
            price: f64,
        }

        let mut entries: HashMap<String, EntryView> = HashMap::new();
        let mut exits: HashMap<String, ExitView> = HashMap::new();
        let mut stop_moves: HashMap<String, Vec<StopMoveView>> = HashMap::new();

        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let record: JournalRecord = match serde_json::from_str(line) {
                Ok(r) => r,
                Err(e) => {
                    log::warn!("journal: skipping malformed index record: {e}");
                    continue;
                }
            };
            match record {
                JournalRecord::Entry { trade_id, time, price, side, initial_stop_price, .. } => {
                    if since.is_some_and(|s| time < s) {
                        continue;
                    }
                    entries.insert(trade_id, EntryView { time, price, side, initial_stop_price });
                }
                JournalRecord::StopMove { trade_id, time, price, .. } => {
                    stop_moves.entry(trade_id).or_default().push(StopMoveView { time, price });
                }
                JournalRecord::Exit { trade_id, time, close_price, close_reason, points } => {
                    exits.insert(trade_id, ExitView { time, close_price, close_reason, points });
                }
            }
        }

        let mut out = Vec::new();
        for (trade_id, entry) in &entries {
            let Some(exit) = exits.get(trade_id) else { continue };

            let mut moves = stop_moves.get(trade_id).cloned().unwrap_or_default();
            moves.sort_by_key(|m| m.time);

            let mut segments = Vec::with_capacity(moves.len() + 1);
            let mut seg_start = entry.time;
            let mut seg_price = entry.initial_stop_price;
            for mv in &moves {
                segments.push(StopSegment { start_time_s: seg_start, end_time_s: mv.time, price: seg_price, side: entry.side });
                seg_start = mv.time;
                seg_price = mv.price;
            }
            segments.push(StopSegment { start_time_s: seg_start, end_time_s: exit.time, price: seg_price, side: entry.side });

            let marker = match entry.side {
                Side::Long => Marker { time_s: entry.time, shape: "arrowUp", color: "#22c55e", position: "below" },
                Side::Short => Marker { time_s: entry.time, shape: "arrowDown", color: "#dc2626", position: "above" },
                Side::None => continue,
            };
            let stop_lines = segments
                .iter()
                .map(|s| StopLine { start_time_s: s.start_time_s, end_time_s: s.end_time_s, price: s.price, color: "#f59e0b", width: 2, style: "dashed" })
                .collect();

            out.push(ClosedTrade {
                trade_id: trade_id.clone(),
                entry_time: entry.time,
                entry_price: entry.price,
                side: entry.side,
                initial_stop_price: entry.initial_stop_price,
                exit_time: exit.time,
                exit_price: exit.close_price,
                close_reason: exit.close_reason.clone(),
                points: exit.points,
                stop_segments: segments,
                markers: vec![marker],
                stop_lines,
            });
        }
        out.sort_by_key(|t| t.entry_time);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::order_blocks::OrderBlocksOutput;
    use snapshot::StructureSummary;
    use tempfile_shim::TempDir;

    // Minimal self-contained temp-dir helper so the journal's file-system tests don't
    // depend on an external tempfile crate the teacher doesn't carry.
    mod tempfile_shim {
        use std::path::PathBuf;

        pub struct TempDir(pub PathBuf);

        impl TempDir {
            pub fn new(label: &str) -> Self {
                let dir = std::env::temp_dir().join(format!("candle-stream-engine-test-{label}-{}", std::process::id()));
                let _ = std::fs::remove_dir_all(&dir);
                std::fs::create_dir_all(&dir).unwrap();
                TempDir(dir)
            }
            pub fn path(&self) -> &std::path::Path {
                &self.0
            }
        }

        impl Drop for TempDir {
            fn drop(&mut self) {
                let _ = std::fs::remove_dir_all(&self.0);
            }
        }
    }

    fn sample_event(time_s: i64) -> TradeEvent {
        TradeEvent {
            time_s,
            bar_index: 10,
            event_type: "OB_TREND_BUY".into(),
            side: Side::Long,
            price: 100.0,
            target_price: None,
            initial_stop_price: 97.0,
            context: Context::new(),
        }
    }

    fn sample_candles() -> Vec<Candle> {
        (0..25).map(|i| Candle { time_ms: i * 60_000, open: 100.0, high: 101.0, low: 99.0, close: 100.0, volume: 10.0 }).collect()
    }

    #[test]
    fn entry_then_exit_round_trips_through_current_and_index() {
        let tmp = TempDir::new("entry-exit");
        let key = StreamKey::new("BTCUSDT", crate::models::Interval::Min60);
        let journal = Journal { dir: tmp.path().join(key.log_dir_name()) };

        let event = sample_event(1_700_000_000);
        let candles = sample_candles();
        let inputs = EntrySnapshotInputs {
            volume_profile: None,
            sr_lines: &[],
            order_blocks: &OrderBlocksOutput::default(),
            structure_summary: StructureSummary::default(),
        };
        let trade_id = journal.append_entry(&event, &candles, &inputs).unwrap();

        let current = journal.load_current_trades();
        assert_eq!(current.trades.len(), 1);
        assert_eq!(current.trades[0].trade_id, trade_id);

        journal.append_exit(&trade_id, 1_700_003_600, 105.0, "take_profit", 5.0).unwrap();
        let current_after_exit = journal.load_current_trades();
        assert!(current_after_exit.trades.is_empty());

        let closed = journal.get_trades(None).unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].close_reason, "take_profit");
    }

    #[test]
    fn open_trade_without_exit_is_excluded_from_get_trades() {
        let tmp = TempDir::new("open-only");
        let key = StreamKey::new("ETHUSDT", crate::models::Interval::Min15);
        let journal = Journal { dir: tmp.path().join(key.log_dir_name()) };

        let event = sample_event(1_700_000_000);
        let candles = sample_candles();
        let inputs = EntrySnapshotInputs {
            volume_profile: None,
            sr_lines: &[],
            order_blocks: &OrderBlocksOutput::default(),
            structure_summary: StructureSummary::default(),
        };
        journal.append_entry(&event, &candles, &inputs).unwrap();

        assert!(journal.get_trades(None).unwrap().is_empty());
    }

    #[test]
    fn missing_current_json_loads_as_empty_not_an_error() {
        let tmp = TempDir::new("missing-current");
        let journal = Journal { dir: tmp.path().join("NOPE_60") };
        assert!(journal.load_current_trades().trades.is_empty());
    }
}
