//! Reference-counted multiplexer: one upstream task per `(symbol, interval)`, merging
//! historical and live bars and fanning out backpressure-aware events to subscribers.
//!
//! Lock discipline: the `streams` mutex protects only membership (candle window, queue
//! set, task handle, mode flags). Indicator computation, strategy execution, journal I/O,
//! and every upstream call happen outside the lock, over snapshots taken while holding it.

use crate::config::settings::Settings;
use crate::errors::HubError;
use crate::indicators::order_blocks::{compute_order_blocks, OrderBlocksOutput};
use crate::indicators::smart_money_structure::{compute_structure, StructureOutput, StructureParams};
use crate::indicators::support_resistance::{compute_support_resistance_lines, SupportResistanceLine};
use crate::indicators::volume_profile::{build_volume_profile_from_candles, VolumeProfile};
use crate::journal::snapshot::{EntrySnapshotInputs, StructureSummary};
use crate::journal::outcome_simulator::compute_trade_results;
use crate::journal::{CurrentTrade, Journal};
use crate::models::{BarUpdate, Candle, Context, StreamKey, StrategyMarkers};
use crate::strategy::chart_format::strategy_output_to_chart;
use crate::strategy::order_block_trend_following::{compute_order_block_trend_following, StrategyParams};
use crate::strategy::types::{Side, StopSegment, TradeEvent};
use crate::upstream::UpstreamClient;
use futures_util::StreamExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex as TokioMutex, Notify};
use tokio::task::JoinHandle;

const QUEUE_CAPACITY: usize = 200;
const RESTART_BACKOFF: Duration = Duration::from_secs(2);

/// Bounded FIFO of JSON payloads. Drops the oldest entry on overflow; producers never block.
#[derive(Clone)]
pub struct SubscriberQueue {
    id: u64,
    inner: Arc<StdMutex<VecDeque<serde_json::Value>>>,
    notify: Arc<Notify>,
}

impl SubscriberQueue {
    fn new(id: u64) -> Self {
        Self { id, inner: Arc::new(StdMutex::new(VecDeque::new())), notify: Arc::new(Notify::new()) }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn push(&self, payload: serde_json::Value) {
        let mut q = self.inner.lock().unwrap();
        if q.len() >= QUEUE_CAPACITY {
            q.pop_front();
        }
        q.push_back(payload);
        drop(q);
        self.notify.notify_one();
    }

    /// Waits for and returns the next payload. Callers wanting a heartbeat timeout should
    /// wrap this in `tokio::time::timeout` — the hub itself does not timekeep heartbeats.
    pub async fn recv(&self) -> serde_json::Value {
        loop {
            if let Some(v) = self.inner.lock().unwrap().pop_front() {
                return v;
            }
            self.notify.notified().await;
        }
    }
}

#[derive(Debug, Clone, Default)]
struct TradingBookkeeping {
    logged_entry_ids: HashSet<String>,
    logged_exit_ids: HashSet<String>,
    last_stop_price_per_trade: HashMap<String, f64>,
    restored_trades: Vec<CurrentTrade>,
    restored: bool,
}

struct StreamState {
    candles: Vec<Candle>,
    queues: Vec<SubscriberQueue>,
    task: Option<JoinHandle<()>>,
    vp_window: usize,
    strategy_markers: StrategyMarkers,
    trading: TradingBookkeeping,
}

impl StreamState {
    fn new(vp_window: usize, strategy_markers: StrategyMarkers) -> Self {
        Self { candles: Vec::new(), queues: Vec::new(), task: None, vp_window, strategy_markers, trading: TradingBookkeeping::default() }
    }
}

struct Graphics {
    order_blocks: OrderBlocksOutput,
    structure: StructureOutput,
    volume_profile: Option<VolumeProfile>,
    sr_lines: Vec<SupportResistanceLine>,
    strategy_events: Vec<TradeEvent>,
    strategy_segments: Vec<StopSegment>,
}

fn compute_graphics(candles: &[Candle], vp_window: usize, markers: StrategyMarkers) -> Graphics {
    let structure_params = StructureParams { include_candle_colors: true, ..StructureParams::default() };
    let structure = compute_structure(candles, &structure_params);
    let order_blocks = compute_order_blocks(candles, 20, 5, 5, false, true);

    let last_time_s = candles.last().map(|c| c.time_s()).unwrap_or(0);
    let volume_profile = build_volume_profile_from_candles(candles, last_time_s, 6, 500, vp_window);
    let sr_lines = volume_profile
        .as_ref()
        .map(|vp| compute_support_resistance_lines(&vp.profile, 9, 8, 1.0, 10.0))
        .unwrap_or_default();

    let (strategy_events, strategy_segments) = if markers != StrategyMarkers::Off {
        compute_order_block_trend_following(candles, Some(&structure.candle_colors), &sr_lines, &StrategyParams::default())
    } else {
        (Vec::new(), Vec::new())
    };

    Graphics { order_blocks, structure, volume_profile, sr_lines, strategy_events, strategy_segments }
}

fn graphics_to_json(g: &Graphics, include_strategy_signals: bool) -> serde_json::Value {
    let mut obj = serde_json::json!({
        "orderBlocks": {
            "bullish": g.order_blocks.bullish,
            "bearish": g.order_blocks.bearish,
            "bullishBreakers": g.order_blocks.bullish_breakers,
            "bearishBreakers": g.order_blocks.bearish_breakers,
            "barMarkers": g.order_blocks.bar_markers,
        },
        "smartMoney": {
            "structure": {
                "lines": g.structure.lines,
                "swingLabels": g.structure.swing_labels,
                "equalLines": g.structure.equal_lines,
            }
        },
    });

    if let Some(vp) = &g.volume_profile {
        obj["volumeProfile"] = serde_json::json!(vp);
        obj["supportResistance"] = serde_json::json!(g.sr_lines);
    }
    if include_strategy_signals {
        obj["strategySignals"] = serde_json::json!(strategy_output_to_chart(&g.strategy_events, &g.strategy_segments));
    }
    obj
}

#[derive(PartialEq, Eq)]
enum MergeOutcome {
    Appended,
    Replaced,
    Discarded,
}

fn merge_candle(candles: &mut Vec<Candle>, candidate: Candle, snapshot_limit: usize) -> MergeOutcome {
    match candles.last() {
        None => {
            candles.push(candidate);
            MergeOutcome::Appended
        }
        Some(last) if candidate.time_ms > last.time_ms => {
            candles.push(candidate);
            if candles.len() > snapshot_limit {
                let excess = candles.len() - snapshot_limit;
                candles.drain(0..excess);
            }
            MergeOutcome::Appended
        }
        Some(last) if candidate.time_ms == last.time_ms => {
            *candles.last_mut().unwrap() = candidate;
            MergeOutcome::Replaced
        }
        _ => {
            if let Some(pos) = candles.iter().position(|c| c.time_ms == candidate.time_ms) {
                candles[pos] = candidate;
                MergeOutcome::Replaced
            } else {
                log::debug!("discarding out-of-order bar update at {}", candidate.time_ms);
                MergeOutcome::Discarded
            }
        }
    }
}

fn latest_matching_trade(events: &[TradeEvent], seg: &StopSegment) -> Option<String> {
    events
        .iter()
        .filter(|e| e.side == seg.side && e.time_s <= seg.start_time_s)
        .max_by_key(|e| e.time_s)
        .map(|e| e.trade_id())
}

fn restored_trades_to_events(restored: &[CurrentTrade], candles: &[Candle]) -> Vec<TradeEvent> {
    restored
        .iter()
        .filter_map(|t| {
            let bar_index = candles.iter().position(|c| c.time_s() == t.entry_time)?;
            Some(TradeEvent {
                time_s: t.entry_time,
                bar_index,
                event_type: "restored".to_string(),
                side: t.side,
                price: t.entry_price,
                target_price: t.target_price,
                initial_stop_price: t.initial_stop_price,
                context: Context::new(),
            })
        })
        .collect()
}

pub struct StreamHub<U: UpstreamClient> {
    upstream: Arc<U>,
    settings: Arc<Settings>,
    streams: TokioMutex<HashMap<StreamKey, StreamState>>,
    next_queue_id: AtomicU64,
}

impl<U: UpstreamClient + 'static> StreamHub<U> {
    pub fn new(upstream: Arc<U>, settings: Arc<Settings>) -> Arc<Self> {
        Arc::new(Self { upstream, settings, streams: TokioMutex::new(HashMap::new()), next_queue_id: AtomicU64::new(0) })
    }

    /// Takes `hub` by explicit `&Arc<Self>` (rather than as a `self` receiver) so the
    /// spawned stream task can hold its own `Arc` clone across the `'static` task boundary.
    pub async fn subscribe(hub: &Arc<Self>, key: StreamKey, vp_window: usize, strategy_markers: StrategyMarkers) -> SubscriberQueue {
        let mut guard = hub.streams.lock().await;
        let entry = guard.entry(key.clone()).or_insert_with(|| StreamState::new(vp_window, strategy_markers));
        entry.vp_window = vp_window;
        entry.strategy_markers = strategy_markers;

        let qid = hub.next_queue_id.fetch_add(1, Ordering::Relaxed);
        let queue = SubscriberQueue::new(qid);
        entry.queues.push(queue.clone());

        let candles_snapshot = (!entry.candles.is_empty()).then(|| entry.candles.clone());
        let needs_spawn = entry.task.as_ref().map_or(true, |h| h.is_finished());
        drop(guard);

        if needs_spawn {
            let spawned_hub = Arc::clone(hub);
            let key_for_task = key.clone();
            let handle = tokio::spawn(async move {
                Self::run_stream(spawned_hub, key_for_task).await;
            });
            let mut guard = hub.streams.lock().await;
            if let Some(entry) = guard.get_mut(&key) {
                entry.task = Some(handle);
            }
            log::info!("stream task started for {}/{}", key.symbol, key.interval);
        }

        if let Some(candles) = candles_snapshot {
            let graphics = compute_graphics(&candles, vp_window, strategy_markers);
            let include_strategy = strategy_markers == StrategyMarkers::Simulation;
            let payload = serde_json::json!({
                "event": "snapshot",
                "candles": candles,
                "graphics": graphics_to_json(&graphics, include_strategy),
            });
            queue.push(payload);
        }

        queue
    }

    pub async fn unsubscribe(&self, key: &StreamKey, queue_id: u64) {
        let mut guard = self.streams.lock().await;
        if let Some(entry) = guard.get_mut(key) {
            entry.queues.retain(|q| q.id() != queue_id);
            if entry.queues.is_empty() {
                if let Some(handle) = entry.task.take() {
                    handle.abort();
                }
                guard.remove(key);
                log::info!("stream for {}/{} torn down: last subscriber gone", key.symbol, key.interval);
            }
        }
    }

    async fn broadcast(&self, key: &StreamKey, payload: serde_json::Value) {
        let queues = {
            let guard = self.streams.lock().await;
            match guard.get(key) {
                Some(state) => state.queues.clone(),
                None => return,
            }
        };
        for q in queues {
            q.push(payload.clone());
        }
    }

    async fn resync(hub: &Arc<Self>, key: &StreamKey) -> Result<(), HubError> {
        let limit = hub.settings.snapshot_limit;
        let candles = hub.upstream.get_klines(&key.symbol, key.interval, limit).await?;

        let (vp_window, markers) = {
            let mut guard = hub.streams.lock().await;
            let Some(state) = guard.get_mut(key) else { return Ok(()) };
            state.candles = candles.clone();
            (state.vp_window, state.strategy_markers)
        };

        let graphics = compute_graphics(&candles, vp_window, markers);
        let include_strategy = markers != StrategyMarkers::Off;
        let mut payload = serde_json::json!({
            "event": "snapshot",
            "candles": candles,
            "graphics": graphics_to_json(&graphics, include_strategy),
        });

        if markers == StrategyMarkers::Trade {
            Self::apply_trade_journal(hub, key, &candles, &graphics).await;
            payload["graphics"].as_object_mut().unwrap().remove("strategySignals");
        }

        hub.broadcast(key, payload).await;
        Ok(())
    }

    async fn apply_trade_journal(hub: &Arc<Self>, key: &StreamKey, candles: &[Candle], graphics: &Graphics) {
        let needs_restore = {
            let guard = hub.streams.lock().await;
            match guard.get(key) {
                Some(state) => !state.trading.restored,
                None => return,
            }
        };

        if needs_restore {
            let journal = Journal::new(&hub.settings.trade_log_dir, key);
            let current = journal.load_current_trades();

            let mut guard = hub.streams.lock().await;
            let Some(state) = guard.get_mut(key) else { return };
            if !state.trading.restored {
                for t in &current.trades {
                    state.trading.logged_entry_ids.insert(t.trade_id.clone());
                    state.trading.last_stop_price_per_trade.insert(t.trade_id.clone(), t.current_stop_price);
                }
                state.trading.restored_trades = current.trades;
                state.trading.restored = true;
            }
        }

        let mut bookkeeping = {
            let guard = hub.streams.lock().await;
            let Some(state) = guard.get(key) else { return };
            state.trading.clone()
        };

        let journal = Journal::new(&hub.settings.trade_log_dir, key);

        for ev in &graphics.strategy_events {
            let trade_id = ev.trade_id();
            if bookkeeping.logged_entry_ids.contains(&trade_id) {
                continue;
            }
            let inputs = EntrySnapshotInputs {
                volume_profile: graphics.volume_profile.as_ref(),
                sr_lines: &graphics.sr_lines,
                order_blocks: &graphics.order_blocks,
                structure_summary: StructureSummary {
                    structure_lines: graphics.structure.lines.len(),
                    swing_labels: graphics.structure.swing_labels.len(),
                    equal_lines: graphics.structure.equal_lines.len(),
                },
            };
            match journal.append_entry(ev, candles, &inputs) {
                Ok(_) => {
                    bookkeeping.logged_entry_ids.insert(trade_id.clone());
                    bookkeeping.last_stop_price_per_trade.insert(trade_id, ev.initial_stop_price);
                }
                Err(e) => log::error!("journal append_entry failed for {trade_id}: {e}"),
            }
        }

        for seg in &graphics.strategy_segments {
            if let Some(trade_id) = latest_matching_trade(&graphics.strategy_events, seg) {
                let last_known = bookkeeping.last_stop_price_per_trade.get(&trade_id).copied();
                if last_known != Some(seg.price) {
                    match journal.append_stop_move(&trade_id, seg.end_time_s, seg.price, seg.side) {
                        Ok(()) => {
                            bookkeeping.last_stop_price_per_trade.insert(trade_id, seg.price);
                        }
                        Err(e) => log::error!("journal append_stop_move failed for {trade_id}: {e}"),
                    }
                }
            }
        }

        let mut all_events = graphics.strategy_events.clone();
        all_events.extend(restored_trades_to_events(&bookkeeping.restored_trades, candles));
        for result in compute_trade_results(&all_events, candles, &graphics.strategy_segments) {
            if result.close_reason == "end_of_data" || bookkeeping.logged_exit_ids.contains(&result.trade_id) {
                continue;
            }
            match journal.append_exit(&result.trade_id, result.close_time_s, result.close_price, result.close_reason, result.points) {
                Ok(()) => {
                    bookkeeping.logged_exit_ids.insert(result.trade_id);
                }
                Err(e) => log::error!("journal append_exit failed for {}: {e}", result.trade_id),
            }
        }

        let mut guard = hub.streams.lock().await;
        if let Some(state) = guard.get_mut(key) {
            state.trading = bookkeeping;
        }
    }

    async fn run_stream_once(hub: &Arc<Self>, key: &StreamKey) -> Result<(), HubError> {
        Self::resync(hub, key).await?;

        let mut bar_stream = hub.upstream.stream_kline(&key.symbol, key.interval).await?;
        while let Some(update) = bar_stream.next().await {
            let update: BarUpdate = update?;
            let candidate: Candle = update.into();

            let (outcome, candles_snapshot, vp_window, markers) = {
                let mut guard = hub.streams.lock().await;
                let Some(state) = guard.get_mut(key) else { return Ok(()) };
                let outcome = merge_candle(&mut state.candles, candidate, hub.settings.snapshot_limit);
                (outcome, state.candles.clone(), state.vp_window, state.strategy_markers)
            };

            if outcome == MergeOutcome::Discarded {
                continue;
            }

            let graphics = compute_graphics(&candles_snapshot, vp_window, markers);
            let include_strategy = markers != StrategyMarkers::Off;
            let mut payload = serde_json::json!({
                "event": "upsert",
                "candle": candles_snapshot.last(),
                "graphics": graphics_to_json(&graphics, include_strategy),
            });

            if markers == StrategyMarkers::Trade {
                Self::apply_trade_journal(hub, key, &candles_snapshot, &graphics).await;
                payload["graphics"].as_object_mut().unwrap().remove("strategySignals");
            }

            hub.broadcast(key, payload).await;

            if outcome == MergeOutcome::Appended {
                Self::resync(hub, key).await?;
            }
        }
        Ok(())
    }

    async fn run_stream(hub: Arc<Self>, key: StreamKey) {
        loop {
            if let Err(e) = Self::run_stream_once(&hub, &key).await {
                log::warn!("stream task for {}/{} error: {e}, retrying in 2s", key.symbol, key.interval);
            }
            {
                let guard = hub.streams.lock().await;
                if !guard.contains_key(&key) {
                    return;
                }
            }
            tokio::time::sleep(RESTART_BACKOFF).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(time_ms: i64, close: f64) -> Candle {
        Candle { time_ms, open: close, high: close + 1.0, low: close - 1.0, close, volume: 10.0 }
    }

    #[test]
    fn merge_appends_when_empty() {
        let mut candles = Vec::new();
        let outcome = merge_candle(&mut candles, candle(1000, 100.0), 1500);
        assert!(matches!(outcome, MergeOutcome::Appended));
        assert_eq!(candles.len(), 1);
    }

    #[test]
    fn merge_replaces_same_time_bar() {
        let mut candles = vec![candle(1000, 100.0)];
        let outcome = merge_candle(&mut candles, candle(1000, 101.0), 1500);
        assert!(matches!(outcome, MergeOutcome::Replaced));
        assert_eq!(candles[0].close, 101.0);
    }

    #[test]
    fn merge_appends_and_truncates_on_rollover() {
        let mut candles: Vec<Candle> = (0..5).map(|i| candle(i * 1000, 100.0)).collect();
        let outcome = merge_candle(&mut candles, candle(5000, 100.0), 3);
        assert!(matches!(outcome, MergeOutcome::Appended));
        assert_eq!(candles.len(), 3);
        assert_eq!(candles.last().unwrap().time_ms, 5000);
    }

    #[test]
    fn merge_replaces_stale_bar_found_by_time() {
        let mut candles: Vec<Candle> = (0..5).map(|i| candle(i * 1000, 100.0)).collect();
        let outcome = merge_candle(&mut candles, candle(2000, 999.0), 1500);
        assert!(matches!(outcome, MergeOutcome::Replaced));
        assert_eq!(candles[2].close, 999.0);
    }

    #[test]
    fn merge_discards_unmatched_stale_bar() {
        let mut candles: Vec<Candle> = (1..5).map(|i| candle(i * 1000, 100.0)).collect();
        let outcome = merge_candle(&mut candles, candle(500, 999.0), 1500);
        assert!(matches!(outcome, MergeOutcome::Discarded));
        assert_eq!(candles.len(), 4);
    }

    #[tokio::test]
    async fn subscriber_queue_drops_oldest_on_overflow() {
        let q = SubscriberQueue::new(0);
        for i in 0..201 {
            q.push(serde_json::json!(i));
        }
        let first = q.recv().await;
        assert_eq!(first, serde_json::json!(1));
    }
}
