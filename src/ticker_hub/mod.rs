//! Ticker-only fanout hub: one upstream task per symbol, pushing last-price ticks to
//! subscribers. Simpler sibling of `stream_hub` — no candle window, no strategy, no journal.

use crate::config::settings::Settings;
use crate::errors::HubError;
use crate::models::TickerSnapshot;
use crate::upstream::UpstreamClient;
use futures_util::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex as TokioMutex, Notify};
use tokio::task::JoinHandle;

const QUEUE_CAPACITY: usize = 1000;
const RESTART_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct TickerQueue {
    id: u64,
    inner: Arc<StdMutex<VecDeque<serde_json::Value>>>,
    notify: Arc<Notify>,
}

impl TickerQueue {
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

    pub async fn recv(&self) -> serde_json::Value {
        loop {
            if let Some(v) = self.inner.lock().unwrap().pop_front() {
                return v;
            }
            self.notify.notified().await;
        }
    }
}

struct SymbolState {
    last_tick: Option<TickerSnapshot>,
    queues: Vec<TickerQueue>,
    task: Option<JoinHandle<()>>,
}

pub struct TickerHub<U: UpstreamClient> {
    upstream: Arc<U>,
    #[allow(dead_code)]
    settings: Arc<Settings>,
    symbols: TokioMutex<HashMap<String, SymbolState>>,
    next_queue_id: AtomicU64,
}

impl<U: UpstreamClient + 'static> TickerHub<U> {
    pub fn new(upstream: Arc<U>, settings: Arc<Settings>) -> Arc<Self> {
        Arc::new(Self { upstream, settings, symbols: TokioMutex::new(HashMap::new()), next_queue_id: AtomicU64::new(0) })
    }

    pub async fn subscribe(hub: &Arc<Self>, symbol: String) -> TickerQueue {
        let mut guard = hub.symbols.lock().await;
        let entry = guard.entry(symbol.clone()).or_insert_with(|| SymbolState { last_tick: None, queues: Vec::new(), task: None });

        let qid = hub.next_queue_id.fetch_add(1, Ordering::Relaxed);
        let queue = TickerQueue::new(qid);
        entry.queues.push(queue.clone());

        let last_tick = entry.last_tick.clone();
        let needs_spawn = entry.task.as_ref().map_or(true, |h| h.is_finished());
        drop(guard);

        if needs_spawn {
            let spawned_hub = Arc::clone(hub);
            let symbol_for_task = symbol.clone();
            let handle = tokio::spawn(async move {
                Self::run_symbol_stream(spawned_hub, symbol_for_task).await;
            });
            let mut guard = hub.symbols.lock().await;
            if let Some(entry) = guard.get_mut(&symbol) {
                entry.task = Some(handle);
            }
            log::info!("ticker task started for {symbol}");
        }

        if let Some(tick) = last_tick {
            queue.push(serde_json::json!({ "event": "snapshot", "ticker": tick }));
        }

        queue
    }

    /// Last known tick for `symbol`, if a stream task has run for it since startup.
    pub async fn snapshot(&self, symbol: &str) -> Option<TickerSnapshot> {
        self.symbols.lock().await.get(symbol).and_then(|s| s.last_tick.clone())
    }

    pub async fn unsubscribe(&self, symbol: &str, queue_id: u64) {
        let mut guard = self.symbols.lock().await;
        if let Some(entry) = guard.get_mut(symbol) {
            entry.queues.retain(|q| q.id() != queue_id);
            if entry.queues.is_empty() {
                if let Some(handle) = entry.task.take() {
                    handle.abort();
                }
                guard.remove(symbol);
                log::info!("ticker stream for {symbol} torn down: last subscriber gone");
            }
        }
    }

    async fn broadcast(&self, symbol: &str, payload: serde_json::Value) {
        let queues = {
            let guard = self.symbols.lock().await;
            match guard.get(symbol) {
                Some(state) => state.queues.clone(),
                None => return,
            }
        };
        for q in queues {
            q.push(payload.clone());
        }
    }

    async fn run_symbol_stream(hub: Arc<Self>, symbol: String) {
        loop {
            if let Err(e) = Self::run_symbol_stream_once(&hub, &symbol).await {
                log::warn!("ticker task for {symbol} error: {e}, retrying in 2s");
            }
            {
                let guard = hub.symbols.lock().await;
                if !guard.contains_key(&symbol) {
                    return;
                }
            }
            tokio::time::sleep(RESTART_BACKOFF).await;
        }
    }

    async fn run_symbol_stream_once(hub: &Arc<Self>, symbol: &str) -> Result<(), HubError> {
        let mut tick_stream = hub.upstream.stream_ticker(symbol).await?;
        while let Some(tick) = tick_stream.next().await {
            let tick = tick?;
            let snapshot = TickerSnapshot {
                symbol: tick.symbol.clone(),
                price: tick.price,
                change_24h_percent: tick.change_24h_percent,
                volume_24h: tick.volume_24h,
            };

            {
                let mut guard = hub.symbols.lock().await;
                if let Some(state) = guard.get_mut(symbol) {
                    state.last_tick = Some(snapshot.clone());
                } else {
                    return Ok(());
                }
            }

            hub.broadcast(symbol, serde_json::json!({ "event": "tick", "ticker": snapshot })).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ticker_queue_drops_oldest_on_overflow() {
        let q = TickerQueue::new(0);
        for i in 0..(QUEUE_CAPACITY + 1) {
            q.push(serde_json::json!(i));
        }
        let first = q.recv().await;
        assert_eq!(first, serde_json::json!(1));
    }
}
