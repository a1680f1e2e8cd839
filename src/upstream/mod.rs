//! The upstream exchange adapter boundary. `UpstreamClient` is the interface the stream
//! hub consumes; `bybit` is the one concrete implementation this crate ships.

pub mod bybit;

use crate::errors::HubError;
use crate::models::{BarUpdate, Candle, Interval, SymbolInfo, TickerTick};
use async_trait::async_trait;
use futures::stream::BoxStream;

pub use bybit::BybitClient;

#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn list_spot_symbols(&self) -> Result<Vec<SymbolInfo>, HubError>;

    /// Returned oldest-first regardless of the upstream's own ordering.
    async fn get_klines(&self, symbol: &str, interval: Interval, limit: usize) -> Result<Vec<Candle>, HubError>;

    async fn stream_kline(&self, symbol: &str, interval: Interval) -> Result<BoxStream<'static, Result<BarUpdate, HubError>>, HubError>;

    async fn stream_ticker(&self, symbol: &str) -> Result<BoxStream<'static, Result<TickerTick, HubError>>, HubError>;
}
