//! Bybit v5 public REST + WebSocket adapter, grounded in the original `bybit_client.py`
//! and the teacher's `tokio-tungstenite`/`reqwest` connector idiom from `market_data.rs`.

use crate::errors::HubError;
use crate::models::{BarUpdate, Candle, Interval, SymbolInfo, TickerTick};
use crate::upstream::UpstreamClient;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_tungstenite::connect_async;
use tungstenite::Message;

pub struct BybitClient {
    http: reqwest::Client,
    rest_base_url: String,
    ws_public_spot_url: String,
    ws_public_linear_url: String,
}

impl BybitClient {
    pub fn new(rest_base_url: impl Into<String>, ws_public_spot_url: impl Into<String>, ws_public_linear_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            rest_base_url: rest_base_url.into(),
            ws_public_spot_url: ws_public_spot_url.into(),
            ws_public_linear_url: ws_public_linear_url.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "retCode")]
    ret_code: i32,
    #[serde(rename = "retMsg")]
    ret_msg: String,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InstrumentsResult {
    list: Vec<InstrumentInfo>,
}

#[derive(Debug, Deserialize)]
struct InstrumentInfo {
    symbol: String,
    #[serde(rename = "baseCoin")]
    base_coin: String,
    #[serde(rename = "quoteCoin")]
    quote_coin: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct KlineResult {
    list: Vec<[String; 7]>,
}

fn parse_envelope<T>(body: &str) -> Result<T, HubError> {
    let env: Envelope<T> = serde_json::from_str(body)?;
    if env.ret_code != 0 {
        return Err(HubError::Protocol(format!("bybit error {}: {}", env.ret_code, env.ret_msg)));
    }
    env.result.ok_or_else(|| HubError::Protocol("bybit response missing result".into()))
}

#[async_trait]
impl UpstreamClient for BybitClient {
    async fn list_spot_symbols(&self) -> Result<Vec<SymbolInfo>, HubError> {
        let url = format!("{}/v5/market/instruments-info?category=spot", self.rest_base_url);
        let body = self.http.get(&url).send().await?.text().await?;
        let result: InstrumentsResult = parse_envelope(&body)?;
        Ok(result
            .list
            .into_iter()
            .map(|i| SymbolInfo { symbol: i.symbol, base_coin: i.base_coin, quote_coin: i.quote_coin, status: i.status })
            .collect())
    }

    async fn get_klines(&self, symbol: &str, interval: Interval, limit: usize) -> Result<Vec<Candle>, HubError> {
        let url = format!(
            "{}/v5/market/kline?category=linear&symbol={symbol}&interval={}&limit={limit}",
            self.rest_base_url,
            interval.as_wire()
        );
        let body = self.http.get(&url).send().await?.text().await?;
        let result: KlineResult = parse_envelope(&body)?;

        // Bybit returns newest-first; the core always wants oldest-first.
        let mut candles = Vec::with_capacity(result.list.len());
        for row in result.list.iter().rev() {
            let time_ms: i64 = row[0].parse().map_err(|_| HubError::Protocol("bad kline start time".into()))?;
            let open: f64 = row[1].parse().map_err(|_| HubError::Protocol("bad kline open".into()))?;
            let high: f64 = row[2].parse().map_err(|_| HubError::Protocol("bad kline high".into()))?;
            let low: f64 = row[3].parse().map_err(|_| HubError::Protocol("bad kline low".into()))?;
            let close: f64 = row[4].parse().map_err(|_| HubError::Protocol("bad kline close".into()))?;
            let volume: f64 = row[5].parse().map_err(|_| HubError::Protocol("bad kline volume".into()))?;
            candles.push(Candle { time_ms, open, high, low, close, volume });
        }
        Ok(candles)
    }

    async fn stream_kline(&self, symbol: &str, interval: Interval) -> Result<BoxStream<'static, Result<BarUpdate, HubError>>, HubError> {
        let (mut ws, _) = connect_async(&self.ws_public_linear_url).await?;
        let topic = format!("kline.{}.{symbol}", interval.as_wire());
        let sub = serde_json::json!({ "op": "subscribe", "args": [topic] });
        ws.send(Message::Text(sub.to_string())).await?;

        let stream = ws.filter_map(|msg| async move {
            let msg = match msg {
                Ok(m) => m,
                Err(e) => return Some(Err(HubError::from(e))),
            };
            let Message::Text(txt) = msg else { return None };
            match serde_json::from_str::<KlineFrame>(&txt) {
                Ok(frame) if frame.topic.as_deref().is_some_and(|t| t.starts_with("kline.")) => {
                    frame.data.into_iter().next().map(|k| {
                        Ok(BarUpdate {
                            start_ms: k.start,
                            open: k.open.parse().unwrap_or(0.0),
                            high: k.high.parse().unwrap_or(0.0),
                            low: k.low.parse().unwrap_or(0.0),
                            close: k.close.parse().unwrap_or(0.0),
                            volume: k.volume.parse().unwrap_or(0.0),
                            confirm: k.confirm,
                        })
                    })
                }
                Ok(_) => None,
                Err(e) => {
                    log::warn!("bybit kline stream: malformed frame skipped: {e}");
                    None
                }
            }
        });
        Ok(Box::pin(stream))
    }

    async fn stream_ticker(&self, symbol: &str) -> Result<BoxStream<'static, Result<TickerTick, HubError>>, HubError> {
        let (mut ws, _) = connect_async(&self.ws_public_spot_url).await?;
        let topic = format!("tickers.{symbol}");
        let sub = serde_json::json!({ "op": "subscribe", "args": [topic] });
        ws.send(Message::Text(sub.to_string())).await?;

        let symbol = symbol.to_string();
        let stream = ws.filter_map(move |msg| {
            let symbol = symbol.clone();
            async move {
                let msg = match msg {
                    Ok(m) => m,
                    Err(e) => return Some(Err(HubError::from(e))),
                };
                let Message::Text(txt) = msg else { return None };
                match serde_json::from_str::<TickerFrame>(&txt) {
                    Ok(frame) if frame.topic.as_deref().is_some_and(|t| t.starts_with("tickers.")) => {
                        frame.data.map(|d| {
                            Ok(TickerTick {
                                symbol: symbol.clone(),
                                price: d.last_price.parse().unwrap_or(0.0),
                                change_24h_percent: d.price_24h_pcnt.and_then(|s| s.parse().ok()).unwrap_or(0.0),
                                volume_24h: d.volume_24h.and_then(|s| s.parse().ok()).unwrap_or(0.0),
                                ts: frame.ts.unwrap_or(0),
                            })
                        })
                    }
                    Ok(_) => None,
                    Err(e) => {
                        log::warn!("bybit ticker stream: malformed frame skipped: {e}");
                        None
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

#[derive(Debug, Deserialize)]
struct KlineFrame {
    topic: Option<String>,
    data: Vec<KlineData>,
}

#[derive(Debug, Deserialize)]
struct KlineData {
    start: i64,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: String,
    confirm: bool,
}

#[derive(Debug, Deserialize)]
struct TickerFrame {
    topic: Option<String>,
    ts: Option<i64>,
    data: Option<TickerData>,
}

#[derive(Debug, Deserialize)]
struct TickerData {
    #[serde(rename = "lastPrice")]
    last_price: String,
    #[serde(rename = "price24hPcnt")]
    price_24h_pcnt: Option<String>,
    #[serde(rename = "volume24h")]
    volume_24h: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_rejects_non_zero_ret_code() {
        let body = r#"{"retCode":10001,"retMsg":"bad request","result":null}"#;
        let result = parse_envelope::<InstrumentsResult>(body);
        assert!(result.is_err());
    }
}
