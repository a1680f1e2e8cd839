// src/routes/market.rs
use crate::models::Interval;
use crate::ticker_hub::TickerHub;
use crate::upstream::{BybitClient, UpstreamClient};
use actix_web::{get, web, HttpResponse, Responder, Scope};
use serde::Deserialize;
use std::sync::Arc;

const CANDLES_LIMIT_MIN: usize = 50;
const CANDLES_LIMIT_MAX: usize = 2000;
const CANDLES_LIMIT_DEFAULT: usize = 500;

#[get("/intervals")]
async fn intervals() -> impl Responder {
    let wire: Vec<&'static str> = Interval::ALL.iter().map(|i| i.as_wire()).collect();
    HttpResponse::Ok().json(serde_json::json!({ "intervals": wire }))
}

#[get("/symbols")]
async fn symbols(upstream: web::Data<Arc<BybitClient>>) -> impl Responder {
    match upstream.list_spot_symbols().await {
        Ok(list) => HttpResponse::Ok().json(list),
        Err(e) => {
            log::warn!("symbols: {e}");
            HttpResponse::ServiceUnavailable().json(serde_json::json!({ "error": e.to_string() }))
        }
    }
}

#[derive(Debug, Deserialize)]
struct CandlesQuery {
    symbol: String,
    interval: String,
    limit: Option<usize>,
}

#[get("/candles")]
async fn candles(upstream: web::Data<Arc<BybitClient>>, query: web::Query<CandlesQuery>) -> impl Responder {
    let Some(interval) = Interval::parse(&query.interval) else {
        return HttpResponse::BadRequest().json(serde_json::json!({ "error": "unknown interval" }));
    };
    let limit = query.limit.unwrap_or(CANDLES_LIMIT_DEFAULT).clamp(CANDLES_LIMIT_MIN, CANDLES_LIMIT_MAX);

    match upstream.get_klines(&query.symbol, interval, limit).await {
        Ok(candles) => HttpResponse::Ok().json(candles),
        Err(e) => {
            log::warn!("candles: {e}");
            HttpResponse::ServiceUnavailable().json(serde_json::json!({ "error": e.to_string() }))
        }
    }
}

#[derive(Debug, Deserialize)]
struct TickersQuery {
    symbols: Option<String>,
}

/// Snapshot of whatever the ticker hub has seen so far for the requested symbols. A symbol
/// only appears once its stream task has run at least once, typically after a WS subscriber
/// has connected to it; this endpoint doesn't start a stream on its own.
#[get("/tickers")]
async fn tickers(ticker_hub: web::Data<Arc<TickerHub<BybitClient>>>, query: web::Query<TickersQuery>) -> impl Responder {
    let requested: Vec<String> = query
        .symbols
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let mut out = Vec::with_capacity(requested.len());
    for symbol in &requested {
        if let Some(snapshot) = ticker_hub.snapshot(symbol).await {
            out.push(snapshot);
        }
    }
    HttpResponse::Ok().json(out)
}

pub fn market_scope() -> Scope {
    web::scope("").service(intervals).service(symbols).service(candles).service(tickers)
}
