// tests/routes.rs
use actix_web::{test, web, App};
use candle_stream_engine::routes::{health::health_scope, market::market_scope};
use candle_stream_engine::upstream::BybitClient;
use std::sync::Arc;

#[actix_rt::test]
async fn health_check_returns_ok() {
    let app = test::init_service(App::new().service(health_scope())).await;

    let req = test::TestRequest::get().uri("/healthz").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
}

#[actix_rt::test]
async fn intervals_lists_all_supported_wire_values() {
    let app = test::init_service(App::new().service(market_scope())).await;

    let req = test::TestRequest::get().uri("/intervals").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = test::read_body_json(resp).await;
    let intervals = body["intervals"].as_array().expect("intervals array");
    assert!(intervals.contains(&serde_json::json!("60")));
    assert!(intervals.contains(&serde_json::json!("D")));
}

#[actix_rt::test]
async fn candles_rejects_unknown_interval_with_bad_request() {
    let upstream = Arc::new(BybitClient::new("https://example.invalid", "wss://example.invalid/spot", "wss://example.invalid/linear"));
    let app = test::init_service(App::new().app_data(web::Data::new(upstream)).service(market_scope())).await;

    let req = test::TestRequest::get().uri("/candles?symbol=BTCUSDT&interval=bogus").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}
