use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use std::sync::Arc;

use candle_stream_engine::{
    config::settings::Settings,
    routes::{health::health_scope, market::market_scope, stream::stream_scope},
    stream_hub::StreamHub,
    ticker_hub::TickerHub,
    upstream::BybitClient,
};

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

fn build_cors(origins: &[String]) -> Cors {
    if origins.is_empty() {
        return Cors::permissive();
    }
    origins.iter().fold(Cors::default(), |cors, origin| cors.allowed_origin(origin)).allow_any_method().allow_any_header()
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    init_logging();

    let settings = Settings::new().unwrap_or_else(|e| {
        eprintln!("failed to load settings: {e}");
        std::process::exit(1);
    });
    let settings = Arc::new(settings);
    let port = settings.server_port;

    let upstream = Arc::new(BybitClient::new(
        settings.bybit_rest_base_url.clone(),
        settings.bybit_ws_public_spot_url.clone(),
        settings.bybit_ws_public_linear_url.clone(),
    ));

    let stream_hub = StreamHub::new(Arc::clone(&upstream), Arc::clone(&settings));
    let ticker_hub = TickerHub::new(Arc::clone(&upstream), Arc::clone(&settings));

    log::info!("starting on port {port}, mode={:?}", settings.mode);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(build_cors(&settings.cors_origins))
            .app_data(web::Data::new(Arc::clone(&upstream)))
            .app_data(web::Data::new(Arc::clone(&stream_hub)))
            .app_data(web::Data::new(Arc::clone(&ticker_hub)))
            .service(health_scope())
            .service(market_scope())
            .service(stream_scope())
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}