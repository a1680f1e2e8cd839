// src/routes/stream.rs
//! WebSocket glue. actix-web's own crate has no WS server support, so frames are pumped
//! through an `actix` actor (`actix-web-actors`) per connection; the actor's only job is to
//! forward whatever the stream hub's subscriber queue produces and to answer client pings.
//! Payload production itself lives entirely in `stream_hub`/`ticker_hub`.

use crate::models::{Interval, StrategyMarkers, StreamKey};
use crate::stream_hub::StreamHub;
use crate::ticker_hub::TickerHub;
use crate::upstream::BybitClient;
use actix::{Actor, ActorContext, AsyncContext, Handler, Message as ActixMessage, StreamHandler};
use actix_web::{get, web, Error, HttpRequest, HttpResponse, Scope};
use actix_web_actors::ws;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

const HEARTBEAT_CHECK: Duration = Duration::from_secs(5);
const HEARTBEAT_SILENCE: Duration = Duration::from_secs(30);
const VP_WINDOW_MIN: usize = 100;
const VP_WINDOW_MAX: usize = 10000;
const INVALID_INTERVAL_CLOSE_CODE: u16 = 4000;

#[derive(ActixMessage)]
#[rtype(result = "()")]
struct Frame(String);

#[derive(ActixMessage)]
#[rtype(result = "()")]
struct QueueAssigned(u64);

struct CandleSocket {
    hub: Arc<StreamHub<BybitClient>>,
    key: Option<StreamKey>,
    vp_window: usize,
    markers: StrategyMarkers,
    queue_id: Option<u64>,
    last_activity: Instant,
}

impl Actor for CandleSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let Some(key) = self.key.clone() else {
            ctx.close(Some(ws::CloseReason {
                code: ws::CloseCode::Other(INVALID_INTERVAL_CLOSE_CODE),
                description: Some("unknown interval".into()),
            }));
            ctx.stop();
            return;
        };

        let hub = Arc::clone(&self.hub);
        let vp_window = self.vp_window;
        let markers = self.markers;
        let addr = ctx.address();
        actix_web::rt::spawn(async move {
            let queue = StreamHub::subscribe(&hub, key, vp_window, markers).await;
            addr.do_send(QueueAssigned(queue.id()));
            while addr.connected() {
                if let Ok(payload) = timeout(HEARTBEAT_CHECK, queue.recv()).await {
                    addr.do_send(Frame(payload.to_string()));
                }
            }
        });

        ctx.run_interval(HEARTBEAT_CHECK, |act, ctx| {
            if act.last_activity.elapsed() >= HEARTBEAT_SILENCE {
                ctx.text(r#"{"event":"heartbeat"}"#);
                act.last_activity = Instant::now();
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let (Some(key), Some(queue_id)) = (self.key.clone(), self.queue_id) {
            let hub = Arc::clone(&self.hub);
            actix_web::rt::spawn(async move { hub.unsubscribe(&key, queue_id).await });
        }
    }
}

impl Handler<Frame> for CandleSocket {
    type Result = ();

    fn handle(&mut self, msg: Frame, ctx: &mut Self::Context) {
        self.last_activity = Instant::now();
        ctx.text(msg.0);
    }
}

impl Handler<QueueAssigned> for CandleSocket {
    type Result = ();

    fn handle(&mut self, msg: QueueAssigned, _ctx: &mut Self::Context) {
        self.queue_id = Some(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for CandleSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(bytes)) => ctx.pong(&bytes),
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                log::warn!("candle stream: protocol error: {e}");
                ctx.stop();
            }
            _ => {}
        }
    }
}

struct TickSocket {
    hub: Arc<TickerHub<BybitClient>>,
    symbol: String,
    queue_id: Option<u64>,
    last_activity: Instant,
}

impl Actor for TickSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let hub = Arc::clone(&self.hub);
        let symbol = self.symbol.clone();
        let addr = ctx.address();
        actix_web::rt::spawn(async move {
            let queue = TickerHub::subscribe(&hub, symbol).await;
            addr.do_send(QueueAssigned(queue.id()));
            while addr.connected() {
                if let Ok(payload) = timeout(HEARTBEAT_CHECK, queue.recv()).await {
                    addr.do_send(Frame(payload.to_string()));
                }
            }
        });

        ctx.run_interval(HEARTBEAT_CHECK, |act, ctx| {
            if act.last_activity.elapsed() >= HEARTBEAT_SILENCE {
                ctx.text(r#"{"event":"heartbeat"}"#);
                act.last_activity = Instant::now();
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(queue_id) = self.queue_id {
            let hub = Arc::clone(&self.hub);
            let symbol = self.symbol.clone();
            actix_web::rt::spawn(async move { hub.unsubscribe(&symbol, queue_id).await });
        }
    }
}

impl Handler<Frame> for TickSocket {
    type Result = ();

    fn handle(&mut self, msg: Frame, ctx: &mut Self::Context) {
        self.last_activity = Instant::now();
        ctx.text(msg.0);
    }
}

impl Handler<QueueAssigned> for TickSocket {
    type Result = ();

    fn handle(&mut self, msg: QueueAssigned, _ctx: &mut Self::Context) {
        self.queue_id = Some(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for TickSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(bytes)) => ctx.pong(&bytes),
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                log::warn!("tick stream: protocol error: {e}");
                ctx.stop();
            }
            _ => {}
        }
    }
}

#[derive(Debug, Deserialize)]
struct CandlesStreamQuery {
    interval: String,
    volume_profile_window: usize,
    strategy_markers: Option<String>,
}

#[get("/candles/{symbol}")]
async fn stream_candles(
    req: HttpRequest,
    body: web::Payload,
    path: web::Path<String>,
    query: web::Query<CandlesStreamQuery>,
    hub: web::Data<Arc<StreamHub<BybitClient>>>,
) -> Result<HttpResponse, Error> {
    let symbol = path.into_inner();
    let key = Interval::parse(&query.interval).map(|interval| StreamKey::new(symbol, interval));
    let vp_window = query.volume_profile_window.clamp(VP_WINDOW_MIN, VP_WINDOW_MAX);
    let markers = query.strategy_markers.as_deref().and_then(StrategyMarkers::parse).unwrap_or(StrategyMarkers::Off);

    let socket = CandleSocket { hub: hub.get_ref().clone(), key, vp_window, markers, queue_id: None, last_activity: Instant::now() };
    ws::start(socket, &req, body)
}

#[get("/ticks/{symbol}")]
async fn stream_ticks(
    req: HttpRequest,
    body: web::Payload,
    path: web::Path<String>,
    hub: web::Data<Arc<TickerHub<BybitClient>>>,
) -> Result<HttpResponse, Error> {
    let symbol = path.into_inner();
    let socket = TickSocket { hub: hub.get_ref().clone(), symbol, queue_id: None, last_activity: Instant::now() };
    ws::start(socket, &req, body)
}

pub fn stream_scope() -> Scope {
    web::scope("/stream").service(stream_candles).service(stream_ticks)
}
