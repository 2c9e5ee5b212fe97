//! # WebSocket Analysis Handler
//!
//! Clients connect to `/ws/analysis` (or the legacy `/ws/`) and stream JSON
//! text frames, each carrying an optional video frame and an optional audio
//! chunk. Every frame gets exactly one analysis message back.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: server replies `{"message": "WebSocket connection established"}`
//! 2. **Events**: client sends `{"image"?: "<data url>", "audio_chunk"?: "<base64>"}`
//! 3. **Results**: server replies `{"analysis": {...}}` in arrival order
//! 4. **Bad input**: unparseable text gets `{"error": {"code": "invalid_event", ...}}`
//!    and the connection stays open; binary frames are ignored
//!
//! ## Actor Model:
//! Each connection is one actor owning its `AnalysisSession`. While an event
//! is being analysed the actor's mailbox is blocked with `ctx.wait`, so event
//! N+1 is never read before the result for event N has been sent.

use crate::analysis::pipeline::{AnalysisPipeline, InboundEvent, StageLimits};
use crate::analysis::result::AnalysisResult;
use crate::analysis::session::AnalysisSession;
use crate::config::WebSocketConfig;
use crate::error::AppError;
use crate::state::{AppState, EventOutcome};

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const CONNECTED_MESSAGE: &str = "WebSocket connection established";

/// Messages sent from server to client.
///
/// The wire format predates this server, so the variants are untagged: each
/// one is recognised by its single top-level key.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Connected { message: &'static str },
    Analysis { analysis: AnalysisResult },
    Error { error: ErrorBody },
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl OutboundMessage {
    pub fn connected() -> Self {
        OutboundMessage::Connected { message: CONNECTED_MESSAGE }
    }

    pub fn analysis(analysis: AnalysisResult) -> Self {
        OutboundMessage::Analysis { analysis }
    }

    /// Parse details are logged, never echoed back.
    pub fn invalid_event() -> Self {
        OutboundMessage::Error {
            error: ErrorBody {
                code: "invalid_event",
                message: "Event must be a JSON object with optional \"image\" and \"audio_chunk\" strings"
                    .to_string(),
            },
        }
    }
}

/// One reserved connection slot; released when dropped.
///
/// The actor owns its slot, so the slot is returned however the actor ends,
/// including when the handshake fails and the actor is never started.
struct SessionSlot {
    state: web::Data<AppState>,
}

impl SessionSlot {
    fn acquire(state: web::Data<AppState>, max_sessions: usize) -> Option<Self> {
        if state.try_acquire_session(max_sessions) {
            Some(Self { state })
        } else {
            None
        }
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.state.release_session();
    }
}

/// WebSocket actor for one analysis connection.
pub struct AnalysisWebSocket {
    session: AnalysisSession,
    pipeline: web::Data<AnalysisPipeline>,
    slot: SessionSlot,
    heartbeat_interval: Duration,
    client_timeout: Duration,
    last_heartbeat: Instant,
}

impl AnalysisWebSocket {
    fn new(slot: SessionSlot, pipeline: web::Data<AnalysisPipeline>, config: &WebSocketConfig) -> Self {
        Self {
            session: AnalysisSession::new(),
            pipeline,
            slot,
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
            client_timeout: Duration::from_secs(config.client_timeout_secs),
            last_heartbeat: Instant::now(),
        }
    }

    fn send(&self, ctx: &mut ws::WebsocketContext<Self>, message: &OutboundMessage) {
        match serde_json::to_string(message) {
            Ok(json) => ctx.text(json),
            Err(e) => error!(session_id = %self.session.id(), error = %e, "Failed to serialize outbound message"),
        }
    }

    /// Ping the client periodically and drop it if it stops answering.
    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.client_timeout {
                warn!(session_id = %act.session.id(), "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn handle_event(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let event = match InboundEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(session_id = %self.session.id(), error = %e, "Unparseable event");
                self.slot.state.record_invalid_event();
                self.send(ctx, &OutboundMessage::invalid_event());
                return;
            }
        };

        debug!(
            session_id = %self.session.id(),
            has_image = event.image.is_some(),
            has_audio = event.audio_chunk.is_some(),
            "Event received"
        );

        let limits = StageLimits::from(&self.slot.state.get_config());
        let pipeline = self.pipeline.clone();
        let started = Instant::now();
        let analysis = async move { pipeline.process(event, limits).await };

        // Block the mailbox until this event's result has been sent
        ctx.wait(analysis.into_actor(self).map(move |processed, act, ctx| {
            let outcome = EventOutcome {
                duration_ms: started.elapsed().as_millis() as u64,
                image_failed: processed.image_failed(),
                audio_failed: processed.audio_failed(),
            };

            match act.session.absorb(processed) {
                Ok(result) => {
                    act.slot.state.record_analysis_event(outcome);
                    debug!(session_id = %act.session.id(), duration_ms = outcome.duration_ms, "Event analysed");
                    act.send(ctx, &OutboundMessage::analysis(result));
                }
                Err(state) => {
                    debug!(session_id = %act.session.id(), state, "Dropping result for inactive session");
                }
            }
        }));
    }
}

impl Actor for AnalysisWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.session.open();
        info!(session_id = %self.session.id(), "Analysis session opened");
        self.send(ctx, &OutboundMessage::connected());
        self.start_heartbeat(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(summary) = self.session.close() {
            info!(
                session_id = %summary.session_id,
                events = summary.stats.events,
                frames_decoded = summary.stats.frames_decoded,
                image_failures = summary.stats.image_failures,
                audio_failures = summary.stats.audio_failures,
                "Analysis session closed"
            );
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for AnalysisWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.handle_event(&text, ctx);
            }
            Ok(ws::Message::Binary(data)) => {
                warn!(session_id = %self.session.id(), bytes = data.len(), "Ignoring binary frame");
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                debug!(session_id = %self.session.id(), ?reason, "Client closed the connection");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(session_id = %self.session.id(), "Ignoring continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(session_id = %self.session.id(), error = %err, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

/// HTTP → WebSocket upgrade.
///
/// ## Connection limit:
/// A slot is reserved before the handshake; when none is free the upgrade is
/// refused with 503 and no actor is created.
pub async fn analysis_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
    pipeline: web::Data<AnalysisPipeline>,
) -> Result<HttpResponse, actix_web::Error> {
    let config = app_state.get_config();
    let max_sessions = config.performance.max_concurrent_sessions;

    let Some(slot) = SessionSlot::acquire(app_state, max_sessions) else {
        warn!(max_sessions, peer = ?req.connection_info().peer_addr(), "Session limit reached, refusing upgrade");
        return Err(AppError::Unavailable(format!(
            "Session limit of {} reached, try again later",
            max_sessions
        ))
        .into());
    };

    debug!(peer = ?req.connection_info().peer_addr(), "Upgrading analysis connection");
    ws::start(AnalysisWebSocket::new(slot, pipeline, &config.websocket), &req, stream)
}

/// Register the WebSocket routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/ws/analysis", web::get().to(analysis_websocket))
        .route("/ws/", web::get().to(analysis_websocket));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::pipeline::testing::*;
    use crate::config::AppConfig;
    use actix_web::{dev::ServerHandle, App, HttpServer};
    use futures_util::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use std::net::SocketAddr;
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn start_server(state: AppState) -> (SocketAddr, ServerHandle) {
        start_server_with(state, pipeline(PassthroughTranscoder, FixedClassifier::label("neutral")))
    }

    fn start_server_with(state: AppState, pipeline: AnalysisPipeline) -> (SocketAddr, ServerHandle) {
        let pipeline = web::Data::new(pipeline);
        let state = web::Data::new(state);

        let server = HttpServer::new(move || {
            App::new()
                .app_data(state.clone())
                .app_data(pipeline.clone())
                .configure(configure)
        })
        .workers(1)
        .disable_signals()
        .bind(("127.0.0.1", 0))
        .unwrap();

        let addr = server.addrs()[0];
        let server = server.run();
        let handle = server.handle();
        actix_web::rt::spawn(server);
        (addr, handle)
    }

    async fn connect(addr: SocketAddr, path: &str) -> Client {
        let (client, _) = connect_async(format!("ws://{}{}", addr, path)).await.unwrap();
        client
    }

    async fn next_json(client: &mut Client) -> Value {
        loop {
            match client.next().await.unwrap().unwrap() {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("unexpected frame {:?}", other),
            }
        }
    }

    async fn send_json(client: &mut Client, value: Value) {
        client.send(Message::Text(value.to_string())).await.unwrap();
    }

    #[test]
    fn test_outbound_message_shapes() {
        assert_eq!(
            serde_json::to_value(OutboundMessage::connected()).unwrap(),
            json!({"message": "WebSocket connection established"})
        );
        assert_eq!(
            serde_json::to_value(OutboundMessage::analysis(AnalysisResult::new())).unwrap(),
            json!({"analysis": {}})
        );
        let error = serde_json::to_value(OutboundMessage::invalid_event()).unwrap();
        assert_eq!(error["error"]["code"], "invalid_event");
    }

    #[actix_web::test]
    async fn test_session_round_trip() {
        let (addr, handle) = start_server(AppState::new(AppConfig::default()));
        let mut client = connect(addr, "/ws/analysis").await;

        assert_eq!(next_json(&mut client).await, json!({"message": "WebSocket connection established"}));

        // Two events back to back come back in order
        send_json(&mut client, json!({"image": png_data_url()})).await;
        send_json(&mut client, json!({"audio_chunk": audio_payload(&tone_pcm(120.0, 0.05, 1.0))})).await;

        assert_eq!(next_json(&mut client).await, json!({"analysis": {"emotion": "neutral"}}));

        let audio = next_json(&mut client).await;
        assert!(audio["analysis"].get("emotion").is_none());
        assert!(audio["analysis"]["depression_score"].is_f64());
        assert_eq!(
            audio["analysis"]["anxiety_status"],
            "Moderate Anxiety: Moderate anxiety level detected."
        );

        handle.stop(false).await;
    }

    #[actix_web::test]
    async fn test_slow_event_is_answered_before_the_next() {
        let slow = SlowClassifier { delay: Duration::from_millis(500), label: "slow" };
        let (addr, handle) = start_server_with(AppState::new(AppConfig::default()), pipeline(PassthroughTranscoder, slow));
        let mut client = connect(addr, "/ws/analysis").await;
        next_json(&mut client).await;

        // The audio-only event would finish first if it were not queued
        send_json(&mut client, json!({"image": png_data_url()})).await;
        send_json(&mut client, json!({"audio_chunk": audio_payload(&tone_pcm(120.0, 0.05, 0.5))})).await;

        assert_eq!(next_json(&mut client).await, json!({"analysis": {"emotion": "slow"}}));
        let second = next_json(&mut client).await;
        assert!(second["analysis"].get("emotion").is_none());
        assert!(second["analysis"]["anxiety_score"].is_f64());

        handle.stop(false).await;
    }

    #[actix_web::test]
    async fn test_timeout_updates_apply_to_open_sessions() {
        let state = AppState::new(AppConfig::default());
        let delayed = DelayedTranscoder(Duration::from_millis(300));
        let (addr, handle) = start_server_with(state.clone(), pipeline(delayed, FixedClassifier::label("neutral")));
        let mut client = connect(addr, "/ws/analysis").await;
        next_json(&mut client).await;

        let event = json!({"audio_chunk": audio_payload(&tone_pcm(120.0, 0.05, 0.5))});
        send_json(&mut client, event.clone()).await;
        assert!(next_json(&mut client).await["analysis"]["anxiety_score"].is_f64());

        let mut tightened = state.get_config();
        tightened.audio.decode_timeout_ms = 50;
        state.update_config(tightened).unwrap();

        send_json(&mut client, event).await;
        assert_eq!(
            next_json(&mut client).await,
            json!({"analysis": {"anxiety_score": "Failed to decode audio"}})
        );

        handle.stop(false).await;
    }

    #[actix_web::test]
    async fn test_bad_input_keeps_connection_open() {
        let (addr, handle) = start_server(AppState::new(AppConfig::default()));
        let mut client = connect(addr, "/ws/").await;
        next_json(&mut client).await;

        client.send(Message::Text("not json".to_string())).await.unwrap();
        assert_eq!(next_json(&mut client).await["error"]["code"], "invalid_event");

        // Valid JSON, but not an event object
        send_json(&mut client, json!(["x", "y"])).await;
        assert_eq!(next_json(&mut client).await["error"]["code"], "invalid_event");

        // Ignored without a reply
        client.send(Message::Binary(vec![1, 2, 3])).await.unwrap();

        send_json(&mut client, json!({"image": "garbage", "audio_chunk": "%%%"})).await;
        assert_eq!(
            next_json(&mut client).await,
            json!({"analysis": {"anxiety_score": "Failed to decode audio"}})
        );

        send_json(&mut client, json!({})).await;
        assert_eq!(next_json(&mut client).await, json!({"analysis": {}}));

        handle.stop(false).await;
    }

    #[actix_web::test]
    async fn test_session_limit_refuses_upgrade() {
        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = 1;
        let state = AppState::new(config);
        let (addr, handle) = start_server(state.clone());

        let mut first = connect(addr, "/ws/analysis").await;
        next_json(&mut first).await;

        match connect_async(format!("ws://{}/ws/analysis", addr)).await {
            Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
                assert_eq!(response.status().as_u16(), 503)
            }
            other => panic!("expected 503, got {:?}", other.map(|(_, r)| r.status())),
        }

        first.close(None).await.unwrap();

        // The slot comes back once the actor has stopped
        let mut released = false;
        for _ in 0..50 {
            if state.active_sessions() == 0 {
                released = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(released);
        assert_eq!(state.get_metrics_snapshot().rejected_sessions, 1);

        handle.stop(false).await;
    }
}
