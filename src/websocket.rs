//! # Game WebSocket Handler
//!
//! Clients connect to `/game/` and speak the JSON protocol described in
//! `protocol.rs`. Each connection gets one [`ConnectionSession`] task; the actor in
//! this module is only the transport around it.
//!
//! ## Data Flow:
//! ```text
//! socket text frame ──▶ actor ──inbox──▶ ConnectionSession
//! socket text frame ◀── actor ◀─outbox── ConnectionSession
//! ```
//!
//! ## Connection Lifecycle:
//! 1. **Upgrade**: refused with 503 when `max_concurrent_sessions` sockets are open
//! 2. **Started**: the session task is spawned and its outbox attached as a stream
//! 3. **Heartbeat**: the actor pings every `heartbeat_interval_secs` and closes the
//!    socket after `client_timeout_secs` without any frame from the client
//! 4. **Stopped**: the inbox is dropped, which ends the session task and runs its
//!    teardown (leave room, end an owned game)
//!
//! If the session fails with an internal error it closes its outbox, and the actor
//! closes the socket.

use crate::error::{AppError, GameError};
use crate::protocol::ServerMessage;
use crate::session::ConnectionSession;
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

/// Transport actor for one game connection.
pub struct GameWebSocket {
    state: web::Data<AppState>,

    /// Client frames for the session task; `None` once the actor is stopping
    inbox: Option<mpsc::UnboundedSender<String>>,

    /// Player id of the session, for logging
    player_id: String,

    /// Last time anything was heard from the client
    last_heartbeat: Instant,

    heartbeat_interval: Duration,
    client_timeout: Duration,
}

impl GameWebSocket {
    pub fn new(state: web::Data<AppState>) -> Self {
        let config = state.get_config();
        Self {
            state,
            inbox: None,
            player_id: String::new(),
            last_heartbeat: Instant::now(),
            heartbeat_interval: Duration::from_secs(config.performance.heartbeat_interval_secs),
            client_timeout: Duration::from_secs(config.performance.client_timeout_secs),
        }
    }

    fn forward(&mut self, text: String, ctx: &mut ws::WebsocketContext<Self>) {
        let delivered = self
            .inbox
            .as_ref()
            .map_or(false, |inbox| inbox.send(text).is_ok());
        if !delivered {
            warn!(player = %self.player_id, "session already gone, closing socket");
            ctx.stop();
        }
    }

    fn send_message(&self, message: &ServerMessage, ctx: &mut ws::WebsocketContext<Self>) {
        match serde_json::to_string(message) {
            Ok(json) => ctx.text(json),
            Err(e) => error!(player = %self.player_id, "failed to encode server message: {}", e),
        }
    }
}

impl Actor for GameWebSocket {
    type Context = ws::WebsocketContext<Self>;

    /// Called when the WebSocket connection starts.
    fn started(&mut self, ctx: &mut Self::Context) {
        self.state.session_opened();

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        let session = ConnectionSession::new(self.state.get_ref().clone(), outbox_tx);
        self.player_id = session.player_id().to_string();
        self.inbox = Some(inbox_tx);

        ctx.add_stream(UnboundedReceiverStream::new(outbox_rx));
        tokio::spawn(async move {
            // Errors are logged by the session itself.
            let _ = session.run(inbox_rx).await;
        });

        info!(player = %self.player_id, "game connection opened");

        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.client_timeout {
                warn!(player = %act.player_id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    /// Called when the WebSocket connection stops.
    fn stopped(&mut self, _ctx: &mut Self::Context) {
        // Closing the inbox ends the session task, which then leaves its room.
        self.inbox = None;
        self.state.session_closed();
        info!(player = %self.player_id, "game connection closed");
    }
}

/// Messages pushed by the session.
impl StreamHandler<ServerMessage> for GameWebSocket {
    fn handle(&mut self, message: ServerMessage, ctx: &mut Self::Context) {
        self.send_message(&message, ctx);
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        debug!(player = %self.player_id, "session outbox closed");
        ctx.close(Some(ws::CloseCode::Error.into()));
        ctx.stop();
    }
}

/// Frames coming from the client.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for GameWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.forward(text.to_string(), ctx);
            }
            Ok(ws::Message::Binary(_)) => {
                // The protocol is JSON text only.
                self.last_heartbeat = Instant::now();
                self.state.record_protocol_error();
                let error = GameError::Validation("Invalid request type".to_string());
                self.send_message(&ServerMessage::error(&error), ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(player = %self.player_id, "WebSocket closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(player = %self.player_id, "Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(player = %self.player_id, "WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// Checks the session limit, then upgrades the request. The actual protocol is
/// handled by the session spawned from `GameWebSocket::started`.
pub async fn game_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let limit = state.get_config().performance.max_concurrent_sessions;
    if state.active_sessions() >= limit {
        warn!(limit, "refusing game connection, session limit reached");
        return Err(AppError::ServiceUnavailable(format!(
            "Session limit of {} reached, try again later",
            limit
        )));
    }

    debug!("New game connection request from: {:?}", req.connection_info().peer_addr());
    ws::start(GameWebSocket::new(state), &req, stream)
        .map_err(|e| AppError::BadRequest(format!("WebSocket handshake failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{http::StatusCode, test, App};

    fn state(max_sessions: usize) -> AppState {
        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = max_sessions;
        config.storage.files_dir = std::env::temp_dir()
            .join(format!("relay-ws-{}", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .into_owned();
        AppState::new(config)
    }

    #[actix_web::test]
    async fn test_plain_http_request_is_rejected() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(4)))
                .route("/game/", web::get().to(game_websocket)),
        )
        .await;

        let response = test::call_service(&app, test::TestRequest::get().uri("/game/").to_request()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_session_limit_returns_503() {
        let state = state(1);
        state.session_opened();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/game/", web::get().to(game_websocket)),
        )
        .await;

        let response = test::call_service(&app, test::TestRequest::get().uri("/game/").to_request()).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
