//! Connection handlers for the Chatterbox server.
//!
//! Each WebSocket upgrade spawns one session task. The session drives its
//! connection through the lifecycle: wait for the implicit join frame,
//! relay messages while the transport is open, then deregister and
//! announce the departure to the room.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use chatterbox_core::{ClientHandle, ConnectionId, EventReceiver, Registry};
use chatterbox_protocol::{codec, ClientMessage, ServerEvent};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, trace, warn};

/// Shared server state.
pub struct AppState {
    /// The connection registry and broadcaster.
    pub registry: Registry,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            registry: Registry::new(),
            config,
        }
    }
}

/// Build the axum router for the given state.
#[must_use]
pub fn app(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();

    Router::new()
        .route("/", get(home_handler))
        .route("/health", get(health_handler))
        .route(&ws_path, get(ws_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Bind and serve
    let addr = config.bind_addr();
    let listener = TcpListener::bind(addr).await?;

    info!("Chatterbox server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app(state)).await?;

    Ok(())
}

/// Root handler, so a bare probe of the origin does not 404.
async fn home_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "Chatterbox server running",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// One connection's identity once it has joined a room. Both fields are
/// fixed at join time; there is no rename or room switch.
struct Session {
    id: ConnectionId,
    username: String,
    room: String,
}

/// Handle a WebSocket connection for its entire lifetime.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (handle, mut events) = ClientHandle::new();
    let id = handle.id();

    debug!(connection = %id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    if let Some(session) = await_join(&mut receiver, &mut sender, &handle, &state).await {
        session_loop(&session, &mut events, &mut sender, &mut receiver, &state).await;
    }

    // Runs on every exit path. A connection that never joined is not in
    // the registry, so leave() reports nothing and no notice goes out.
    if let Some(departure) = state.registry.leave(&handle) {
        state.registry.broadcast(
            &departure.room,
            ServerEvent::left(&departure.username, &departure.room),
        );
    }
    metrics::set_active_rooms(state.registry.stats().rooms);

    debug!(connection = %id, "WebSocket disconnected");
}

/// Wait for the implicit join frame and register the connection from it.
///
/// Returns `None` when the transport closes first or the frame cannot be
/// decoded; either way the caller falls through to the common cleanup.
async fn await_join(
    receiver: &mut SplitStream<WebSocket>,
    sender: &mut SplitSink<WebSocket, Message>,
    handle: &ClientHandle,
    state: &Arc<AppState>,
) -> Option<Session> {
    let text = next_text_frame(receiver, sender).await?;
    metrics::record_message(text.len(), "inbound");

    match codec::decode_join(&text) {
        Ok(join) => {
            let username = join.username().to_owned();
            let room = join.room().to_owned();

            state
                .registry
                .join(handle.clone(), username.clone(), room.clone());
            metrics::set_active_rooms(state.registry.stats().rooms);

            info!(connection = %handle.id(), username = %username, room = %room, "Session joined");

            Some(Session {
                id: handle.id(),
                username,
                room,
            })
        }
        Err(e) => {
            warn!(connection = %handle.id(), error = %e, "Join frame rejected");
            metrics::record_error("join_decode");
            None
        }
    }
}

/// Read frames until a text payload arrives or the transport goes away.
///
/// Binary frames are accepted as UTF-8 text since the wire format is JSON
/// text either way; pings are answered; invalid UTF-8 ends the connection.
async fn next_text_frame(
    receiver: &mut SplitStream<WebSocket>,
    sender: &mut SplitSink<WebSocket, Message>,
) -> Option<String> {
    loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => return Some(text),
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                Ok(text) => return Some(text),
                Err(e) => {
                    warn!(error = %e, "Binary frame is not UTF-8 text");
                    metrics::record_error("encoding");
                    return None;
                }
            },
            Some(Ok(Message::Ping(data))) => {
                if sender.send(Message::Pong(data)).await.is_err() {
                    return None;
                }
            }
            Some(Ok(Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) => {
                debug!("Received close frame");
                return None;
            }
            Some(Err(e)) => {
                warn!(error = %e, "WebSocket error");
                metrics::record_error("websocket");
                return None;
            }
            None => {
                debug!("WebSocket stream ended");
                return None;
            }
        }
    }
}

/// Message processing loop for a joined connection.
///
/// Multiplexes the connection's outbound queue with the socket. Queued
/// events are flushed before the next inbound frame is taken, which keeps
/// delivery in per-sender order.
async fn session_loop(
    session: &Session,
    events: &mut EventReceiver,
    sender: &mut SplitSink<WebSocket, Message>,
    receiver: &mut SplitStream<WebSocket>,
    state: &Arc<AppState>,
) {
    loop {
        tokio::select! {
            biased;

            // Deliver events queued for this client
            Some(event) = events.recv() => {
                match codec::encode_event(&event) {
                    Ok(text) => {
                        metrics::record_message(text.len(), "outbound");
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(connection = %session.id, error = %e, "Failed to encode event");
                        metrics::record_error("encode");
                    }
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if !handle_text(session, &text, state) {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => {
                            if !handle_text(session, &text, state) {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(connection = %session.id, error = %e, "Binary frame is not UTF-8 text");
                            metrics::record_error("encoding");
                            break;
                        }
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %session.id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %session.id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %session.id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }
}

/// Decode one inbound text frame and dispatch it.
///
/// Returns `false` when the frame cannot be decoded; the session then
/// closes and takes the same cleanup path as a disconnect. No error
/// payload goes back to the client.
fn handle_text(session: &Session, text: &str, state: &AppState) -> bool {
    metrics::record_message(text.len(), "inbound");
    let start = Instant::now();

    match codec::decode_client_message(text) {
        Ok(msg) => {
            dispatch(session, msg, state);
            metrics::record_latency(start.elapsed().as_secs_f64());
            true
        }
        Err(e) => {
            warn!(connection = %session.id, error = %e, "Undecodable frame");
            metrics::record_error("decode");
            false
        }
    }
}

/// Dispatch a decoded client message to the sender's room.
fn dispatch(session: &Session, msg: ClientMessage, state: &AppState) {
    match msg {
        ClientMessage::Chat { message } => {
            let message = message.trim();
            // Frames that trim to nothing are dropped without a broadcast
            if message.is_empty() {
                return;
            }

            let delivered = state.registry.broadcast(
                &session.room,
                ServerEvent::chat(&session.username, message),
            );
            metrics::record_broadcast(delivered);

            debug!(
                connection = %session.id,
                room = %session.room,
                recipients = delivered,
                "Chat relayed"
            );
        }

        ClientMessage::Typing => {
            let delivered = state
                .registry
                .broadcast(&session.room, ServerEvent::typing(&session.username));
            metrics::record_broadcast(delivered);
        }

        ClientMessage::StopTyping => {
            let delivered = state
                .registry
                .broadcast(&session.room, ServerEvent::stop_typing(&session.username));
            metrics::record_broadcast(delivered);
        }

        ClientMessage::Unknown => {
            trace!(connection = %session.id, "Ignoring frame with unrecognized type");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> AppState {
        AppState::new(Config::default())
    }

    fn joined_session(state: &AppState, username: &str, room: &str) -> (Session, EventReceiver) {
        let (handle, mut rx) = ClientHandle::new();
        state.registry.join(handle.clone(), username, room);
        // Discard the join announcement
        rx.try_recv().unwrap();
        (
            Session {
                id: handle.id(),
                username: username.to_string(),
                room: room.to_string(),
            },
            rx,
        )
    }

    #[test]
    fn test_chat_broadcast_includes_sender() {
        let state = test_state();
        let (alice, mut alice_rx) = joined_session(&state, "Alice", "general");

        dispatch(&alice, ClientMessage::chat("hello"), &state);

        let event = alice_rx.try_recv().unwrap();
        assert_eq!(*event, ServerEvent::chat("Alice", "hello"));
    }

    #[test]
    fn test_chat_is_trimmed() {
        let state = test_state();
        let (alice, mut alice_rx) = joined_session(&state, "Alice", "general");

        dispatch(&alice, ClientMessage::chat("  hello  "), &state);

        let event = alice_rx.try_recv().unwrap();
        assert_eq!(*event, ServerEvent::chat("Alice", "hello"));
    }

    #[test]
    fn test_whitespace_chat_dropped() {
        let state = test_state();
        let (alice, mut alice_rx) = joined_session(&state, "Alice", "general");

        dispatch(&alice, ClientMessage::chat("   \n\t "), &state);
        dispatch(&alice, ClientMessage::chat(""), &state);

        assert!(alice_rx.try_recv().is_err());
    }

    #[test]
    fn test_typing_events_scoped_to_room() {
        let state = test_state();
        let (alice, mut alice_rx) = joined_session(&state, "Alice", "rust");
        let (_carol, mut carol_rx) = joined_session(&state, "Carol", "go");

        dispatch(&alice, ClientMessage::Typing, &state);
        dispatch(&alice, ClientMessage::StopTyping, &state);

        assert_eq!(*alice_rx.try_recv().unwrap(), ServerEvent::typing("Alice"));
        assert_eq!(
            *alice_rx.try_recv().unwrap(),
            ServerEvent::stop_typing("Alice")
        );
        assert!(carol_rx.try_recv().is_err());
    }

    #[test]
    fn test_unknown_message_is_noop() {
        let state = test_state();
        let (alice, mut alice_rx) = joined_session(&state, "Alice", "general");

        dispatch(&alice, ClientMessage::Unknown, &state);

        assert!(alice_rx.try_recv().is_err());
    }

    #[test]
    fn test_handle_text_decodes_and_dispatches() {
        let state = test_state();
        let (alice, mut alice_rx) = joined_session(&state, "Alice", "general");

        assert!(handle_text(&alice, r#"{"type":"chat","message":"hi"}"#, &state));
        assert_eq!(*alice_rx.try_recv().unwrap(), ServerEvent::chat("Alice", "hi"));

        // Unknown discriminators are ignored but keep the session alive
        assert!(handle_text(&alice, r#"{"type":"dance"}"#, &state));
        assert!(alice_rx.try_recv().is_err());
    }

    #[test]
    fn test_handle_text_rejects_malformed() {
        let state = test_state();
        let (alice, _alice_rx) = joined_session(&state, "Alice", "general");

        assert!(!handle_text(&alice, "{not json", &state));
        assert!(!handle_text(&alice, r#"{"type":"chat","message":42}"#, &state));
    }
}
