//! HTTP and WebSocket transport
//!
//! `/ws` upgrades to a live connection. The session token comes from the
//! `token` cookie or a bearer header; clients that can send neither must
//! open with an `auth` message within the configured auth timeout. The
//! identity is checked once, when the connection joins, and stays attached
//! for the connection's lifetime.
//!
//! Producers outside the process submit events with `POST /events`, which
//! only administrators may call.

use crate::auth::{AuthError, AuthorizationGate, Identity, RoleRequirement};
use crate::scopes::Scope;
use crate::server::carrier::{token_from_headers, CredentialCarrier, HeaderCarrier};
use crate::server::connections::{ClientConnection, ConnectionRegistry, JoinError, OutboundMessage};
use crate::server::router::{Event, EventRouter};
use crate::server::transport::{ClientMessage, PublishRequest, ServerMessage};

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, Stream, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Shared state for HTTP and WebSocket handlers
#[derive(Clone)]
pub struct WsState {
    pub connections: Arc<ConnectionRegistry>,
    pub router: Arc<EventRouter>,
    pub gate: AuthorizationGate,
    pub queue_depth: usize,
    pub secure_cookies: bool,
    pub auth_timeout: Duration,
}

impl WsState {
    /// Issue a session for `subject_id` and return the `Set-Cookie` headers
    /// carrying it. Host applications call this from their own login
    /// handler once the password has been checked.
    pub async fn start_session(
        &self,
        request: &HeaderMap,
        subject_id: &str,
    ) -> Result<(HeaderMap, Identity), AuthError> {
        let (credential, identity) = self.gate.login(subject_id).await?;

        let mut carrier = HeaderCarrier::new(request, self.secure_cookies);
        carrier.set_token(credential.as_str(), self.gate.session_ttl());

        info!(subject_id = %identity.subject_id(), "Session started");
        Ok((carrier.into_response_headers(), identity))
    }
}

/// Create the HTTP router
pub fn create_router(state: WsState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/auth/me", get(me_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/events", post(publish_handler))
        .route("/admin/connections", get(connections_handler))
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "ok"
}

fn auth_error_response(e: &AuthError) -> Response {
    let status = if e.is_forbidden() {
        StatusCode::FORBIDDEN
    } else {
        StatusCode::UNAUTHORIZED
    };
    (status, Json(json!({ "message": format!("Not authorized: {}", e) }))).into_response()
}

async fn me_handler(State(state): State<WsState>, headers: HeaderMap) -> Response {
    let token = token_from_headers(&headers);
    match state.gate.authorize(token.as_deref(), RoleRequirement::Any).await {
        Ok(identity) => Json(identity).into_response(),
        Err(e) => auth_error_response(&e),
    }
}

async fn logout_handler(State(state): State<WsState>, headers: HeaderMap) -> Response {
    let mut carrier = HeaderCarrier::new(&headers, state.secure_cookies);
    let token = carrier.get_token();

    let identity = match state.gate.authorize(token.as_deref(), RoleRequirement::Any).await {
        Ok(identity) => identity,
        Err(e) => return auth_error_response(&e),
    };

    if let Some(token) = token {
        if let Err(e) = state.gate.logout(&token).await {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "message": format!("Logout failed: {}", e) })),
            )
                .into_response();
        }
    }

    carrier.clear_token();
    info!(subject_id = %identity.subject_id(), "Logged out");

    (
        carrier.into_response_headers(),
        Json(json!({ "message": "Logged out successfully" })),
    )
        .into_response()
}

async fn connections_handler(State(state): State<WsState>, headers: HeaderMap) -> Response {
    let token = token_from_headers(&headers);
    match state
        .gate
        .authorize(token.as_deref(), RoleRequirement::ADMINISTRATOR)
        .await
    {
        Ok(_) => Json(json!({
            "connections": state.connections.count(),
            "scopes": state.connections.scope_count(),
        }))
        .into_response(),
        Err(e) => auth_error_response(&e),
    }
}

async fn publish_handler(State(state): State<WsState>, headers: HeaderMap, body: Bytes) -> Response {
    let token = token_from_headers(&headers);
    let producer = match state
        .gate
        .authorize(token.as_deref(), RoleRequirement::ADMINISTRATOR)
        .await
    {
        Ok(identity) => identity,
        Err(e) => return auth_error_response(&e),
    };

    let event = serde_json::from_slice::<PublishRequest>(&body)
        .map_err(|e| e.to_string())
        .and_then(|req| {
            Event::new(req.kind, req.payload, req.scopes).map_err(|e| e.to_string())
        });
    let event = match event {
        Ok(event) => event,
        Err(message) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "message": format!("Invalid event: {}", message) })),
            )
                .into_response()
        }
    };

    let delivered = state.router.deliver(&event);
    info!(
        producer = %producer.subject_id(),
        kind = %event.kind(),
        delivered,
        "Event published"
    );

    Json(json!({ "delivered": delivered })).into_response()
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<WsState>,
) -> impl IntoResponse {
    let token = token_from_headers(&headers);
    ws.on_upgrade(move |socket| handle_socket(socket, state, token))
}

fn parse_client_message(msg: &Message) -> Option<ClientMessage> {
    match msg {
        Message::Text(text) => serde_json::from_str(text.as_str()).ok(),
        Message::Binary(data) => serde_json::from_slice(data).ok(),
        _ => None,
    }
}

fn to_text(msg: &ServerMessage) -> Option<Message> {
    match serde_json::to_string(msg) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            warn!(error = %e, "Failed to serialize server message");
            None
        }
    }
}

#[derive(Debug, PartialEq)]
enum Opening {
    /// First message arrived; the token if it was an `auth` message
    Token(Option<String>),
    Closed,
    TimedOut,
}

/// Wait at most `limit` for the client's opening message
async fn read_opening<S, E>(receiver: &mut S, limit: Duration) -> Opening
where
    S: Stream<Item = Result<Message, E>> + Unpin,
{
    match tokio::time::timeout(limit, receiver.next()).await {
        Err(_) => Opening::TimedOut,
        Ok(Some(Ok(msg))) => match parse_client_message(&msg) {
            Some(ClientMessage::Auth { token }) => Opening::Token(Some(token)),
            _ => Opening::Token(None),
        },
        Ok(_) => Opening::Closed,
    }
}

async fn handle_socket(socket: WebSocket, state: WsState, header_token: Option<String>) {
    let (mut sender, mut receiver) = socket.split();

    // Without a cookie or bearer header the first message must carry the token
    let token = match header_token {
        Some(token) => Some(token),
        None => match read_opening(&mut receiver, state.auth_timeout).await {
            Opening::Token(token) => token,
            Opening::Closed => return,
            Opening::TimedOut => {
                debug!("WebSocket client sent no credential in time");
                if let Some(msg) = to_text(&ServerMessage::AuthError {
                    message: "authentication timed out".to_string(),
                }) {
                    let _ = sender.send(msg).await;
                }
                let _ = sender.close().await;
                return;
            }
        },
    };

    let identity = match state.gate.authorize(token.as_deref(), RoleRequirement::Any).await {
        Ok(identity) => identity,
        Err(e) => {
            debug!(error = %e, "WebSocket authorization failed");
            if let Some(msg) = to_text(&ServerMessage::AuthError {
                message: e.to_string(),
            }) {
                let _ = sender.send(msg).await;
            }
            return;
        }
    };

    // Create connection with channel for outbound messages
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(state.queue_depth);
    let client_conn = Arc::new(ClientConnection::new(identity.clone(), tx));
    let conn_id = client_conn.id;

    let scopes = match state.connections.join(client_conn.clone()) {
        Ok(scopes) => scopes,
        Err(e) => {
            warn!(conn_id = %conn_id, error = %e, "Connection join failed");
            state.connections.leave(conn_id);
            return;
        }
    };

    let auth_ok = ServerMessage::AuthOk {
        subject_id: identity.subject_id().to_string(),
        role: identity.role(),
        scopes,
    };
    let sent = match to_text(&auth_ok) {
        Some(msg) => sender.send(msg).await.is_ok(),
        None => false,
    };
    if !sent {
        state.connections.leave(conn_id);
        return;
    }

    info!(conn_id = %conn_id, subject_id = %identity.subject_id(), "WebSocket client authenticated");

    // Writer task: the only place this socket is written to from now on
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender
                .send(Message::Text(msg.payload.to_string().into()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    // Process incoming messages
    while let Some(msg_result) = receiver.next().await {
        match msg_result {
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                // Handled automatically by axum
            }
            Ok(msg) => match parse_client_message(&msg) {
                Some(client_msg) => {
                    handle_client_message(&client_msg, &client_conn, &state.connections)
                }
                None => debug!(conn_id = %conn_id, "Ignoring unparseable client message"),
            },
            Err(e) => {
                warn!(conn_id = %conn_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Cleanup
    debug!(conn_id = %conn_id, "WebSocket client disconnected");
    state.connections.leave(conn_id);
    send_task.abort();
}

fn reply(conn: &ClientConnection, msg: &ServerMessage) {
    match OutboundMessage::json(msg) {
        Ok(out) => {
            if let Err(e) = conn.send(out) {
                debug!(conn_id = %conn.id, error = %e, "Failed to queue reply");
            }
        }
        Err(e) => warn!(error = %e, "Failed to serialize reply"),
    }
}

pub(crate) fn handle_client_message(
    msg: &ClientMessage,
    conn: &Arc<ClientConnection>,
    connections: &ConnectionRegistry,
) {
    match msg {
        ClientMessage::Auth { .. } => {
            // Already authenticated, ignore
        }
        ClientMessage::JoinScope { scope } => {
            let response = match Scope::parse(scope) {
                Ok(parsed) => match connections.subscribe(conn.id, &parsed) {
                    Ok(()) => ServerMessage::Joined {
                        scope: parsed.to_string(),
                    },
                    Err(JoinError::Forbidden) => ServerMessage::JoinError {
                        scope: scope.clone(),
                        message: "Permission denied".to_string(),
                    },
                    Err(e) => ServerMessage::JoinError {
                        scope: scope.clone(),
                        message: e.to_string(),
                    },
                },
                Err(e) => ServerMessage::JoinError {
                    scope: scope.clone(),
                    message: e.to_string(),
                },
            };
            reply(conn, &response);
        }
        ClientMessage::LeaveScope { scope } => {
            let response = match Scope::parse(scope) {
                Ok(parsed) => {
                    connections.unsubscribe(conn.id, &parsed);
                    ServerMessage::Left {
                        scope: parsed.to_string(),
                    }
                }
                Err(e) => ServerMessage::Error {
                    message: e.to_string(),
                },
            };
            reply(conn, &response);
        }
        ClientMessage::Ping { seq } => {
            reply(conn, &ServerMessage::Pong { seq: *seq });
        }
    }
}

/// Run the HTTP/WebSocket server
pub async fn run_websocket_server(bind_addr: SocketAddr, state: WsState) -> anyhow::Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "WebSocket server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
