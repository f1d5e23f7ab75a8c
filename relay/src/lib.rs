//! Wormhole relay: the server-side tunnel multiplexer.
//!
//! Wires together the five components in the module list below into one
//! axum `Router`: agents connect over `/tunnel`, public traffic lands on the
//! fallback route and is proxied by host, and `/status` exposes the registry
//! for the admin surface.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header::HOST, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

pub mod config;
pub mod error;
pub mod headers;
pub mod host;
pub mod ids;
pub mod pending;
pub mod registry;
pub mod tunnel;

pub use config::Config;
pub use error::TunnelError;
use pending::PendingTable;
use registry::TunnelRegistry;
use wormhole_shared::protocol::{decode_body, encode_body, ConnectedFrame, Frame, HttpRequestFrame, HttpResponseFrame};

/// Entropy width of a generated `request_id`, in bytes.
const REQUEST_ID_TOKEN_BYTES: usize = 16;

/// Everything a handler needs: the registry, the pending-request table, and
/// configuration. The single value the module list's design notes call for
/// in place of process-wide globals.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<TunnelRegistry>,
    pub pending: Arc<PendingTable>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            registry: Arc::new(TunnelRegistry::new()),
            pending: Arc::new(PendingTable::new()),
            config: Arc::new(config),
        }
    }
}

/// Assemble the full axum `Router` over a given `AppState`. Split out from
/// `main` so integration tests can drive it directly with
/// `tower::ServiceExt::oneshot` or a real bound listener.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/tunnel", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .fallback(any(proxy_handler))
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

/// `GET /status`: a point-in-time view of every live tunnel. Never fails.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.registry.snapshot();
    let tunnels: Vec<_> = snapshot
        .iter()
        .map(|t| {
            serde_json::json!({
                "subdomain": t.subdomain,
                "tunnel_id": t.tunnel_id,
                "created_at": t.created_at.to_rfc3339(),
                "request_count": t.request_count,
            })
        })
        .collect();
    axum::Json(serde_json::json!({
        "status": "running",
        "active_tunnels": snapshot.len(),
        "tunnels": tunnels,
    }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_agent_socket(socket, state))
}

/// Drive one agent control channel through its `INIT -> ASSIGNED -> CLOSED`
/// lifecycle (see the module list's control-channel state machine).
async fn handle_agent_socket(socket: WebSocket, state: AppState) {
    let (tunnel, mut outbound_rx) = match state.registry.create() {
        Ok(pair) => pair,
        Err(_exhausted) => {
            let (mut sender, _receiver) = socket.split();
            let _ = sender
                .send(Message::Close(Some(CloseFrame {
                    code: 1013, // "try again later"
                    reason: "tunnel capacity exhausted".into(),
                })))
                .await;
            warn!("rejected agent connection: subdomain space exhausted");
            return;
        }
    };

    let (mut ws_tx, mut ws_rx) = socket.split();

    let connected = Frame::Connected(ConnectedFrame {
        tunnel_id: tunnel.tunnel_id().to_string(),
        subdomain: tunnel.subdomain().to_string(),
        public_url: format!("https://{}.{}", tunnel.subdomain(), state.config.base_domain),
    });
    if ws_tx.send(Message::Binary(connected.encode().into())).await.is_err() {
        state.registry.remove(tunnel.tunnel_id());
        return;
    }
    info!(tunnel_id = tunnel.tunnel_id(), subdomain = tunnel.subdomain(), "tunnel assigned");

    let heartbeat_deadline = state.config.heartbeat_deadline();
    let mut ping_timer = tokio::time::interval(state.config.websocket_heartbeat);
    ping_timer.tick().await; // first tick fires immediately; consume it
    let mut last_seen = Instant::now();

    let reason = loop {
        tokio::select! {
            frame = outbound_rx.recv() => {
                match frame {
                    Some(bytes) => {
                        if ws_tx.send(Message::Binary(bytes.into())).await.is_err() {
                            break "send failed";
                        }
                    }
                    None => break "tunnel handle dropped",
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        last_seen = Instant::now();
                        match classify_agent_frame(&state, &data) {
                            Ok(()) => {}
                            Err(()) => break "protocol-error",
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();
                        match classify_agent_frame(&state, text.as_bytes()) {
                            Ok(()) => {}
                            Err(()) => break "protocol-error",
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        last_seen = Instant::now();
                        if ws_tx.send(Message::Pong(payload)).await.is_err() {
                            break "pong send failed";
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_seen = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None => break "closed",
                    Some(Err(_)) => break "transport error",
                }
            }
            _ = ping_timer.tick() => {
                if last_seen.elapsed() > heartbeat_deadline {
                    break "heartbeat timeout";
                }
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break "ping send failed";
                }
            }
        }
    };

    state.registry.remove(tunnel.tunnel_id());
    state.pending.fail_all_for(tunnel.tunnel_id(), TunnelError::TunnelGone);
    info!(tunnel_id = tunnel.tunnel_id(), subdomain = tunnel.subdomain(), %reason, "tunnel torn down");
}

/// Decode one frame received from the agent and act on it. Returns `Err(())`
/// on a protocol violation (malformed frame, or any frame type the agent has
/// no business sending), which the caller treats as terminal.
fn classify_agent_frame(state: &AppState, bytes: &[u8]) -> Result<(), ()> {
    match Frame::decode(bytes) {
        Ok(Frame::HttpResponse(resp)) => {
            if !state.pending.fulfill(&resp.request_id, resp) {
                debug!("dropped http_response for unknown or already-completed request");
            }
            Ok(())
        }
        Ok(Frame::Ping) | Ok(Frame::Pong) => Ok(()),
        Ok(Frame::Connected(_)) | Ok(Frame::HttpRequest(_)) => Err(()),
        Err(err) => {
            warn!(%err, "malformed frame from agent");
            Err(())
        }
    }
}

/// Proxy one public HTTP request to the tunnel its Host header resolves to.
async fn proxy_handler(State(state): State<AppState>, req: Request<Body>) -> Response {
    let host = req.headers().get(HOST).and_then(|h| h.to_str().ok()).unwrap_or("");
    let Some(subdomain) = host::extract_subdomain(host, &state.config.base_domain) else {
        return render_error(TunnelError::TunnelNotFound);
    };

    let Some(tunnel) = state.registry.lookup(&subdomain) else {
        return render_error(TunnelError::TunnelNotFound);
    };

    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let query_string = req.uri().query().unwrap_or("").to_string();
    let flat_headers = headers::flatten_request_headers(req.headers());

    let body_bytes = match axum::body::to_bytes(req.into_body(), state.config.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(_) => return render_error(TunnelError::PayloadTooLarge),
    };

    let request_id = ids::random_token(REQUEST_ID_TOKEN_BYTES);
    let frame = Frame::HttpRequest(HttpRequestFrame {
        request_id: request_id.clone(),
        method,
        path,
        query_string,
        headers: flat_headers,
        body: encode_body(&body_bytes),
    });

    let Ok(rx) = state.pending.register(request_id.clone(), tunnel.tunnel_id().to_string()) else {
        // Only reachable if id generation collided; never actually observed.
        return render_error(TunnelError::DispatchFailed);
    };
    // Guarantees cleanup on every exit path from here on, including the
    // request future being dropped outright when the public client
    // disconnects mid-wait: that drop removes the entry so a reply that
    // trickles in afterward finds nothing to fulfill.
    let _guard = CancelOnDrop { pending: &state.pending, request_id: &request_id };

    if tunnel.send(&frame).await.is_err() {
        return render_error(TunnelError::DispatchFailed);
    }
    tunnel.record_dispatch();

    match timeout(state.config.request_timeout, rx).await {
        Ok(Ok(Ok(response))) => render_response(response),
        Ok(Ok(Err(err))) => render_error(err),
        Ok(Err(_recv_error)) => render_error(TunnelError::TunnelGone),
        Err(_elapsed) => render_error(TunnelError::Timeout),
    }
}

struct CancelOnDrop<'a> {
    pending: &'a PendingTable,
    request_id: &'a str,
}

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        self.pending.cancel(self.request_id);
    }
}

fn render_response(response: HttpResponseFrame) -> Response {
    let status = if (100..=599).contains(&response.status) {
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY)
    } else {
        StatusCode::BAD_GATEWAY
    };
    let body = decode_body(&response.body).unwrap_or_default();
    let header_map = headers::response_headers(&response.headers);

    let mut built = Response::builder().status(status).body(Body::from(body)).unwrap_or_else(|_| {
        Response::builder()
            .status(StatusCode::BAD_GATEWAY)
            .body(Body::from("Bad Gateway"))
            .expect("a fixed status and body always build")
    });
    *built.headers_mut() = header_map;
    built
}

fn render_error(err: TunnelError) -> Response {
    match err.status_and_phrase() {
        Some((status, phrase)) => (status, phrase).into_response(),
        // `Cancelled` never actually reaches this function: cancellation is
        // observed by the handler future being dropped outright (see
        // `CancelOnDrop`), not by resolving with this error.
        None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}
