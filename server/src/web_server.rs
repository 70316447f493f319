//! Axum HTTP server for the Icinga webhook: POST /icinga/{network.channel} relays a
//! notification to that channel, GET on the same route explains itself.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use axum::body::Bytes;
use tracing::info;

use phabrelay::alert;
use phabrelay::im::ChatSink;

#[derive(Clone)]
struct AppState {
    sink: Arc<dyn ChatSink>,
}

/// Build the router; split out so tests can drive it without a socket.
pub fn alert_router(sink: Arc<dyn ChatSink>) -> Router {
    Router::new()
        .route("/icinga/{target}", get(icinga_get_handler).post(icinga_post_handler))
        .with_state(AppState { sink })
}

/// Runs the alert webhook server until the listener fails.
pub async fn run_alert_server(addr: SocketAddr, sink: Arc<dyn ChatSink>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "icinga webhook listening");
    axum::serve(listener, alert_router(sink)).await?;
    Ok(())
}

async fn icinga_get_handler() -> Response {
    text_response(StatusCode::OK, alert::GET_RESPONSE.to_string())
}

/// POST /icinga/{network.channel}: body is the Icinga notification JSON.
async fn icinga_post_handler(
    State(state): State<AppState>,
    Path(target): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let (status_code, body_str) = alert::handle_webhook(&target, content_type, &body, state.sink.as_ref()).await;
    let status = StatusCode::from_u16(status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    text_response(status, body_str)
}

fn text_response(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}
