//! SSE transport: `POST /rpc` answers each request as a single `reply`
//! event; `GET /healthz` reports liveness and whether the engine has been
//! built yet.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    response::{sse::Event as SseEvent, Json, Sse},
    routing::{get, post},
    Router,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::info;

use ocmem_core::{MemoryError, Result};

use crate::Gateway;

#[derive(Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: serde_json::Value,
    verb: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    ready: bool,
    version: &'static str,
}

async fn healthz(State(gateway): State<Arc<Gateway>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        ready: gateway.ready(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn rpc(
    State(gateway): State<Arc<Gateway>>,
    Json(request): Json<RpcRequest>,
) -> Sse<impl Stream<Item = std::result::Result<SseEvent, Infallible>>> {
    let result = gateway.handle(&request.verb, &request.args).await;
    let payload = serde_json::json!({ "id": request.id, "result": result });
    let event = SseEvent::default()
        .event("reply")
        .data(payload.to_string());
    Sse::new(stream::once(async move { Ok(event) }))
}

/// Serve the SSE transport on `127.0.0.1:<port>`.
pub async fn run(gateway: Arc<Gateway>, port: u16) -> Result<()> {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/rpc", post(rpc))
        .layer(CorsLayer::permissive())
        .with_state(gateway);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    info!(port, "SSE transport listening");
    axum::serve(listener, app)
        .await
        .map_err(|e| MemoryError::Other(anyhow::anyhow!("server error: {e}")))?;
    Ok(())
}
