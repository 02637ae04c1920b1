//! HTTP and WebSocket surface of the relay.

mod socket;
mod upload;

use std::future::Future;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, DefaultBodyLimit, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::info;
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;

use crate::ingest::IngestError;
use crate::metrics::RelayMetricsSnapshot;
use crate::net::client_ip;
use crate::service::RelayService;
use crate::transfer::TransferSummary;

pub fn router(service: RelayService) -> Router {
    let body_limit = service.config().max_upload_bytes;
    Router::new()
        .route("/ws", get(socket::upgrade))
        .route(
            "/api/upload",
            post(upload::handle_upload).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/api/me", get(me))
        .route("/api/transfers/:id", get(transfer_summary))
        .route("/api/health", get(health))
        .route("/api/stats", get(stats))
        .with_state(service)
}

/// Serves until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, service: RelayService, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("relay listening on http://{addr}");
    }
    axum::serve(
        listener,
        router(service).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

#[derive(Serialize)]
struct HealthCheck {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthCheck> {
    Json(HealthCheck {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn stats(State(service): State<RelayService>) -> Json<RelayMetricsSnapshot> {
    Json(service.metrics().snapshot())
}

#[derive(Serialize)]
struct WhoAmI {
    ip: String,
}

async fn me(
    State(service): State<RelayService>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Json<WhoAmI> {
    Json(WhoAmI {
        ip: client_ip(&headers, peer, service.config().advertise_ip),
    })
}

async fn transfer_summary(
    State(service): State<RelayService>,
    Path(id): Path<String>,
) -> Result<Json<TransferSummary>, StatusCode> {
    service
        .store()
        .summary(&id)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}
