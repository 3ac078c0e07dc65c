//! The control plane's HTTP surface (SPEC_FULL.md A.5): a small read-only
//! fleet inspector plus the one write path that matters, `/stream/:infohash`.
//! Grounded on `vpn-identity`'s axum binary — a `Router` built once against
//! a `Clone`-able state struct, `tracing` on every handler, JSON bodies via
//! `serde_json` — adapted to axum 0.7's `axum::serve` instead of 0.6's
//! `axum::Server::bind`.

use crate::app::AppState;
use crate::error::ApiError;
use ace_types::ContentId;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/engines", get(list_engines))
        .route("/vpns", get(list_vpns))
        .route("/stream/:infohash", get(stream))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn list_engines(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.state.list_engines())
}

#[derive(Serialize)]
struct VpnSnapshot {
    id: String,
    status: String,
    last_health: Option<bool>,
    unhealthy_since: Option<chrono::DateTime<chrono::Utc>>,
    last_restart_time: Option<chrono::DateTime<chrono::Utc>>,
    last_recovery_time: Option<chrono::DateTime<chrono::Utc>>,
}

async fn list_vpns(State(state): State<AppState>) -> impl IntoResponse {
    let snapshots: Vec<VpnSnapshot> = state
        .vpn
        .configured_vpns()
        .into_iter()
        .filter_map(|id| {
            state.vpn.with_fsm(&id, |fsm| VpnSnapshot {
                id: id.to_string(),
                status: fsm.status().to_string(),
                last_health: fsm.last_health(),
                unhealthy_since: fsm.unhealthy_since(),
                last_restart_time: fsm.last_restart_time(),
                last_recovery_time: fsm.last_recovery_time(),
            })
        })
        .collect();
    Json(snapshots)
}

/// Attaches a new client to the content id's proxy session and streams the
/// multiplexed upstream back as the response body.
///
/// Implements the initial-data wait spec.md §4.7 describes: if the ring
/// buffer is still empty after `initial_data_wait_timeout`, the request
/// fails with [`ace_proxy::ProxyError::StreamUnavailable`] unless the
/// upstream writer is still alive, in which case the client proceeds
/// anyway and waits on its own read loop.
async fn stream(State(state): State<AppState>, Path(infohash): Path<String>) -> Result<Response, ApiError> {
    let content_id = ContentId::parse(&infohash)?;
    let client_id = Uuid::new_v4();
    let (session, start_index) = state.proxy.add_client(&content_id, client_id).await?;

    let deadline = tokio::time::Instant::now() + state.proxy_config.initial_data_wait_timeout;
    while session.ring.is_empty() {
        if tokio::time::Instant::now() >= deadline {
            if !session.ring.is_writer_alive() {
                state.proxy.remove_client(&content_id, client_id);
                return Err(ace_proxy::ProxyError::StreamUnavailable.into());
            }
            break;
        }
        tokio::time::sleep(state.proxy_config.initial_data_check_interval).await;
    }

    let body_stream = session.chunk_stream(start_index);
    let body = Body::from_stream(body_stream.map(Ok::<_, std::io::Error>));

    Response::builder().status(StatusCode::OK).header("content-type", "video/mp2t").body(body).map_err(|err| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err))
}
