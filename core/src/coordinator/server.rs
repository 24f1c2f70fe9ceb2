// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The coordinator's HTTP surface.
//!
//! Registration records the connection's remote address as the node's IP,
//! never a client-declared value. The key endpoints hand the fleet key pair
//! to workers during their bootstrap.

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::config::CoordinatorSettings;
use crate::protocol::{
    ErrorBody, PingResponse, PrivateKeyResponse, PublicKeyResponse, RegisterRequest,
    RegisterResponse,
};

use super::keys;
use super::registry::NodeRegistry;

/// State shared by the coordinator handlers.
#[derive(Debug)]
pub struct CoordinatorState {
    /// The shared node registry.
    pub registry: Arc<NodeRegistry>,
    /// Where the fleet key pair lives.
    pub ssh_dir: PathBuf,
}

/// Build the coordinator router.
pub fn router(state: Arc<CoordinatorState>) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/get_ssh_public_key", get(get_ssh_public_key))
        .route("/get_ssh_private_key", get(get_ssh_private_key))
        .route("/ping", get(ping))
        .with_state(state)
}

/// Bind the coordinator surface and serve until the process ends.
pub async fn serve(
    state: Arc<CoordinatorState>,
    settings: &CoordinatorSettings,
) -> std::io::Result<()> {
    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "coordinator API listening");
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

async fn register(
    State(state): State<Arc<CoordinatorState>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Json(request): Json<RegisterRequest>,
) -> Json<RegisterResponse> {
    let ip = remote.ip().to_string();
    info!(%ip, port = request.port, "registration received");
    let node = state.registry.upsert(ip, request);
    Json(RegisterResponse {
        status: "registered".to_string(),
        node,
    })
}

async fn get_ssh_public_key(
    State(state): State<Arc<CoordinatorState>>,
) -> Result<Json<PublicKeyResponse>, Response> {
    match keys::public_key(&state.ssh_dir) {
        Ok(Some(public_key)) => Ok(Json(PublicKeyResponse { public_key })),
        Ok(None) => Err(key_missing("No public key found on the server")),
        Err(err) => Err(key_unreadable(&err)),
    }
}

async fn get_ssh_private_key(
    State(state): State<Arc<CoordinatorState>>,
) -> Result<Json<PrivateKeyResponse>, Response> {
    match keys::private_key(&state.ssh_dir) {
        Ok(Some(private_key)) => Ok(Json(PrivateKeyResponse { private_key })),
        Ok(None) => Err(key_missing("No private key found on the server")),
        Err(err) => Err(key_unreadable(&err)),
    }
}

async fn ping() -> Json<PingResponse> {
    Json(PingResponse::pong())
}

fn key_missing(message: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn key_unreadable(err: &std::io::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error: format!("Failed to read key material: {err}"),
        }),
    )
        .into_response()
}
