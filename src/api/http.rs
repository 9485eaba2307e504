//! HTTP API Server
//!
//! REST API for log operations, peer registration and cluster status.

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::error::{Error, Result};
use crate::log::{EntryId, LogEntry};
use crate::node::Node;
use crate::replication::protocol::{
    AppendRequest, ErrorResponse, HealthResponse, LogsResponse, ReadQuery, RegisterRequest,
    RegisterResponse,
};
use crate::replication::ReplicatedLog;
use crate::state::Registration;

/// Shared application state
pub struct AppState {
    /// The replicated log served by this node
    pub log: ReplicatedLog,
    /// HTTP client for forwarding writes to the master
    pub client: reqwest::Client,
}

/// HTTP API server
pub struct HttpServer {
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(log: ReplicatedLog, client: reqwest::Client) -> Self {
        Self {
            state: Arc::new(AppState { log, client }),
        }
    }

    /// Get the state for sharing with other components
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Create the router
    pub fn router(&self) -> Router {
        Router::new()
            // Log operations
            .route("/log", post(handle_append))
            .route("/log/:id", get(handle_get).post(handle_append_replica))
            .route("/logs", get(handle_get_all))
            // Membership
            .route("/register", post(handle_register))
            // Status and info
            .route("/healthcheck", get(handle_health))
            .route("/info", get(handle_info))
            .route("/cluster/nodes", get(handle_cluster_nodes))
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.state))
    }

    /// Serve on `listener` until `shutdown` fires
    pub async fn serve(
        &self,
        listener: tokio::net::TcpListener,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!("HTTP API listening on {}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;

        tracing::info!("HTTP API on {} stopped", addr);
        Ok(())
    }
}

// ============ Error mapping ============

fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::DuplicateEntry(_) => StatusCode::CONFLICT,
        Error::InvalidConcern(_) | Error::Config(_) | Error::ConfigParse(_) => {
            StatusCode::BAD_REQUEST
        }
        Error::InsufficientPeers { .. }
        | Error::QuorumNotReached { .. }
        | Error::Timeout { .. }
        | Error::NoConsensus { .. }
        | Error::NotMaster(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::PeerUnavailable(_) | Error::PeerUnhealthy(_) | Error::Network(_) => {
            StatusCode::BAD_GATEWAY
        }
        Error::ReplicaIdMismatch { .. } | Error::Io(_) | Error::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(error: Error) -> Response {
    let status = status_for(&error);
    if status.is_server_error() {
        tracing::warn!("Request failed: {}", error);
    } else {
        tracing::debug!("Request rejected: {}", error);
    }
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            code: error.code().to_string(),
        }),
    )
        .into_response()
}

fn respond<T: Serialize>(result: Result<T>) -> Response {
    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => error_response(e),
    }
}

// ============ Handlers ============

async fn handle_append(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AppendRequest>,
) -> Response {
    // Forward to master if we're a secondary
    if !state.log.topology().is_master() {
        return forward_to_master(&state, "/log", &req).await;
    }

    let w = req.write_concern();
    respond(state.log.append(req.into_payload(), w).await)
}

async fn handle_append_replica(
    State(state): State<Arc<AppState>>,
    Path(id): Path<EntryId>,
    Json(entry): Json<LogEntry>,
) -> Response {
    if entry.id != id {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("Path id {} does not match entry id {}", id, entry.id),
                code: "ID_MISMATCH".to_string(),
            }),
        )
            .into_response();
    }
    respond(state.log.append_replica(entry).await)
}

async fn handle_get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<EntryId>,
    Query(query): Query<ReadQuery>,
) -> Response {
    respond(state.log.get(id, query.read_concern()).await)
}

async fn handle_get_all(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReadQuery>,
) -> Response {
    respond(
        state
            .log
            .get_all(query.read_concern())
            .await
            .map(|entries| LogsResponse { entries }),
    )
}

async fn handle_register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Response {
    let url = req.peer_url();
    tracing::debug!("Registration request from {}", url);

    let topology = state.log.topology();
    respond(
        topology
            .add_remote_node(&url)
            .await
            .map(|registration| match registration {
                Registration::Added(info) | Registration::AlreadyKnown(info) => RegisterResponse {
                    registered: true,
                    node_id: info.node_id,
                },
                Registration::Local => RegisterResponse {
                    registered: false,
                    node_id: topology.local().info().node_id.clone(),
                },
            }),
    )
}

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "success".to_string(),
        node_id: state.log.topology().local().info().node_id.clone(),
    })
}

async fn handle_info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.log.info().await)
}

async fn handle_cluster_nodes(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.log.cluster().await)
}

/// Relay a client write to the master and pass its answer back verbatim
async fn forward_to_master<T: Serialize>(state: &AppState, endpoint: &str, body: &T) -> Response {
    let master_url = match state.log.topology().master_url().await {
        Some(url) => url,
        None => return error_response(Error::NotMaster(None)),
    };
    let url = format!("{}{}", master_url.trim_end_matches('/'), endpoint);

    tracing::debug!("Forwarding write to master at {}", url);

    match state.client.post(&url).json(body).send().await {
        Ok(response) => {
            let status =
                StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::OK);
            match response.text().await {
                Ok(body) => (status, [(header::CONTENT_TYPE, "application/json")], body).into_response(),
                Err(e) => error_response(Error::Network(format!(
                    "Failed to read master response: {}",
                    e
                ))),
            }
        }
        Err(e) => {
            tracing::warn!("Failed to forward to master: {}", e);
            error_response(Error::Network(format!("Failed to contact master: {}", e)))
        }
    }
}
