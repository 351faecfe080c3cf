//! REST API for the gas ledger
//!
//! Thin HTTP surface over [`Node`]: transaction submission, chain listing,
//! block lookup, integrity checks and per-station statistics. Every route
//! except `/api/health` requires `Authorization: Bearer <api_token>`.

use axum::{
    extract::{Path, Query, Request, State},
    http::{self, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use hex::decode_to_slice;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::anomaly::StationStats;
use crate::blockchain::{Block, Sha256Hash};
use crate::error::ChainError;
use crate::node::{Node, NodeState};
use crate::transaction::Transaction;

// ============================================================================
// API Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    Ledger(ChainError),
    InvalidInput(String),
    NotFound(String),
    Unauthorized,
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Ledger(e) => {
                let status = match &e {
                    ChainError::InvalidTransaction(_) => StatusCode::BAD_REQUEST,
                    ChainError::NotFound(_) => StatusCode::NOT_FOUND,
                    ChainError::IntegrityViolation { .. } => StatusCode::CONFLICT,
                    ChainError::StorageFailure(_)
                    | ChainError::InvariantViolation(_)
                    | ChainError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Invalid API Token".to_string()),
            ApiError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<ChainError> for ApiError {
    fn from(err: ChainError) -> Self {
        ApiError::Ledger(err)
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitTransactionRequest {
    pub station_id: String,
    pub volume: f64,
    /// Milliseconds since the Unix epoch; defaults to the time of receipt.
    #[serde(default)]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// JSON shape of a committed block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockView {
    pub index: u64,
    pub timestamp: u64,
    pub hash: String,
    pub previous_hash: String,
    pub station_id: String,
    pub volume: f64,
    pub tx_timestamp: u64,
    pub metadata: BTreeMap<String, String>,
    pub is_anomalous: bool,
    pub anomaly_score: f64,
}

impl From<&Block> for BlockView {
    fn from(block: &Block) -> Self {
        BlockView {
            index: block.index,
            timestamp: block.timestamp,
            hash: hex::encode(block.hash),
            previous_hash: hex::encode(block.previous_hash),
            station_id: block.transaction.station_id.clone(),
            volume: block.transaction.volume_f64(),
            tx_timestamp: block.transaction.timestamp,
            metadata: block.transaction.metadata.clone(),
            is_anomalous: block.is_anomalous,
            anomaly_score: block.anomaly_score,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChainPage {
    pub blocks: Vec<BlockView>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IntegrityResponse {
    pub status: String,
    pub height: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StationStatsView {
    pub station_id: String,
    pub count: u64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<StationStats> for StationStatsView {
    fn from(stats: StationStats) -> Self {
        StationStatsView {
            std_dev: stats.std_dev(),
            station_id: stats.station_id,
            count: stats.count,
            mean: stats.mean,
        }
    }
}

#[derive(Deserialize)]
struct PaginationQuery {
    #[serde(default = "default_page")]
    page: u64,
    #[serde(default = "default_limit")]
    limit: u64,
}

fn default_page() -> u64 {
    0
}
fn default_limit() -> u64 {
    10
}

// ============================================================================
// Utility Functions
// ============================================================================

/// Parses a 64-character hex string into a Sha256Hash ([u8; 32]).
fn parse_hash(hash_str: &str) -> Result<Sha256Hash, ApiError> {
    if hash_str.len() != 64 {
        return Err(ApiError::InvalidInput(
            "Hash must be a 64-character hex string".to_string(),
        ));
    }
    let mut hash_bytes = [0u8; 32];
    decode_to_slice(hash_str, &mut hash_bytes)
        .map_err(|e| ApiError::InvalidInput(format!("Invalid hex hash: {}", e)))?;
    Ok(hash_bytes)
}

// ============================================================================
// Middleware
// ============================================================================

/// Bearer-token check against `server.api_token`.
async fn auth_middleware(State(node): State<Arc<Node>>, req: Request, next: Next) -> Response {
    let presented = req
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let authorized = matches!(presented, Some(token) if token == node.config.server.api_token);

    if authorized {
        next.run(req).await
    } else {
        tracing::warn!(path = %req.uri().path(), "rejected request with invalid API token");
        ApiError::Unauthorized.into_response()
    }
}

/// Request logging middleware. Logs method, path, status, duration and the
/// current `NodeState`.
async fn logging_middleware(State(node): State<Arc<Node>>, req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    tracing::info!(
        method = %method,
        path = %path,
        status = %response.status().as_u16(),
        duration_ms = %start.elapsed().as_millis(),
        node_state = ?node.state(),
        "api.request"
    );

    response
}

// ============================================================================
// API Server
// ============================================================================

/// Build the API router with all endpoints
pub fn build_api_router(node: Arc<Node>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(vec![
            http::Method::GET,
            http::Method::POST,
            http::Method::OPTIONS,
        ])
        .allow_headers(vec![http::header::CONTENT_TYPE, http::header::AUTHORIZATION])
        .allow_credentials(true);

    let protected = Router::new()
        // Transaction endpoints
        .route("/transactions", post(submit_transaction))
        // Chain endpoints
        .route("/blockchain", get(get_blocks))
        .route("/blockchain/integrity", get(get_chain_integrity))
        .route("/blockchain/:hash", get(get_block))
        // Detector endpoints
        .route("/stations/:station_id/stats", get(get_station_stats))
        .route_layer(middleware::from_fn_with_state(node.clone(), auth_middleware));

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .merge(protected)
        .layer(middleware::from_fn_with_state(node.clone(), logging_middleware))
        .with_state(node);

    Router::new().nest("/api", api_routes).layer(cors)
}

/// Serve the API on `server.api_port` until the process is stopped.
pub async fn run_api_server(node: Arc<Node>) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], node.config.server.api_port));
    let app = build_api_router(node);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn health_check(State(node): State<Arc<Node>>) -> impl IntoResponse {
    let state = node.state();
    let status = if state == NodeState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let label = if status == StatusCode::OK { "healthy" } else { "unhealthy" };

    (
        status,
        Json(serde_json::json!({
            "status": label,
            "node_state": format!("{:?}", state),
            "height": node.query().height(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        })),
    )
}

async fn submit_transaction(
    State(node): State<Arc<Node>>,
    Json(req): Json<SubmitTransactionRequest>,
) -> Result<(StatusCode, Json<BlockView>), ApiError> {
    let volume = Transaction::volume_from_f64(req.volume)?;
    let mut tx = Transaction::new(req.station_id, volume);
    if let Some(timestamp) = req.timestamp {
        tx = tx.with_timestamp(timestamp);
    }
    tx.metadata = req.metadata;

    // The SQLite append is blocking I/O.
    let ledger = node.ledger.clone();
    let block = tokio::task::spawn_blocking(move || ledger.submit(tx))
        .await
        .map_err(|e| ApiError::InternalError(format!("Submit task failed: {}", e)))??;

    Ok((StatusCode::CREATED, Json(BlockView::from(block.as_ref()))))
}

async fn get_blocks(
    State(node): State<Arc<Node>>,
    Query(params): Query<PaginationQuery>,
) -> Json<ChainPage> {
    let snapshot = node.query().list_chain();
    let total = snapshot.len() as u64;

    let limit = params.limit.clamp(1, 100); // Max 100 blocks per request
    let offset = params.page.saturating_mul(limit);

    let blocks = snapshot
        .iter()
        .rev()
        .skip(offset.min(total) as usize)
        .take(limit as usize)
        .map(BlockView::from)
        .collect();

    Json(ChainPage {
        blocks,
        total,
        page: params.page,
        limit,
    })
}

async fn get_block(
    State(node): State<Arc<Node>>,
    Path(hash_str): Path<String>,
) -> Result<Json<BlockView>, ApiError> {
    let hash = parse_hash(&hash_str)?;
    let block = node
        .query()
        .get_block(&hash)
        .map_err(|_| ApiError::NotFound(format!("Block {} not found", hash_str)))?;
    Ok(Json(BlockView::from(block.as_ref())))
}

async fn get_chain_integrity(State(node): State<Arc<Node>>) -> Response {
    let height = node.query().height();
    match node.check_integrity() {
        Ok(()) => Json(IntegrityResponse {
            status: "ok".to_string(),
            height,
            index: None,
            reason: None,
        })
        .into_response(),
        Err(ChainError::IntegrityViolation { index, reason }) => (
            StatusCode::CONFLICT,
            Json(IntegrityResponse {
                status: "violated".to_string(),
                height,
                index: Some(index),
                reason: Some(reason),
            }),
        )
            .into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

async fn get_station_stats(
    State(node): State<Arc<Node>>,
    Path(station_id): Path<String>,
) -> Result<Json<StationStatsView>, ApiError> {
    node.ledger
        .station_stats(&station_id)
        .map(|stats| Json(StationStatsView::from(stats)))
        .ok_or_else(|| ApiError::NotFound(format!("Station {} has no readings", station_id)))
}
