//! HTTP Handlers

use std::sync::Arc;

use axum::Json;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use kernel::id::Id;
use platform::client::{extract_client_ip, extract_fingerprint};
use platform::rate_limit::InMemoryRateLimitStore;
use uuid::Uuid;

use crate::application::config::MiningConfig;
use crate::application::manage_session::{CreateSessionUseCase, EndSessionUseCase};
use crate::domain::repository::{
    AttemptLedgerRepository, IdentityRepository, NodeRepository,
};
use crate::domain::services::CryptoRoll;
use crate::error::{MiningError, MiningResult};
use crate::presentation::dto::{
    AttemptView, CreateSessionRequest, EndSessionResponse, NodeView, RegisterIdentityRequest,
    ReviewQueueParams, ReviewQueueResponse, ReviewRequest, SessionResponse, TotalView,
    TotalsResponse,
};
use crate::presentation::gateway::{self, SessionChannels};

/// Default and ceiling for review-queue listings
const REVIEW_QUEUE_DEFAULT_LIMIT: i64 = 50;
const REVIEW_QUEUE_MAX_LIMIT: i64 = 500;

/// Display names come from the external auth system; bound them anyway
const MAX_DISPLAY_NAME_LEN: usize = 64;

/// Shared state for mining handlers
#[derive(Clone)]
pub struct MiningAppState<R>
where
    R: NodeRepository
        + AttemptLedgerRepository
        + IdentityRepository
        + Clone
        + Send
        + Sync
        + 'static,
{
    pub repo: Arc<R>,
    pub config: Arc<MiningConfig>,
    pub sessions: Arc<SessionChannels>,
    pub roller: Arc<CryptoRoll>,
    pub limits: Arc<InMemoryRateLimitStore>,
}

/// POST /api/mining/sessions
pub async fn create_session<R>(
    State(state): State<MiningAppState<R>>,
    Json(req): Json<CreateSessionRequest>,
) -> MiningResult<Json<SessionResponse>>
where
    R: NodeRepository
        + AttemptLedgerRepository
        + IdentityRepository
        + Clone
        + Send
        + Sync
        + 'static,
{
    let use_case =
        CreateSessionUseCase::new(state.repo.clone(), state.roller.clone(), state.config.clone());

    let output = use_case.execute(req.node_count).await?;

    Ok(Json(SessionResponse {
        session_id: output.session_id.into_uuid(),
        nodes: output.nodes.iter().map(NodeView::from).collect(),
    }))
}

/// DELETE /api/mining/sessions/{session_id}
pub async fn end_session<R>(
    State(state): State<MiningAppState<R>>,
    Path(session_id): Path<Uuid>,
) -> MiningResult<Json<EndSessionResponse>>
where
    R: NodeRepository
        + AttemptLedgerRepository
        + IdentityRepository
        + Clone
        + Send
        + Sync
        + 'static,
{
    let use_case = EndSessionUseCase::new(state.repo.clone());
    let nodes_deleted = use_case.execute(Id::from_uuid(session_id)).await?;

    state.sessions.remove(session_id).await;

    Ok(Json(EndSessionResponse { nodes_deleted }))
}

/// GET /api/mining/sessions/{session_id}/nodes
pub async fn list_session_nodes<R>(
    State(state): State<MiningAppState<R>>,
    Path(session_id): Path<Uuid>,
) -> MiningResult<Json<Vec<NodeView>>>
where
    R: NodeRepository
        + AttemptLedgerRepository
        + IdentityRepository
        + Clone
        + Send
        + Sync
        + 'static,
{
    let nodes = state
        .repo
        .list_session_nodes(Id::from_uuid(session_id))
        .await?;

    Ok(Json(nodes.iter().map(NodeView::from).collect()))
}

/// PUT /api/mining/identities/{identity_id}
///
/// Ingestion boundary: the external auth system owns identities; this
/// endpoint only mirrors enough to attribute ledger rows.
pub async fn register_identity<R>(
    State(state): State<MiningAppState<R>>,
    Path(identity_id): Path<Uuid>,
    Json(req): Json<RegisterIdentityRequest>,
) -> MiningResult<impl IntoResponse>
where
    R: NodeRepository
        + AttemptLedgerRepository
        + IdentityRepository
        + Clone
        + Send
        + Sync
        + 'static,
{
    let display_name = req.display_name.trim();
    if display_name.is_empty() || display_name.len() > MAX_DISPLAY_NAME_LEN {
        return Err(MiningError::Malformed(format!(
            "display name must be 1..={} characters",
            MAX_DISPLAY_NAME_LEN
        )));
    }

    state
        .repo
        .upsert_identity(Id::from_uuid(identity_id), display_name)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/mining/identities/{identity_id}/totals
pub async fn identity_totals<R>(
    State(state): State<MiningAppState<R>>,
    Path(identity_id): Path<Uuid>,
) -> MiningResult<Json<TotalsResponse>>
where
    R: NodeRepository
        + AttemptLedgerRepository
        + IdentityRepository
        + Clone
        + Send
        + Sync
        + 'static,
{
    let identity = Id::from_uuid(identity_id);
    if !state.repo.identity_exists(identity).await? {
        return Err(MiningError::IdentityNotFound);
    }

    let totals = state.repo.identity_totals(identity).await?;

    Ok(Json(TotalsResponse {
        identity_id,
        totals: totals.iter().map(TotalView::from).collect(),
    }))
}

/// GET /api/mining/review-queue
pub async fn review_queue<R>(
    State(state): State<MiningAppState<R>>,
    Query(params): Query<ReviewQueueParams>,
) -> MiningResult<Json<ReviewQueueResponse>>
where
    R: NodeRepository
        + AttemptLedgerRepository
        + IdentityRepository
        + Clone
        + Send
        + Sync
        + 'static,
{
    let limit = params
        .limit
        .unwrap_or(REVIEW_QUEUE_DEFAULT_LIMIT)
        .clamp(1, REVIEW_QUEUE_MAX_LIMIT);

    let attempts = state.repo.list_review_queue(limit).await?;

    Ok(Json(ReviewQueueResponse {
        attempts: attempts.iter().map(AttemptView::from).collect(),
    }))
}

/// POST /api/mining/attempts/{attempt_id}/review
pub async fn mark_reviewed<R>(
    State(state): State<MiningAppState<R>>,
    Path(attempt_id): Path<Uuid>,
    Json(req): Json<ReviewRequest>,
) -> MiningResult<impl IntoResponse>
where
    R: NodeRepository
        + AttemptLedgerRepository
        + IdentityRepository
        + Clone
        + Send
        + Sync
        + 'static,
{
    let reviewer = req.reviewer.trim();
    if reviewer.is_empty() {
        return Err(MiningError::Malformed("reviewer must not be empty".to_string()));
    }

    let reviewed = state
        .repo
        .mark_reviewed(Id::from_uuid(attempt_id), reviewer)
        .await?;
    if !reviewed {
        return Err(MiningError::AttemptNotFound);
    }

    tracing::info!(attempt_id = %attempt_id, reviewer, "Attempt reviewed");

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/mining/ws
pub async fn gateway_ws<R>(
    State(state): State<MiningAppState<R>>,
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    axum::extract::ConnectInfo(addr): axum::extract::ConnectInfo<std::net::SocketAddr>,
) -> MiningResult<impl IntoResponse>
where
    R: NodeRepository
        + AttemptLedgerRepository
        + IdentityRepository
        + Clone
        + Send
        + Sync
        + 'static,
{
    let client_ip = extract_client_ip(&headers, Some(addr.ip()));
    let fingerprint = extract_fingerprint(&headers, client_ip)?;

    Ok(ws.on_upgrade(move |socket| gateway::handle_socket(socket, state, fingerprint)))
}
