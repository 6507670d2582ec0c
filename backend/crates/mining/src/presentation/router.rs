//! Mining Router

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use platform::rate_limit::InMemoryRateLimitStore;
use std::sync::Arc;

use crate::application::config::MiningConfig;
use crate::domain::repository::{
    AttemptLedgerRepository, IdentityRepository, NodeRepository,
};
use crate::domain::services::CryptoRoll;
use crate::infra::postgres::PgMiningRepository;
use crate::presentation::gateway::SessionChannels;
use crate::presentation::handlers::{self, MiningAppState};

/// Create the mining router with the PostgreSQL repository
pub fn mining_router(repo: PgMiningRepository, config: MiningConfig) -> Router {
    mining_router_generic(repo, config)
}

/// Create a mining router for any repository implementation
pub fn mining_router_generic<R>(repo: R, config: MiningConfig) -> Router
where
    R: NodeRepository
        + AttemptLedgerRepository
        + IdentityRepository
        + Clone
        + Send
        + Sync
        + 'static,
{
    let state = MiningAppState {
        repo: Arc::new(repo),
        config: Arc::new(config),
        sessions: Arc::new(SessionChannels::new()),
        roller: Arc::new(CryptoRoll),
        limits: Arc::new(InMemoryRateLimitStore::new()),
    };

    Router::new()
        .route("/sessions", post(handlers::create_session::<R>))
        .route("/sessions/{session_id}", delete(handlers::end_session::<R>))
        .route(
            "/sessions/{session_id}/nodes",
            get(handlers::list_session_nodes::<R>),
        )
        .route(
            "/identities/{identity_id}",
            put(handlers::register_identity::<R>),
        )
        .route(
            "/identities/{identity_id}/totals",
            get(handlers::identity_totals::<R>),
        )
        .route("/review-queue", get(handlers::review_queue::<R>))
        .route(
            "/attempts/{attempt_id}/review",
            post(handlers::mark_reviewed::<R>),
        )
        .route("/ws", get(handlers::gateway_ws::<R>))
        .with_state(state)
}
