//! Session/Broadcast Gateway
//!
//! Per-connection state machine `Connected -> InSession ->
//! Disconnected` over an axum WebSocket, plus the injected registry of
//! per-session broadcast channels. Attempts are processed sequentially
//! per connection, so a disconnect mid-attempt never cancels the
//! coordinator's transaction — the result is simply undeliverable,
//! which is not an error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use kernel::id::Id;
use platform::client::ClientFingerprint;
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use crate::application::attempt_mining::{AttemptInput, AttemptMiningUseCase};
use crate::domain::repository::{
    AttemptLedgerRepository, IdentityRepository, NodeRepository,
};
use crate::domain::value_objects::ClientOrigin;
use crate::presentation::dto::{
    AttemptResponse, ClientMessage, NodeClaimedEvent, NodeView, ServerMessage,
};
use crate::presentation::handlers::MiningAppState;

/// Buffered claim events per session before slow receivers lag
const SESSION_CHANNEL_CAPACITY: usize = 256;

/// Injected registry of per-session broadcast channels
///
/// Passed through application state, never read from ambient globals,
/// so concurrent-session scenarios stay testable in isolation.
#[derive(Default)]
pub struct SessionChannels {
    channels: RwLock<HashMap<Uuid, broadcast::Sender<NodeClaimedEvent>>>,
}

impl SessionChannels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a session's claim events, creating the channel on
    /// first join
    pub async fn subscribe(&self, session_id: Uuid) -> broadcast::Receiver<NodeClaimedEvent> {
        let mut channels = self.channels.write().await;
        channels
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(SESSION_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Fan a claim event out to the session's subscribers
    pub async fn publish(&self, session_id: Uuid, event: NodeClaimedEvent) {
        let channels = self.channels.read().await;
        if let Some(tx) = channels.get(&session_id) {
            // A session with no listeners still mines; nothing to do
            let _ = tx.send(event);
        }
    }

    /// Drop a session's channel (session teardown)
    pub async fn remove(&self, session_id: Uuid) {
        self.channels.write().await.remove(&session_id);
    }
}

/// Connection phase of one gateway socket
#[derive(Clone, Copy)]
enum ConnectionPhase {
    /// Socket open, no session joined yet
    Connected,
    /// Joined a world session; attempts accepted, claims fanned in
    InSession {
        session_id: Uuid,
        identity_id: Uuid,
    },
}

/// Drive one gateway connection until the peer disconnects
pub async fn handle_socket<R>(
    mut socket: WebSocket,
    state: MiningAppState<R>,
    fingerprint: ClientFingerprint,
) where
    R: NodeRepository
        + AttemptLedgerRepository
        + IdentityRepository
        + Clone
        + Send
        + Sync
        + 'static,
{
    let mut phase = ConnectionPhase::Connected;
    let mut events: Option<broadcast::Receiver<NodeClaimedEvent>> = None;

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let Some(Ok(message)) = incoming else { break };
                match message {
                    Message::Text(text) => {
                        let delivered = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                handle_client_message(
                                    &mut socket,
                                    &state,
                                    &fingerprint,
                                    &mut phase,
                                    &mut events,
                                    client_msg,
                                )
                                .await
                            }
                            Err(e) => {
                                tracing::debug!(error = %e, "Unparseable gateway message");
                                send_message(
                                    &mut socket,
                                    &ServerMessage::Rejected {
                                        reason_code: "malformed_request".to_string(),
                                    },
                                )
                                .await
                            }
                        };
                        if delivered.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    // Ping/pong handled by the transport; binary ignored
                    _ => {}
                }
            }
            event = recv_event(&mut events) => {
                match event {
                    Ok(ev) => {
                        if let ConnectionPhase::InSession { identity_id, .. } = &phase {
                            // The claimant already has the authoritative
                            // result; only the others need the event
                            if ev.claimed_by_identity != *identity_id
                                && send_message(&mut socket, &ServerMessage::NodeClaimed(ev))
                                    .await
                                    .is_err()
                            {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Gateway receiver lagged behind session events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        events = None;
                    }
                }
            }
        }
    }

    tracing::debug!("Gateway connection closed");
}

/// Await the next session event, or park forever when not subscribed
async fn recv_event(
    events: &mut Option<broadcast::Receiver<NodeClaimedEvent>>,
) -> Result<NodeClaimedEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn handle_client_message<R>(
    socket: &mut WebSocket,
    state: &MiningAppState<R>,
    fingerprint: &ClientFingerprint,
    phase: &mut ConnectionPhase,
    events: &mut Option<broadcast::Receiver<NodeClaimedEvent>>,
    message: ClientMessage,
) -> Result<(), axum::Error>
where
    R: NodeRepository
        + AttemptLedgerRepository
        + IdentityRepository
        + Clone
        + Send
        + Sync
        + 'static,
{
    match message {
        ClientMessage::Join {
            session_id,
            identity_id,
        } => {
            let known = match state.repo.identity_exists(Id::from_uuid(identity_id)).await {
                Ok(known) => known,
                Err(e) => return send_storage_error(socket, &e.to_string()).await,
            };
            if !known {
                return send_rejected(socket, "identity_not_found").await;
            }

            let nodes = match state
                .repo
                .list_session_nodes(Id::from_uuid(session_id))
                .await
            {
                Ok(nodes) => nodes,
                Err(e) => return send_storage_error(socket, &e.to_string()).await,
            };
            if nodes.is_empty() {
                return send_rejected(socket, "session_not_found").await;
            }

            *events = Some(state.sessions.subscribe(session_id).await);
            *phase = ConnectionPhase::InSession {
                session_id,
                identity_id,
            };

            tracing::info!(
                session_id = %session_id,
                identity_id = %identity_id,
                "Identity joined session"
            );

            send_message(
                socket,
                &ServerMessage::Joined {
                    session_id,
                    nodes: nodes.iter().map(NodeView::from).collect(),
                },
            )
            .await
        }

        ClientMessage::Attempt {
            session_ref,
            node_ref,
            claimed_position,
            idempotency_token,
        } => {
            let ConnectionPhase::InSession {
                session_id,
                identity_id,
            } = *phase
            else {
                return send_rejected(socket, "not_in_session").await;
            };
            if session_ref != session_id {
                return send_rejected(socket, "session_mismatch").await;
            }

            // Admission control before the coordinator: the cheapest
            // rejection path. Rejected attempts never reach the ledger
            // but are logged for observability.
            let identity_key = format!("identity:{}", identity_id);
            if !check_limit(state, &identity_key, &state.config.identity_rate_limit).await {
                tracing::warn!(identity_id = %identity_id, "Attempt rejected: identity rate limit");
                return send_rejected(socket, "rate_limited").await;
            }
            let origin_key = fingerprint.origin_key();
            if !check_limit(state, &origin_key, &state.config.origin_rate_limit).await {
                tracing::warn!(origin = %origin_key, "Attempt rejected: origin rate limit");
                return send_rejected(socket, "rate_limited").await;
            }

            let started = Instant::now();
            let use_case = AttemptMiningUseCase::new(
                state.repo.clone(),
                state.roller.clone(),
                state.config.clone(),
            );
            let input = AttemptInput {
                identity_id: Id::from_uuid(identity_id),
                session_id: Id::from_uuid(session_id),
                node_id: Id::from_uuid(node_ref),
                claimed_position,
                idempotency_token,
                origin: ClientOrigin::new(fingerprint.ip, Some(fingerprint.hash_vec())),
            };

            match use_case.execute(input).await {
                Ok(outcome) => {
                    if !outcome.replayed && outcome.attempt.success {
                        if let (Some(kind), Some(amount), Some(new_state)) = (
                            outcome.attempt.resource_kind,
                            outcome.attempt.amount,
                            outcome.new_node_status(),
                        ) {
                            state
                                .sessions
                                .publish(
                                    session_id,
                                    NodeClaimedEvent {
                                        node_ref,
                                        claimed_by_identity: identity_id,
                                        resource_kind: kind,
                                        amount,
                                        new_node_state: new_state,
                                        timestamp_epoch_ms: outcome.attempt.created_at_ms,
                                    },
                                )
                                .await;
                        }
                    }

                    let response = AttemptResponse::from_outcome(
                        &outcome,
                        started.elapsed().as_millis() as u64,
                    );
                    send_message(socket, &ServerMessage::AttemptResult(response)).await
                }
                Err(e) if e.is_retryable() => {
                    tracing::error!(error = %e, "Attempt hit infrastructure failure");
                    send_storage_error(socket, &e.to_string()).await
                }
                Err(e) => send_rejected(socket, e.reason_code()).await,
            }
        }
    }
}

async fn check_limit<R>(
    state: &MiningAppState<R>,
    key: &str,
    config: &platform::rate_limit::RateLimitConfig,
) -> bool
where
    R: NodeRepository
        + AttemptLedgerRepository
        + IdentityRepository
        + Clone
        + Send
        + Sync
        + 'static,
{
    use platform::rate_limit::RateLimitStore;
    match state.limits.check_and_increment(key, config).await {
        Ok(result) => result.allowed,
        Err(e) => {
            // Admission control failing must not take mining down
            tracing::warn!(error = %e, key, "Rate limit check failed; allowing");
            true
        }
    }
}

async fn send_rejected(socket: &mut WebSocket, reason_code: &str) -> Result<(), axum::Error> {
    send_message(
        socket,
        &ServerMessage::Rejected {
            reason_code: reason_code.to_string(),
        },
    )
    .await
}

/// Infrastructure failures surface as a generic retryable message;
/// internals stay server-side
async fn send_storage_error(socket: &mut WebSocket, detail: &str) -> Result<(), axum::Error> {
    tracing::error!(error = %detail, "Gateway storage error");
    send_message(
        socket,
        &ServerMessage::Error {
            message: "temporarily unavailable, please retry".to_string(),
        },
    )
    .await
}

async fn send_message(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "Gateway message serialization failed");
            return Ok(());
        }
    };
    socket.send(Message::Text(text.into())).await
}
