//! API DTOs (Data Transfer Objects)
//!
//! REST payloads and the gateway wire protocol. Everything crossing
//! the wire is camelCase JSON; domain enums serialize as their string
//! codes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::application::attempt_mining::AttemptOutcome;
use crate::domain::entities::{MiningAttempt, ResourceNode, ResourceTotal};
use crate::domain::value_objects::{NodeStatus, Position, RarityTier, ResourceKind, SuspicionFlag};

// ============================================================================
// REST
// ============================================================================

/// Request for POST /api/mining/sessions
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub node_count: Option<usize>,
}

/// Response for POST /api/mining/sessions
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub nodes: Vec<NodeView>,
}

/// Response for DELETE /api/mining/sessions/{session_id}
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndSessionResponse {
    pub nodes_deleted: u64,
}

/// Request for PUT /api/mining/identities/{identity_id}
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterIdentityRequest {
    pub display_name: String,
}

/// Response for GET /api/mining/identities/{identity_id}/totals
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalsResponse {
    pub identity_id: Uuid,
    pub totals: Vec<TotalView>,
}

/// Cumulative validated amount of one resource
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalView {
    pub resource_kind: ResourceKind,
    pub total_amount: i64,
}

impl From<&ResourceTotal> for TotalView {
    fn from(total: &ResourceTotal) -> Self {
        Self {
            resource_kind: total.kind,
            total_amount: total.total_amount,
        }
    }
}

/// Query parameters for GET /api/mining/review-queue
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewQueueParams {
    #[serde(default)]
    pub limit: Option<i64>,
}

/// Response for GET /api/mining/review-queue
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewQueueResponse {
    pub attempts: Vec<AttemptView>,
}

/// Request for POST /api/mining/attempts/{attempt_id}/review
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    pub reviewer: String,
}

/// One ledger row in review listings
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptView {
    pub attempt_id: Uuid,
    pub identity_id: Uuid,
    pub session_id: Uuid,
    pub node_id: Uuid,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_kind: Option<ResourceKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    pub distance: f64,
    pub suspicion_flags: Vec<SuspicionFlag>,
    pub needs_review: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    pub created_at_ms: i64,
}

impl From<&MiningAttempt> for AttemptView {
    fn from(attempt: &MiningAttempt) -> Self {
        Self {
            attempt_id: attempt.id.into_uuid(),
            identity_id: attempt.identity_id.into_uuid(),
            session_id: attempt.session_id.into_uuid(),
            node_id: attempt.node_id.into_uuid(),
            success: attempt.success,
            reason_code: attempt.fail_reason.map(|r| r.code()),
            resource_kind: attempt.resource_kind,
            amount: attempt.amount,
            distance: attempt.distance,
            suspicion_flags: attempt.suspicion_flags.clone(),
            needs_review: attempt.needs_review,
            reviewed_by: attempt.reviewed_by.clone(),
            created_at_ms: attempt.created_at_ms,
        }
    }
}

/// World view of one node as shown to session participants
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeView {
    pub node_id: Uuid,
    pub resource_kind: ResourceKind,
    pub quantity: i64,
    pub position: Position,
    pub status: NodeStatus,
    pub rarity: RarityTier,
}

impl From<&ResourceNode> for NodeView {
    fn from(node: &ResourceNode) -> Self {
        Self {
            node_id: node.id.into_uuid(),
            resource_kind: node.kind,
            quantity: node.quantity,
            position: node.position,
            status: node.status,
            rarity: node.rarity,
        }
    }
}

// ============================================================================
// Gateway wire protocol
// ============================================================================

/// Messages a connected client may send
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Enter a world session
    #[serde(rename_all = "camelCase")]
    Join {
        session_id: Uuid,
        identity_id: Uuid,
    },
    /// Attempt to mine a node of the joined session
    #[serde(rename_all = "camelCase")]
    Attempt {
        session_ref: Uuid,
        node_ref: Uuid,
        claimed_position: Position,
        idempotency_token: String,
    },
}

/// Messages the gateway sends
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Session entered; carries the authoritative world view
    #[serde(rename_all = "camelCase")]
    Joined {
        session_id: Uuid,
        nodes: Vec<NodeView>,
    },
    /// Authoritative result of the caller's own attempt
    AttemptResult(AttemptResponse),
    /// Another participant claimed a node (informational only)
    NodeClaimed(NodeClaimedEvent),
    /// Request rejected before evaluation; nothing was recorded
    #[serde(rename_all = "camelCase")]
    Rejected { reason_code: String },
    /// Infrastructure failure; generic and retryable
    Error { message: String },
}

/// Authoritative result of one mining attempt
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_kind: Option<ResourceKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_node_state: Option<NodeStatus>,
    /// True when an idempotency token replayed a stored outcome
    pub replayed: bool,
    pub server_processing_ms: u64,
}

impl AttemptResponse {
    pub fn from_outcome(outcome: &AttemptOutcome, server_processing_ms: u64) -> Self {
        Self {
            success: outcome.attempt.success,
            reason_code: outcome.attempt.fail_reason.map(|r| r.code()),
            resource_kind: outcome.attempt.resource_kind,
            amount: outcome.attempt.amount,
            new_node_state: outcome.new_node_status(),
            replayed: outcome.replayed,
            server_processing_ms,
        }
    }
}

/// Broadcast to a session's other participants on a successful claim
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeClaimedEvent {
    pub node_ref: Uuid,
    pub claimed_by_identity: Uuid,
    pub resource_kind: ResourceKind,
    pub amount: i64,
    pub new_node_state: NodeStatus,
    pub timestamp_epoch_ms: i64,
}
