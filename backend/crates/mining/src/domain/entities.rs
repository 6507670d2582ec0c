//! Domain Entities
//!
//! Core business entities for the mining domain.

use chrono::{DateTime, Utc};
use kernel::id::{AttemptId, IdentityId, NodeId, WorldSessionId};

use crate::domain::value_objects::{
    ClientOrigin, FailReason, NodeStatus, Position, RarityTier, ResourceKind, SuspicionFlag,
};

// ============================================================================
// ResourceNode
// ============================================================================

/// A world-placed, claimable resource source
#[derive(Debug, Clone)]
pub struct ResourceNode {
    pub id: NodeId,
    pub session_id: WorldSessionId,
    pub kind: ResourceKind,
    pub quantity: i64,
    pub position: Position,
    pub status: NodeStatus,
    pub rarity: RarityTier,
    /// Multiplier on the kind's base success rate
    pub difficulty: f64,
    /// Increments on every successful claim; scopes the
    /// one-success-per-respawn-epoch invariant
    pub claim_epoch: i32,
    /// Set while `Respawning`; the node may be claimed again once this
    /// time has passed
    pub respawn_at_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl ResourceNode {
    /// Create a new available node (world/session initialization)
    pub fn new(
        session_id: WorldSessionId,
        kind: ResourceKind,
        rarity: RarityTier,
        position: Position,
        difficulty: f64,
    ) -> Self {
        Self {
            id: NodeId::new(),
            session_id,
            kind,
            quantity: kind.base_quantity() * rarity.quantity_multiplier(),
            position,
            status: NodeStatus::Available,
            rarity,
            difficulty,
            claim_epoch: 0,
            respawn_at_ms: None,
            created_at: Utc::now(),
        }
    }

    /// Whether a claim may transition this node out of `Available`
    ///
    /// A `Respawning` node whose respawn time has passed counts as
    /// claimable: the claim path respawns lazily so a claim racing the
    /// sweeper observes the same answer either way.
    pub fn is_claimable(&self, now_ms: i64) -> bool {
        match self.status {
            NodeStatus::Available => true,
            NodeStatus::Claimed => false,
            NodeStatus::Respawning => self.respawn_at_ms.is_some_and(|at| at <= now_ms),
        }
    }
}

// ============================================================================
// MiningAttempt - one ledger row
// ============================================================================

/// One recorded mining attempt (ledger row)
///
/// Append-only. Outcome fields are immutable once written; only the
/// fraud-review fields (`suspicion_flags`, `needs_review`,
/// `reviewed_by`, `reviewed_at`) may be attached afterwards.
#[derive(Debug, Clone)]
pub struct MiningAttempt {
    pub id: AttemptId,
    pub idempotency_key: String,
    pub identity_id: IdentityId,
    pub session_id: WorldSessionId,
    pub node_id: NodeId,
    /// Node claim epoch at evaluation time
    pub claim_epoch: i32,
    pub claimed_position: Position,
    /// Server-computed distance to the node's stored position
    pub distance: f64,
    pub success: bool,
    pub fail_reason: Option<FailReason>,
    pub resource_kind: Option<ResourceKind>,
    pub amount: Option<i64>,
    pub origin: ClientOrigin,
    /// Server-side processing latency
    pub latency_ms: i32,
    pub suspicion_flags: Vec<SuspicionFlag>,
    pub needs_review: bool,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at_ms: i64,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// AttemptDraft - everything known before the outcome is recorded
// ============================================================================

/// Attempt context assembled by the coordinator before commit
#[derive(Debug, Clone)]
pub struct AttemptDraft {
    pub id: AttemptId,
    pub idempotency_key: String,
    pub identity_id: IdentityId,
    pub session_id: WorldSessionId,
    pub node_id: NodeId,
    /// Node claim epoch from the optimistic pre-read; the commit path
    /// replaces it with the locked value where one is available
    pub observed_epoch: i32,
    pub claimed_position: Position,
    pub distance: f64,
    pub origin: ClientOrigin,
    pub latency_ms: i32,
    pub created_at_ms: i64,
    pub created_at: DateTime<Utc>,
}

impl AttemptDraft {
    fn into_attempt(
        self,
        claim_epoch: i32,
        success: bool,
        fail_reason: Option<FailReason>,
        resource_kind: Option<ResourceKind>,
        amount: Option<i64>,
    ) -> MiningAttempt {
        MiningAttempt {
            id: self.id,
            idempotency_key: self.idempotency_key,
            identity_id: self.identity_id,
            session_id: self.session_id,
            node_id: self.node_id,
            claim_epoch,
            claimed_position: self.claimed_position,
            distance: self.distance,
            success,
            fail_reason,
            resource_kind,
            amount,
            origin: self.origin,
            latency_ms: self.latency_ms,
            suspicion_flags: Vec::new(),
            needs_review: false,
            reviewed_by: None,
            reviewed_at: None,
            created_at_ms: self.created_at_ms,
            created_at: self.created_at,
        }
    }

    /// Materialize a successful attempt row
    pub fn into_success(
        self,
        claim_epoch: i32,
        kind: ResourceKind,
        amount: i64,
    ) -> MiningAttempt {
        self.into_attempt(claim_epoch, true, None, Some(kind), Some(amount))
    }

    /// Materialize a failed attempt row
    pub fn into_failure(self, claim_epoch: i32, reason: FailReason) -> MiningAttempt {
        self.into_attempt(claim_epoch, false, Some(reason), None, None)
    }
}

// ============================================================================
// ResourceTotal - cumulative validated totals per identity
// ============================================================================

/// Cumulative validated amount of one resource for one identity
///
/// The downstream claim subsystem consumes these totals and never
/// re-derives outcomes itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceTotal {
    pub kind: ResourceKind,
    pub total_amount: i64,
}
