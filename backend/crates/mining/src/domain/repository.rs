//! Repository Traits
//!
//! Interfaces for data persistence. Implementation is in the
//! infrastructure layer.

use kernel::id::{AttemptId, IdentityId, NodeId, WorldSessionId};

use crate::domain::entities::{AttemptDraft, MiningAttempt, ResourceNode, ResourceTotal};
use crate::domain::value_objects::{FailReason, ResourceKind, SuspicionFlag};
use crate::error::MiningResult;

/// Outcome the coordinator decided before the commit transaction
///
/// Node availability is NOT decided here: the store re-checks it under
/// the row lock and substitutes a `node_unavailable` failure when the
/// node is no longer claimable, so availability always wins over a
/// range or roll failure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecidedOutcome {
    /// Evaluated failure (out of range, failed roll); the node row is
    /// left untouched
    Failure(FailReason),
    /// Claim the node and award the resource
    Claim { kind: ResourceKind, amount: i64 },
}

/// Result of writing an attempt to the ledger
#[derive(Debug, Clone)]
pub enum CommittedAttempt {
    /// The attempt was evaluated and recorded by this call
    Recorded(MiningAttempt),
    /// The idempotency token was already recorded; this is the prior
    /// row, returned unchanged — nothing was re-executed
    Replayed(MiningAttempt),
}

impl CommittedAttempt {
    pub fn attempt(&self) -> &MiningAttempt {
        match self {
            Self::Recorded(a) | Self::Replayed(a) => a,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, Self::Replayed(_))
    }
}

/// Resource node store
///
/// The claim transition itself lives on [`LocalAttemptLedgerRepository::commit_attempt`]
/// because node transition and ledger append must commit as one unit.
#[trait_variant::make(NodeRepository: Send)]
pub trait LocalNodeRepository {
    /// Persist a batch of freshly seeded nodes
    async fn create_nodes(&self, nodes: &[ResourceNode]) -> MiningResult<()>;

    /// Fetch one node within a session
    async fn get_node(
        &self,
        session_id: WorldSessionId,
        node_id: NodeId,
    ) -> MiningResult<Option<ResourceNode>>;

    /// All nodes of a session (authoritative world view)
    async fn list_session_nodes(
        &self,
        session_id: WorldSessionId,
    ) -> MiningResult<Vec<ResourceNode>>;

    /// Transition every `Respawning` node whose respawn time has
    /// passed back to `Available`; returns the number transitioned.
    /// Idempotent and safe to call concurrently and repeatedly.
    async fn sweep_expired_respawns(&self, now_ms: i64) -> MiningResult<u64>;

    /// Delete a session's nodes (session teardown)
    async fn delete_session_nodes(&self, session_id: WorldSessionId) -> MiningResult<u64>;
}

/// Append-only attempt ledger
#[trait_variant::make(AttemptLedgerRepository: Send)]
pub trait LocalAttemptLedgerRepository {
    /// Look up a previously recorded attempt by idempotency token
    async fn find_by_idempotency_key(&self, key: &str) -> MiningResult<Option<MiningAttempt>>;

    /// Timestamp of the identity's most recent evaluated attempt
    async fn last_evaluated_at_ms(&self, identity_id: IdentityId) -> MiningResult<Option<i64>>;

    /// Record a failure decided before node acquisition (cooldown).
    /// The node row is never touched.
    async fn record_failure(
        &self,
        draft: AttemptDraft,
        reason: FailReason,
    ) -> MiningResult<CommittedAttempt>;

    /// The critical section: lock the node row, re-check claimability,
    /// apply `decided`, and append the ledger row — all in one storage
    /// transaction. On success the node transitions to `Respawning`
    /// with `respawn_at_ms` and the identity's cumulative totals are
    /// incremented. A duplicate idempotency token rolls everything
    /// back and returns the prior row.
    async fn commit_attempt(
        &self,
        draft: AttemptDraft,
        decided: DecidedOutcome,
        respawn_at_ms: i64,
    ) -> MiningResult<CommittedAttempt>;

    /// Identity history, newest-first, bounded; feeds the fraud engine
    async fn recent_for_identity(
        &self,
        identity_id: IdentityId,
        since_ms: i64,
        limit: i64,
    ) -> MiningResult<Vec<MiningAttempt>>;

    /// Attach suspicion flags to a recorded attempt (the only
    /// permitted post-write mutation besides review sign-off)
    async fn annotate_review(
        &self,
        attempt_id: AttemptId,
        flags: &[SuspicionFlag],
        needs_review: bool,
    ) -> MiningResult<()>;

    /// Sign off a flagged attempt; returns false when no flagged row
    /// matched
    async fn mark_reviewed(&self, attempt_id: AttemptId, reviewer: &str) -> MiningResult<bool>;

    /// Flagged attempts awaiting manual review, newest-first
    async fn list_review_queue(&self, limit: i64) -> MiningResult<Vec<MiningAttempt>>;
}

/// Ingested mining identities and their validated totals
#[trait_variant::make(IdentityRepository: Send)]
pub trait LocalIdentityRepository {
    /// Whether the identity has been ingested
    async fn identity_exists(&self, identity_id: IdentityId) -> MiningResult<bool>;

    /// Ingest or refresh an identity from the external auth system
    async fn upsert_identity(
        &self,
        identity_id: IdentityId,
        display_name: &str,
    ) -> MiningResult<()>;

    /// Cumulative validated totals for one identity
    async fn identity_totals(&self, identity_id: IdentityId) -> MiningResult<Vec<ResourceTotal>>;
}
