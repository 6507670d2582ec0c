//! Attempt Mining Use Case
//!
//! The mining transaction coordinator: validates an attempt, rolls the
//! outcome, and commits node transition + ledger row as one unit. The
//! ordering of checks is part of the contract — idempotency first,
//! then identity, node resolution, cooldown, range, roll — and node
//! availability is re-checked under the row lock by the store so it
//! overrides range/roll failures decided optimistically here.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use kernel::id::{AttemptId, IdentityId, NodeId, WorldSessionId};

use crate::application::config::MiningConfig;
use crate::application::fraud;
use crate::domain::entities::{AttemptDraft, MiningAttempt};
use crate::domain::repository::{
    AttemptLedgerRepository, CommittedAttempt, DecidedOutcome, IdentityRepository, NodeRepository,
};
use crate::domain::services::{OutcomeRoll, effective_success_rate, roll_succeeds};
use crate::domain::value_objects::{ClientOrigin, FailReason, NodeStatus, Position};
use crate::error::{MiningError, MiningResult};

/// Idempotency tokens are client-supplied; bound their size
const MAX_TOKEN_LEN: usize = 128;

/// Input DTO for a mining attempt
#[derive(Debug, Clone)]
pub struct AttemptInput {
    pub identity_id: IdentityId,
    pub session_id: WorldSessionId,
    pub node_id: NodeId,
    /// Claimed at face value from the client; validated against the
    /// node's stored position, never trusted
    pub claimed_position: Position,
    pub idempotency_token: String,
    pub origin: ClientOrigin,
}

/// Output DTO for a mining attempt
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    pub attempt: MiningAttempt,
    /// True when this is the recorded outcome of an earlier evaluation
    pub replayed: bool,
}

impl AttemptOutcome {
    /// Node state as observable after this attempt, if it changed
    pub fn new_node_status(&self) -> Option<NodeStatus> {
        self.attempt.success.then_some(NodeStatus::Respawning)
    }
}

/// Attempt Mining Use Case
pub struct AttemptMiningUseCase<R, Roll>
where
    R: NodeRepository + AttemptLedgerRepository + IdentityRepository + Send + Sync + 'static,
    Roll: OutcomeRoll,
{
    repo: Arc<R>,
    roller: Arc<Roll>,
    config: Arc<MiningConfig>,
}

impl<R, Roll> AttemptMiningUseCase<R, Roll>
where
    R: NodeRepository + AttemptLedgerRepository + IdentityRepository + Send + Sync + 'static,
    Roll: OutcomeRoll,
{
    pub fn new(repo: Arc<R>, roller: Arc<Roll>, config: Arc<MiningConfig>) -> Self {
        Self {
            repo,
            roller,
            config,
        }
    }

    pub async fn execute(&self, input: AttemptInput) -> MiningResult<AttemptOutcome> {
        let started = Instant::now();

        if input.idempotency_token.is_empty() || input.idempotency_token.len() > MAX_TOKEN_LEN {
            return Err(MiningError::Malformed(format!(
                "idempotency token must be 1..={} characters",
                MAX_TOKEN_LEN
            )));
        }

        // Idempotency: a known token replays the stored outcome, it
        // never re-executes
        if let Some(prior) = self
            .repo
            .find_by_idempotency_key(&input.idempotency_token)
            .await?
        {
            tracing::info!(
                attempt_id = %prior.id,
                identity_id = %input.identity_id,
                "Replayed idempotent attempt"
            );
            return Ok(AttemptOutcome {
                attempt: prior,
                replayed: true,
            });
        }

        // The ledger attributes rows to ingested identities only
        if !self.repo.identity_exists(input.identity_id).await? {
            return Err(MiningError::IdentityNotFound);
        }

        let node = self
            .repo
            .get_node(input.session_id, input.node_id)
            .await?
            .ok_or(MiningError::NodeNotFound)?;

        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let distance = input.claimed_position.distance_to(&node.position);

        let draft = AttemptDraft {
            id: AttemptId::new(),
            idempotency_key: input.idempotency_token,
            identity_id: input.identity_id,
            session_id: input.session_id,
            node_id: input.node_id,
            observed_epoch: node.claim_epoch,
            claimed_position: input.claimed_position,
            distance,
            origin: input.origin,
            latency_ms: started.elapsed().as_millis() as i32,
            created_at_ms: now_ms,
            created_at: now,
        };

        // Cooldown: counts any evaluated attempt, success or failure,
        // so flooding extends it. Recorded without touching the node.
        if let Some(last_ms) = self.repo.last_evaluated_at_ms(input.identity_id).await? {
            if now_ms - last_ms < self.config.attempt_cooldown_ms() {
                let committed = self
                    .repo
                    .record_failure(draft, FailReason::CooldownActive)
                    .await?;
                return self.finish(committed);
            }
        }

        let decided = if distance > self.config.max_mining_range {
            DecidedOutcome::Failure(FailReason::OutOfRange)
        } else {
            let rate = effective_success_rate(node.kind, node.difficulty);
            if roll_succeeds(self.roller.roll_unit(), rate) {
                DecidedOutcome::Claim {
                    kind: node.kind,
                    amount: node.quantity,
                }
            } else {
                DecidedOutcome::Failure(FailReason::MiningFailed)
            }
        };

        let respawn_at_ms = now_ms + self.config.respawn_delay_ms(node.rarity);
        let committed = self.repo.commit_attempt(draft, decided, respawn_at_ms).await?;
        self.finish(committed)
    }

    fn finish(&self, committed: CommittedAttempt) -> MiningResult<AttemptOutcome> {
        match committed {
            CommittedAttempt::Replayed(prior) => {
                tracing::info!(
                    attempt_id = %prior.id,
                    "Concurrent duplicate token resolved to prior outcome"
                );
                Ok(AttemptOutcome {
                    attempt: prior,
                    replayed: true,
                })
            }
            CommittedAttempt::Recorded(attempt) => {
                tracing::info!(
                    attempt_id = %attempt.id,
                    identity_id = %attempt.identity_id,
                    node_id = %attempt.node_id,
                    success = attempt.success,
                    reason = attempt.fail_reason.map(|r| r.code()).unwrap_or("-"),
                    latency_ms = attempt.latency_ms,
                    "Mining attempt evaluated"
                );
                // Post-commit hook: annotates the ledger, never blocks
                // or alters the outcome being returned
                fraud::spawn_annotation(
                    self.repo.clone(),
                    self.config.fraud.clone(),
                    attempt.clone(),
                );
                Ok(AttemptOutcome {
                    attempt,
                    replayed: false,
                })
            }
        }
    }
}
