//! PostgreSQL Repository Implementations
//!
//! The claim critical section lives here: one transaction holding a
//! `FOR UPDATE NOWAIT` row lock on the node, a re-read of its state,
//! the conditional claim `UPDATE` with `rows_affected` check, the
//! ledger append, and the totals upsert. The check and the write never
//! split across round-trips.

use chrono::Utc;
use kernel::id::{AttemptId, Id, IdentityId, NodeId, WorldSessionId};
use sqlx::PgPool;

use crate::domain::entities::{AttemptDraft, MiningAttempt, ResourceNode, ResourceTotal};
use crate::domain::repository::{
    AttemptLedgerRepository, CommittedAttempt, DecidedOutcome, IdentityRepository, NodeRepository,
};
use crate::domain::value_objects::{
    ClientOrigin, FailReason, NodeStatus, Position, RarityTier, ResourceKind, SuspicionFlag,
};
use crate::error::{MiningError, MiningResult};

/// PostgreSQL lock_not_available: a `NOWAIT` lock request lost the race
const PG_LOCK_NOT_AVAILABLE: &str = "55P03";

const NODE_COLUMNS: &str = r#"
    node_id,
    session_id,
    resource_kind,
    quantity,
    pos_x,
    pos_y,
    pos_z,
    status,
    rarity,
    difficulty,
    claim_epoch,
    respawn_at_ms,
    created_at
"#;

const ATTEMPT_COLUMNS: &str = r#"
    attempt_id,
    idempotency_key,
    identity_id,
    session_id,
    node_id,
    claim_epoch,
    claimed_x,
    claimed_y,
    claimed_z,
    distance,
    success,
    fail_reason,
    resource_kind,
    amount,
    client_ip::TEXT AS client_ip,
    client_fingerprint_hash,
    latency_ms,
    suspicion_flags,
    needs_review,
    reviewed_by,
    reviewed_at,
    created_at_ms,
    created_at
"#;

/// PostgreSQL-backed mining repository
#[derive(Clone)]
pub struct PgMiningRepository {
    pool: PgPool,
}

impl PgMiningRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a ledger row outside any node lock (pre-lock failures and
    /// the lock-contention fallback)
    async fn insert_failure_standalone(
        &self,
        draft: AttemptDraft,
        reason: FailReason,
    ) -> MiningResult<CommittedAttempt> {
        let epoch = draft.observed_epoch;
        let attempt = draft.into_failure(epoch, reason);
        let inserted = insert_attempt_row(&self.pool, &attempt).await?;
        if inserted == 0 {
            return self.load_prior(&attempt.idempotency_key).await;
        }
        Ok(CommittedAttempt::Recorded(attempt))
    }

    /// A duplicate idempotency key surfaced; the prior row is the
    /// authoritative outcome
    async fn load_prior(&self, idempotency_key: &str) -> MiningResult<CommittedAttempt> {
        let prior = self
            .find_by_idempotency_key(idempotency_key)
            .await?
            .ok_or_else(|| {
                MiningError::Internal("duplicate idempotency key with no prior row".to_string())
            })?;
        Ok(CommittedAttempt::Replayed(prior))
    }
}

fn is_lock_unavailable(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(PG_LOCK_NOT_AVAILABLE),
        _ => false,
    }
}

/// Append one ledger row; returns 0 when the idempotency key already
/// exists (nothing written)
async fn insert_attempt_row<'e, E>(executor: E, attempt: &MiningAttempt) -> MiningResult<u64>
where
    E: sqlx::PgExecutor<'e>,
{
    let affected = sqlx::query(
        r#"
        INSERT INTO mining_attempts (
            attempt_id,
            idempotency_key,
            identity_id,
            session_id,
            node_id,
            claim_epoch,
            claimed_x,
            claimed_y,
            claimed_z,
            distance,
            success,
            fail_reason,
            resource_kind,
            amount,
            client_ip,
            client_fingerprint_hash,
            latency_ms,
            created_at_ms,
            created_at
        ) VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
            $11, $12, $13, $14, $15::inet, $16, $17, $18, $19
        )
        ON CONFLICT (idempotency_key) DO NOTHING
        "#,
    )
    .bind(attempt.id.as_uuid())
    .bind(&attempt.idempotency_key)
    .bind(attempt.identity_id.as_uuid())
    .bind(attempt.session_id.as_uuid())
    .bind(attempt.node_id.as_uuid())
    .bind(attempt.claim_epoch)
    .bind(attempt.claimed_position.x)
    .bind(attempt.claimed_position.y)
    .bind(attempt.claimed_position.z)
    .bind(attempt.distance)
    .bind(attempt.success)
    .bind(attempt.fail_reason.map(|r| r.id()))
    .bind(attempt.resource_kind.map(|k| k.id()))
    .bind(attempt.amount)
    .bind(attempt.origin.ip.map(|ip| ip.to_string()))
    .bind(attempt.origin.fingerprint_hash.as_ref())
    .bind(attempt.latency_ms)
    .bind(attempt.created_at_ms)
    .bind(attempt.created_at)
    .execute(executor)
    .await?
    .rows_affected();

    Ok(affected)
}

// ============================================================================
// Node Repository Implementation
// ============================================================================

impl NodeRepository for PgMiningRepository {
    async fn create_nodes(&self, nodes: &[ResourceNode]) -> MiningResult<()> {
        let mut tx = self.pool.begin().await?;

        for node in nodes {
            sqlx::query(
                r#"
                INSERT INTO resource_nodes (
                    node_id,
                    session_id,
                    resource_kind,
                    quantity,
                    pos_x,
                    pos_y,
                    pos_z,
                    status,
                    rarity,
                    difficulty,
                    claim_epoch,
                    respawn_at_ms,
                    created_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                "#,
            )
            .bind(node.id.as_uuid())
            .bind(node.session_id.as_uuid())
            .bind(node.kind.id())
            .bind(node.quantity)
            .bind(node.position.x)
            .bind(node.position.y)
            .bind(node.position.z)
            .bind(node.status.id())
            .bind(node.rarity.id())
            .bind(node.difficulty)
            .bind(node.claim_epoch)
            .bind(node.respawn_at_ms)
            .bind(node.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::info!(nodes = nodes.len(), "Resource nodes created");
        Ok(())
    }

    async fn get_node(
        &self,
        session_id: WorldSessionId,
        node_id: NodeId,
    ) -> MiningResult<Option<ResourceNode>> {
        let row = sqlx::query_as::<_, NodeRow>(&format!(
            "SELECT {NODE_COLUMNS} FROM resource_nodes WHERE node_id = $1 AND session_id = $2"
        ))
        .bind(node_id.as_uuid())
        .bind(session_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_node()).transpose()
    }

    async fn list_session_nodes(
        &self,
        session_id: WorldSessionId,
    ) -> MiningResult<Vec<ResourceNode>> {
        let rows = sqlx::query_as::<_, NodeRow>(&format!(
            "SELECT {NODE_COLUMNS} FROM resource_nodes WHERE session_id = $1 ORDER BY created_at"
        ))
        .bind(session_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_node()).collect()
    }

    async fn sweep_expired_respawns(&self, now_ms: i64) -> MiningResult<u64> {
        let affected = sqlx::query(
            r#"
            UPDATE resource_nodes
            SET status = $1, respawn_at_ms = NULL
            WHERE status = $2 AND respawn_at_ms <= $3
            "#,
        )
        .bind(NodeStatus::Available.id())
        .bind(NodeStatus::Respawning.id())
        .bind(now_ms)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(affected)
    }

    async fn delete_session_nodes(&self, session_id: WorldSessionId) -> MiningResult<u64> {
        let deleted = sqlx::query("DELETE FROM resource_nodes WHERE session_id = $1")
            .bind(session_id.as_uuid())
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(deleted)
    }
}

// ============================================================================
// Attempt Ledger Implementation
// ============================================================================

impl AttemptLedgerRepository for PgMiningRepository {
    async fn find_by_idempotency_key(&self, key: &str) -> MiningResult<Option<MiningAttempt>> {
        let row = sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM mining_attempts WHERE idempotency_key = $1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_attempt()).transpose()
    }

    async fn last_evaluated_at_ms(&self, identity_id: IdentityId) -> MiningResult<Option<i64>> {
        let ts = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT created_at_ms FROM mining_attempts
            WHERE identity_id = $1
            ORDER BY created_at_ms DESC
            LIMIT 1
            "#,
        )
        .bind(identity_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(ts)
    }

    async fn record_failure(
        &self,
        draft: AttemptDraft,
        reason: FailReason,
    ) -> MiningResult<CommittedAttempt> {
        self.insert_failure_standalone(draft, reason).await
    }

    async fn commit_attempt(
        &self,
        draft: AttemptDraft,
        decided: DecidedOutcome,
        respawn_at_ms: i64,
    ) -> MiningResult<CommittedAttempt> {
        let now_ms = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;

        // Pessimistic row lock, fail-fast: an attempt racing another
        // claim on the same node resolves in milliseconds either way
        let locked = sqlx::query_as::<_, NodeRow>(&format!(
            "SELECT {NODE_COLUMNS} FROM resource_nodes \
             WHERE node_id = $1 AND session_id = $2 FOR UPDATE NOWAIT"
        ))
        .bind(draft.node_id.as_uuid())
        .bind(draft.session_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await;

        let locked = match locked {
            Ok(row) => row,
            Err(e) if is_lock_unavailable(&e) => {
                // The racing transaction owns the node; this attempt
                // records node_unavailable without the lock
                tx.rollback().await?;
                return self
                    .insert_failure_standalone(draft, FailReason::NodeUnavailable)
                    .await;
            }
            Err(e) => return Err(e.into()),
        };

        // Node deleted between pre-read and lock (session ended)
        let Some(node_row) = locked else {
            tx.rollback().await?;
            return self
                .insert_failure_standalone(draft, FailReason::NodeUnavailable)
                .await;
        };

        let node = node_row.into_node()?;
        let epoch = node.claim_epoch;

        // Re-check under the lock; availability overrides whatever was
        // decided optimistically outside it
        let resolved = if !node.is_claimable(now_ms) {
            DecidedOutcome::Failure(FailReason::NodeUnavailable)
        } else {
            decided
        };

        match resolved {
            DecidedOutcome::Failure(reason) => {
                let attempt = draft.into_failure(epoch, reason);
                if insert_attempt_row(&mut *tx, &attempt).await? == 0 {
                    tx.rollback().await?;
                    return self.load_prior(&attempt.idempotency_key).await;
                }
                tx.commit().await?;
                Ok(CommittedAttempt::Recorded(attempt))
            }
            DecidedOutcome::Claim { kind, amount } => {
                let attempt = draft.into_success(epoch, kind, amount);
                if insert_attempt_row(&mut *tx, &attempt).await? == 0 {
                    tx.rollback().await?;
                    return self.load_prior(&attempt.idempotency_key).await;
                }

                // Compare-and-swap: only an observably claimable row
                // may leave `Available`. Straight to `Respawning` — the
                // transient `Claimed` state is never visible to readers.
                let claimed = sqlx::query(
                    r#"
                    UPDATE resource_nodes
                    SET status = $1, respawn_at_ms = $2, claim_epoch = claim_epoch + 1
                    WHERE node_id = $3
                      AND (status = $4 OR (status = $1 AND respawn_at_ms <= $5))
                    "#,
                )
                .bind(NodeStatus::Respawning.id())
                .bind(respawn_at_ms)
                .bind(node.id.as_uuid())
                .bind(NodeStatus::Available.id())
                .bind(now_ms)
                .execute(&mut *tx)
                .await?
                .rows_affected();

                if claimed != 1 {
                    // Unreachable while the lock is held; refuse to
                    // commit a reward without the node transition
                    tx.rollback().await?;
                    return Err(MiningError::Internal(
                        "claim update affected no rows under lock".to_string(),
                    ));
                }

                sqlx::query(
                    r#"
                    INSERT INTO miner_totals (identity_id, resource_kind, total_amount, updated_at)
                    VALUES ($1, $2, $3, now())
                    ON CONFLICT (identity_id, resource_kind)
                    DO UPDATE SET
                        total_amount = miner_totals.total_amount + EXCLUDED.total_amount,
                        updated_at = now()
                    "#,
                )
                .bind(attempt.identity_id.as_uuid())
                .bind(kind.id())
                .bind(amount)
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;

                tracing::info!(
                    node_id = %node.id,
                    identity_id = %attempt.identity_id,
                    resource = kind.code(),
                    amount,
                    claim_epoch = epoch,
                    "Node claimed"
                );

                Ok(CommittedAttempt::Recorded(attempt))
            }
        }
    }

    async fn recent_for_identity(
        &self,
        identity_id: IdentityId,
        since_ms: i64,
        limit: i64,
    ) -> MiningResult<Vec<MiningAttempt>> {
        let rows = sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM mining_attempts \
             WHERE identity_id = $1 AND created_at_ms >= $2 \
             ORDER BY created_at_ms DESC \
             LIMIT $3"
        ))
        .bind(identity_id.as_uuid())
        .bind(since_ms)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_attempt()).collect()
    }

    async fn annotate_review(
        &self,
        attempt_id: AttemptId,
        flags: &[SuspicionFlag],
        needs_review: bool,
    ) -> MiningResult<()> {
        sqlx::query(
            r#"
            UPDATE mining_attempts
            SET suspicion_flags = $2, needs_review = $3
            WHERE attempt_id = $1
            "#,
        )
        .bind(attempt_id.as_uuid())
        .bind(SuspicionFlag::to_mask(flags))
        .bind(needs_review)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_reviewed(&self, attempt_id: AttemptId, reviewer: &str) -> MiningResult<bool> {
        let affected = sqlx::query(
            r#"
            UPDATE mining_attempts
            SET reviewed_by = $2, reviewed_at = now()
            WHERE attempt_id = $1 AND needs_review AND reviewed_at IS NULL
            "#,
        )
        .bind(attempt_id.as_uuid())
        .bind(reviewer)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(affected > 0)
    }

    async fn list_review_queue(&self, limit: i64) -> MiningResult<Vec<MiningAttempt>> {
        let rows = sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM mining_attempts \
             WHERE needs_review AND reviewed_at IS NULL \
             ORDER BY created_at_ms DESC \
             LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_attempt()).collect()
    }
}

// ============================================================================
// Identity Repository Implementation
// ============================================================================

impl IdentityRepository for PgMiningRepository {
    async fn identity_exists(&self, identity_id: IdentityId) -> MiningResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM miners WHERE identity_id = $1)",
        )
        .bind(identity_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn upsert_identity(
        &self,
        identity_id: IdentityId,
        display_name: &str,
    ) -> MiningResult<()> {
        sqlx::query(
            r#"
            INSERT INTO miners (identity_id, display_name)
            VALUES ($1, $2)
            ON CONFLICT (identity_id)
            DO UPDATE SET display_name = EXCLUDED.display_name
            "#,
        )
        .bind(identity_id.as_uuid())
        .bind(display_name)
        .execute(&self.pool)
        .await?;

        tracing::info!(identity_id = %identity_id, "Identity ingested");
        Ok(())
    }

    async fn identity_totals(&self, identity_id: IdentityId) -> MiningResult<Vec<ResourceTotal>> {
        let rows = sqlx::query_as::<_, (i16, i64)>(
            r#"
            SELECT resource_kind, total_amount FROM miner_totals
            WHERE identity_id = $1
            ORDER BY resource_kind
            "#,
        )
        .bind(identity_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(kind_id, total_amount)| {
                let kind = ResourceKind::from_id(kind_id).ok_or_else(|| {
                    MiningError::Internal(format!("unknown resource kind id {kind_id}"))
                })?;
                Ok(ResourceTotal { kind, total_amount })
            })
            .collect()
    }
}

// ============================================================================
// Internal row types for sqlx mapping
// ============================================================================

#[derive(sqlx::FromRow)]
struct NodeRow {
    node_id: uuid::Uuid,
    session_id: uuid::Uuid,
    resource_kind: i16,
    quantity: i64,
    pos_x: f64,
    pos_y: f64,
    pos_z: f64,
    status: i16,
    rarity: i16,
    difficulty: f64,
    claim_epoch: i32,
    respawn_at_ms: Option<i64>,
    created_at: chrono::DateTime<Utc>,
}

impl NodeRow {
    fn into_node(self) -> MiningResult<ResourceNode> {
        Ok(ResourceNode {
            id: Id::from_uuid(self.node_id),
            session_id: Id::from_uuid(self.session_id),
            kind: ResourceKind::from_id(self.resource_kind).ok_or_else(|| {
                MiningError::Internal(format!("unknown resource kind id {}", self.resource_kind))
            })?,
            quantity: self.quantity,
            position: Position::new(self.pos_x, self.pos_y, self.pos_z),
            status: NodeStatus::from_id(self.status).ok_or_else(|| {
                MiningError::Internal(format!("unknown node status id {}", self.status))
            })?,
            rarity: RarityTier::from_id(self.rarity).ok_or_else(|| {
                MiningError::Internal(format!("unknown rarity id {}", self.rarity))
            })?,
            difficulty: self.difficulty,
            claim_epoch: self.claim_epoch,
            respawn_at_ms: self.respawn_at_ms,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AttemptRow {
    attempt_id: uuid::Uuid,
    idempotency_key: String,
    identity_id: uuid::Uuid,
    session_id: uuid::Uuid,
    node_id: uuid::Uuid,
    claim_epoch: i32,
    claimed_x: f64,
    claimed_y: f64,
    claimed_z: f64,
    distance: f64,
    success: bool,
    fail_reason: Option<i16>,
    resource_kind: Option<i16>,
    amount: Option<i64>,
    client_ip: Option<String>,
    client_fingerprint_hash: Option<Vec<u8>>,
    latency_ms: i32,
    suspicion_flags: i32,
    needs_review: bool,
    reviewed_by: Option<String>,
    reviewed_at: Option<chrono::DateTime<Utc>>,
    created_at_ms: i64,
    created_at: chrono::DateTime<Utc>,
}

impl AttemptRow {
    fn into_attempt(self) -> MiningResult<MiningAttempt> {
        let fail_reason = self
            .fail_reason
            .map(|id| {
                FailReason::from_id(id)
                    .ok_or_else(|| MiningError::Internal(format!("unknown fail reason id {id}")))
            })
            .transpose()?;
        let resource_kind = self
            .resource_kind
            .map(|id| {
                ResourceKind::from_id(id)
                    .ok_or_else(|| MiningError::Internal(format!("unknown resource kind id {id}")))
            })
            .transpose()?;

        Ok(MiningAttempt {
            id: Id::from_uuid(self.attempt_id),
            idempotency_key: self.idempotency_key,
            identity_id: Id::from_uuid(self.identity_id),
            session_id: Id::from_uuid(self.session_id),
            node_id: Id::from_uuid(self.node_id),
            claim_epoch: self.claim_epoch,
            claimed_position: Position::new(self.claimed_x, self.claimed_y, self.claimed_z),
            distance: self.distance,
            success: self.success,
            fail_reason,
            resource_kind,
            amount: self.amount,
            origin: ClientOrigin::new(
                self.client_ip.and_then(|s| s.parse().ok()),
                self.client_fingerprint_hash,
            ),
            latency_ms: self.latency_ms,
            suspicion_flags: SuspicionFlag::from_mask(self.suspicion_flags),
            needs_review: self.needs_review,
            reviewed_by: self.reviewed_by,
            reviewed_at: self.reviewed_at,
            created_at_ms: self.created_at_ms,
            created_at: self.created_at,
        })
    }
}
