//! Unit tests for the mining crate
//!
//! The coordinator properties (exclusivity, idempotency, range
//! enforcement, cooldown, respawn) run against an in-memory store that
//! honors the repository contracts, so the concurrency-critical logic
//! is exercised without a database.

// ============================================================================
// In-memory repository for coordinator tests
// ============================================================================

#[cfg(test)]
mod mem_store {
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};

    use chrono::Utc;
    use kernel::id::{AttemptId, IdentityId, NodeId, WorldSessionId};
    use uuid::Uuid;

    use crate::domain::entities::{AttemptDraft, MiningAttempt, ResourceNode, ResourceTotal};
    use crate::domain::repository::{
        AttemptLedgerRepository, CommittedAttempt, DecidedOutcome, IdentityRepository,
        NodeRepository,
    };
    use crate::domain::services::OutcomeRoll;
    use crate::domain::value_objects::{FailReason, NodeStatus, ResourceKind, SuspicionFlag};
    use crate::error::MiningResult;

    /// Deterministic roll source for tests
    pub struct FixedRoll(pub f64);

    impl OutcomeRoll for FixedRoll {
        fn roll_unit(&self) -> f64 {
            self.0
        }
    }

    #[derive(Default)]
    struct MemState {
        nodes: HashMap<Uuid, ResourceNode>,
        attempts: Vec<MiningAttempt>,
        identities: HashSet<Uuid>,
        totals: HashMap<(Uuid, i16), i64>,
    }

    /// In-memory store honoring the repository contracts: the commit
    /// path checks idempotency, claimability, node transition, and
    /// totals under one lock, mirroring the storage transaction.
    #[derive(Clone, Default)]
    pub struct MemStore {
        state: Arc<Mutex<MemState>>,
    }

    impl MemStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_identity(&self, identity: IdentityId) {
            self.state
                .lock()
                .unwrap()
                .identities
                .insert(identity.into_uuid());
        }

        pub fn node(&self, node_id: NodeId) -> Option<ResourceNode> {
            self.state
                .lock()
                .unwrap()
                .nodes
                .get(node_id.as_uuid())
                .cloned()
        }

        pub fn attempt_rows(&self) -> Vec<MiningAttempt> {
            self.state.lock().unwrap().attempts.clone()
        }

        pub fn push_attempt(&self, attempt: MiningAttempt) {
            self.state.lock().unwrap().attempts.push(attempt);
        }

        pub fn total_of(&self, identity: IdentityId, kind: ResourceKind) -> i64 {
            self.state
                .lock()
                .unwrap()
                .totals
                .get(&(identity.into_uuid(), kind.id()))
                .copied()
                .unwrap_or(0)
        }
    }

    impl NodeRepository for MemStore {
        async fn create_nodes(&self, nodes: &[ResourceNode]) -> MiningResult<()> {
            let mut state = self.state.lock().unwrap();
            for node in nodes {
                state.nodes.insert(node.id.into_uuid(), node.clone());
            }
            Ok(())
        }

        async fn get_node(
            &self,
            session_id: WorldSessionId,
            node_id: NodeId,
        ) -> MiningResult<Option<ResourceNode>> {
            let state = self.state.lock().unwrap();
            Ok(state
                .nodes
                .get(node_id.as_uuid())
                .filter(|n| n.session_id == session_id)
                .cloned())
        }

        async fn list_session_nodes(
            &self,
            session_id: WorldSessionId,
        ) -> MiningResult<Vec<ResourceNode>> {
            let state = self.state.lock().unwrap();
            Ok(state
                .nodes
                .values()
                .filter(|n| n.session_id == session_id)
                .cloned()
                .collect())
        }

        async fn sweep_expired_respawns(&self, now_ms: i64) -> MiningResult<u64> {
            let mut state = self.state.lock().unwrap();
            let mut swept = 0;
            for node in state.nodes.values_mut() {
                if node.status == NodeStatus::Respawning
                    && node.respawn_at_ms.is_some_and(|at| at <= now_ms)
                {
                    node.status = NodeStatus::Available;
                    node.respawn_at_ms = None;
                    swept += 1;
                }
            }
            Ok(swept)
        }

        async fn delete_session_nodes(&self, session_id: WorldSessionId) -> MiningResult<u64> {
            let mut state = self.state.lock().unwrap();
            let before = state.nodes.len();
            state.nodes.retain(|_, n| n.session_id != session_id);
            Ok((before - state.nodes.len()) as u64)
        }
    }

    impl AttemptLedgerRepository for MemStore {
        async fn find_by_idempotency_key(&self, key: &str) -> MiningResult<Option<MiningAttempt>> {
            let state = self.state.lock().unwrap();
            Ok(state
                .attempts
                .iter()
                .find(|a| a.idempotency_key == key)
                .cloned())
        }

        async fn last_evaluated_at_ms(
            &self,
            identity_id: IdentityId,
        ) -> MiningResult<Option<i64>> {
            let state = self.state.lock().unwrap();
            Ok(state
                .attempts
                .iter()
                .filter(|a| a.identity_id == identity_id)
                .map(|a| a.created_at_ms)
                .max())
        }

        async fn record_failure(
            &self,
            draft: AttemptDraft,
            reason: FailReason,
        ) -> MiningResult<CommittedAttempt> {
            let mut state = self.state.lock().unwrap();
            if let Some(prior) = state
                .attempts
                .iter()
                .find(|a| a.idempotency_key == draft.idempotency_key)
            {
                return Ok(CommittedAttempt::Replayed(prior.clone()));
            }
            let epoch = draft.observed_epoch;
            let attempt = draft.into_failure(epoch, reason);
            state.attempts.push(attempt.clone());
            Ok(CommittedAttempt::Recorded(attempt))
        }

        async fn commit_attempt(
            &self,
            draft: AttemptDraft,
            decided: DecidedOutcome,
            respawn_at_ms: i64,
        ) -> MiningResult<CommittedAttempt> {
            let now_ms = Utc::now().timestamp_millis();
            let mut state = self.state.lock().unwrap();

            if let Some(prior) = state
                .attempts
                .iter()
                .find(|a| a.idempotency_key == draft.idempotency_key)
            {
                return Ok(CommittedAttempt::Replayed(prior.clone()));
            }

            let Some(node) = state.nodes.get(draft.node_id.as_uuid()).cloned() else {
                let epoch = draft.observed_epoch;
                let attempt = draft.into_failure(epoch, FailReason::NodeUnavailable);
                state.attempts.push(attempt.clone());
                return Ok(CommittedAttempt::Recorded(attempt));
            };
            let epoch = node.claim_epoch;

            let resolved = if !node.is_claimable(now_ms) {
                DecidedOutcome::Failure(FailReason::NodeUnavailable)
            } else {
                decided
            };

            let attempt = match resolved {
                DecidedOutcome::Failure(reason) => draft.into_failure(epoch, reason),
                DecidedOutcome::Claim { kind, amount } => {
                    let node = state.nodes.get_mut(draft.node_id.as_uuid()).unwrap();
                    node.status = NodeStatus::Respawning;
                    node.respawn_at_ms = Some(respawn_at_ms);
                    node.claim_epoch += 1;

                    let identity = draft.identity_id.into_uuid();
                    *state.totals.entry((identity, kind.id())).or_insert(0) += amount;

                    draft.into_success(epoch, kind, amount)
                }
            };

            state.attempts.push(attempt.clone());
            Ok(CommittedAttempt::Recorded(attempt))
        }

        async fn recent_for_identity(
            &self,
            identity_id: IdentityId,
            since_ms: i64,
            limit: i64,
        ) -> MiningResult<Vec<MiningAttempt>> {
            let state = self.state.lock().unwrap();
            let mut rows: Vec<MiningAttempt> = state
                .attempts
                .iter()
                .filter(|a| a.identity_id == identity_id && a.created_at_ms >= since_ms)
                .cloned()
                .collect();
            rows.sort_by_key(|a| std::cmp::Reverse(a.created_at_ms));
            rows.truncate(limit as usize);
            Ok(rows)
        }

        async fn annotate_review(
            &self,
            attempt_id: AttemptId,
            flags: &[SuspicionFlag],
            needs_review: bool,
        ) -> MiningResult<()> {
            let mut state = self.state.lock().unwrap();
            if let Some(attempt) = state.attempts.iter_mut().find(|a| a.id == attempt_id) {
                attempt.suspicion_flags = flags.to_vec();
                attempt.needs_review = needs_review;
            }
            Ok(())
        }

        async fn mark_reviewed(
            &self,
            attempt_id: AttemptId,
            reviewer: &str,
        ) -> MiningResult<bool> {
            let mut state = self.state.lock().unwrap();
            match state.attempts.iter_mut().find(|a| {
                a.id == attempt_id && a.needs_review && a.reviewed_at.is_none()
            }) {
                Some(attempt) => {
                    attempt.reviewed_by = Some(reviewer.to_string());
                    attempt.reviewed_at = Some(Utc::now());
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn list_review_queue(&self, limit: i64) -> MiningResult<Vec<MiningAttempt>> {
            let state = self.state.lock().unwrap();
            let mut rows: Vec<MiningAttempt> = state
                .attempts
                .iter()
                .filter(|a| a.needs_review && a.reviewed_at.is_none())
                .cloned()
                .collect();
            rows.sort_by_key(|a| std::cmp::Reverse(a.created_at_ms));
            rows.truncate(limit as usize);
            Ok(rows)
        }
    }

    impl IdentityRepository for MemStore {
        async fn identity_exists(&self, identity_id: IdentityId) -> MiningResult<bool> {
            let state = self.state.lock().unwrap();
            Ok(state.identities.contains(identity_id.as_uuid()))
        }

        async fn upsert_identity(
            &self,
            identity_id: IdentityId,
            _display_name: &str,
        ) -> MiningResult<()> {
            let mut state = self.state.lock().unwrap();
            state.identities.insert(identity_id.into_uuid());
            Ok(())
        }

        async fn identity_totals(
            &self,
            identity_id: IdentityId,
        ) -> MiningResult<Vec<ResourceTotal>> {
            let state = self.state.lock().unwrap();
            let mut totals: Vec<ResourceTotal> = state
                .totals
                .iter()
                .filter(|((identity, _), _)| *identity == identity_id.into_uuid())
                .filter_map(|((_, kind_id), amount)| {
                    ResourceKind::from_id(*kind_id).map(|kind| ResourceTotal {
                        kind,
                        total_amount: *amount,
                    })
                })
                .collect();
            totals.sort_by_key(|t| t.kind.id());
            Ok(totals)
        }
    }
}

// ============================================================================
// Coordinator property tests
// ============================================================================

#[cfg(test)]
mod coordinator_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use kernel::id::{Id, IdentityId, NodeId, WorldSessionId};

    use super::mem_store::{FixedRoll, MemStore};
    use crate::application::attempt_mining::{AttemptInput, AttemptMiningUseCase};
    use crate::application::config::MiningConfig;
    use crate::domain::entities::ResourceNode;
    use crate::domain::repository::NodeRepository;
    use crate::domain::value_objects::{
        ClientOrigin, FailReason, NodeStatus, Position, RarityTier, ResourceKind,
    };
    use crate::error::MiningError;

    struct Fixture {
        store: MemStore,
        config: Arc<MiningConfig>,
        session_id: WorldSessionId,
        node_id: NodeId,
    }

    async fn fixture(kind: ResourceKind) -> Fixture {
        let store = MemStore::new();
        let session_id = WorldSessionId::new();
        let node = ResourceNode::new(
            session_id,
            kind,
            RarityTier::Common,
            Position::new(0.0, 0.0, 0.0),
            1.0,
        );
        let node_id = node.id;
        store.create_nodes(&[node]).await.unwrap();
        Fixture {
            store,
            config: Arc::new(MiningConfig::default()),
            session_id,
            node_id,
        }
    }

    fn use_case(
        fixture: &Fixture,
        roll: f64,
    ) -> AttemptMiningUseCase<MemStore, FixedRoll> {
        AttemptMiningUseCase::new(
            Arc::new(fixture.store.clone()),
            Arc::new(FixedRoll(roll)),
            fixture.config.clone(),
        )
    }

    fn input(fixture: &Fixture, identity: IdentityId, token: &str) -> AttemptInput {
        AttemptInput {
            identity_id: identity,
            session_id: fixture.session_id,
            node_id: fixture.node_id,
            claimed_position: Position::new(1.0, 2.0, 2.0),
            idempotency_token: token.to_string(),
            origin: ClientOrigin::default(),
        }
    }

    fn registered_identity(fixture: &Fixture) -> IdentityId {
        let identity = IdentityId::new();
        fixture.store.add_identity(identity);
        identity
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_exclusivity_under_concurrent_attempts() {
        let fixture = fixture(ResourceKind::Nickel).await;

        // Every attempt would win its roll; only the node transition
        // may arbitrate
        let mut handles = Vec::new();
        for i in 0..8 {
            let identity = registered_identity(&fixture);
            let uc = use_case(&fixture, 0.0);
            let attempt_input = input(&fixture, identity, &format!("race-{i}"));
            handles.push(tokio::spawn(async move { uc.execute(attempt_input).await }));
        }

        let mut successes = 0;
        let mut unavailable = 0;
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            if outcome.attempt.success {
                successes += 1;
                assert_eq!(outcome.attempt.resource_kind, Some(ResourceKind::Nickel));
            } else {
                assert_eq!(outcome.attempt.fail_reason, Some(FailReason::NodeUnavailable));
                unavailable += 1;
            }
        }

        assert_eq!(successes, 1, "exactly one racer may claim the node");
        assert_eq!(unavailable, 7);

        let rows = fixture.store.attempt_rows();
        assert_eq!(rows.iter().filter(|a| a.success).count(), 1);
        assert_eq!(rows.len(), 8, "every evaluated attempt leaves one row");

        let node = fixture.store.node(fixture.node_id).unwrap();
        assert_eq!(node.status, NodeStatus::Respawning);
        assert_eq!(node.claim_epoch, 1);
    }

    #[tokio::test]
    async fn test_idempotent_replay_returns_original_outcome() {
        let fixture = fixture(ResourceKind::Iron).await;
        let identity = registered_identity(&fixture);
        let uc = use_case(&fixture, 0.0);

        let first = uc.execute(input(&fixture, identity, "token-1")).await.unwrap();
        assert!(first.attempt.success);
        assert!(!first.replayed);

        let total_after_first = fixture.store.total_of(identity, ResourceKind::Iron);
        assert!(total_after_first > 0);

        // Same token, any number of times: stored outcome, no new rows,
        // no second grant
        for _ in 0..3 {
            let replay = uc.execute(input(&fixture, identity, "token-1")).await.unwrap();
            assert!(replay.replayed);
            assert_eq!(replay.attempt.id, first.attempt.id);
            assert_eq!(replay.attempt.success, first.attempt.success);
            assert_eq!(replay.attempt.amount, first.attempt.amount);
        }

        assert_eq!(fixture.store.attempt_rows().len(), 1);
        assert_eq!(
            fixture.store.total_of(identity, ResourceKind::Iron),
            total_after_first
        );
    }

    #[tokio::test]
    async fn test_failed_outcome_replays_too() {
        let fixture = fixture(ResourceKind::Iron).await;
        let identity = registered_identity(&fixture);
        // Roll that can never win
        let uc = use_case(&fixture, 0.999);

        let first = uc.execute(input(&fixture, identity, "fail-tok")).await.unwrap();
        assert!(!first.attempt.success);
        assert_eq!(first.attempt.fail_reason, Some(FailReason::MiningFailed));

        let replay = uc.execute(input(&fixture, identity, "fail-tok")).await.unwrap();
        assert!(replay.replayed);
        assert_eq!(replay.attempt.fail_reason, Some(FailReason::MiningFailed));
        assert_eq!(fixture.store.attempt_rows().len(), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_fails_regardless_of_roll() {
        let fixture = fixture(ResourceKind::Iron).await;
        let identity = registered_identity(&fixture);
        // A winning roll must not rescue an out-of-range attempt
        let uc = use_case(&fixture, 0.0);

        let mut attempt_input = input(&fixture, identity, "far-away");
        attempt_input.claimed_position = Position::new(100.0, 0.0, 0.0);

        let outcome = uc.execute(attempt_input).await.unwrap();
        assert!(!outcome.attempt.success);
        assert_eq!(outcome.attempt.fail_reason, Some(FailReason::OutOfRange));
        assert!(outcome.attempt.distance > 15.0);

        // Failure leaves the node claimable
        let node = fixture.store.node(fixture.node_id).unwrap();
        assert_eq!(node.status, NodeStatus::Available);
        assert_eq!(node.claim_epoch, 0);
    }

    #[tokio::test]
    async fn test_cooldown_rejects_followup_attempt() {
        let fixture = fixture(ResourceKind::Iron).await;
        let identity = registered_identity(&fixture);
        let uc = use_case(&fixture, 0.999);

        let first = uc.execute(input(&fixture, identity, "cd-1")).await.unwrap();
        assert_eq!(first.attempt.fail_reason, Some(FailReason::MiningFailed));

        // Immediately again: cooldown wins before any node check
        let second = uc.execute(input(&fixture, identity, "cd-2")).await.unwrap();
        assert!(!second.attempt.success);
        assert_eq!(second.attempt.fail_reason, Some(FailReason::CooldownActive));

        // Both evaluated attempts are on the ledger
        assert_eq!(fixture.store.attempt_rows().len(), 2);
    }

    #[tokio::test]
    async fn test_cooldown_does_not_cross_identities() {
        let fixture = fixture(ResourceKind::Iron).await;
        let first_identity = registered_identity(&fixture);
        let second_identity = registered_identity(&fixture);
        let uc = use_case(&fixture, 0.999);

        uc.execute(input(&fixture, first_identity, "a-1")).await.unwrap();
        let other = uc
            .execute(input(&fixture, second_identity, "b-1"))
            .await
            .unwrap();
        assert_ne!(other.attempt.fail_reason, Some(FailReason::CooldownActive));
    }

    #[tokio::test]
    async fn test_respawn_timing() {
        let fixture = fixture(ResourceKind::Iron).await;
        let identity = registered_identity(&fixture);
        let uc = use_case(&fixture, 0.0);

        uc.execute(input(&fixture, identity, "claim")).await.unwrap();

        let node = fixture.store.node(fixture.node_id).unwrap();
        assert_eq!(node.status, NodeStatus::Respawning);
        let respawn_at = node.respawn_at_ms.unwrap();
        let expected = fixture.config.respawn_delay_ms(RarityTier::Common);
        let now_ms = Utc::now().timestamp_millis();
        assert!(respawn_at >= now_ms);
        assert!(respawn_at <= now_ms + expected + 1_000);

        // Before the scheduled time the sweep must not touch it
        let swept = fixture
            .store
            .sweep_expired_respawns(respawn_at - 1)
            .await
            .unwrap();
        assert_eq!(swept, 0);
        assert_eq!(
            fixture.store.node(fixture.node_id).unwrap().status,
            NodeStatus::Respawning
        );

        // At the scheduled time it becomes available, and the sweep is
        // idempotent
        let swept = fixture
            .store
            .sweep_expired_respawns(respawn_at)
            .await
            .unwrap();
        assert_eq!(swept, 1);
        let node = fixture.store.node(fixture.node_id).unwrap();
        assert_eq!(node.status, NodeStatus::Available);
        assert!(node.respawn_at_ms.is_none());

        let swept = fixture
            .store
            .sweep_expired_respawns(respawn_at)
            .await
            .unwrap();
        assert_eq!(swept, 0);
    }

    #[tokio::test]
    async fn test_second_epoch_can_succeed_after_respawn() {
        let fixture = fixture(ResourceKind::Iron).await;
        let identity = registered_identity(&fixture);
        let other = registered_identity(&fixture);
        let uc = use_case(&fixture, 0.0);

        uc.execute(input(&fixture, identity, "epoch-0")).await.unwrap();
        let node = fixture.store.node(fixture.node_id).unwrap();
        fixture
            .store
            .sweep_expired_respawns(node.respawn_at_ms.unwrap())
            .await
            .unwrap();

        let second = uc.execute(input(&fixture, other, "epoch-1")).await.unwrap();
        assert!(second.attempt.success);

        let rows = fixture.store.attempt_rows();
        let success_epochs: Vec<i32> = rows
            .iter()
            .filter(|a| a.success)
            .map(|a| a.claim_epoch)
            .collect();
        assert_eq!(success_epochs, vec![0, 1]);

        // Totals accumulated across both claims
        let per_claim = ResourceKind::Iron.base_quantity();
        assert_eq!(fixture.store.total_of(identity, ResourceKind::Iron), per_claim);
        assert_eq!(fixture.store.total_of(other, ResourceKind::Iron), per_claim);
    }

    #[tokio::test]
    async fn test_unknown_identity_is_rejected_without_ledger_row() {
        let fixture = fixture(ResourceKind::Iron).await;
        let uc = use_case(&fixture, 0.0);

        let result = uc.execute(input(&fixture, IdentityId::new(), "ghost")).await;
        assert!(matches!(result, Err(MiningError::IdentityNotFound)));
        assert!(fixture.store.attempt_rows().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_node_is_rejected_without_ledger_row() {
        let fixture = fixture(ResourceKind::Iron).await;
        let identity = registered_identity(&fixture);
        let uc = use_case(&fixture, 0.0);

        let mut attempt_input = input(&fixture, identity, "no-node");
        attempt_input.node_id = Id::from_uuid(uuid::Uuid::new_v4());

        let result = uc.execute(attempt_input).await;
        assert!(matches!(result, Err(MiningError::NodeNotFound)));
        assert!(fixture.store.attempt_rows().is_empty());
    }

    #[tokio::test]
    async fn test_empty_idempotency_token_is_malformed() {
        let fixture = fixture(ResourceKind::Iron).await;
        let identity = registered_identity(&fixture);
        let uc = use_case(&fixture, 0.0);

        let result = uc.execute(input(&fixture, identity, "")).await;
        assert!(matches!(result, Err(MiningError::Malformed(_))));
        assert!(fixture.store.attempt_rows().is_empty());
    }

    #[tokio::test]
    async fn test_respawning_node_with_elapsed_timer_is_claimable() {
        let fixture = fixture(ResourceKind::Iron).await;
        let identity = registered_identity(&fixture);
        let other = registered_identity(&fixture);
        let uc = use_case(&fixture, 0.0);

        uc.execute(input(&fixture, identity, "lazy-0")).await.unwrap();

        // Force the respawn time into the past without sweeping
        {
            let node = fixture.store.node(fixture.node_id).unwrap();
            let mut expired = node.clone();
            expired.respawn_at_ms = Some(Utc::now().timestamp_millis() - 10);
            fixture.store.create_nodes(&[expired]).await.unwrap();
        }

        // The lazy path claims it even though the sweeper never ran
        let outcome = uc.execute(input(&fixture, other, "lazy-1")).await.unwrap();
        assert!(outcome.attempt.success);
    }

    #[tokio::test]
    async fn test_config_cooldown_window_is_respected_after_wait() {
        let fixture = Fixture {
            config: Arc::new(MiningConfig {
                attempt_cooldown: Duration::from_millis(30),
                ..MiningConfig::default()
            }),
            ..fixture(ResourceKind::Iron).await
        };
        let identity = registered_identity(&fixture);
        let uc = use_case(&fixture, 0.999);

        uc.execute(input(&fixture, identity, "w-1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let second = uc.execute(input(&fixture, identity, "w-2")).await.unwrap();
        assert_ne!(second.attempt.fail_reason, Some(FailReason::CooldownActive));
    }
}

// ============================================================================
// Fraud annotation tests
// ============================================================================

#[cfg(test)]
mod fraud_tests {
    use std::sync::Arc;

    use chrono::Utc;
    use kernel::id::{AttemptId, IdentityId, NodeId, WorldSessionId};

    use super::mem_store::MemStore;
    use crate::application::fraud::annotate_suspicion;
    use crate::domain::entities::{AttemptDraft, MiningAttempt};
    use crate::domain::repository::AttemptLedgerRepository;
    use crate::domain::services::FraudThresholds;
    use crate::domain::value_objects::{ClientOrigin, FailReason, Position, SuspicionFlag};

    fn attempt(
        identity: IdentityId,
        ms: i64,
        pos: Position,
        token: &str,
    ) -> MiningAttempt {
        AttemptDraft {
            id: AttemptId::new(),
            idempotency_key: token.to_string(),
            identity_id: identity,
            session_id: WorldSessionId::new(),
            node_id: NodeId::new(),
            observed_epoch: 0,
            claimed_position: pos,
            distance: 1.0,
            origin: ClientOrigin::default(),
            latency_ms: 1,
            created_at_ms: ms,
            created_at: Utc::now(),
        }
        .into_failure(0, FailReason::MiningFailed)
    }

    #[tokio::test]
    async fn test_burst_plus_teleport_escalates_to_manual_review() {
        let store = MemStore::new();
        let identity = IdentityId::new();
        let base_ms = Utc::now().timestamp_millis();

        // 11 attempts in a second, hopping thousands of units each time
        for i in 0..11 {
            store.push_attempt(attempt(
                identity,
                base_ms - 1_000 + i * 100,
                Position::new(i as f64 * 5_000.0, 0.0, 0.0),
                &format!("burst-{i}"),
            ));
        }
        let target = attempt(
            identity,
            base_ms,
            Position::new(90_000.0, 0.0, 0.0),
            "burst-target",
        );
        store.push_attempt(target.clone());

        annotate_suspicion(
            Arc::new(store.clone()),
            FraudThresholds::default(),
            target.clone(),
        )
        .await;

        let row = store
            .find_by_idempotency_key("burst-target")
            .await
            .unwrap()
            .unwrap();
        assert!(row.suspicion_flags.contains(&SuspicionFlag::RapidSuccession));
        assert!(row
            .suspicion_flags
            .contains(&SuspicionFlag::ImpossibleDisplacement));
        assert!(row.needs_review, "two simultaneous flags require review");
    }

    #[tokio::test]
    async fn test_single_flag_annotates_without_review() {
        let store = MemStore::new();
        let identity = IdentityId::new();
        let base_ms = Utc::now().timestamp_millis();

        // Burst volume from a stationary position: one flag only
        for i in 0..11 {
            store.push_attempt(attempt(
                identity,
                base_ms - 1_000 + i * 100,
                Position::new(0.0, 0.0, 0.0),
                &format!("still-{i}"),
            ));
        }
        let target = attempt(identity, base_ms, Position::new(0.0, 0.0, 0.0), "still-target");
        store.push_attempt(target.clone());

        annotate_suspicion(
            Arc::new(store.clone()),
            FraudThresholds::default(),
            target.clone(),
        )
        .await;

        let row = store
            .find_by_idempotency_key("still-target")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.suspicion_flags, vec![SuspicionFlag::RapidSuccession]);
        assert!(!row.needs_review);
    }

    #[tokio::test]
    async fn test_clean_history_stays_unannotated() {
        let store = MemStore::new();
        let identity = IdentityId::new();
        let base_ms = Utc::now().timestamp_millis();

        let target = attempt(identity, base_ms, Position::new(0.0, 0.0, 0.0), "clean");
        store.push_attempt(target.clone());

        annotate_suspicion(
            Arc::new(store.clone()),
            FraudThresholds::default(),
            target,
        )
        .await;

        let row = store.find_by_idempotency_key("clean").await.unwrap().unwrap();
        assert!(row.suspicion_flags.is_empty());
        assert!(!row.needs_review);
    }

    #[tokio::test]
    async fn test_review_signoff_flow() {
        let store = MemStore::new();
        let identity = IdentityId::new();
        let base_ms = Utc::now().timestamp_millis();

        let mut flagged = attempt(identity, base_ms, Position::new(0.0, 0.0, 0.0), "flagged");
        flagged.needs_review = true;
        flagged.suspicion_flags = vec![
            SuspicionFlag::RapidSuccession,
            SuspicionFlag::ImplausibleSuccessRate,
        ];
        store.push_attempt(flagged.clone());

        let queue = store.list_review_queue(10).await.unwrap();
        assert_eq!(queue.len(), 1);

        assert!(store.mark_reviewed(flagged.id, "auditor-7").await.unwrap());
        // Second sign-off finds nothing open
        assert!(!store.mark_reviewed(flagged.id, "auditor-7").await.unwrap());

        let queue = store.list_review_queue(10).await.unwrap();
        assert!(queue.is_empty());
    }
}

// ============================================================================
// Config tests
// ============================================================================

#[cfg(test)]
mod config_tests {
    use std::time::Duration;

    use crate::application::config::MiningConfig;
    use crate::domain::value_objects::RarityTier;

    #[test]
    fn test_default_config() {
        let config = MiningConfig::default();

        assert_eq!(config.max_mining_range, 15.0);
        assert_eq!(config.attempt_cooldown, Duration::from_millis(1_500));
        assert_eq!(config.respawn_delay, Duration::from_secs(30));
        assert_eq!(config.default_node_count, 24);
        assert!(config.identity_rate_limit.max_requests < config.origin_rate_limit.max_requests);
    }

    #[test]
    fn test_respawn_delay_scales_with_rarity() {
        let config = MiningConfig::default();

        assert_eq!(config.respawn_delay_ms(RarityTier::Common), 30_000);
        assert_eq!(config.respawn_delay_ms(RarityTier::Uncommon), 45_000);
        assert_eq!(config.respawn_delay_ms(RarityTier::Rare), 75_000);
        assert_eq!(config.respawn_delay_ms(RarityTier::Epic), 120_000);
    }

    #[test]
    fn test_fraud_defaults_stay_below_max_rate_margin() {
        let config = MiningConfig::default();
        // The ceiling must sit above anything legitimate play can reach
        assert!(config.fraud.success_rate_ceiling > crate::domain::services::MAX_SUCCESS_RATE);
    }
}

// ============================================================================
// Domain model tests
// ============================================================================

#[cfg(test)]
mod domain_tests {
    use chrono::Utc;
    use kernel::id::WorldSessionId;

    use crate::domain::entities::ResourceNode;
    use crate::domain::value_objects::{
        FailReason, NodeStatus, Position, RarityTier, ResourceKind, SuspicionFlag,
    };

    #[test]
    fn test_position_distance() {
        let a = Position::new(0.0, 0.0, 0.0);
        let b = Position::new(3.0, 4.0, 0.0);
        assert_eq!(a.distance_to(&b), 5.0);
        assert_eq!(b.distance_to(&a), 5.0);
        assert_eq!(a.distance_to(&a), 0.0);
    }

    #[test]
    fn test_resource_kind_roundtrip() {
        for kind in ResourceKind::ALL {
            assert_eq!(ResourceKind::from_id(kind.id()), Some(kind));
        }
        assert_eq!(ResourceKind::from_id(0), None);
        assert_eq!(ResourceKind::from_id(99), None);
    }

    #[test]
    fn test_node_status_roundtrip() {
        for status in [
            NodeStatus::Available,
            NodeStatus::Claimed,
            NodeStatus::Respawning,
        ] {
            assert_eq!(NodeStatus::from_id(status.id()), Some(status));
        }
        assert_eq!(NodeStatus::from_id(7), None);
    }

    #[test]
    fn test_fail_reason_codes() {
        assert_eq!(FailReason::CooldownActive.code(), "cooldown_active");
        assert_eq!(FailReason::NodeUnavailable.code(), "node_unavailable");
        assert_eq!(FailReason::OutOfRange.code(), "out_of_range");
        assert_eq!(FailReason::MiningFailed.code(), "mining_failed");
        for reason in [
            FailReason::CooldownActive,
            FailReason::NodeUnavailable,
            FailReason::OutOfRange,
            FailReason::MiningFailed,
        ] {
            assert_eq!(FailReason::from_id(reason.id()), Some(reason));
        }
    }

    #[test]
    fn test_suspicion_flag_mask_roundtrip() {
        let flags = vec![
            SuspicionFlag::RapidSuccession,
            SuspicionFlag::ImpossibleDisplacement,
        ];
        let mask = SuspicionFlag::to_mask(&flags);
        assert_eq!(mask, 1 | 4);
        assert_eq!(SuspicionFlag::from_mask(mask), flags);
        assert!(SuspicionFlag::from_mask(0).is_empty());
    }

    #[test]
    fn test_node_quantity_scales_with_rarity() {
        let session = WorldSessionId::new();
        let common = ResourceNode::new(
            session,
            ResourceKind::Gold,
            RarityTier::Common,
            Position::new(0.0, 0.0, 0.0),
            1.0,
        );
        let epic = ResourceNode::new(
            session,
            ResourceKind::Gold,
            RarityTier::Epic,
            Position::new(0.0, 0.0, 0.0),
            1.0,
        );
        assert_eq!(common.quantity, ResourceKind::Gold.base_quantity());
        assert_eq!(epic.quantity, common.quantity * 8);
    }

    #[test]
    fn test_claimability_by_state() {
        let session = WorldSessionId::new();
        let now_ms = Utc::now().timestamp_millis();
        let mut node = ResourceNode::new(
            session,
            ResourceKind::Iron,
            RarityTier::Common,
            Position::new(0.0, 0.0, 0.0),
            1.0,
        );

        assert!(node.is_claimable(now_ms));

        node.status = NodeStatus::Claimed;
        assert!(!node.is_claimable(now_ms));

        node.status = NodeStatus::Respawning;
        node.respawn_at_ms = Some(now_ms + 5_000);
        assert!(!node.is_claimable(now_ms));

        // Lazy respawn: elapsed timer means claimable even before sweep
        node.respawn_at_ms = Some(now_ms - 1);
        assert!(node.is_claimable(now_ms));
    }
}

// ============================================================================
// DTO / wire protocol tests
// ============================================================================

#[cfg(test)]
mod models_tests {
    use crate::domain::value_objects::{NodeStatus, Position, ResourceKind};
    use crate::presentation::dto::*;

    #[test]
    fn test_client_join_deserialization() {
        let json = r#"{
            "type": "join",
            "sessionId": "00000000-0000-0000-0000-000000000001",
            "identityId": "00000000-0000-0000-0000-000000000002"
        }"#;
        let message: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(message, ClientMessage::Join { .. }));
    }

    #[test]
    fn test_client_attempt_deserialization() {
        let json = r#"{
            "type": "attempt",
            "sessionRef": "00000000-0000-0000-0000-000000000001",
            "nodeRef": "00000000-0000-0000-0000-000000000003",
            "claimedPosition": {"x": 1.5, "y": -2.0, "z": 10.25},
            "idempotencyToken": "attempt-42"
        }"#;
        let message: ClientMessage = serde_json::from_str(json).unwrap();
        let ClientMessage::Attempt {
            claimed_position,
            idempotency_token,
            ..
        } = message
        else {
            panic!("expected attempt message");
        };
        assert_eq!(claimed_position.x, 1.5);
        assert_eq!(idempotency_token, "attempt-42");
    }

    #[test]
    fn test_attempt_result_serialization_success() {
        let response = AttemptResponse {
            success: true,
            reason_code: None,
            resource_kind: Some(ResourceKind::Nickel),
            amount: Some(30),
            new_node_state: Some(NodeStatus::Respawning),
            replayed: false,
            server_processing_ms: 12,
        };
        let json = serde_json::to_string(&ServerMessage::AttemptResult(response)).unwrap();

        assert!(json.contains(r#""type":"attemptResult""#));
        assert!(json.contains(r#""success":true"#));
        assert!(json.contains(r#""resourceKind":"nickel""#));
        assert!(json.contains(r#""newNodeState":"respawning""#));
        assert!(json.contains(r#""serverProcessingMs":12"#));
        assert!(!json.contains("reasonCode"));
    }

    #[test]
    fn test_attempt_result_serialization_failure() {
        let response = AttemptResponse {
            success: false,
            reason_code: Some("out_of_range"),
            resource_kind: None,
            amount: None,
            new_node_state: None,
            replayed: false,
            server_processing_ms: 3,
        };
        let json = serde_json::to_string(&ServerMessage::AttemptResult(response)).unwrap();

        assert!(json.contains(r#""reasonCode":"out_of_range""#));
        assert!(!json.contains("resourceKind"));
        assert!(!json.contains("amount"));
    }

    #[test]
    fn test_node_claimed_broadcast_serialization() {
        let event = NodeClaimedEvent {
            node_ref: uuid::Uuid::nil(),
            claimed_by_identity: uuid::Uuid::nil(),
            resource_kind: ResourceKind::Gold,
            amount: 6,
            new_node_state: NodeStatus::Respawning,
            timestamp_epoch_ms: 1_700_000_000_000,
        };
        let json = serde_json::to_string(&ServerMessage::NodeClaimed(event)).unwrap();

        assert!(json.contains(r#""type":"nodeClaimed""#));
        assert!(json.contains(r#""claimedByIdentity""#));
        assert!(json.contains(r#""timestampEpochMs":1700000000000"#));
    }

    #[test]
    fn test_create_session_request_defaults() {
        let request: CreateSessionRequest = serde_json::from_str("{}").unwrap();
        assert!(request.node_count.is_none());

        let request: CreateSessionRequest =
            serde_json::from_str(r#"{"nodeCount": 12}"#).unwrap();
        assert_eq!(request.node_count, Some(12));
    }

    #[test]
    fn test_position_wire_shape() {
        let position: Position = serde_json::from_str(r#"{"x":1.0,"y":2.0,"z":3.0}"#).unwrap();
        assert_eq!(position, Position::new(1.0, 2.0, 3.0));
    }
}

// ============================================================================
// Error mapping tests
// ============================================================================

#[cfg(test)]
mod error_tests {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    use crate::error::MiningError;
    use kernel::error::{app_error::AppError, kind::ErrorKind};

    #[test]
    fn test_error_into_response_status_codes() {
        let test_cases: Vec<(MiningError, StatusCode)> = vec![
            (MiningError::IdentityNotFound, StatusCode::NOT_FOUND),
            (MiningError::NodeNotFound, StatusCode::NOT_FOUND),
            (MiningError::AttemptNotFound, StatusCode::NOT_FOUND),
            (MiningError::RateLimitExceeded, StatusCode::TOO_MANY_REQUESTS),
            (
                MiningError::Malformed("bad".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                MiningError::Internal("test".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected_status) in test_cases {
            let response = error.into_response();
            assert_eq!(
                response.status(),
                expected_status,
                "Error should return correct status code"
            );
        }
    }

    #[test]
    fn test_storage_errors_are_retryable_and_distinct() {
        let error = MiningError::Database(sqlx::Error::PoolTimedOut);
        assert!(error.is_retryable());
        assert_eq!(error.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(error.reason_code(), "storage_unavailable");

        // Game rejections are not retryable infrastructure failures
        assert!(!MiningError::IdentityNotFound.is_retryable());
        assert!(!MiningError::RateLimitExceeded.is_retryable());
    }

    #[test]
    fn test_reason_codes() {
        assert_eq!(MiningError::IdentityNotFound.reason_code(), "identity_not_found");
        assert_eq!(MiningError::NodeNotFound.reason_code(), "node_not_found");
        assert_eq!(MiningError::RateLimitExceeded.reason_code(), "rate_limited");
        assert_eq!(
            MiningError::Malformed("x".into()).reason_code(),
            "malformed_request"
        );
    }

    #[test]
    fn test_conversion_to_app_error() {
        let app_err: AppError = MiningError::RateLimitExceeded.into();
        assert_eq!(app_err.kind(), ErrorKind::TooManyRequests);

        let app_err: AppError = MiningError::NodeNotFound.into();
        assert_eq!(app_err.kind(), ErrorKind::NotFound);
    }
}
