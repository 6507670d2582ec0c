//! Respawn Sweep Use Case
//!
//! Returns `Respawning` nodes whose time has passed to `Available`.
//! The sweep is idempotent and safe to run concurrently with claims:
//! the claim path also respawns lazily under its row lock, so the two
//! can never disagree about claimability.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::domain::repository::NodeRepository;
use crate::error::MiningResult;

/// Sweep Respawns Use Case
pub struct SweepRespawnsUseCase<N>
where
    N: NodeRepository,
{
    nodes: Arc<N>,
}

impl<N> SweepRespawnsUseCase<N>
where
    N: NodeRepository,
{
    pub fn new(nodes: Arc<N>) -> Self {
        Self { nodes }
    }

    /// Run one sweep; returns how many nodes became available
    pub async fn execute(&self) -> MiningResult<u64> {
        let now_ms = Utc::now().timestamp_millis();
        let respawned = self.nodes.sweep_expired_respawns(now_ms).await?;
        if respawned > 0 {
            tracing::debug!(respawned, "Respawn sweep returned nodes to available");
        }
        Ok(respawned)
    }
}

/// Background sweeper loop for the API process
///
/// Sweep failures are logged and the loop keeps going; a missed sweep
/// only delays respawns, claims stay correct via the lazy path.
pub async fn run_sweeper<N>(nodes: Arc<N>, interval: Duration)
where
    N: NodeRepository + Send + Sync + 'static,
{
    let use_case = SweepRespawnsUseCase::new(nodes);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if let Err(e) = use_case.execute().await {
            tracing::warn!(error = %e, "Respawn sweep failed, continuing");
        }
    }
}
