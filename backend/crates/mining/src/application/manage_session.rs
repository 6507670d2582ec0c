//! Session Management Use Cases
//!
//! World sessions are implicit: a session is the set of nodes seeded
//! under one session ID. Creating a session places nodes procedurally;
//! ending it deletes them. The ledger keeps its rows either way.

use std::sync::Arc;

use kernel::id::WorldSessionId;

use crate::application::config::MiningConfig;
use crate::domain::entities::ResourceNode;
use crate::domain::repository::NodeRepository;
use crate::domain::services::OutcomeRoll;
use crate::domain::value_objects::{Position, RarityTier, ResourceKind};
use crate::error::{MiningError, MiningResult};

/// Upper bound on nodes seeded into one session
const MAX_SESSION_NODES: usize = 256;

/// Node difficulty multipliers are drawn from this range
const DIFFICULTY_MIN: f64 = 0.75;
const DIFFICULTY_SPREAD: f64 = 0.5;

/// Output DTO for session creation
#[derive(Debug, Clone)]
pub struct CreateSessionOutput {
    pub session_id: WorldSessionId,
    pub nodes: Vec<ResourceNode>,
}

/// Create Session Use Case
pub struct CreateSessionUseCase<N, Roll>
where
    N: NodeRepository,
    Roll: OutcomeRoll,
{
    nodes: Arc<N>,
    roller: Arc<Roll>,
    config: Arc<MiningConfig>,
}

impl<N, Roll> CreateSessionUseCase<N, Roll>
where
    N: NodeRepository,
    Roll: OutcomeRoll,
{
    pub fn new(nodes: Arc<N>, roller: Arc<Roll>, config: Arc<MiningConfig>) -> Self {
        Self {
            nodes,
            roller,
            config,
        }
    }

    pub async fn execute(&self, node_count: Option<usize>) -> MiningResult<CreateSessionOutput> {
        let count = node_count.unwrap_or(self.config.default_node_count);
        if count == 0 || count > MAX_SESSION_NODES {
            return Err(MiningError::Malformed(format!(
                "node count must be 1..={}",
                MAX_SESSION_NODES
            )));
        }

        let session_id = WorldSessionId::new();
        let nodes: Vec<ResourceNode> = (0..count).map(|_| self.spawn_node(session_id)).collect();

        self.nodes.create_nodes(&nodes).await?;

        tracing::info!(
            session_id = %session_id,
            nodes = nodes.len(),
            "World session created"
        );

        Ok(CreateSessionOutput { session_id, nodes })
    }

    fn spawn_node(&self, session_id: WorldSessionId) -> ResourceNode {
        let kind = pick_weighted(&ResourceKind::ALL, self.roller.roll_unit(), |k| {
            k.spawn_weight()
        });
        let rarity = pick_weighted(&RarityTier::ALL, self.roller.roll_unit(), |r| {
            r.spawn_weight()
        });

        let extent = self.config.world_extent;
        let position = Position::new(
            (self.roller.roll_unit() * 2.0 - 1.0) * extent,
            (self.roller.roll_unit() * 2.0 - 1.0) * extent,
            (self.roller.roll_unit() * 2.0 - 1.0) * extent,
        );
        let difficulty = DIFFICULTY_MIN + self.roller.roll_unit() * DIFFICULTY_SPREAD;

        ResourceNode::new(session_id, kind, rarity, position, difficulty)
    }
}

/// End Session Use Case
pub struct EndSessionUseCase<N>
where
    N: NodeRepository,
{
    nodes: Arc<N>,
}

impl<N> EndSessionUseCase<N>
where
    N: NodeRepository,
{
    pub fn new(nodes: Arc<N>) -> Self {
        Self { nodes }
    }

    /// Deletes the session's nodes; idempotent. Returns the count
    /// removed (zero for an unknown or already-ended session).
    pub async fn execute(&self, session_id: WorldSessionId) -> MiningResult<u64> {
        let deleted = self.nodes.delete_session_nodes(session_id).await?;
        tracing::info!(
            session_id = %session_id,
            nodes_deleted = deleted,
            "World session ended"
        );
        Ok(deleted)
    }
}

/// Pick a value from `items` by relative weight using one uniform draw
fn pick_weighted<T: Copy>(items: &[T], roll: f64, weight: impl Fn(&T) -> u64) -> T {
    let total: u64 = items.iter().map(&weight).sum();
    let mut target = (roll * total as f64) as u64;
    for item in items {
        let w = weight(item);
        if target < w {
            return *item;
        }
        target -= w;
    }
    // roll == 1.0 is excluded from the draw range, but guard anyway
    items[items.len() - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_weighted_boundaries() {
        let items = [1u8, 2, 3];
        // weights 30/25/20 -> total 75
        let weight = |v: &u8| match v {
            1 => 30u64,
            2 => 25,
            _ => 20,
        };
        assert_eq!(pick_weighted(&items, 0.0, weight), 1);
        assert_eq!(pick_weighted(&items, 0.399, weight), 1);
        assert_eq!(pick_weighted(&items, 0.4, weight), 2);
        assert_eq!(pick_weighted(&items, 0.999, weight), 3);
    }
}
