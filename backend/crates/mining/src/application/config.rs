//! Application Configuration
//!
//! Configuration for the mining application layer.

use std::time::Duration;

use platform::rate_limit::RateLimitConfig;

use crate::domain::services::FraudThresholds;
use crate::domain::value_objects::RarityTier;

/// Mining application configuration
#[derive(Debug, Clone)]
pub struct MiningConfig {
    /// Max distance between claimed position and node position
    pub max_mining_range: f64,
    /// Global per-identity cooldown between evaluated attempts
    pub attempt_cooldown: Duration,
    /// Base respawn delay, scaled per rarity tier
    pub respawn_delay: Duration,
    /// Interval of the background respawn sweeper
    pub sweep_interval: Duration,
    /// Half-extent of the cube nodes are seeded into
    pub world_extent: f64,
    /// Nodes seeded when a session is created without an explicit count
    pub default_node_count: usize,
    /// Per-identity admission control (tighter)
    pub identity_rate_limit: RateLimitConfig,
    /// Per-origin admission control (looser; NAT shares one origin)
    pub origin_rate_limit: RateLimitConfig,
    /// Fraud heuristic thresholds
    pub fraud: FraudThresholds,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            max_mining_range: 15.0,
            attempt_cooldown: Duration::from_millis(1_500),
            respawn_delay: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(1),
            world_extent: 250.0,
            default_node_count: 24,
            identity_rate_limit: RateLimitConfig::new(30, 60),
            origin_rate_limit: RateLimitConfig::new(120, 60),
            fraud: FraudThresholds::default(),
        }
    }
}

impl MiningConfig {
    pub fn attempt_cooldown_ms(&self) -> i64 {
        self.attempt_cooldown.as_millis() as i64
    }

    /// Respawn delay for a node of the given rarity
    pub fn respawn_delay_ms(&self, rarity: RarityTier) -> i64 {
        (self.respawn_delay.as_millis() as f64 * rarity.respawn_multiplier()) as i64
    }
}
