//! Domain Value Objects
//!
//! Immutable value types for the mining domain.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

// ============================================================================
// Position
// ============================================================================

/// A point in world space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to another point
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

// ============================================================================
// ResourceKind - closed enumeration, match dispatch only
// ============================================================================

/// Mineable resource kind
///
/// A closed set: persistence uses numeric IDs, the wire uses string
/// codes, and per-kind tuning is plain match dispatch. Adding a kind
/// means adding a variant, never a dynamically-built column name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Iron,
    Nickel,
    Cobalt,
    Silver,
    Gold,
    Platinum,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 6] = [
        Self::Iron,
        Self::Nickel,
        Self::Cobalt,
        Self::Silver,
        Self::Gold,
        Self::Platinum,
    ];

    /// Get numeric ID for database storage
    #[inline]
    pub const fn id(&self) -> i16 {
        match self {
            Self::Iron => 1,
            Self::Nickel => 2,
            Self::Cobalt => 3,
            Self::Silver => 4,
            Self::Gold => 5,
            Self::Platinum => 6,
        }
    }

    /// Get string code for serialization/API
    #[inline]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Iron => "iron",
            Self::Nickel => "nickel",
            Self::Cobalt => "cobalt",
            Self::Silver => "silver",
            Self::Gold => "gold",
            Self::Platinum => "platinum",
        }
    }

    /// Base probability that one attempt on this kind succeeds
    ///
    /// Scaled by the node's difficulty multiplier at evaluation time;
    /// the effective rate is capped at `services::MAX_SUCCESS_RATE`.
    #[inline]
    pub const fn base_success_rate(&self) -> f64 {
        match self {
            Self::Iron => 0.80,
            Self::Nickel => 0.72,
            Self::Cobalt => 0.55,
            Self::Silver => 0.35,
            Self::Gold => 0.18,
            Self::Platinum => 0.08,
        }
    }

    /// Base quantity a node of this kind awards before rarity scaling
    #[inline]
    pub const fn base_quantity(&self) -> i64 {
        match self {
            Self::Iron => 40,
            Self::Nickel => 30,
            Self::Cobalt => 20,
            Self::Silver => 12,
            Self::Gold => 6,
            Self::Platinum => 2,
        }
    }

    /// Relative weight when seeding session nodes
    #[inline]
    pub const fn spawn_weight(&self) -> u64 {
        match self {
            Self::Iron => 30,
            Self::Nickel => 25,
            Self::Cobalt => 20,
            Self::Silver => 13,
            Self::Gold => 8,
            Self::Platinum => 4,
        }
    }

    /// Create from numeric ID
    #[inline]
    pub fn from_id(id: i16) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.id() == id)
    }
}

// ============================================================================
// NodeStatus - cyclic node lifecycle
// ============================================================================

/// Node lifecycle state
///
/// `Available -> Claimed -> Respawning -> Available`, cyclic.
/// `Claimed` is transient inside the commit transaction: by the time
/// any other reader can observe the row it is already `Respawning`,
/// so `Claimed` is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum NodeStatus {
    /// Claimable by the first successful attempt
    #[default]
    Available = 0,

    /// Held by a committing claim (transient, never persisted)
    Claimed = 1,

    /// Claimed and waiting for its respawn time
    Respawning = 2,
}

impl NodeStatus {
    /// Get numeric ID for database storage
    #[inline]
    pub const fn id(&self) -> i16 {
        *self as i16
    }

    /// Get string code for serialization/API
    #[inline]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Claimed => "claimed",
            Self::Respawning => "respawning",
        }
    }

    /// Create from numeric ID
    #[inline]
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(Self::Available),
            1 => Some(Self::Claimed),
            2 => Some(Self::Respawning),
            _ => None,
        }
    }
}

// ============================================================================
// RarityTier
// ============================================================================

/// Node rarity tier
///
/// Scales respawn delay and awarded quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum RarityTier {
    #[default]
    Common = 0,
    Uncommon = 1,
    Rare = 2,
    Epic = 3,
}

impl RarityTier {
    pub const ALL: [RarityTier; 4] = [Self::Common, Self::Uncommon, Self::Rare, Self::Epic];

    #[inline]
    pub const fn id(&self) -> i16 {
        *self as i16
    }

    #[inline]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Common => "common",
            Self::Uncommon => "uncommon",
            Self::Rare => "rare",
            Self::Epic => "epic",
        }
    }

    /// Multiplier applied to the configured base respawn delay
    #[inline]
    pub const fn respawn_multiplier(&self) -> f64 {
        match self {
            Self::Common => 1.0,
            Self::Uncommon => 1.5,
            Self::Rare => 2.5,
            Self::Epic => 4.0,
        }
    }

    /// Multiplier applied to the kind's base quantity
    #[inline]
    pub const fn quantity_multiplier(&self) -> i64 {
        match self {
            Self::Common => 1,
            Self::Uncommon => 2,
            Self::Rare => 4,
            Self::Epic => 8,
        }
    }

    /// Relative weight when seeding session nodes
    #[inline]
    pub const fn spawn_weight(&self) -> u64 {
        match self {
            Self::Common => 55,
            Self::Uncommon => 28,
            Self::Rare => 13,
            Self::Epic => 4,
        }
    }

    #[inline]
    pub fn from_id(id: i16) -> Option<Self> {
        Self::ALL.iter().copied().find(|r| r.id() == id)
    }
}

// ============================================================================
// FailReason - evaluated-failure reason codes
// ============================================================================

/// Reason an *evaluated* attempt failed
///
/// These are game outcomes, recorded in the ledger. Rejections that
/// never reach evaluation (rate limit, unknown identity, malformed
/// input) are `MiningError` values instead and leave no ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailReason {
    /// Identity attempted again inside the global cooldown window
    CooldownActive,
    /// Node was not claimable (already claimed, respawning, contended
    /// lock, or deleted with the session)
    NodeUnavailable,
    /// Claimed position farther from the node than the mining range
    OutOfRange,
    /// The outcome roll did not succeed
    MiningFailed,
}

impl FailReason {
    #[inline]
    pub const fn id(&self) -> i16 {
        match self {
            Self::CooldownActive => 1,
            Self::NodeUnavailable => 2,
            Self::OutOfRange => 3,
            Self::MiningFailed => 4,
        }
    }

    #[inline]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::CooldownActive => "cooldown_active",
            Self::NodeUnavailable => "node_unavailable",
            Self::OutOfRange => "out_of_range",
            Self::MiningFailed => "mining_failed",
        }
    }

    #[inline]
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(Self::CooldownActive),
            2 => Some(Self::NodeUnavailable),
            3 => Some(Self::OutOfRange),
            4 => Some(Self::MiningFailed),
            _ => None,
        }
    }
}

// ============================================================================
// SuspicionFlag - fraud heuristic outputs
// ============================================================================

/// Independent fraud heuristic flags
///
/// Stored on the ledger row as a bitmask; any combination may fire on
/// a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspicionFlag {
    /// Attempt burst above the trailing-window threshold
    RapidSuccession,
    /// Observed success rate implausible for the configured drop rates
    ImplausibleSuccessRate,
    /// Movement between attempts faster than physically plausible
    ImpossibleDisplacement,
}

impl SuspicionFlag {
    pub const ALL: [SuspicionFlag; 3] = [
        Self::RapidSuccession,
        Self::ImplausibleSuccessRate,
        Self::ImpossibleDisplacement,
    ];

    #[inline]
    pub const fn bit(&self) -> i32 {
        match self {
            Self::RapidSuccession => 1,
            Self::ImplausibleSuccessRate => 2,
            Self::ImpossibleDisplacement => 4,
        }
    }

    #[inline]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::RapidSuccession => "rapid_succession",
            Self::ImplausibleSuccessRate => "implausible_success_rate",
            Self::ImpossibleDisplacement => "impossible_displacement",
        }
    }

    /// Pack a flag set into a bitmask for storage
    pub fn to_mask(flags: &[SuspicionFlag]) -> i32 {
        flags.iter().fold(0, |mask, f| mask | f.bit())
    }

    /// Unpack a stored bitmask into a flag set
    pub fn from_mask(mask: i32) -> Vec<SuspicionFlag> {
        Self::ALL
            .iter()
            .copied()
            .filter(|f| mask & f.bit() != 0)
            .collect()
    }
}

// ============================================================================
// ClientOrigin - network metadata attached to ledger rows
// ============================================================================

/// Network origin of an attempt, recorded for fraud analytics
#[derive(Debug, Clone, Default)]
pub struct ClientOrigin {
    pub ip: Option<IpAddr>,
    pub fingerprint_hash: Option<Vec<u8>>,
}

impl ClientOrigin {
    pub fn new(ip: Option<IpAddr>, fingerprint_hash: Option<Vec<u8>>) -> Self {
        Self {
            ip,
            fingerprint_hash,
        }
    }
}
