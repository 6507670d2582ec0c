//! Domain Services
//!
//! Pure domain logic: outcome rolls and fraud heuristics. Nothing in
//! this module reads a clock or touches storage; everything is a
//! function of its inputs so the same inputs always give the same
//! answer.

use crate::domain::entities::MiningAttempt;
use crate::domain::value_objects::{ResourceKind, SuspicionFlag};

/// Ceiling on any effective success rate, whatever the node tuning
pub const MAX_SUCCESS_RATE: f64 = 0.80;

/// Effective success rate of a node: kind base rate scaled by the
/// node's difficulty multiplier, capped at [`MAX_SUCCESS_RATE`]
pub fn effective_success_rate(kind: ResourceKind, difficulty: f64) -> f64 {
    (kind.base_success_rate() * difficulty).clamp(0.0, MAX_SUCCESS_RATE)
}

/// Whether a uniform draw in [0, 1) wins against a success rate
#[inline]
pub fn roll_succeeds(roll: f64, rate: f64) -> bool {
    roll < rate
}

/// Source of uniform draws for outcome rolls
///
/// The production implementation draws from the OS CSPRNG; tests
/// inject fixed draws. Client input never reaches a roll.
pub trait OutcomeRoll: Send + Sync {
    /// Uniform draw in [0, 1)
    fn roll_unit(&self) -> f64;
}

/// CSPRNG-backed roll source
#[derive(Debug, Clone, Copy, Default)]
pub struct CryptoRoll;

impl OutcomeRoll for CryptoRoll {
    fn roll_unit(&self) -> f64 {
        platform::crypto::random_unit()
    }
}

// ============================================================================
// Fraud heuristics
// ============================================================================

/// Fraud heuristic thresholds
///
/// Plain configuration: the defaults mirror the tuning the heuristics
/// shipped with, and carry no validated business meaning beyond that.
#[derive(Debug, Clone)]
pub struct FraudThresholds {
    /// Max attempts (any outcome) inside the trailing burst window
    pub burst_max_attempts: u32,
    /// Trailing burst window
    pub burst_window_ms: i64,
    /// Attempts sampled for the success-rate heuristic
    pub rate_sample_size: usize,
    /// Minimum sample before the success-rate heuristic may fire
    pub rate_min_sample: usize,
    /// Success-rate ceiling; above this is implausible given the
    /// configured drop rates
    pub success_rate_ceiling: f64,
    /// Trailing window for the displacement heuristic
    pub displacement_window_ms: i64,
    /// Max plausible average movement speed (world units / second)
    pub max_speed_units_per_sec: f64,
}

impl Default for FraudThresholds {
    fn default() -> Self {
        Self {
            burst_max_attempts: 10,
            burst_window_ms: 60_000,
            rate_sample_size: 20,
            rate_min_sample: 10,
            success_rate_ceiling: 0.90,
            displacement_window_ms: 30_000,
            max_speed_units_per_sec: 40.0,
        }
    }
}

/// Evaluate fraud heuristics for a freshly recorded attempt
///
/// `recent` is the identity's prior history, newest-first, excluding
/// `new_attempt` itself. All windows are computed relative to the new
/// attempt's timestamp, never the wall clock, so an identical input
/// sequence always yields an identical flag set. Flags are
/// independent; any combination may fire.
pub fn evaluate_suspicion(
    thresholds: &FraudThresholds,
    new_attempt: &MiningAttempt,
    recent: &[MiningAttempt],
) -> Vec<SuspicionFlag> {
    let mut flags = Vec::new();
    let now_ms = new_attempt.created_at_ms;

    // Rapid succession: burst of attempts, any outcome
    let burst_floor = now_ms - thresholds.burst_window_ms;
    let burst_count = 1 + recent
        .iter()
        .filter(|a| a.created_at_ms >= burst_floor)
        .count() as u32;
    if burst_count > thresholds.burst_max_attempts {
        flags.push(SuspicionFlag::RapidSuccession);
    }

    // Implausible success rate over the last N attempts
    let sample: Vec<&MiningAttempt> = std::iter::once(new_attempt)
        .chain(recent.iter())
        .take(thresholds.rate_sample_size)
        .collect();
    if sample.len() >= thresholds.rate_min_sample {
        let successes = sample.iter().filter(|a| a.success).count();
        let rate = successes as f64 / sample.len() as f64;
        if rate > thresholds.success_rate_ceiling {
            flags.push(SuspicionFlag::ImplausibleSuccessRate);
        }
    }

    // Impossible displacement between consecutive attempts
    let window_floor = now_ms - thresholds.displacement_window_ms;
    let in_window: Vec<&MiningAttempt> = std::iter::once(new_attempt)
        .chain(recent.iter())
        .take_while(|a| a.created_at_ms >= window_floor)
        .collect();
    if in_window.len() >= 2 {
        let mut speed_sum = 0.0;
        let mut pairs = 0u32;
        for pair in in_window.windows(2) {
            let (later, earlier) = (pair[0], pair[1]);
            let dt_ms = (later.created_at_ms - earlier.created_at_ms).max(1);
            let dist = later
                .claimed_position
                .distance_to(&earlier.claimed_position);
            speed_sum += dist / (dt_ms as f64 / 1000.0);
            pairs += 1;
        }
        let avg_speed = speed_sum / pairs as f64;
        if avg_speed > thresholds.max_speed_units_per_sec {
            flags.push(SuspicionFlag::ImpossibleDisplacement);
        }
    }

    flags
}

/// Two or more simultaneous flags escalate to manual review
pub fn needs_manual_review(flags: &[SuspicionFlag]) -> bool {
    flags.len() >= 2
}
