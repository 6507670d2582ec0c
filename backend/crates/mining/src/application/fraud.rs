//! Fraud Annotation Hook
//!
//! Runs after an attempt commits: queries the identity's recent
//! history, evaluates the heuristics, and attaches any flags to the
//! just-written row. Errors are logged and swallowed — annotation must
//! never fail an attempt that has already been decided.

use std::sync::Arc;

use crate::domain::entities::MiningAttempt;
use crate::domain::repository::AttemptLedgerRepository;
use crate::domain::services::{FraudThresholds, evaluate_suspicion, needs_manual_review};

/// History horizon for the fraud query; generous enough to cover every
/// heuristic window and the success-rate sample
const FRAUD_LOOKBACK_MS: i64 = 3_600_000;

/// Spawn the annotation task (post-commit, off the latency path)
pub fn spawn_annotation<L>(ledger: Arc<L>, thresholds: FraudThresholds, attempt: MiningAttempt)
where
    L: AttemptLedgerRepository + Send + Sync + 'static,
{
    tokio::spawn(annotate_suspicion(ledger, thresholds, attempt));
}

/// Evaluate heuristics for a committed attempt and annotate its row
pub async fn annotate_suspicion<L>(
    ledger: Arc<L>,
    thresholds: FraudThresholds,
    attempt: MiningAttempt,
) where
    L: AttemptLedgerRepository + Send + Sync,
{
    let since_ms = attempt.created_at_ms - FRAUD_LOOKBACK_MS;
    let limit = thresholds.rate_sample_size as i64 + 1;

    let recent = match ledger
        .recent_for_identity(attempt.identity_id, since_ms, limit)
        .await
    {
        Ok(recent) => recent,
        Err(e) => {
            tracing::warn!(
                error = %e,
                attempt_id = %attempt.id,
                "Fraud history query failed; attempt left unannotated"
            );
            return;
        }
    };

    // The committed attempt is part of the query result; the heuristics
    // want it separated from the prior history
    let prior: Vec<MiningAttempt> = recent.into_iter().filter(|a| a.id != attempt.id).collect();

    let flags = evaluate_suspicion(&thresholds, &attempt, &prior);
    if flags.is_empty() {
        return;
    }

    let review = needs_manual_review(&flags);
    let codes: Vec<&'static str> = flags.iter().map(|f| f.code()).collect();
    tracing::warn!(
        attempt_id = %attempt.id,
        identity_id = %attempt.identity_id,
        flags = ?codes,
        needs_review = review,
        "Suspicious mining attempt"
    );

    if let Err(e) = ledger.annotate_review(attempt.id, &flags, review).await {
        tracing::warn!(
            error = %e,
            attempt_id = %attempt.id,
            "Failed to annotate fraud review"
        );
    }
}
