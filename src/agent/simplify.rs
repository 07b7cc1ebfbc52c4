//! Failure recovery: progressive query simplification.
//!
//! Pure function of the failed plan; steps are strictly ordered and each
//! applies at most once, so a failing plan reaches `FallBack` within three
//! invocations: (1) drop aggregation, (2) truncate traversals to one hop,
//! (3) abandon structured querying.

use crate::generator::QueryPlanCandidate;

#[derive(Debug)]
pub enum Simplification {
    /// A strictly simpler plan to retry.
    Simplified(QueryPlanCandidate),
    /// Abandon structured querying; the agent falls back to vector or
    /// hybrid search.
    FallBack,
}

/// Produce the next simplification step for a failed plan.
pub fn simplify(failed: &QueryPlanCandidate, reason: &str) -> Simplification {
    let mut plan = failed.plan.clone();

    if plan.aggregate.is_some() {
        log::info!(
            "Simplifying failed plan (dropping aggregation) after: {}",
            reason
        );
        plan.aggregate = None;
        return Simplification::Simplified(QueryPlanCandidate::new(failed.question.clone(), plan));
    }

    if plan.traversals.len() > 1 {
        log::info!(
            "Simplifying failed plan (truncating to single hop) after: {}",
            reason
        );
        plan.traversals.truncate(1);
        return Simplification::Simplified(QueryPlanCandidate::new(failed.question.clone(), plan));
    }

    log::info!("Abandoning structured query after: {}", reason);
    Simplification::FallBack
}
