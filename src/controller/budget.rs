//! Power-budget computation: averaged surplus plus the power already drawn
//! by loads the scheduler is free to shed.

use tracing::debug;

use super::CandidateSnapshot;

/// budget = surplus (+ offset in simulation) + power of candidates that are
/// currently on and unlocked. Power drawn by a locked load cannot be
/// reclaimed this cycle, so it does not count toward the budget.
pub fn power_budget(surplus_avg_w: f64, offset_w: f64, candidates: &[CandidateSnapshot]) -> f64 {
    let reclaimable: f64 = candidates
        .iter()
        .filter(|c| c.is_on && !c.is_locked())
        .map(|c| c.power_avg_w)
        .sum();

    let budget = surplus_avg_w + offset_w + reclaimable;
    debug!(
        surplus_w = surplus_avg_w,
        offset_w,
        reclaimable_w = reclaimable,
        budget_w = budget,
        "computed power budget"
    );
    budget
}
