//! Priority-tiered greedy allocation.
//!
//! Candidates are grouped by priority (lower value served first). Within a
//! tier, locked candidates are dropped, the rest are sorted by rated power
//! descending and admitted greedily while they fit the remaining budget.
//! Candidates skipped in a tier are not reconsidered later; each admitted
//! tier's total is subtracted before the next tier runs. This is a
//! deterministic greedy approximation of per-tier 0/1 knapsack, documented
//! as the contract rather than an optimum.

use std::cmp::Reverse;

use itertools::Itertools;
use ordered_float::OrderedFloat;
use tracing::debug;

use super::CandidateSnapshot;

/// Which locks the allocation pass respects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockPolicy {
    /// Real pass: every lock is an absolute override.
    RespectAll,
    /// Simulation pass: only timing locks apply, since no actuator is ever
    /// touched.
    TimingOnly,
}

/// Compute the ideal-on set for a budget. Returns admitted load names in
/// admission order (tier by tier, descending power within a tier; ties keep
/// configuration order).
pub fn plan_ideal_on(
    candidates: &[CandidateSnapshot],
    budget_w: f64,
    policy: LockPolicy,
) -> Vec<String> {
    let mut remaining = budget_w;
    let mut admitted = Vec::new();

    let tiers = candidates
        .iter()
        .into_group_map_by(|c| c.priority)
        .into_iter()
        .sorted_by_key(|(priority, _)| *priority);

    for (priority, tier) in tiers {
        let selected = select_within_tier(&tier, remaining, policy);
        let tier_total: f64 = selected.iter().map(|c| c.rated_power_w).sum();
        debug!(
            priority,
            tier_budget_w = remaining,
            admitted = selected.len(),
            tier_total_w = tier_total,
            "allocated priority tier"
        );
        remaining -= tier_total;
        admitted.extend(selected.into_iter().map(|c| c.name.clone()));
    }

    admitted
}

fn select_within_tier<'a>(
    tier: &[&'a CandidateSnapshot],
    budget_w: f64,
    policy: LockPolicy,
) -> Vec<&'a CandidateSnapshot> {
    let mut open: Vec<&CandidateSnapshot> = tier
        .iter()
        .copied()
        .filter(|c| !c.locked_under(policy))
        .collect();
    // Stable sort: equal powers keep configuration order.
    open.sort_by_key(|c| Reverse(OrderedFloat(c.rated_power_w)));

    let mut remaining = budget_w;
    let mut selected = Vec::new();
    for candidate in open {
        if candidate.rated_power_w <= remaining {
            remaining -= candidate.rated_power_w;
            selected.push(candidate);
        }
    }
    selected
}
