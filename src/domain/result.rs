use chrono::{DateTime, Utc};
use serde::Serialize;

/// Immutable snapshot of one scheduler cycle, published for presentation
/// collaborators after every run.
#[derive(Debug, Clone, Serialize)]
pub struct CycleResult {
    pub at: DateTime<Utc>,
    /// Instantaneous surplus, oriented positive-when-surplus.
    pub surplus_current_w: f64,
    /// Sliding-window average of the surplus signal.
    pub surplus_avg_w: f64,
    /// True when the surplus signal could not be read and the budget fell
    /// back to a degraded value.
    pub surplus_degraded: bool,
    pub real_budget_w: f64,
    /// Admission order of the real allocation pass.
    pub real_ideal_on: Vec<String>,
    pub sim_budget_w: f64,
    pub sim_ideal_on: Vec<String>,
    pub sim_offset_w: f64,
    /// Measured power summed over loads that are currently on.
    pub power_measured_total_w: f64,
    /// Rated power summed over loads that are currently on.
    pub power_rated_total_w: f64,
}
