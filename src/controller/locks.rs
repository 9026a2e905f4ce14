//! Per-load lock evaluation: timing locks from minimum dwell times, manual
//! locks from override detection, and the sticky fault lock set by failed
//! command verification.

use chrono::{DateTime, Utc};

use crate::domain::{LoadConfig, LoadReading, TargetState};

/// Everything the evaluator needs to know about one load this cycle.
pub struct LockInputs<'a> {
    pub config: &'a LoadConfig,
    pub reading: LoadReading,
    pub last_target: TargetState,
    pub last_switch_time: Option<DateTime<Utc>>,
    pub is_fault_locked: bool,
    pub fault_locked_at: Option<DateTime<Utc>>,
    /// Diagnostic from the adapter, used as the manual-lock reason when the
    /// load is indeterminate.
    pub state_details: Option<String>,
}

/// The three independent lock flags plus a single human-readable reason.
/// When several locks apply the reason follows fault > manual > timing.
#[derive(Debug, Clone, Default)]
pub struct LockState {
    pub timing: bool,
    pub manual: bool,
    pub fault: bool,
    /// Set when a sticky fault lock has outlived the configured cool-down;
    /// the caller clears the persistent flag and retries on a later cycle.
    pub fault_expired: bool,
    pub reason: String,
}

impl LockState {
    pub fn any(&self) -> bool {
        self.timing || self.manual || self.fault
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LockEvaluator {
    pub fault_cooldown: Option<chrono::Duration>,
}

impl LockEvaluator {
    pub fn new(fault_cooldown: Option<chrono::Duration>) -> Self {
        Self { fault_cooldown }
    }

    pub fn evaluate(&self, now: DateTime<Utc>, inputs: &LockInputs<'_>) -> LockState {
        let mut state = LockState::default();

        let timing_reason = self.evaluate_timing(now, inputs, &mut state);
        let manual_reason = Self::evaluate_manual(inputs, &mut state);
        let fault_reason = self.evaluate_fault(now, inputs, &mut state);

        state.reason = fault_reason
            .or(manual_reason)
            .or(timing_reason)
            .unwrap_or_default();
        state
    }

    fn evaluate_timing(
        &self,
        now: DateTime<Utc>,
        inputs: &LockInputs<'_>,
        state: &mut LockState,
    ) -> Option<String> {
        // No recorded scheduler switch: the load state predates scheduler
        // control and no dwell constraint applies.
        let last_switch = inputs.last_switch_time?;
        let elapsed = now - last_switch;

        if inputs.reading.is_on {
            let min_on = inputs.config.min_on;
            if min_on > chrono::Duration::zero() && elapsed < min_on {
                state.timing = true;
                let remaining = (min_on - elapsed).num_seconds() as f64 / 60.0;
                return Some(format!("Minimum on time: {remaining:.1} min remaining"));
            }
        } else {
            let min_off = inputs.config.min_off;
            if min_off > chrono::Duration::zero() && elapsed < min_off {
                state.timing = true;
                let remaining = (min_off - elapsed).num_seconds() as f64 / 60.0;
                return Some(format!("Minimum off time: {remaining:.1} min remaining"));
            }
        }
        None
    }

    fn evaluate_manual(inputs: &LockInputs<'_>, state: &mut LockState) -> Option<String> {
        if inputs.reading.is_indeterminate() {
            state.manual = true;
            return Some(
                inputs
                    .state_details
                    .clone()
                    .unwrap_or_else(|| "Manual override - load state manually changed".into()),
            );
        }

        // A known last target disagreeing with the actual reading means a
        // human (or another automation) intervened. Unknown target means the
        // scheduler is free to take control.
        if let Some(expected_on) = inputs.last_target.known() {
            if expected_on != inputs.reading.is_on {
                state.manual = true;
                let expected = TargetState::from_on(expected_on);
                let actual = TargetState::from_on(inputs.reading.is_on);
                return Some(format!(
                    "Manual override - expected {expected}, actual {actual}"
                ));
            }
        }
        None
    }

    fn evaluate_fault(
        &self,
        now: DateTime<Utc>,
        inputs: &LockInputs<'_>,
        state: &mut LockState,
    ) -> Option<String> {
        if !inputs.is_fault_locked {
            return None;
        }

        if let (Some(cooldown), Some(since)) = (self.fault_cooldown, inputs.fault_locked_at) {
            if now - since >= cooldown {
                state.fault_expired = true;
                return None;
            }
        }

        state.fault = true;
        Some("Fault lock - last command failed verification".into())
    }
}
