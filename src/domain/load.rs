use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

/// Load control flavor. The wiring for each kind lives in
/// [`crate::domain::LoadAdapter`]; this label is kept on the config for
/// diagnostics and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "snake_case")]
pub enum LoadKind {
    OnOff,
    MultiSetpoint,
}

/// What the scheduler last commanded for a load. `Unknown` means the load
/// was never commanded, or the target was explicitly reset; the scheduler is
/// then free to take control without tripping the manual-override lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum TargetState {
    On,
    Off,
    Unknown,
}

impl TargetState {
    pub fn from_on(on: bool) -> Self {
        if on {
            TargetState::On
        } else {
            TargetState::Off
        }
    }

    /// Commanded on/off, if known.
    pub fn known(self) -> Option<bool> {
        match self {
            TargetState::On => Some(true),
            TargetState::Off => Some(false),
            TargetState::Unknown => None,
        }
    }
}

/// Per-load configuration, immutable within a cycle. Edited between cycles
/// by configuration management, which is out of scope here.
#[derive(Debug, Clone)]
pub struct LoadConfig {
    /// Unique key for the load within its scope.
    pub name: String,
    pub kind: LoadKind,
    /// Nameplate power draw used for allocation, in watts.
    pub rated_power_w: f64,
    /// Lower value = served first.
    pub priority: u32,
    pub min_on: chrono::Duration,
    pub min_off: chrono::Duration,
    /// Candidate for the real allocation pass.
    pub optimization_enabled: bool,
    /// Candidate for the what-if simulation pass.
    pub simulation_active: bool,
    /// Measured power above this counts as "on" for OnOff loads with a
    /// measured-power source.
    pub power_on_threshold_w: f64,
}

/// Actuator/sensor reading for one load, taken during aggregation.
///
/// For MultiSetpoint loads "on" and "off" are each a strict match of all
/// setpoints, so a load can be neither (indeterminate).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReading {
    pub is_on: bool,
    pub is_off: bool,
}

impl LoadReading {
    pub fn is_indeterminate(&self) -> bool {
        !self.is_on && !self.is_off
    }
}

/// Mutable per-load state, updated every cycle.
#[derive(Debug, Clone, Serialize)]
pub struct LoadRuntimeState {
    pub is_on: bool,
    pub is_off: bool,
    /// False when the underlying actuator/sensor could not be read this
    /// cycle; the load is then excluded from allocation.
    pub available: bool,
    pub measured_power_w: f64,
    pub measured_power_avg_w: f64,
    pub last_target: TargetState,
    /// Timestamp of the last scheduler-initiated transition. Unset means
    /// the load state predates scheduler control, so no timing lock applies.
    pub last_switch_time: Option<DateTime<Utc>>,
    pub is_locked_timing: bool,
    pub is_locked_manual: bool,
    pub is_fault_locked: bool,
    pub fault_locked_at: Option<DateTime<Utc>>,
    pub lock_reason: String,
}

impl Default for LoadRuntimeState {
    fn default() -> Self {
        Self {
            is_on: false,
            is_off: true,
            available: true,
            measured_power_w: 0.0,
            measured_power_avg_w: 0.0,
            last_target: TargetState::Unknown,
            last_switch_time: None,
            is_locked_timing: false,
            is_locked_manual: false,
            is_fault_locked: false,
            fault_locked_at: None,
            lock_reason: String::new(),
        }
    }
}

impl LoadRuntimeState {
    pub fn is_locked(&self) -> bool {
        self.is_locked_timing || self.is_locked_manual || self.is_fault_locked
    }

    pub fn is_indeterminate(&self) -> bool {
        !self.is_on && !self.is_off
    }

    pub fn persisted(&self) -> PersistedLoadState {
        PersistedLoadState {
            last_target: self.last_target,
            last_switch_time: self.last_switch_time,
            is_fault_locked: self.is_fault_locked,
            fault_locked_at: self.fault_locked_at,
        }
    }

    pub fn restore(&mut self, record: PersistedLoadState) {
        self.last_target = record.last_target;
        self.last_switch_time = record.last_switch_time;
        self.is_fault_locked = record.is_fault_locked;
        self.fault_locked_at = record.fault_locked_at;
    }
}

/// The slice of runtime state that survives a process restart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersistedLoadState {
    pub last_target: TargetState,
    pub last_switch_time: Option<DateTime<Utc>>,
    pub is_fault_locked: bool,
    #[serde(default)]
    pub fault_locked_at: Option<DateTime<Utc>>,
}
