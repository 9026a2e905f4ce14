pub mod allocator;
pub mod budget;
pub mod locks;
pub mod scheduler;
pub mod sync;

pub use allocator::{plan_ideal_on, LockPolicy};
pub use budget::power_budget;
pub use locks::{LockEvaluator, LockInputs, LockState};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use sync::Synchronizer;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::config::Config;
use crate::domain::{LoadAdapter, LoadConfig, LoadRuntimeState, SignalSource};
use crate::repo::StateStore;

/// Scheduler tuning derived from the config layer.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub cycle: Duration,
    pub verify_delay: Duration,
    pub actuator_timeout: Duration,
    pub fault_cooldown: Option<chrono::Duration>,
    pub surplus_window: chrono::Duration,
    pub invert_surplus: bool,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cycle: Duration::from_secs(config.scheduler.cycle_seconds.max(1)),
            verify_delay: Duration::from_secs(config.scheduler.verify_delay_seconds),
            actuator_timeout: Duration::from_secs(config.scheduler.actuator_timeout_seconds.max(1)),
            fault_cooldown: config
                .scheduler
                .fault_cooldown_minutes
                .map(|m| chrono::Duration::minutes(m as i64)),
            surplus_window: chrono::Duration::minutes(config.surplus.window_minutes as i64),
            invert_surplus: config.surplus.invert,
        }
    }
}

/// A load under scheduler control: its configuration, actuator facade,
/// optional measured-power source, and mutable runtime state.
///
/// The state mutex is the single-writer point shared by the cycle's
/// aggregation phase and the delayed verification tasks.
pub struct ManagedLoad {
    pub name: String,
    pub config: RwLock<LoadConfig>,
    pub adapter: LoadAdapter,
    pub power_source: Option<Arc<dyn SignalSource>>,
    pub state: Mutex<LoadRuntimeState>,
}

impl ManagedLoad {
    pub fn new(
        config: LoadConfig,
        adapter: LoadAdapter,
        power_source: Option<Arc<dyn SignalSource>>,
    ) -> Self {
        Self {
            name: config.name.clone(),
            config: RwLock::new(config),
            adapter,
            power_source,
            state: Mutex::new(LoadRuntimeState::default()),
        }
    }

    /// Restore the persisted slice of runtime state, if a record exists.
    pub async fn restore_from(&self, store: &dyn StateStore) -> Result<()> {
        if let Some(record) = store.load(&self.name).await? {
            let mut state = self.state.lock().await;
            state.restore(record);
            info!(
                load = %self.name,
                last_target = %record.last_target,
                fault_locked = record.is_fault_locked,
                "restored persisted load state"
            );
        }
        Ok(())
    }
}

/// Per-load snapshot taken during aggregation and consumed by the budget,
/// allocation and synchronization phases of the same cycle.
#[derive(Debug, Clone)]
pub struct CandidateSnapshot {
    pub name: String,
    pub rated_power_w: f64,
    pub priority: u32,
    pub is_on: bool,
    /// Windowed measured power, falling back to rated power when the load
    /// has no measured-power source.
    pub power_avg_w: f64,
    pub measured_power_w: f64,
    pub is_locked_timing: bool,
    pub is_locked_manual: bool,
    pub is_fault_locked: bool,
    pub optimization_enabled: bool,
    pub simulation_active: bool,
}

impl CandidateSnapshot {
    pub fn is_locked(&self) -> bool {
        self.is_locked_timing || self.is_locked_manual || self.is_fault_locked
    }

    pub fn locked_under(&self, policy: LockPolicy) -> bool {
        match policy {
            LockPolicy::RespectAll => self.is_locked(),
            // Simulation never touches real actuators, so it does not defer
            // to manual overrides or fault locks.
            LockPolicy::TimingOnly => self.is_locked_timing,
        }
    }
}
