//! The cycle orchestrator. Each cycle runs the same fixed phase order:
//! aggregate load state, budget and allocate for the real pass, synchronize
//! actuators, budget and allocate for the simulation pass (no side
//! effects), then publish the cycle snapshot.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use super::{
    plan_ideal_on, power_budget, CandidateSnapshot, LockEvaluator, LockInputs, LockPolicy,
    ManagedLoad, SchedulerSettings, Synchronizer,
};
use crate::domain::{CycleResult, SignalSource, TargetState};
use crate::repo::StateStore;
use crate::signal::{SignalAverager, SurplusReader};
use crate::utils::Clock;

pub struct Scheduler {
    settings: SchedulerSettings,
    loads: Vec<Arc<ManagedLoad>>,
    surplus: SurplusReader,
    power_averager: SignalAverager,
    locks: LockEvaluator,
    synchronizer: Synchronizer,
    clock: Arc<dyn Clock>,
    store: Arc<dyn StateStore>,
    refresh: Notify,
    sim_offset_w: SyncMutex<f64>,
    results_tx: watch::Sender<Option<CycleResult>>,
}

impl Scheduler {
    pub async fn new(
        settings: SchedulerSettings,
        loads: Vec<Arc<ManagedLoad>>,
        surplus_source: Arc<dyn SignalSource>,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>> {
        for load in &loads {
            load.restore_from(store.as_ref()).await?;
        }

        let (results_tx, _) = watch::channel(None);
        Ok(Arc::new(Self {
            surplus: SurplusReader::new(
                surplus_source,
                settings.invert_surplus,
                settings.surplus_window,
            ),
            power_averager: SignalAverager::new(settings.surplus_window),
            locks: LockEvaluator::new(settings.fault_cooldown),
            synchronizer: Synchronizer::new(
                clock.clone(),
                store.clone(),
                settings.verify_delay,
                settings.actuator_timeout,
            ),
            settings,
            loads,
            clock,
            store,
            refresh: Notify::new(),
            sim_offset_w: SyncMutex::new(0.0),
            results_tx,
        }))
    }

    pub fn handle(self: &Arc<Self>) -> SchedulerHandle {
        SchedulerHandle {
            inner: self.clone(),
        }
    }

    /// Serialized orchestration loop: one cycle per interval tick or
    /// coalesced refresh request. Requests arriving while a cycle runs
    /// collapse into a single pending cycle.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.settings.cycle);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.refresh.notified() => {
                    debug!("refresh requested, running cycle early");
                }
            }
            if let Err(e) = self.run_cycle().await {
                warn!(error = %e, "scheduler cycle failed");
            }
        }
    }

    /// One full cycle. Public so tests and callers can drive cycles
    /// directly.
    pub async fn run_cycle(&self) -> Result<CycleResult> {
        let now = self.clock.now();

        // Aggregating: read every load, compute power averages, evaluate
        // locks. An unreadable load is excluded from this cycle only.
        let snapshots = self.aggregate(now).await;

        let surplus_avg = self.surplus.averaged(now).await;
        let surplus_current = self.surplus.current().await;
        if surplus_avg.degraded {
            warn!("surplus signal unavailable, budgeting against degraded zero");
        }

        // Real pass: budget, allocate, synchronize.
        let real: Vec<CandidateSnapshot> = snapshots
            .iter()
            .filter(|c| c.optimization_enabled)
            .cloned()
            .collect();
        let real_budget = power_budget(surplus_avg.value, 0.0, &real);
        let real_ideal = plan_ideal_on(&real, real_budget, LockPolicy::RespectAll);

        self.synchronizer.enforce_disabled(&self.loads).await;
        self.synchronizer
            .synchronize(&self.loads, &real, &real_ideal)
            .await;

        // Simulation pass: same allocation logic, offset budget, manual and
        // fault locks ignored, and never any actuator commands.
        let sim_offset = *self.sim_offset_w.lock();
        let sim: Vec<CandidateSnapshot> = snapshots
            .iter()
            .filter(|c| c.simulation_active)
            .cloned()
            .collect();
        let sim_budget = power_budget(surplus_avg.value, sim_offset, &sim);
        let sim_ideal = plan_ideal_on(&sim, sim_budget, LockPolicy::TimingOnly);

        let result = CycleResult {
            at: now,
            surplus_current_w: surplus_current.value,
            surplus_avg_w: surplus_avg.value,
            surplus_degraded: surplus_avg.degraded,
            real_budget_w: real_budget,
            real_ideal_on: real_ideal,
            sim_budget_w: sim_budget,
            sim_ideal_on: sim_ideal,
            sim_offset_w: sim_offset,
            power_measured_total_w: snapshots
                .iter()
                .filter(|c| c.is_on)
                .map(|c| c.measured_power_w)
                .sum(),
            power_rated_total_w: snapshots
                .iter()
                .filter(|c| c.is_on)
                .map(|c| c.rated_power_w)
                .sum(),
        };

        info!(
            surplus_avg_w = result.surplus_avg_w,
            real_budget_w = result.real_budget_w,
            real_ideal = ?result.real_ideal_on,
            sim_budget_w = result.sim_budget_w,
            sim_ideal = ?result.sim_ideal_on,
            "cycle complete"
        );

        self.results_tx.send_replace(Some(result.clone()));
        Ok(result)
    }

    async fn aggregate(&self, now: DateTime<Utc>) -> Vec<CandidateSnapshot> {
        let mut snapshots = Vec::with_capacity(self.loads.len());

        for load in &self.loads {
            let config = load.config.read().await.clone();

            let reading = match load.adapter.read_state().await {
                Ok(reading) => reading,
                Err(e) => {
                    warn!(load = %load.name, error = %e, "load unavailable, excluded this cycle");
                    let mut state = load.state.lock().await;
                    state.available = false;
                    continue;
                }
            };

            // Measured power, instant and windowed; rated power stands in
            // when no measured source is configured.
            let (measured, measured_avg) = match &load.power_source {
                Some(source) => {
                    let instant = SignalAverager::instant(source.as_ref()).await;
                    let avg = self.power_averager.average(source.as_ref(), now).await;
                    (instant.value, avg.value)
                }
                None => (config.rated_power_w, config.rated_power_w),
            };

            let details = if reading.is_indeterminate() {
                Some(load.adapter.state_details().await)
            } else {
                None
            };

            let mut state = load.state.lock().await;
            let locks = self.locks.evaluate(
                now,
                &LockInputs {
                    config: &config,
                    reading,
                    last_target: state.last_target,
                    last_switch_time: state.last_switch_time,
                    is_fault_locked: state.is_fault_locked,
                    fault_locked_at: state.fault_locked_at,
                    state_details: details,
                },
            );

            if locks.fault_expired {
                info!(load = %load.name, "fault lock cool-down elapsed, clearing");
                state.is_fault_locked = false;
                state.fault_locked_at = None;
                let record = state.persisted();
                if let Err(e) = self.store.save(&load.name, &record).await {
                    warn!(load = %load.name, error = %e, "failed to persist cleared fault lock");
                }
            }

            state.available = true;
            state.is_on = reading.is_on;
            state.is_off = reading.is_off;
            state.measured_power_w = measured;
            state.measured_power_avg_w = measured_avg;
            state.is_locked_timing = locks.timing;
            state.is_locked_manual = locks.manual;
            state.lock_reason = locks.reason;

            snapshots.push(CandidateSnapshot {
                name: load.name.clone(),
                rated_power_w: config.rated_power_w,
                priority: config.priority,
                is_on: reading.is_on,
                power_avg_w: measured_avg,
                measured_power_w: measured,
                is_locked_timing: state.is_locked_timing,
                is_locked_manual: state.is_locked_manual,
                is_fault_locked: state.is_fault_locked,
                optimization_enabled: config.optimization_enabled,
                simulation_active: config.simulation_active,
            });
        }

        snapshots
    }

    fn find_load(&self, name: &str) -> Result<&Arc<ManagedLoad>> {
        self.loads
            .iter()
            .find(|l| l.name == name)
            .ok_or_else(|| anyhow!("unknown load '{name}'"))
    }
}

/// Cloneable facade for presentation and operator collaborators: read-only
/// access to cycle results and load state, plus the two mutation
/// operations and event-driven refresh.
#[derive(Clone)]
pub struct SchedulerHandle {
    inner: Arc<Scheduler>,
}

impl SchedulerHandle {
    pub fn subscribe(&self) -> watch::Receiver<Option<CycleResult>> {
        self.inner.results_tx.subscribe()
    }

    pub async fn load_states(&self) -> Vec<(String, crate::domain::LoadRuntimeState)> {
        let mut states = Vec::with_capacity(self.inner.loads.len());
        for load in &self.inner.loads {
            states.push((load.name.clone(), load.state.lock().await.clone()));
        }
        states
    }

    /// Wake the scheduler for an immediate cycle (surplus changes, actuator
    /// changes, operator actions). Concurrent requests coalesce.
    pub fn request_refresh(&self) {
        self.inner.refresh.notify_one();
    }

    pub fn set_simulation_offset(&self, offset_w: f64) {
        *self.inner.sim_offset_w.lock() = offset_w;
        info!(offset_w, "simulation surplus offset updated");
        self.request_refresh();
    }

    /// Clear a load's fault lock. An indeterminate load is additionally
    /// commanded to its deactivated state to resolve the ambiguity;
    /// otherwise the last target is reset to unknown so the scheduler can
    /// take control again on the next cycle.
    pub async fn reset_load_lock(&self, name: &str) -> Result<()> {
        let load = self.inner.find_load(name)?;

        {
            let mut state = load.state.lock().await;
            state.is_fault_locked = false;
            state.fault_locked_at = None;
        }

        let indeterminate = load
            .adapter
            .read_state()
            .await
            .map(|r| r.is_indeterminate())
            .unwrap_or(false);

        if indeterminate {
            info!(load = %name, "resetting indeterminate load to deactivated state");
            self.inner.synchronizer.command(load, false).await;
        } else {
            let record = {
                let mut state = load.state.lock().await;
                state.last_target = TargetState::Unknown;
                state.persisted()
            };
            self.inner.store.save(&load.name, &record).await?;
            info!(load = %name, "reset load lock");
        }

        self.request_refresh();
        Ok(())
    }

    /// Flip a load's optimization flag. Disabling a running,
    /// scheduler-commanded, unlocked load deactivates it immediately.
    pub async fn set_optimization_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let load = self.inner.find_load(name)?;
        {
            let mut config = load.config.write().await;
            config.optimization_enabled = enabled;
        }
        info!(load = %name, enabled, "optimization flag updated");

        if !enabled {
            self.inner
                .synchronizer
                .enforce_disabled(std::slice::from_ref(load))
                .await;
        }
        self.request_refresh();
        Ok(())
    }
}
