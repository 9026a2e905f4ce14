//! End-to-end cycles against simulated hardware: allocation, locking,
//! synchronization, verification and the simulation pass.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use pv_surplus_scheduler::controller::{ManagedLoad, Scheduler, SchedulerSettings};
use pv_surplus_scheduler::domain::{
    LoadAdapter, LoadConfig, LoadKind, MultiSetpointLoad, NumericActuator, OnOffLoad,
    SetpointTarget, SignalSource, TargetState,
};
use pv_surplus_scheduler::hardware::{SimulatedSetpoint, SimulatedSignal, SimulatedSwitch};
use pv_surplus_scheduler::repo::{MemoryStateStore, StateStore};
use pv_surplus_scheduler::utils::{Clock, ManualClock};

fn settings() -> SchedulerSettings {
    SchedulerSettings {
        cycle: Duration::from_secs(60),
        verify_delay: Duration::from_secs(3),
        actuator_timeout: Duration::from_secs(5),
        fault_cooldown: None,
        surplus_window: chrono::Duration::minutes(5),
        invert_surplus: false,
    }
}

fn switch_config(name: &str, power: f64, priority: u32, min_on: i64, min_off: i64) -> LoadConfig {
    LoadConfig {
        name: name.into(),
        kind: LoadKind::OnOff,
        rated_power_w: power,
        priority,
        min_on: chrono::Duration::minutes(min_on),
        min_off: chrono::Duration::minutes(min_off),
        optimization_enabled: true,
        simulation_active: false,
        power_on_threshold_w: 100.0,
    }
}

fn switch_load(config: LoadConfig) -> (Arc<ManagedLoad>, Arc<SimulatedSwitch>) {
    let switch = Arc::new(SimulatedSwitch::new(false));
    let load = Arc::new(ManagedLoad::new(
        config,
        LoadAdapter::OnOff(OnOffLoad::new(switch.clone(), false, None, 100.0)),
        None,
    ));
    (load, switch)
}

struct Rig {
    scheduler: Arc<Scheduler>,
    surplus: Arc<SimulatedSignal>,
    clock: Arc<ManualClock>,
    store: Arc<MemoryStateStore>,
}

impl Rig {
    async fn new(loads: Vec<Arc<ManagedLoad>>) -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ));
        let surplus = Arc::new(SimulatedSignal::new());
        let store = Arc::new(MemoryStateStore::new());
        let scheduler = Scheduler::new(
            settings(),
            loads,
            surplus.clone() as Arc<dyn SignalSource>,
            store.clone(),
            clock.clone(),
        )
        .await
        .unwrap();
        Self {
            scheduler,
            surplus,
            clock,
            store,
        }
    }

    /// Push a raw meter reading; raw negative means surplus.
    fn set_surplus(&self, oriented_watts: f64) {
        self.surplus.push(self.clock.now(), -oriented_watts);
    }
}

#[tokio::test(start_paused = true)]
async fn allocates_by_priority_within_budget() {
    let (boiler, boiler_switch) = switch_load(switch_config("boiler", 2000.0, 1, 0, 0));
    let (pump, pump_switch) = switch_load(switch_config("pump", 750.0, 3, 0, 0));
    let rig = Rig::new(vec![boiler.clone(), pump]).await;
    rig.set_surplus(2500.0);

    let result = rig.scheduler.run_cycle().await.unwrap();

    // 2500 W budget: the priority-1 boiler is admitted first (2000 W), the
    // remaining 500 W cannot fit the pump.
    assert_eq!(result.real_ideal_on, vec!["boiler"]);
    assert_eq!(result.real_budget_w, 2500.0);
    assert!(boiler_switch.is_on());
    assert!(!pump_switch.is_on());
    assert_eq!(boiler.state.lock().await.last_target, TargetState::On);
}

#[tokio::test(start_paused = true)]
async fn running_load_is_shed_when_surplus_collapses() {
    let (boiler, switch) = switch_load(switch_config("boiler", 2000.0, 1, 0, 0));
    let rig = Rig::new(vec![boiler.clone()]).await;

    rig.set_surplus(2500.0);
    rig.scheduler.run_cycle().await.unwrap();
    assert!(switch.is_on());
    tokio::time::sleep(Duration::from_secs(4)).await;

    // Next cycle: the averaged surplus has gone negative; the running load
    // still extends the budget by its own draw (rated fallback), but
    // 2000 - 2100 < 2000 so it is shed.
    rig.clock.advance(chrono::Duration::minutes(6));
    rig.set_surplus(-2100.0);
    let result = rig.scheduler.run_cycle().await.unwrap();

    assert!(result.real_ideal_on.is_empty());
    assert!(!switch.is_on());
    assert_eq!(boiler.state.lock().await.last_target, TargetState::Off);
}

#[tokio::test(start_paused = true)]
async fn min_on_time_defers_shedding_until_expiry() {
    let (boiler, switch) = switch_load(switch_config("boiler", 2000.0, 1, 10, 0));
    let rig = Rig::new(vec![boiler.clone()]).await;

    rig.set_surplus(2500.0);
    rig.scheduler.run_cycle().await.unwrap();
    assert!(switch.is_on());
    tokio::time::sleep(Duration::from_secs(4)).await;

    // Five minutes in: surplus is gone but the dwell lock holds the load on.
    rig.clock.advance(chrono::Duration::minutes(5));
    rig.set_surplus(-3000.0);
    rig.scheduler.run_cycle().await.unwrap();
    assert!(switch.is_on());
    assert!(boiler.state.lock().await.is_locked_timing);

    // Eleven minutes in: the lock has expired and the load is shed.
    rig.clock.advance(chrono::Duration::minutes(6));
    rig.set_surplus(-3000.0);
    rig.scheduler.run_cycle().await.unwrap();
    assert!(!switch.is_on());
}

#[tokio::test(start_paused = true)]
async fn manual_override_locks_until_reset() {
    let (boiler, switch) = switch_load(switch_config("boiler", 2000.0, 1, 0, 0));
    let rig = Rig::new(vec![boiler.clone()]).await;

    rig.set_surplus(2500.0);
    rig.scheduler.run_cycle().await.unwrap();
    assert!(switch.is_on());
    // Let the activation verify cleanly before tampering with the wire.
    tokio::time::sleep(Duration::from_secs(4)).await;

    // Someone turns the load off at the wall.
    switch.force(false);
    rig.clock.advance(chrono::Duration::minutes(2));
    rig.set_surplus(2500.0);
    rig.scheduler.run_cycle().await.unwrap();

    {
        let state = boiler.state.lock().await;
        assert!(state.is_locked_manual);
        assert!(state.lock_reason.contains("Manual override"));
    }
    // The lock is absolute: plenty of budget, but no re-activation.
    assert!(!switch.is_on());

    // Reset releases the target; the next cycle takes control again.
    let handle = rig.scheduler.handle();
    handle.reset_load_lock("boiler").await.unwrap();
    assert_eq!(boiler.state.lock().await.last_target, TargetState::Unknown);

    rig.clock.advance(chrono::Duration::minutes(1));
    rig.set_surplus(2500.0);
    rig.scheduler.run_cycle().await.unwrap();
    assert!(!boiler.state.lock().await.is_locked_manual);
    assert!(switch.is_on());
}

#[tokio::test(start_paused = true)]
async fn failed_verification_sets_fault_lock_and_excludes_load() {
    let (boiler, switch) = switch_load(switch_config("boiler", 2000.0, 1, 0, 0));
    let rig = Rig::new(vec![boiler.clone()]).await;
    switch.set_responsive(false);

    rig.set_surplus(2500.0);
    rig.scheduler.run_cycle().await.unwrap();

    // Let the delayed verification observe the stuck wire state.
    tokio::time::sleep(Duration::from_secs(4)).await;
    {
        let state = boiler.state.lock().await;
        assert!(state.is_fault_locked);
        assert_eq!(state.last_target, TargetState::Unknown);
    }

    // Fault-locked loads are out of the allocation until reset.
    rig.clock.advance(chrono::Duration::minutes(1));
    rig.set_surplus(2500.0);
    let result = rig.scheduler.run_cycle().await.unwrap();
    assert!(result.real_ideal_on.is_empty());
    assert!(boiler.state.lock().await.is_fault_locked);
}

#[tokio::test(start_paused = true)]
async fn fault_lock_expires_after_cooldown() {
    let (boiler, switch) = switch_load(switch_config("boiler", 2000.0, 1, 0, 0));
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
    ));
    let surplus = Arc::new(SimulatedSignal::new());
    let mut settings = settings();
    settings.fault_cooldown = Some(chrono::Duration::minutes(30));
    let scheduler = Scheduler::new(
        settings,
        vec![boiler.clone()],
        surplus.clone() as Arc<dyn SignalSource>,
        Arc::new(MemoryStateStore::new()),
        clock.clone(),
    )
    .await
    .unwrap();

    switch.set_responsive(false);
    surplus.push(clock.now(), -2500.0);
    scheduler.run_cycle().await.unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(boiler.state.lock().await.is_fault_locked);
    switch.set_responsive(true);

    // Before the cool-down: still excluded.
    clock.advance(chrono::Duration::minutes(10));
    surplus.push(clock.now(), -2500.0);
    let result = scheduler.run_cycle().await.unwrap();
    assert!(result.real_ideal_on.is_empty());

    // After the cool-down the fault clears and the load is retried.
    clock.advance(chrono::Duration::minutes(25));
    surplus.push(clock.now(), -2500.0);
    let result = scheduler.run_cycle().await.unwrap();
    assert_eq!(result.real_ideal_on, vec!["boiler"]);
    assert!(!boiler.state.lock().await.is_fault_locked);
    assert!(switch.is_on());
}

#[tokio::test(start_paused = true)]
async fn simulation_ignores_manual_locks_and_never_commands() {
    let mut config = switch_config("boiler", 2000.0, 1, 0, 0);
    config.optimization_enabled = false;
    config.simulation_active = true;
    let (boiler, switch) = switch_load(config);
    let rig = Rig::new(vec![boiler.clone()]).await;

    // Fabricate a manual override: scheduler expected on, wire is off.
    {
        let mut state = boiler.state.lock().await;
        state.last_target = TargetState::On;
    }

    rig.set_surplus(2500.0);
    let result = rig.scheduler.run_cycle().await.unwrap();

    assert!(boiler.state.lock().await.is_locked_manual);
    // The manual lock is ignored by the simulation pass...
    assert_eq!(result.sim_ideal_on, vec!["boiler"]);
    // ...and excluded from the real pass, with no actuator side effects.
    assert!(result.real_ideal_on.is_empty());
    assert!(!switch.is_on());
}

#[tokio::test(start_paused = true)]
async fn simulation_offset_shifts_only_the_simulation_budget() {
    let mut config = switch_config("boiler", 2000.0, 1, 0, 0);
    config.simulation_active = true;
    let (boiler, _switch) = switch_load(config);
    let rig = Rig::new(vec![boiler]).await;

    rig.scheduler.handle().set_simulation_offset(1500.0);
    rig.set_surplus(700.0);
    let result = rig.scheduler.run_cycle().await.unwrap();

    assert_eq!(result.real_budget_w, 700.0);
    assert_eq!(result.sim_budget_w, 2200.0);
    assert_eq!(result.sim_offset_w, 1500.0);
    assert!(result.real_ideal_on.is_empty());
    assert_eq!(result.sim_ideal_on, vec!["boiler"]);
}

#[tokio::test(start_paused = true)]
async fn unavailable_load_is_excluded_without_aborting_the_cycle() {
    let (boiler, boiler_switch) = switch_load(switch_config("boiler", 2000.0, 1, 0, 0));
    let (pump, pump_switch) = switch_load(switch_config("pump", 750.0, 3, 0, 0));
    boiler_switch.set_available(false);
    let rig = Rig::new(vec![boiler.clone(), pump]).await;

    rig.set_surplus(2500.0);
    let result = rig.scheduler.run_cycle().await.unwrap();

    assert!(!boiler.state.lock().await.available);
    assert_eq!(result.real_ideal_on, vec!["pump"]);
    assert!(pump_switch.is_on());
}

#[tokio::test(start_paused = true)]
async fn degraded_surplus_budgets_to_zero() {
    let (boiler, switch) = switch_load(switch_config("boiler", 2000.0, 1, 0, 0));
    let rig = Rig::new(vec![boiler]).await;

    // No surplus samples at all.
    let result = rig.scheduler.run_cycle().await.unwrap();

    assert!(result.surplus_degraded);
    assert_eq!(result.real_budget_w, 0.0);
    assert!(result.real_ideal_on.is_empty());
    assert!(!switch.is_on());
}

#[tokio::test(start_paused = true)]
async fn commanded_state_survives_scheduler_restart() {
    let (boiler, _switch) = switch_load(switch_config("boiler", 2000.0, 1, 0, 0));
    let rig = Rig::new(vec![boiler.clone()]).await;

    rig.set_surplus(2500.0);
    rig.scheduler.run_cycle().await.unwrap();
    let before = boiler.state.lock().await.persisted();
    assert_eq!(before.last_target, TargetState::On);

    // A fresh scheduler over the same store restores the record.
    let (reborn, _switch2) = switch_load(switch_config("boiler", 2000.0, 1, 0, 0));
    let _scheduler = Scheduler::new(
        settings(),
        vec![reborn.clone()],
        rig.surplus.clone() as Arc<dyn SignalSource>,
        rig.store.clone(),
        rig.clock.clone(),
    )
    .await
    .unwrap();

    assert_eq!(reborn.state.lock().await.persisted(), before);
    assert_eq!(
        rig.store.load("boiler").await.unwrap().unwrap().last_target,
        TargetState::On
    );
}

#[tokio::test(start_paused = true)]
async fn resetting_an_indeterminate_load_commands_deactivation() {
    // One setpoint nudged off both targets: 52.0 matches neither the
    // activated 60.0 nor the deactivated 48.0.
    let setpoint = Arc::new(SimulatedSetpoint::new(52.0));
    let mut config = switch_config("heat_pump", 1200.0, 2, 0, 0);
    config.kind = LoadKind::MultiSetpoint;
    let load = Arc::new(ManagedLoad::new(
        config,
        LoadAdapter::MultiSetpoint(MultiSetpointLoad::new(vec![SetpointTarget {
            name: "dhw_target_temp".into(),
            actuator: setpoint.clone() as Arc<dyn NumericActuator>,
            activated_value: 60.0,
            deactivated_value: 48.0,
        }])),
        None,
    ));
    let rig = Rig::new(vec![load.clone()]).await;

    {
        let mut state = load.state.lock().await;
        state.is_fault_locked = true;
        state.fault_locked_at = Some(rig.clock.now());
    }

    rig.scheduler.handle().reset_load_lock("heat_pump").await.unwrap();

    // Reset resolves the ambiguity by driving the load to its deactivated
    // state instead of merely releasing the target.
    assert_eq!(setpoint.value(), 48.0);
    let state = load.state.lock().await;
    assert!(!state.is_fault_locked);
    assert_eq!(state.last_target, TargetState::Off);
}

#[tokio::test(start_paused = true)]
async fn disabling_optimization_sheds_a_commanded_load() {
    let (boiler, switch) = switch_load(switch_config("boiler", 2000.0, 1, 0, 0));
    let rig = Rig::new(vec![boiler.clone()]).await;

    rig.set_surplus(2500.0);
    rig.scheduler.run_cycle().await.unwrap();
    assert!(switch.is_on());
    tokio::time::sleep(Duration::from_secs(4)).await;

    rig.scheduler
        .handle()
        .set_optimization_enabled("boiler", false)
        .await
        .unwrap();

    assert!(!switch.is_on());
    assert_eq!(boiler.state.lock().await.last_target, TargetState::Off);
}
