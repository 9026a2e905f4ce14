//! State synchronization: diff the ideal-on set against actual load state,
//! issue activate/deactivate commands, and verify each command after a fixed
//! delay. Failed or unverified commands set the sticky fault lock.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::{CandidateSnapshot, ManagedLoad};
use crate::domain::{ActuatorError, TargetState};
use crate::repo::StateStore;
use crate::utils::Clock;

pub struct Synchronizer {
    clock: Arc<dyn Clock>,
    store: Arc<dyn StateStore>,
    verify_delay: Duration,
    actuator_timeout: Duration,
}

impl Synchronizer {
    pub fn new(
        clock: Arc<dyn Clock>,
        store: Arc<dyn StateStore>,
        verify_delay: Duration,
        actuator_timeout: Duration,
    ) -> Self {
        Self {
            clock,
            store,
            verify_delay,
            actuator_timeout,
        }
    }

    /// Bring real-mode candidates in line with the ideal-on set. Locked
    /// loads are never commanded; locks are absolute overrides.
    pub async fn synchronize(
        &self,
        loads: &[Arc<ManagedLoad>],
        candidates: &[CandidateSnapshot],
        ideal_on: &[String],
    ) {
        let ideal: HashSet<&str> = ideal_on.iter().map(String::as_str).collect();

        for snapshot in candidates {
            let should_be_on = ideal.contains(snapshot.name.as_str());
            if snapshot.is_locked() || should_be_on == snapshot.is_on {
                continue;
            }

            let Some(load) = loads.iter().find(|l| l.name == snapshot.name) else {
                continue;
            };
            self.command(load, should_be_on).await;
        }
    }

    /// A load whose optimization flag was switched off while it is on and
    /// scheduler-commanded gets deactivated immediately, outside the normal
    /// allocation pass. A still-active lock defers this until it clears.
    pub async fn enforce_disabled(&self, loads: &[Arc<ManagedLoad>]) {
        for load in loads {
            if load.config.read().await.optimization_enabled {
                continue;
            }
            let should_deactivate = {
                let state = load.state.lock().await;
                state.available
                    && state.is_on
                    && state.last_target == TargetState::On
                    && !state.is_locked()
            };
            if should_deactivate {
                info!(load = %load.name, "optimization disabled, deactivating load");
                self.command(load, false).await;
            }
        }
    }

    /// Issue one command with timeout, update bookkeeping, persist, and
    /// schedule the delayed verification.
    pub async fn command(&self, load: &Arc<ManagedLoad>, target_on: bool) {
        let command = async {
            if target_on {
                load.adapter.activate().await
            } else {
                load.adapter.deactivate().await
            }
        };

        let outcome = match timeout(self.actuator_timeout, command).await {
            Ok(result) => result,
            Err(_) => Err(ActuatorError::Timeout(self.actuator_timeout)),
        };

        match outcome {
            Ok(()) => {
                info!(load = %load.name, target_on, "commanded load transition");
                let now = self.clock.now();
                let record = {
                    let mut state = load.state.lock().await;
                    state.last_target = TargetState::from_on(target_on);
                    state.last_switch_time = Some(now);
                    state.persisted()
                };
                if let Err(e) = self.store.save(&load.name, &record).await {
                    warn!(load = %load.name, error = %e, "failed to persist load state");
                }
                self.spawn_verification(load.clone(), target_on);
            }
            Err(e) => {
                // A command that never went through is treated like a failed
                // verification: fault-lock and release the target so a later
                // cycle can retry once the lock clears.
                error!(load = %load.name, target_on, error = %e, "actuator command failed");
                self.fail(load, &format!("command failed: {e}")).await;
            }
        }
    }

    /// Re-read the load after the verification delay and fault-lock it when
    /// the actual state does not match the issued target.
    fn spawn_verification(&self, load: Arc<ManagedLoad>, expected_on: bool) {
        let clock = self.clock.clone();
        let store = self.store.clone();
        let delay = self.verify_delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            match load.adapter.read_state().await {
                Ok(reading) if reading.is_on == expected_on => {
                    debug!(load = %load.name, expected_on, "command verified");
                }
                Ok(reading) => {
                    warn!(
                        load = %load.name,
                        expected_on,
                        actual_on = reading.is_on,
                        "command verification mismatch, fault-locking load"
                    );
                    fail_load(&load, clock.as_ref(), store.as_ref(), "verification mismatch")
                        .await;
                }
                Err(e) => {
                    warn!(
                        load = %load.name,
                        error = %e,
                        "could not re-read load for verification, fault-locking"
                    );
                    fail_load(&load, clock.as_ref(), store.as_ref(), "verification read failed")
                        .await;
                }
            }
        });
    }

    async fn fail(&self, load: &Arc<ManagedLoad>, reason: &str) {
        fail_load(load, self.clock.as_ref(), self.store.as_ref(), reason).await;
    }
}

/// Set the sticky fault lock and clear the commanded target, so the manual
/// lock does not also fire and a later cycle can retry cleanly.
async fn fail_load(load: &Arc<ManagedLoad>, clock: &dyn Clock, store: &dyn StateStore, reason: &str) {
    let record = {
        let mut state = load.state.lock().await;
        state.is_fault_locked = true;
        state.fault_locked_at = Some(clock.now());
        state.last_target = TargetState::Unknown;
        state.lock_reason = format!("Fault lock - {reason}");
        state.persisted()
    };
    if let Err(e) = store.save(&load.name, &record).await {
        warn!(load = %load.name, error = %e, "failed to persist fault lock");
    }
}
