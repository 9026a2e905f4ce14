use anyhow::{bail, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::collections::HashSet;

use crate::domain::{LoadConfig, LoadKind};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub surplus: SurplusConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub loads: Vec<LoadSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Fixed cycle interval, seconds.
    pub cycle_seconds: u64,
    /// Delay before a commanded transition is re-read and verified, seconds.
    pub verify_delay_seconds: u64,
    /// Per-command actuator I/O timeout, seconds. A stuck load must not
    /// stall the whole scheduler.
    pub actuator_timeout_seconds: u64,
    /// Optional cool-down after which a fault lock clears without an
    /// explicit reset, minutes. Absent means faults are sticky until reset.
    pub fault_cooldown_minutes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SurplusConfig {
    /// Flip the oriented surplus sign back to the raw convention.
    #[serde(default)]
    pub invert: bool,
    /// Sliding averaging window, minutes.
    pub window_minutes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoadKindSpec {
    OnOff {
        #[serde(default)]
        invert: bool,
    },
    MultiSetpoint {
        setpoints: Vec<SetpointSpec>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetpointSpec {
    pub name: String,
    pub activated_value: f64,
    pub deactivated_value: f64,
}

fn default_priority() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_power_threshold() -> f64 {
    100.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoadSpec {
    pub name: String,
    pub rated_power_w: f64,
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default)]
    pub min_on_minutes: i64,
    #[serde(default)]
    pub min_off_minutes: i64,
    #[serde(default = "default_true")]
    pub optimization_enabled: bool,
    #[serde(default)]
    pub simulation_active: bool,
    /// Wire up a measured-power sensor for this load (sim mode fabricates
    /// one).
    #[serde(default)]
    pub has_power_sensor: bool,
    #[serde(default = "default_power_threshold")]
    pub power_on_threshold_w: f64,
    #[serde(flatten)]
    pub kind: LoadKindSpec,
}

impl LoadSpec {
    pub fn to_domain(&self) -> LoadConfig {
        LoadConfig {
            name: self.name.clone(),
            kind: match self.kind {
                LoadKindSpec::OnOff { .. } => LoadKind::OnOff,
                LoadKindSpec::MultiSetpoint { .. } => LoadKind::MultiSetpoint,
            },
            rated_power_w: self.rated_power_w,
            priority: self.priority,
            min_on: chrono::Duration::minutes(self.min_on_minutes),
            min_off: chrono::Duration::minutes(self.min_off_minutes),
            optimization_enabled: self.optimization_enabled,
            simulation_active: self.simulation_active,
            power_on_threshold_w: self.power_on_threshold_w,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("PVS__").split("__"));
        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject invalid configuration before the scheduler ever sees it.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.cycle_seconds == 0 {
            bail!("scheduler.cycle_seconds must be at least 1");
        }
        if self.surplus.window_minutes == 0 {
            bail!("surplus.window_minutes must be at least 1");
        }

        let mut names = HashSet::new();
        for load in &self.loads {
            if !names.insert(load.name.as_str()) {
                bail!("duplicate load name '{}'", load.name);
            }
            if load.rated_power_w < 0.0 {
                bail!("load '{}': rated_power_w must be >= 0", load.name);
            }
            if load.min_on_minutes < 0 || load.min_off_minutes < 0 {
                bail!("load '{}': dwell times must be >= 0", load.name);
            }
            if let LoadKindSpec::MultiSetpoint { setpoints } = &load.kind {
                if setpoints.is_empty() {
                    bail!(
                        "load '{}': multi_setpoint needs at least one setpoint",
                        load.name
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config(loads: Vec<LoadSpec>) -> Config {
        Config {
            scheduler: SchedulerConfig {
                cycle_seconds: 60,
                verify_delay_seconds: 3,
                actuator_timeout_seconds: 5,
                fault_cooldown_minutes: None,
            },
            surplus: SurplusConfig {
                invert: false,
                window_minutes: 5,
            },
            store: StoreConfig {
                path: "state.json".into(),
            },
            loads,
        }
    }

    fn switch_load(name: &str, power: f64) -> LoadSpec {
        LoadSpec {
            name: name.into(),
            rated_power_w: power,
            priority: 1,
            min_on_minutes: 0,
            min_off_minutes: 0,
            optimization_enabled: true,
            simulation_active: false,
            has_power_sensor: false,
            power_on_threshold_w: 100.0,
            kind: LoadKindSpec::OnOff { invert: false },
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let config = base_config(vec![
            switch_load("boiler", 2000.0),
            switch_load("boiler", 500.0),
        ]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn negative_rated_power_is_rejected() {
        let config = base_config(vec![switch_load("boiler", -1.0)]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_setpoint_list_is_rejected() {
        let mut load = switch_load("heat_pump", 1200.0);
        load.kind = LoadKindSpec::MultiSetpoint { setpoints: vec![] };
        assert!(base_config(vec![load]).validate().is_err());
    }

    #[test]
    fn load_spec_converts_to_domain_config() {
        let mut spec = switch_load("boiler", 2000.0);
        spec.min_on_minutes = 10;
        let config = spec.to_domain();
        assert_eq!(config.kind, LoadKind::OnOff);
        assert_eq!(config.min_on, chrono::Duration::minutes(10));
        assert!(config.optimization_enabled);
    }
}
