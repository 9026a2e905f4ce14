use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, warn};

use super::io::{ActuatorError, BoolActuator, NumericActuator, SignalSource};
use super::load::{LoadKind, LoadReading};

/// On/off load behind a single boolean actuator.
pub struct OnOffLoad {
    actuator: Arc<dyn BoolActuator>,
    /// True when the wired switch is active-low ("off" means running).
    invert: bool,
    /// Optional measured-power source; when readable it overrides the raw
    /// actuator reading for on/off detection.
    power_source: Option<Arc<dyn SignalSource>>,
    power_on_threshold_w: f64,
}

impl OnOffLoad {
    pub fn new(
        actuator: Arc<dyn BoolActuator>,
        invert: bool,
        power_source: Option<Arc<dyn SignalSource>>,
        power_on_threshold_w: f64,
    ) -> Self {
        Self {
            actuator,
            invert,
            power_source,
            power_on_threshold_w,
        }
    }

    async fn write(&self, target_on: bool) -> Result<(), ActuatorError> {
        let wire_on = target_on != self.invert;
        self.actuator
            .set_on(wire_on)
            .await
            .map_err(|e| ActuatorError::Command(e.to_string()))
    }

    async fn read(&self) -> Result<LoadReading, ActuatorError> {
        if let Some(power) = &self.power_source {
            match power.read_instant().await {
                Ok(Some(watts)) => {
                    let is_on = watts > self.power_on_threshold_w;
                    return Ok(LoadReading {
                        is_on,
                        is_off: !is_on,
                    });
                }
                Ok(None) => {
                    debug!("measured-power source unavailable, falling back to actuator state");
                }
                Err(e) => {
                    warn!(error = %e, "measured-power read failed, falling back to actuator state");
                }
            }
        }

        match self.actuator.read_on().await {
            Ok(Some(wire_on)) => {
                let is_on = wire_on != self.invert;
                Ok(LoadReading {
                    is_on,
                    is_off: !is_on,
                })
            }
            Ok(None) => Err(ActuatorError::Unavailable),
            Err(e) => Err(ActuatorError::Command(e.to_string())),
        }
    }
}

/// One numeric target of a multi-setpoint load.
pub struct SetpointTarget {
    pub name: String,
    pub actuator: Arc<dyn NumericActuator>,
    pub activated_value: f64,
    pub deactivated_value: f64,
}

/// Load controlled by writing 1..N numeric setpoints. "On" and "off" are
/// each a strict match of all setpoints; any other combination is
/// indeterminate and treated as a manual override.
pub struct MultiSetpointLoad {
    targets: Vec<SetpointTarget>,
}

impl MultiSetpointLoad {
    pub fn new(targets: Vec<SetpointTarget>) -> Self {
        Self { targets }
    }

    async fn write_all(&self, activated: bool) -> Result<(), ActuatorError> {
        try_join_all(self.targets.iter().map(|t| {
            let value = if activated {
                t.activated_value
            } else {
                t.deactivated_value
            };
            t.actuator.set_value(value)
        }))
        .await
        .map(|_| ())
        .map_err(|e| ActuatorError::Command(e.to_string()))
    }

    async fn read(&self) -> Result<LoadReading, ActuatorError> {
        let mut all_activated = true;
        let mut all_deactivated = true;

        for target in &self.targets {
            let value = match target.actuator.read_value().await {
                Ok(Some(v)) => v,
                Ok(None) => return Err(ActuatorError::Unavailable),
                Err(e) => return Err(ActuatorError::Command(e.to_string())),
            };
            // Setpoints are compared exactly; a nudged value means the load
            // is no longer under scheduler control.
            if value != target.activated_value {
                all_activated = false;
            }
            if value != target.deactivated_value {
                all_deactivated = false;
            }
        }

        Ok(LoadReading {
            is_on: all_activated,
            is_off: all_deactivated,
        })
    }

    /// Diagnostic listing of the setpoints whose current value matches
    /// neither target, for operator troubleshooting.
    async fn state_details(&self) -> String {
        let mut mismatches = Vec::new();
        for target in &self.targets {
            let Ok(Some(value)) = target.actuator.read_value().await else {
                mismatches.push(format!("- {}: unreadable", target.name));
                continue;
            };
            if value != target.activated_value && value != target.deactivated_value {
                mismatches.push(format!(
                    "- {}: {} (needs {} or {})",
                    target.name, value, target.activated_value, target.deactivated_value
                ));
            }
        }

        if mismatches.is_empty() {
            "All setpoints match expected values".to_string()
        } else {
            format!(
                "Manual override - setpoints match neither target:\n{}",
                mismatches.join("\n")
            )
        }
    }
}

/// Polymorphic actuator/sensor facade over the two load kinds. Enum
/// dispatch keeps activation and state-detection logic colocated with its
/// variant.
pub enum LoadAdapter {
    OnOff(OnOffLoad),
    MultiSetpoint(MultiSetpointLoad),
}

impl LoadAdapter {
    pub fn kind(&self) -> LoadKind {
        match self {
            LoadAdapter::OnOff(_) => LoadKind::OnOff,
            LoadAdapter::MultiSetpoint(_) => LoadKind::MultiSetpoint,
        }
    }

    pub async fn activate(&self) -> Result<(), ActuatorError> {
        match self {
            LoadAdapter::OnOff(load) => load.write(true).await,
            LoadAdapter::MultiSetpoint(load) => load.write_all(true).await,
        }
    }

    pub async fn deactivate(&self) -> Result<(), ActuatorError> {
        match self {
            LoadAdapter::OnOff(load) => load.write(false).await,
            LoadAdapter::MultiSetpoint(load) => load.write_all(false).await,
        }
    }

    pub async fn read_state(&self) -> Result<LoadReading, ActuatorError> {
        match self {
            LoadAdapter::OnOff(load) => load.read().await,
            LoadAdapter::MultiSetpoint(load) => load.read().await,
        }
    }

    pub async fn state_details(&self) -> String {
        match self {
            LoadAdapter::OnOff(_) => String::new(),
            LoadAdapter::MultiSetpoint(load) => load.state_details().await,
        }
    }
}
