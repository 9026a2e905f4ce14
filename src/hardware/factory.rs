//! Builds a fully simulated load bank from configuration, for development
//! and the demo binary.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::info;

use super::simulated::{SimulatedSetpoint, SimulatedSignal, SimulatedSwitch};
use crate::config::{Config, LoadKindSpec};
use crate::controller::ManagedLoad;
use crate::domain::{
    LoadAdapter, MultiSetpointLoad, NumericActuator, OnOffLoad, SetpointTarget, SignalSource,
};

pub struct SimBank {
    pub loads: Vec<Arc<ManagedLoad>>,
    pub surplus: Arc<SimulatedSignal>,
}

pub fn build_sim_bank(config: &Config) -> SimBank {
    let surplus = Arc::new(SimulatedSignal::new());
    let mut loads = Vec::with_capacity(config.loads.len());

    for spec in &config.loads {
        let (adapter, power_source) = match &spec.kind {
            LoadKindSpec::OnOff { invert } => {
                let switch = Arc::new(SimulatedSwitch::new(false));
                let power: Option<Arc<dyn SignalSource>> = if spec.has_power_sensor {
                    let signal = Arc::new(SimulatedSignal::new());
                    spawn_power_feed(
                        switch.clone(),
                        signal.clone(),
                        spec.rated_power_w,
                        Duration::from_secs(5),
                    );
                    Some(signal)
                } else {
                    None
                };
                (
                    LoadAdapter::OnOff(OnOffLoad::new(
                        switch,
                        *invert,
                        power.clone(),
                        spec.power_on_threshold_w,
                    )),
                    power,
                )
            }
            LoadKindSpec::MultiSetpoint { setpoints } => {
                let targets = setpoints
                    .iter()
                    .map(|s| SetpointTarget {
                        name: s.name.clone(),
                        actuator: Arc::new(SimulatedSetpoint::new(s.deactivated_value))
                            as Arc<dyn NumericActuator>,
                        activated_value: s.activated_value,
                        deactivated_value: s.deactivated_value,
                    })
                    .collect();
                (
                    LoadAdapter::MultiSetpoint(MultiSetpointLoad::new(targets)),
                    None,
                )
            }
        };

        loads.push(Arc::new(ManagedLoad::new(
            spec.to_domain(),
            adapter,
            power_source,
        )));
    }

    info!(loads = loads.len(), "built simulated load bank");
    SimBank { loads, surplus }
}

/// Feed a plausible measured-power curve for a simulated switch load.
fn spawn_power_feed(
    switch: Arc<SimulatedSwitch>,
    signal: Arc<SimulatedSignal>,
    rated_w: f64,
    period: Duration,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let watts = if switch.is_on() {
                rated_w * rand::thread_rng().gen_range(0.9..1.05)
            } else {
                0.0
            };
            signal.push(chrono::Utc::now(), watts);
        }
    });
}
