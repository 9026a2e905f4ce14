//! Simulated actuators and signals standing in for the host platform.
//!
//! Used by the `sim` demo binary and by tests. Switches and setpoints can be
//! made unavailable or unresponsive to exercise the degradation and
//! fault-lock paths.

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::domain::{BoolActuator, NumericActuator, Sample, SignalSource};

const HISTORY_CAPACITY: usize = 4096;

/// Simulated boolean actuator.
pub struct SimulatedSwitch {
    on: Mutex<bool>,
    available: Mutex<bool>,
    /// When false, commands are acknowledged but the wire state does not
    /// change, which makes post-command verification fail.
    responsive: Mutex<bool>,
}

impl SimulatedSwitch {
    pub fn new(on: bool) -> Self {
        Self {
            on: Mutex::new(on),
            available: Mutex::new(true),
            responsive: Mutex::new(true),
        }
    }

    pub fn is_on(&self) -> bool {
        *self.on.lock()
    }

    pub fn set_available(&self, available: bool) {
        *self.available.lock() = available;
    }

    pub fn set_responsive(&self, responsive: bool) {
        *self.responsive.lock() = responsive;
    }

    /// Flip the wire state out-of-band, as an operator or a wall switch
    /// would.
    pub fn force(&self, on: bool) {
        *self.on.lock() = on;
    }
}

#[async_trait]
impl BoolActuator for SimulatedSwitch {
    async fn set_on(&self, on: bool) -> Result<()> {
        if !*self.available.lock() {
            anyhow::bail!("switch offline");
        }
        if *self.responsive.lock() {
            *self.on.lock() = on;
        }
        Ok(())
    }

    async fn read_on(&self) -> Result<Option<bool>> {
        if !*self.available.lock() {
            return Ok(None);
        }
        Ok(Some(*self.on.lock()))
    }
}

/// Simulated numeric setpoint.
pub struct SimulatedSetpoint {
    value: Mutex<f64>,
    available: Mutex<bool>,
}

impl SimulatedSetpoint {
    pub fn new(value: f64) -> Self {
        Self {
            value: Mutex::new(value),
            available: Mutex::new(true),
        }
    }

    pub fn value(&self) -> f64 {
        *self.value.lock()
    }

    pub fn set_available(&self, available: bool) {
        *self.available.lock() = available;
    }

    /// Write the value out-of-band, bypassing the scheduler.
    pub fn force(&self, value: f64) {
        *self.value.lock() = value;
    }
}

#[async_trait]
impl NumericActuator for SimulatedSetpoint {
    async fn set_value(&self, value: f64) -> Result<()> {
        if !*self.available.lock() {
            anyhow::bail!("setpoint offline");
        }
        *self.value.lock() = value;
        Ok(())
    }

    async fn read_value(&self) -> Result<Option<f64>> {
        if !*self.available.lock() {
            return Ok(None);
        }
        Ok(Some(*self.value.lock()))
    }
}

/// Simulated scalar signal with bounded history.
pub struct SimulatedSignal {
    samples: Mutex<VecDeque<Sample>>,
    available: Mutex<bool>,
}

impl SimulatedSignal {
    pub fn new() -> Self {
        Self {
            samples: Mutex::new(VecDeque::new()),
            available: Mutex::new(true),
        }
    }

    pub fn push(&self, at: DateTime<Utc>, value: f64) {
        let mut samples = self.samples.lock();
        samples.push_back(Sample { at, value });
        while samples.len() > HISTORY_CAPACITY {
            samples.pop_front();
        }
    }

    pub fn set_available(&self, available: bool) {
        *self.available.lock() = available;
    }
}

impl Default for SimulatedSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalSource for SimulatedSignal {
    async fn read_instant(&self) -> Result<Option<f64>> {
        if !*self.available.lock() {
            return Ok(None);
        }
        Ok(self.samples.lock().back().map(|s| s.value))
    }

    async fn read_history(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Sample>> {
        if !*self.available.lock() {
            anyhow::bail!("signal history offline");
        }
        Ok(self
            .samples
            .lock()
            .iter()
            .filter(|s| s.at >= from && s.at <= to)
            .copied()
            .collect())
    }
}

/// Background task feeding a noisy day-curve surplus into a simulated
/// signal, so the demo binary has something to schedule against.
///
/// Raw sign convention is negative-when-surplus, matching the grid-import
/// style meters the scheduler expects.
pub fn spawn_surplus_feed(signal: Arc<SimulatedSignal>, period: std::time::Duration) {
    use rand::Rng;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        let start = Utc::now();
        loop {
            interval.tick().await;
            let now = Utc::now();
            let elapsed_min = (now - start).num_seconds() as f64 / 60.0;
            // Slow swell between roughly -3 kW (export) and +1 kW (import).
            let base = -1000.0 - 2000.0 * (elapsed_min / 15.0 * std::f64::consts::PI).sin();
            let noise: f64 = rand::thread_rng().gen_range(-150.0..150.0);
            signal.push(now, base + noise);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signal_history_is_range_filtered() {
        let signal = SimulatedSignal::new();
        let now = Utc::now();
        signal.push(now - chrono::Duration::minutes(10), 1.0);
        signal.push(now - chrono::Duration::minutes(3), 2.0);
        signal.push(now, 3.0);

        let window = signal
            .read_history(now - chrono::Duration::minutes(5), now)
            .await
            .unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(signal.read_instant().await.unwrap(), Some(3.0));
    }

    #[tokio::test]
    async fn unresponsive_switch_acknowledges_but_keeps_state() {
        let switch = SimulatedSwitch::new(false);
        switch.set_responsive(false);
        switch.set_on(true).await.unwrap();
        assert!(!switch.is_on());
    }
}
