use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Actuator/sensor error taxonomy. Per-load failures never escape the cycle;
/// they are turned into availability flags or fault locks by the controller.
#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("actuator unavailable")]
    Unavailable,
    #[error("command failed: {0}")]
    Command(String),
    #[error("command timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// A single timestamped sample from a scalar signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub at: DateTime<Utc>,
    pub value: f64,
}

/// A scalar signal (grid surplus, per-load measured power) with optional
/// history. `Ok(None)` from `read_instant` means the signal is currently
/// unavailable; callers degrade instead of failing the cycle.
#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn read_instant(&self) -> Result<Option<f64>>;
    async fn read_history(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Sample>>;
}

/// On/off actuator behind a load. `Ok(None)` from `read_on` means the
/// actuator state cannot be read right now.
#[async_trait]
pub trait BoolActuator: Send + Sync {
    async fn set_on(&self, on: bool) -> Result<()>;
    async fn read_on(&self) -> Result<Option<bool>>;
}

/// Numeric setpoint actuator (e.g. a heat-pump target temperature).
#[async_trait]
pub trait NumericActuator: Send + Sync {
    async fn set_value(&self, value: f64) -> Result<()>;
    async fn read_value(&self) -> Result<Option<f64>>;
}
