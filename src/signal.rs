//! Sliding-window signal averaging and surplus orientation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::domain::SignalSource;

/// An averaged (or fallback) reading. `degraded` is set when neither history
/// nor the instantaneous value could be read; callers must not fail the
/// cycle on it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Averaged {
    pub value: f64,
    pub degraded: bool,
}

impl Averaged {
    fn degraded() -> Self {
        Self {
            value: 0.0,
            degraded: true,
        }
    }

    fn ok(value: f64) -> Self {
        Self {
            value,
            degraded: false,
        }
    }
}

/// Sliding-window average over `[now - window, now]` with instantaneous
/// fallback.
#[derive(Debug, Clone, Copy)]
pub struct SignalAverager {
    window: chrono::Duration,
}

impl SignalAverager {
    pub fn new(window: chrono::Duration) -> Self {
        Self { window }
    }

    pub async fn average(&self, source: &dyn SignalSource, now: DateTime<Utc>) -> Averaged {
        match source.read_history(now - self.window, now).await {
            Ok(samples) if !samples.is_empty() => {
                let sum: f64 = samples.iter().map(|s| s.value).sum();
                Averaged::ok(sum / samples.len() as f64)
            }
            Ok(_) => {
                debug!("signal history empty, falling back to instantaneous value");
                Self::instant(source).await
            }
            Err(e) => {
                warn!(error = %e, "signal history unavailable, falling back to instantaneous value");
                Self::instant(source).await
            }
        }
    }

    pub async fn instant(source: &dyn SignalSource) -> Averaged {
        match source.read_instant().await {
            Ok(Some(value)) => Averaged::ok(value),
            Ok(None) => Averaged::degraded(),
            Err(e) => {
                warn!(error = %e, "instantaneous signal read failed");
                Averaged::degraded()
            }
        }
    }
}

/// Reads the raw surplus signal and orients it for the scheduler.
///
/// The raw signal is defined negative-when-surplus (grid-import style), so a
/// fixed inversion is applied first to make positive mean surplus. The
/// user-configured `invert` flag is then applied on top, which restores the
/// raw sign. Preserved as shipped; see DESIGN.md for the open question.
pub struct SurplusReader {
    source: Arc<dyn SignalSource>,
    invert: bool,
    averager: SignalAverager,
}

impl SurplusReader {
    pub fn new(source: Arc<dyn SignalSource>, invert: bool, window: chrono::Duration) -> Self {
        Self {
            source,
            invert,
            averager: SignalAverager::new(window),
        }
    }

    fn orient(&self, reading: Averaged) -> Averaged {
        let mut value = -reading.value;
        if self.invert {
            value = -value;
        }
        Averaged {
            value,
            degraded: reading.degraded,
        }
    }

    /// Instantaneous oriented surplus.
    pub async fn current(&self) -> Averaged {
        self.orient(SignalAverager::instant(self.source.as_ref()).await)
    }

    /// Window-averaged oriented surplus.
    pub async fn averaged(&self, now: DateTime<Utc>) -> Averaged {
        self.orient(self.averager.average(self.source.as_ref(), now).await)
    }
}
