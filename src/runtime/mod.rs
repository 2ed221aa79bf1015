//! # Runtime
//!
//! Drives repeated (authenticate, reflect) cycles.
//!
//! - `refresh`: the refresh loop and the production cycle
//! - [`StatusSink`] / [`StatusGauge`]: where each cycle's outcome is recorded

pub mod refresh;

pub use refresh::{Cycle, CycleError, RefreshLoop, SyncCycle};

use crate::observability::metrics;
use prometheus::IntGauge;

/// Receives the outcome of every cycle
pub trait StatusSink: Send + Sync {
    fn set(&self, healthy: bool);
}

/// [`StatusSink`] backed by a Prometheus gauge: 1 success, 0 failure
#[derive(Debug, Clone)]
pub struct StatusGauge {
    gauge: IntGauge,
}

impl StatusGauge {
    pub fn new(gauge: IntGauge) -> Self {
        Self { gauge }
    }

    #[must_use]
    pub fn get(&self) -> i64 {
        self.gauge.get()
    }
}

impl Default for StatusGauge {
    /// The process-wide `vault_reflector_status` gauge
    fn default() -> Self {
        Self::new(metrics::status_gauge())
    }
}

impl StatusSink for StatusGauge {
    fn set(&self, healthy: bool) {
        self.gauge.set(i64::from(healthy));
    }
}
