//! # Metrics
//!
//! Prometheus metrics for monitoring the reflector.
//!
//! ## Metrics Exposed
//!
//! - `vault_reflector_status` - Outcome of the last refresh cycle (1 success, 0 failure)
//! - `vault_reflector_cycles_total` - Total number of refresh cycles
//! - `vault_reflector_cycle_errors_total` - Failed refresh cycles by phase
//! - `vault_reflector_cycle_duration_seconds` - Duration of refresh cycles
//! - `vault_reflector_mappings_reflected_total` - Successful mappings by operation
//! - `vault_reflector_mapping_errors_total` - Failed mappings by reason
//! - `vault_reflector_vault_fetch_duration_seconds` - Duration of Vault secret reads

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, IntGauge, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static STATUS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "vault_reflector_status",
        "Outcome of the last refresh cycle (1 success, 0 failure)",
    )
    .expect("Failed to create STATUS metric - this should never happen")
});

static CYCLES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vault_reflector_cycles_total",
        "Total number of refresh cycles",
    )
    .expect("Failed to create CYCLES_TOTAL metric - this should never happen")
});

static CYCLE_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "vault_reflector_cycle_errors_total",
            "Total number of failed refresh cycles by phase",
        ),
        &["phase"],
    )
    .expect("Failed to create CYCLE_ERRORS_TOTAL metric - this should never happen")
});

static CYCLE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "vault_reflector_cycle_duration_seconds",
            "Duration of refresh cycles in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("Failed to create CYCLE_DURATION metric - this should never happen")
});

static MAPPINGS_REFLECTED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "vault_reflector_mappings_reflected_total",
            "Total number of mappings reflected by operation (created, updated, unchanged)",
        ),
        &["operation"],
    )
    .expect("Failed to create MAPPINGS_REFLECTED_TOTAL metric - this should never happen")
});

static MAPPING_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "vault_reflector_mapping_errors_total",
            "Total number of failed mappings by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create MAPPING_ERRORS_TOTAL metric - this should never happen")
});

static VAULT_FETCH_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "vault_reflector_vault_fetch_duration_seconds",
            "Duration of Vault secret reads in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
    )
    .expect("Failed to create VAULT_FETCH_DURATION metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
/// Register every metric with [`REGISTRY`]; fails if called twice
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(STATUS.clone()))?;
    REGISTRY.register(Box::new(CYCLES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CYCLE_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CYCLE_DURATION.clone()))?;
    REGISTRY.register(Box::new(MAPPINGS_REFLECTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(MAPPING_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(VAULT_FETCH_DURATION.clone()))?;
    Ok(())
}

/// Handle to the process-wide status gauge
///
/// Clones share the same underlying value.
pub fn status_gauge() -> IntGauge {
    STATUS.clone()
}

pub fn increment_cycles() {
    CYCLES_TOTAL.inc();
}

/// `phase` is `authenticate` or `reflect`
pub fn increment_cycle_errors(phase: &str) {
    CYCLE_ERRORS_TOTAL.with_label_values(&[phase]).inc();
}

pub fn observe_cycle_duration(duration: f64) {
    CYCLE_DURATION.observe(duration);
}

pub fn increment_mappings_reflected(operation: &str) {
    MAPPINGS_REFLECTED_TOTAL
        .with_label_values(&[operation])
        .inc();
}

pub fn increment_mapping_errors(reason: &str) {
    MAPPING_ERRORS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn observe_vault_fetch_duration(duration: f64) {
    VAULT_FETCH_DURATION.observe(duration);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        // This should not panic - metrics should register successfully
        assert!(register_metrics().is_ok());
    }

    #[test]
    fn test_status_gauge_shares_value() {
        let gauge = status_gauge();
        gauge.set(1);
        assert_eq!(STATUS.get(), 1);
        gauge.set(0);
        assert_eq!(STATUS.get(), 0);
    }

    #[test]
    fn test_increment_cycles() {
        let before = CYCLES_TOTAL.get();
        increment_cycles();
        let after = CYCLES_TOTAL.get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_increment_cycle_errors() {
        let before = CYCLE_ERRORS_TOTAL
            .with_label_values(&["authenticate"])
            .get();
        increment_cycle_errors("authenticate");
        let after = CYCLE_ERRORS_TOTAL
            .with_label_values(&["authenticate"])
            .get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_observe_cycle_duration() {
        observe_cycle_duration(1.5);
        // Just verify it doesn't panic
    }

    #[test]
    fn test_increment_mappings_reflected() {
        let before = MAPPINGS_REFLECTED_TOTAL
            .with_label_values(&["created"])
            .get();
        increment_mappings_reflected("created");
        let after = MAPPINGS_REFLECTED_TOTAL
            .with_label_values(&["created"])
            .get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_increment_mapping_errors() {
        let before = MAPPING_ERRORS_TOTAL
            .with_label_values(&["ownership_conflict"])
            .get();
        increment_mapping_errors("ownership_conflict");
        let after = MAPPING_ERRORS_TOTAL
            .with_label_values(&["ownership_conflict"])
            .get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_observe_vault_fetch_duration() {
        let before = VAULT_FETCH_DURATION.get_sample_count();
        observe_vault_fetch_duration(0.05);
        assert_eq!(VAULT_FETCH_DURATION.get_sample_count(), before + 1);
    }
}
