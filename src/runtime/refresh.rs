//! # Refresh Loop
//!
//! `Idle -> Authenticating -> Reflecting -> Idle`, once immediately and then
//! once per interval.
//!
//! Cycles run inline on the loop's task, so they never overlap. A cycle that
//! outlasts the interval delays the next one instead of triggering a burst.
//! Shutdown stops scheduling; a cycle already running completes first.

use super::StatusSink;
use crate::auth::{AuthError, Authenticator};
use crate::constants::exit_codes;
use crate::observability::metrics;
use crate::reflector::{ReflectError, ReflectReport, Reflector, SecretMapping};
use crate::vault::TokenExchange;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, info_span, Instrument};

/// One refresh cycle, split into its two phases
#[async_trait]
pub trait Cycle: Send + Sync {
    async fn authenticate(&self) -> Result<(), AuthError>;

    async fn reflect(&self) -> Result<ReflectReport, ReflectError>;
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("reflection failed: {0}")]
    Reflect(#[from] ReflectError),
}

impl CycleError {
    /// Phase label for metrics
    #[must_use]
    pub fn phase(&self) -> &'static str {
        match self {
            CycleError::Auth(_) => "authenticate",
            CycleError::Reflect(_) => "reflect",
        }
    }

    /// Process exit code when this ends a one-shot run
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            CycleError::Auth(_) => exit_codes::AUTHENTICATION,
            CycleError::Reflect(_) => exit_codes::REFLECTION,
        }
    }
}

/// Production cycle: re-authenticate against Vault, then reflect every mapping
pub struct SyncCycle {
    authenticator: Authenticator,
    exchange: Arc<dyn TokenExchange>,
    reflector: Reflector,
    mappings: Vec<SecretMapping>,
}

impl std::fmt::Debug for SyncCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCycle")
            .field("authenticator", &self.authenticator)
            .field("reflector", &self.reflector)
            .field("mappings", &self.mappings.len())
            .finish_non_exhaustive()
    }
}

impl SyncCycle {
    pub fn new(
        authenticator: Authenticator,
        exchange: Arc<dyn TokenExchange>,
        reflector: Reflector,
        mappings: Vec<SecretMapping>,
    ) -> Self {
        Self {
            authenticator,
            exchange,
            reflector,
            mappings,
        }
    }
}

#[async_trait]
impl Cycle for SyncCycle {
    async fn authenticate(&self) -> Result<(), AuthError> {
        self.authenticator.authenticate(self.exchange.as_ref()).await
    }

    async fn reflect(&self) -> Result<ReflectReport, ReflectError> {
        self.reflector.reflect(&self.mappings).await
    }
}

/// Runs cycles on a fixed interval and records each outcome
pub struct RefreshLoop {
    interval: Duration,
    status: Arc<dyn StatusSink>,
}

impl std::fmt::Debug for RefreshLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshLoop")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl RefreshLoop {
    pub fn new(interval: Duration, status: Arc<dyn StatusSink>) -> Self {
        Self { interval, status }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run a single cycle and record its outcome
    ///
    /// Reflection is skipped when authentication fails.
    pub async fn run_cycle(&self, cycle: &dyn Cycle) -> Result<ReflectReport, CycleError> {
        let start = Instant::now();
        metrics::increment_cycles();

        let result = match cycle.authenticate().await {
            Ok(()) => cycle.reflect().await.map_err(CycleError::from),
            Err(e) => Err(CycleError::from(e)),
        };

        metrics::observe_cycle_duration(start.elapsed().as_secs_f64());
        self.status.set(result.is_ok());

        match &result {
            Ok(report) => info!(
                "Refresh cycle succeeded: {} mapping(s) reflected",
                report.total()
            ),
            Err(e) => {
                metrics::increment_cycle_errors(e.phase());
                error!("Refresh cycle failed: {}", e);
            }
        }

        result
    }

    /// Run cycles until `shutdown` resolves; returns the number of cycles run
    ///
    /// The first cycle starts immediately.
    pub async fn run_until<F>(&self, cycle: &dyn Cycle, shutdown: F) -> u64
    where
        F: Future<Output = ()> + Send,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!("Refreshing every {:?}", self.interval);

        let mut cycles: u64 = 0;
        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!("Shutdown requested, stopping refresh loop after {} cycle(s)", cycles);
                    break;
                }
                _ = ticker.tick() => {
                    cycles += 1;
                    let span = info_span!("refresh.cycle", cycle = cycles);
                    // Outcome is already recorded in the status sink and logs
                    let _ = self.run_cycle(cycle).instrument(span).await;
                }
            }
        }

        cycles
    }
}
