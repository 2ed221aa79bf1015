//! Refresh loop scheduling tests on a paused tokio clock

mod common;

use async_trait::async_trait;
use common::{fields, FakeCluster, FakeExchange, FakeMetadata, FakeStore};
use prometheus::IntGauge;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vault_reflector::auth::{AuthError, AuthStrategy, Authenticator};
use vault_reflector::reflector::{
    KeyProjection, ReflectError, ReflectReport, Reflector, SecretMapping, TargetRef,
};
use vault_reflector::runtime::{Cycle, RefreshLoop, StatusGauge, StatusSink, SyncCycle};
use vault_reflector::vault::EngineType;

const INTERVAL: Duration = Duration::from_secs(60);

fn status_gauge(name: &str) -> Arc<StatusGauge> {
    Arc::new(StatusGauge::new(IntGauge::new(name, "test").unwrap()))
}

fn db_mapping() -> SecretMapping {
    SecretMapping {
        source_path: "secret/data/db".to_string(),
        engine: EngineType::KvV2,
        target: TargetRef {
            name: "db-creds".to_string(),
            namespace: "ns1".to_string(),
        },
        secret_type: "Opaque".to_string(),
        projection: KeyProjection::All,
    }
}

/// Cycle whose reflection takes `work` and tracks concurrency
struct SlowCycle {
    work: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    runs: AtomicUsize,
}

impl SlowCycle {
    fn new(work: Duration) -> Self {
        Self {
            work,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            runs: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Cycle for SlowCycle {
    async fn authenticate(&self) -> Result<(), AuthError> {
        Ok(())
    }

    async fn reflect(&self) -> Result<ReflectReport, ReflectError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.work).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(ReflectReport::default())
    }
}

/// Records the status sequence
#[derive(Default)]
struct RecordingSink {
    values: std::sync::Mutex<Vec<bool>>,
}

impl StatusSink for RecordingSink {
    fn set(&self, healthy: bool) {
        self.values.lock().unwrap().push(healthy);
    }
}

#[tokio::test(start_paused = true)]
async fn test_n_ticks_run_n_cycles() {
    let cycle = SlowCycle::new(Duration::from_millis(10));
    let refresh = RefreshLoop::new(INTERVAL, status_gauge("test_ticks_status"));

    // Ticks at 0, T, 2T, 3T, 4T; shutdown halfway to 5T
    let cycles = refresh
        .run_until(&cycle, tokio::time::sleep(INTERVAL * 4 + INTERVAL / 2))
        .await;

    assert_eq!(cycles, 5);
    assert_eq!(cycle.runs.load(Ordering::SeqCst), 5);
}

#[tokio::test(start_paused = true)]
async fn test_slow_cycles_never_overlap() {
    let cycle = SlowCycle::new(INTERVAL + INTERVAL / 2);
    let refresh = RefreshLoop::new(INTERVAL, status_gauge("test_overlap_status"));

    let cycles = refresh
        .run_until(&cycle, tokio::time::sleep(INTERVAL * 10))
        .await;

    assert_eq!(cycle.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(cycle.in_flight.load(Ordering::SeqCst), 0);
    // Each cycle delays the next, so fewer than one per interval
    assert!(cycles < 10, "ran {cycles} cycles");
    assert_eq!(cycle.runs.load(Ordering::SeqCst) as u64, cycles);
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_cycle_completes_on_shutdown() {
    let cycle = SlowCycle::new(INTERVAL / 2);
    let refresh = RefreshLoop::new(INTERVAL, status_gauge("test_shutdown_status"));

    // Shutdown fires while the first cycle is still running
    let cycles = refresh
        .run_until(&cycle, tokio::time::sleep(INTERVAL / 4))
        .await;

    assert_eq!(cycles, 1);
    assert_eq!(cycle.runs.load(Ordering::SeqCst), 1);
    assert_eq!(cycle.in_flight.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_status_tracks_each_cycle() {
    let store = Arc::new(FakeStore::default());
    let cluster = Arc::new(FakeCluster::default());
    let exchange = Arc::new(FakeExchange::new("vault.example.com"));
    let sink = Arc::new(RecordingSink::default());

    let mapping = db_mapping();
    let cycle = SyncCycle::new(
        Authenticator::new(
            AuthStrategy::Token {
                token: "s.static".to_string(),
            },
            Arc::new(FakeMetadata::default()),
        ),
        exchange.clone(),
        Reflector::new(store.clone(), cluster.clone(), "default"),
        vec![mapping],
    );
    let refresh = RefreshLoop::new(INTERVAL, sink.clone());

    // Path missing on the first cycle, present afterwards
    let seed = {
        let store = store.clone();
        async move {
            tokio::time::sleep(INTERVAL / 2).await;
            store.put("secret/data/db", fields(&[("password", "s3cr3t")]));
        }
    };
    let (cycles, ()) = tokio::join!(
        refresh.run_until(&cycle, tokio::time::sleep(INTERVAL + INTERVAL / 2)),
        seed
    );

    assert_eq!(cycles, 2);
    assert_eq!(*sink.values.lock().unwrap(), vec![false, true]);
    assert_eq!(cluster.data("ns1", "db-creds")["password"], "s3cr3t");
    assert_eq!(exchange.installed_token().as_deref(), Some("s.static"));
}

#[tokio::test(start_paused = true)]
async fn test_auth_failure_skips_reflection_and_reports_zero() {
    let store = Arc::new(FakeStore::default().with_secret("secret/data/db", fields(&[("password", "x")])));
    let cluster = Arc::new(FakeCluster::default());
    let status = status_gauge("test_auth_failure_status");
    status.set(true);

    let cycle = SyncCycle::new(
        Authenticator::new(
            AuthStrategy::GcpDefault {
                role: None,
                audience: None,
            },
            Arc::new(FakeMetadata::default()),
        ),
        Arc::new(FakeExchange::new("vault.example.com")),
        Reflector::new(store.clone(), cluster.clone(), "default"),
        vec![db_mapping()],
    );
    let refresh = RefreshLoop::new(INTERVAL, status.clone());

    let err = refresh.run_cycle(&cycle).await.unwrap_err();

    assert_eq!(err.phase(), "authenticate");
    assert_eq!(status.get(), 0);
    assert_eq!(store.fetches.load(Ordering::SeqCst), 0);
    assert_eq!(cluster.writes(), 0);
}
