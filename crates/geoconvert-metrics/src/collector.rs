//! Metrics collector. Tracks per-operation outcomes.
//!
//! Counters are atomics; latency samples live in a bounded,
//! mutex-protected window per bucket.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::debug;

/// Latency samples retained per bucket.
const LATENCY_WINDOW: usize = 1024;

/// One finished operation.
#[derive(Debug, Clone, Copy)]
pub struct Sample<'a> {
    /// `convert` or `inspect`.
    pub operation: &'a str,
    /// `ok`, or the error kind the request failed with.
    pub outcome: &'a str,
    pub latency: Duration,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

struct Bucket {
    count: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    latencies: tokio::sync::Mutex<LatencyWindow>,
}

impl Bucket {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            latencies: tokio::sync::Mutex::new(LatencyWindow::default()),
        }
    }
}

/// The most recent `LATENCY_WINDOW` latencies in microseconds, oldest first.
#[derive(Default)]
struct LatencyWindow(VecDeque<u64>);

impl LatencyWindow {
    fn push(&mut self, latency: Duration) {
        if self.0.len() == LATENCY_WINDOW {
            self.0.pop_front();
        }
        self.0.push_back(u64::try_from(latency.as_micros()).unwrap_or(u64::MAX));
    }

    /// Median and 99th percentile in milliseconds, zero while empty.
    fn p50_p99_ms(&self) -> (f64, f64) {
        let mut ranked: Vec<u64> = self.0.iter().copied().collect();
        ranked.sort_unstable();
        (nearest_rank_ms(&ranked, 50), nearest_rank_ms(&ranked, 99))
    }
}

/// Nearest-rank percentile of ascending microsecond samples, in milliseconds.
fn nearest_rank_ms(ranked: &[u64], percent: usize) -> f64 {
    if ranked.is_empty() {
        return 0.0;
    }
    let rank = (percent * ranked.len()).div_ceil(100).max(1);
    ranked[rank - 1] as f64 / 1000.0
}

/// Point-in-time view of one (operation, outcome) bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationSnapshot {
    pub operation: String,
    pub outcome: String,
    /// Total since process start.
    pub count: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    /// Over the recent latency window.
    pub latency_p50_ms: f64,
    pub latency_p99_ms: f64,
}

/// Collects operation metrics for the lifetime of the process.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    buckets: Arc<RwLock<BTreeMap<(String, String), Arc<Bucket>>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished operation.
    pub async fn record(&self, sample: Sample<'_>) {
        let bucket = self.bucket(sample.operation, sample.outcome).await;
        bucket.count.fetch_add(1, Ordering::Relaxed);
        bucket.bytes_in.fetch_add(sample.bytes_in, Ordering::Relaxed);
        bucket.bytes_out.fetch_add(sample.bytes_out, Ordering::Relaxed);

        bucket.latencies.lock().await.push(sample.latency);
    }

    async fn bucket(&self, operation: &str, outcome: &str) -> Arc<Bucket> {
        let key = (operation.to_string(), outcome.to_string());
        if let Some(b) = self.buckets.read().await.get(&key) {
            return b.clone();
        }
        let mut buckets = self.buckets.write().await;
        buckets
            .entry(key)
            .or_insert_with(|| {
                debug!(operation, outcome, "new metrics bucket");
                Arc::new(Bucket::new())
            })
            .clone()
    }

    /// Total count for one bucket.
    pub async fn count(&self, operation: &str, outcome: &str) -> u64 {
        let key = (operation.to_string(), outcome.to_string());
        self.buckets
            .read()
            .await
            .get(&key)
            .map(|b| b.count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Snapshot every bucket, ordered by operation then outcome.
    pub async fn snapshot(&self) -> Vec<OperationSnapshot> {
        let buckets = self.buckets.read().await;
        let mut snapshots = Vec::with_capacity(buckets.len());
        for ((operation, outcome), b) in buckets.iter() {
            let (p50, p99) = b.latencies.lock().await.p50_p99_ms();
            snapshots.push(OperationSnapshot {
                operation: operation.clone(),
                outcome: outcome.clone(),
                count: b.count.load(Ordering::Relaxed),
                bytes_in: b.bytes_in.load(Ordering::Relaxed),
                bytes_out: b.bytes_out.load(Ordering::Relaxed),
                latency_p50_ms: p50,
                latency_p99_ms: p99,
            });
        }
        snapshots
    }
}
