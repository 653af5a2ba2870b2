//! Process-wide request statistics.
//!
//! One [`StatsCollector`] lives in the app state; every request takes a
//! [`RequestTracker`] from it and finishes that tracker exactly once, which is
//! the only path that mutates the shared counters.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use serde::Serialize;

pub const LATENCY_WINDOW_SIZE: usize = 1000;

/// Recorded for requests whose handler was dropped before an outcome was known.
pub const CLIENT_CLOSED_STATUS: u16 = 499;

/// Token counts attributed to one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

/// Fixed-capacity ring of the most recent latencies, in milliseconds.
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    samples: Vec<f64>,
    next: usize,
    capacity: usize,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            next: 0,
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, ms: f64) {
        if self.samples.len() < self.capacity {
            self.samples.push(ms);
        } else {
            self.samples[self.next] = ms;
        }
        self.next = (self.next + 1) % self.capacity;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn summary(&self) -> LatencySummary {
        if self.samples.is_empty() {
            return LatencySummary::default();
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let len = sorted.len();
        let at = |q: f64| {
            let idx = ((len as f64) * q).floor() as usize;
            sorted[idx.min(len - 1)].round() as u64
        };
        LatencySummary {
            avg_ms: (sorted.iter().sum::<f64>() / len as f64).round() as u64,
            p50_ms: at(0.50),
            p95_ms: at(0.95),
            p99_ms: at(0.99),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencySummary {
    pub avg_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

#[derive(Debug, Clone, Default)]
struct ModelStats {
    requests: u64,
    errors: u64,
    total_latency_ms: f64,
    tokens: TokenUsage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSnapshot {
    pub requests: u64,
    pub errors: u64,
    pub avg_latency_ms: u64,
    pub tokens: TokenUsage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorSnapshot {
    pub total: u64,
}

/// Serialized as the body of `GET /stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    /// Seconds since the collector was created.
    pub uptime: u64,
    pub total_requests: u64,
    pub active_requests: u64,
    pub by_model: BTreeMap<String, ModelSnapshot>,
    pub by_status: BTreeMap<String, u64>,
    pub latency: LatencySummary,
    pub errors: ErrorSnapshot,
}

#[derive(Debug)]
struct Inner {
    total_requests: u64,
    active_requests: u64,
    error_count: u64,
    by_status: HashMap<u16, u64>,
    by_model: HashMap<String, ModelStats>,
    latencies: LatencyWindow,
}

#[derive(Debug, Clone)]
pub struct StatsCollector {
    inner: Arc<Mutex<Inner>>,
    started: Instant,
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                total_requests: 0,
                active_requests: 0,
                error_count: 0,
                by_status: HashMap::new(),
                by_model: HashMap::new(),
                latencies: LatencyWindow::new(LATENCY_WINDOW_SIZE),
            })),
            started: Instant::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Counters stay usable even if a holder panicked mid-update.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn start_request(&self, model: &str) -> RequestTracker {
        {
            let mut inner = self.lock();
            inner.total_requests += 1;
            inner.active_requests += 1;
        }
        RequestTracker {
            stats: self.clone(),
            model: if model.is_empty() {
                "unknown".to_string()
            } else {
                model.to_string()
            },
            started: Instant::now(),
            finished: AtomicBool::new(false),
        }
    }

    fn record(&self, model: &str, status: u16, latency_ms: f64, usage: Option<TokenUsage>) {
        let is_error = status >= 400;
        let mut inner = self.lock();
        inner.active_requests = inner.active_requests.saturating_sub(1);
        inner.latencies.record(latency_ms);
        *inner.by_status.entry(status).or_insert(0) += 1;
        if is_error {
            inner.error_count += 1;
        }

        let entry = inner.by_model.entry(model.to_string()).or_default();
        entry.requests += 1;
        entry.total_latency_ms += latency_ms;
        if is_error {
            entry.errors += 1;
        }
        if let Some(usage) = usage {
            entry.tokens.input += usage.input;
            entry.tokens.output += usage.output;
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.lock();
        let by_model = inner
            .by_model
            .iter()
            .map(|(name, ms)| {
                let avg = if ms.requests > 0 {
                    (ms.total_latency_ms / ms.requests as f64).round() as u64
                } else {
                    0
                };
                (
                    name.clone(),
                    ModelSnapshot {
                        requests: ms.requests,
                        errors: ms.errors,
                        avg_latency_ms: avg,
                        tokens: ms.tokens,
                    },
                )
            })
            .collect();
        let by_status = inner
            .by_status
            .iter()
            .map(|(code, count)| (code.to_string(), *count))
            .collect();

        StatsSnapshot {
            uptime: self.started.elapsed().as_secs(),
            total_requests: inner.total_requests,
            active_requests: inner.active_requests,
            by_model,
            by_status,
            latency: inner.latencies.summary(),
            errors: ErrorSnapshot {
                total: inner.error_count,
            },
        }
    }
}

/// One-shot completion handle for a single request.
#[derive(Debug)]
pub struct RequestTracker {
    stats: StatsCollector,
    model: String,
    started: Instant,
    finished: AtomicBool,
}

impl RequestTracker {
    /// Record the outcome. Only the first call has any effect.
    pub fn finish(&self, status: u16, usage: Option<TokenUsage>) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        let latency_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        self.stats.record(&self.model, status, latency_ms, usage);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

impl Drop for RequestTracker {
    fn drop(&mut self) {
        if !self.is_finished() {
            tracing::debug!(model = %self.model, "Request dropped before completion");
            self.finish(CLIENT_CLOSED_STATUS, None);
        }
    }
}
