use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use hdrhistogram::{CreationError, Histogram};
use parking_lot::Mutex;

use crate::check::CheckResult;
use crate::template::RenderError;
use crate::transport::NetworkErrorKind;

/// What one iteration produced. Flushed to the aggregator in a single append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    Completed {
        latency: Duration,
        checks: Vec<CheckResult>,
    },
    NetworkFailed {
        latency: Duration,
        kind: NetworkErrorKind,
    },
    RenderFailed {
        error: RenderError,
    },
    /// The transport panicked mid-request; the VU keeps going.
    TransportPanicked {
        latency: Duration,
        message: String,
    },
}

/// Counters the scheduler hands over once a scenario has stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub peak_concurrency: u64,
    pub interrupted: u64,
    pub capacity_exceeded_events: u64,
    pub unstarted: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckCounts {
    pub name: String,
    pub passed: u64,
    pub failed: u64,
    /// Diagnostic of the first failure that carried one.
    pub first_failure: Option<String>,
}

/// Latency percentiles in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencySummary {
    pub count: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub mean_us: f64,
    pub p50_us: u64,
    pub p90_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateReport {
    pub checks_total: u64,
    pub checks_passed: u64,
    pub checks_failed: u64,
    /// Sorted by check name.
    pub checks_by_name: Vec<CheckCounts>,

    pub iterations_total: u64,
    pub iterations_failed: u64,
    pub iterations_interrupted: u64,
    pub iterations_unstarted: u64,

    pub network_errors: BTreeMap<NetworkErrorKind, u64>,
    pub render_errors: u64,
    pub transport_panics: u64,

    pub capacity_exceeded_events: u64,
    pub peak_concurrency: u64,

    pub latency: Option<LatencySummary>,
}

impl AggregateReport {
    pub fn network_errors_total(&self) -> u64 {
        self.network_errors.values().sum()
    }
}

#[derive(Debug)]
struct State {
    /// Raw check results, kept only up to `check_log_limit` entries.
    checks: Vec<CheckResult>,
    check_log_limit: usize,
    by_name: BTreeMap<Arc<str>, CheckCounts>,

    iterations_total: u64,
    iterations_failed: u64,
    network_errors: BTreeMap<NetworkErrorKind, u64>,
    render_errors: u64,
    transport_panics: u64,

    latency_us: Histogram<u64>,
    scheduler: SchedulerStats,
}

impl State {
    fn new(check_log_limit: usize) -> Result<Self, CreationError> {
        // Up to 60s in microseconds with 3 significant figures; longer samples saturate.
        let latency_us = Histogram::<u64>::new_with_bounds(1, 60_000_000, 3)?;

        Ok(Self {
            checks: Vec::new(),
            check_log_limit,
            by_name: BTreeMap::new(),
            iterations_total: 0,
            iterations_failed: 0,
            network_errors: BTreeMap::new(),
            render_errors: 0,
            transport_panics: 0,
            latency_us,
            scheduler: SchedulerStats::default(),
        })
    }

    fn push_check(&mut self, result: CheckResult) {
        let counts = self
            .by_name
            .entry(result.name.clone())
            .or_insert_with(|| CheckCounts {
                name: result.name.to_string(),
                ..CheckCounts::default()
            });

        if result.passed {
            counts.passed += 1;
        } else {
            counts.failed += 1;
            if counts.first_failure.is_none() {
                counts.first_failure.clone_from(&result.diagnostic);
            }
        }

        if self.checks.len() < self.check_log_limit {
            self.checks.push(result);
        }
    }

    fn push_latency(&mut self, latency: Duration) {
        let us = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX).max(1);
        self.latency_us.saturating_record(us);
    }

    fn report(&self) -> AggregateReport {
        let checks_by_name: Vec<CheckCounts> = self.by_name.values().cloned().collect();
        let checks_passed = checks_by_name.iter().map(|c| c.passed).sum();
        let checks_failed = checks_by_name.iter().map(|c| c.failed).sum();

        let h = &self.latency_us;
        let latency = (!h.is_empty()).then(|| LatencySummary {
            count: h.len(),
            min_us: h.min(),
            max_us: h.max(),
            mean_us: h.mean(),
            p50_us: h.value_at_quantile(0.50),
            p90_us: h.value_at_quantile(0.90),
            p95_us: h.value_at_quantile(0.95),
            p99_us: h.value_at_quantile(0.99),
        });

        AggregateReport {
            checks_total: checks_passed + checks_failed,
            checks_passed,
            checks_failed,
            checks_by_name,
            iterations_total: self.iterations_total,
            iterations_failed: self.iterations_failed,
            iterations_interrupted: self.scheduler.interrupted,
            iterations_unstarted: self.scheduler.unstarted,
            network_errors: self.network_errors.clone(),
            render_errors: self.render_errors,
            transport_panics: self.transport_panics,
            capacity_exceeded_events: self.scheduler.capacity_exceeded_events,
            peak_concurrency: self.scheduler.peak_concurrency,
            latency,
        }
    }
}

/// Append-only result log for one scenario.
///
/// Every write takes the same lock, so concurrent VUs are linearized. After
/// [`ResultAggregator::finalize`] the report is frozen and further writes are dropped.
///
/// Only counters and the latency histogram grow with the run; raw [`CheckResult`]s are
/// kept only when asked for with [`ResultAggregator::with_check_log`].
#[derive(Debug)]
pub struct ResultAggregator {
    state: Mutex<State>,
    frozen: OnceLock<AggregateReport>,
}

impl ResultAggregator {
    pub fn new() -> Result<Self, CreationError> {
        Self::with_check_log(0)
    }

    /// Also keeps the first `limit` raw check results, see [`ResultAggregator::check_results`].
    pub fn with_check_log(limit: usize) -> Result<Self, CreationError> {
        Ok(Self {
            state: Mutex::new(State::new(limit)?),
            frozen: OnceLock::new(),
        })
    }

    pub fn is_finalized(&self) -> bool {
        self.frozen.get().is_some()
    }

    fn write(&self, what: &str, f: impl FnOnce(&mut State)) {
        let mut state = self.state.lock();
        if self.frozen.get().is_some() {
            log::warn!("ignoring {what} recorded after the report was finalized");
            return;
        }
        f(&mut state);
    }

    pub fn record(&self, result: CheckResult) {
        self.write("check result", |s| s.push_check(result));
    }

    pub fn record_latency(&self, latency: Duration) {
        self.write("latency sample", |s| s.push_latency(latency));
    }

    pub fn record_iteration(&self, outcome: IterationOutcome) {
        self.write("iteration", |s| {
            s.iterations_total += 1;
            match outcome {
                IterationOutcome::Completed { latency, checks } => {
                    s.push_latency(latency);
                    let mut failed = false;
                    for c in checks {
                        failed |= !c.passed;
                        s.push_check(c);
                    }
                    if failed {
                        s.iterations_failed += 1;
                    }
                }
                IterationOutcome::NetworkFailed { kind, .. } => {
                    s.iterations_failed += 1;
                    *s.network_errors.entry(kind).or_insert(0) += 1;
                }
                IterationOutcome::RenderFailed { error } => {
                    log::debug!("iteration failed to render: {error}");
                    s.iterations_failed += 1;
                    s.render_errors += 1;
                }
                IterationOutcome::TransportPanicked { message, .. } => {
                    log::warn!("transport panicked: {message}");
                    s.iterations_failed += 1;
                    s.transport_panics += 1;
                }
            }
        });
    }

    pub fn record_scheduler_stats(&self, stats: SchedulerStats) {
        self.write("scheduler stats", |s| s.scheduler = stats);
    }

    /// Copy of the logged check results, in append order.
    pub fn check_results(&self) -> Vec<CheckResult> {
        self.state.lock().checks.clone()
    }

    pub fn snapshot(&self) -> AggregateReport {
        if let Some(frozen) = self.frozen.get() {
            return frozen.clone();
        }

        let state = self.state.lock();
        match self.frozen.get() {
            Some(frozen) => frozen.clone(),
            None => state.report(),
        }
    }

    /// Freezes the report. Idempotent.
    pub fn finalize(&self) -> AggregateReport {
        let state = self.state.lock();
        self.frozen.get_or_init(|| state.report()).clone()
    }
}
