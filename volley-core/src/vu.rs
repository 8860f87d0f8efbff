use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt as _;
use tokio::time::Instant;

use crate::aggregator::{IterationOutcome, ResultAggregator};
use crate::check::panic_message;
use crate::gate::IterationGate;
use crate::pacer::ArrivalPacer;
use crate::script::Script;
use crate::template::{IterationContext, render};
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub(crate) enum VuWork {
    Constant { gate: Arc<IterationGate> },
    RampingArrivalRate { pacer: Arc<ArrivalPacer> },
}

impl VuWork {
    /// Soft stop: no new iterations start after this.
    pub(crate) fn close(&self) {
        match self {
            Self::Constant { gate } => gate.stop(),
            Self::RampingArrivalRate { pacer } => pacer.mark_done(),
        }
    }
}

/// Per-scenario concurrency counters shared by its VUs.
#[derive(Debug, Default)]
pub(crate) struct ScenarioState {
    active: AtomicU64,
    peak: AtomicU64,
    interrupted: AtomicU64,
}

impl ScenarioState {
    fn enter(&self) -> ActiveIterationGuard<'_> {
        let now = self.active.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        self.peak.fetch_max(now, Ordering::AcqRel);
        ActiveIterationGuard {
            state: self,
            finished: false,
        }
    }

    pub(crate) fn active(&self) -> u64 {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn peak(&self) -> u64 {
        self.peak.load(Ordering::Acquire)
    }

    pub(crate) fn interrupted(&self) -> u64 {
        self.interrupted.load(Ordering::Acquire)
    }
}

/// Tracks one in-flight iteration. Dropped without `finish` means the task was aborted.
struct ActiveIterationGuard<'a> {
    state: &'a ScenarioState,
    finished: bool,
}

impl ActiveIterationGuard<'_> {
    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for ActiveIterationGuard<'_> {
    fn drop(&mut self) {
        self.state.active.fetch_sub(1, Ordering::AcqRel);
        if !self.finished {
            self.state.interrupted.fetch_add(1, Ordering::AcqRel);
        }
    }
}

pub(crate) struct VuContext<T> {
    /// Run-wide VU id (1-based).
    pub vu_id: u64,
    pub scenario: Arc<str>,
    /// VU index within the scenario (1-based).
    pub scenario_vu: u64,
    pub transport: Arc<T>,
    pub script: Arc<Script>,
    pub aggregator: Arc<ResultAggregator>,
    pub state: Arc<ScenarioState>,
    pub work: VuWork,
}

pub(crate) async fn run_vu<T: Transport>(ctx: VuContext<T>) {
    let mut iteration: u64 = 0;

    loop {
        let completed = match &ctx.work {
            VuWork::Constant { gate } => {
                let Some(id) = gate.next() else {
                    break;
                };
                run_iteration(&ctx, iteration, id).await
            }
            VuWork::RampingArrivalRate { pacer } => {
                let Some(claim) = pacer.claim_next(ctx.scenario_vu.saturating_sub(1)).await
                else {
                    break;
                };
                run_iteration(&ctx, iteration, claim.iteration()).await
            }
        };

        // An iteration that never reached the transport didn't yield; let others run.
        if !completed {
            tokio::task::yield_now().await;
        }

        iteration = iteration.saturating_add(1);
    }

    log::trace!(
        "vu {} (scenario `{}`) finished after {iteration} iteration(s)",
        ctx.vu_id,
        ctx.scenario
    );
}

/// Runs one iteration and flushes its outcome. Returns whether a request was sent.
async fn run_iteration<T: Transport>(ctx: &VuContext<T>, iteration: u64, id: u64) -> bool {
    let guard = ctx.state.enter();

    let ictx = IterationContext {
        scenario: ctx.scenario.clone(),
        vu_id: ctx.vu_id,
        scenario_vu: ctx.scenario_vu,
        iteration,
        params: ctx.script.params.clone(),
    };

    let (outcome, sent) = match render(&ctx.script.template, &ictx) {
        Err(error) => (IterationOutcome::RenderFailed { error }, false),
        Ok(request) => {
            let started = Instant::now();
            let res = AssertUnwindSafe(ctx.transport.execute(request))
                .catch_unwind()
                .await;
            let latency = started.elapsed();

            let outcome = match res {
                Err(payload) => IterationOutcome::TransportPanicked {
                    latency,
                    message: panic_message(&*payload),
                },
                Ok(Ok(response)) => IterationOutcome::Completed {
                    latency,
                    checks: ctx
                        .script
                        .checks
                        .iter()
                        .map(|c| c.evaluate(&response, id))
                        .collect(),
                },
                Ok(Err(err)) => {
                    log::debug!("iteration {id} in scenario `{}` failed: {err}", ctx.scenario);
                    IterationOutcome::NetworkFailed {
                        latency,
                        kind: err.kind(),
                    }
                }
            };
            (outcome, true)
        }
    };

    // No await between here and the flush, so an abort can't split an iteration.
    ctx.aggregator.record_iteration(outcome);
    guard.finish();
    sent
}
