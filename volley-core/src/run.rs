use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};

use crate::aggregator::{ResultAggregator, SchedulerStats};
use crate::config::{ScenarioConfig, ScenarioExecutor};
use crate::error::{Error, Result};
use crate::gate::IterationGate;
use crate::pacer::ArrivalPacer;
use crate::schedule::{RampingSchedule, RateAccumulator};
use crate::script::Script;
use crate::signal::StopSignal;
use crate::summary::{RunSummary, ScenarioReport};
use crate::transport::Transport;
use crate::vu::{ScenarioState, VuContext, VuWork, run_vu};

/// Arrival-rate pacing granularity.
const PACER_TICK: Duration = Duration::from_millis(10);

/// Drives scenarios of one script against a transport.
#[derive(Debug)]
pub struct Scheduler<T> {
    transport: Arc<T>,
    script: Arc<Script>,
}

impl<T: Transport> Scheduler<T> {
    pub fn new(transport: T, script: Script) -> Self {
        Self {
            transport: Arc::new(transport),
            script: Arc::new(script),
        }
    }

    /// Runs all scenarios concurrently (each after its start offset) and returns one
    /// finalized report per scenario, in input order.
    ///
    /// `stop` ends every scenario early: new iterations stop starting right away and
    /// in-flight ones get the scenario's graceful stop period before they are aborted.
    ///
    /// If one scenario fails, the others are aborted before the error is returned.
    pub async fn run(&self, scenarios: Vec<ScenarioConfig>, stop: StopSignal) -> Result<RunSummary> {
        if scenarios.is_empty() {
            return Err(Error::NoScenarios);
        }

        let url = self.script.preflight()?;
        log::info!(
            "running script `{}` against {url} ({} scenario(s))",
            self.script.name,
            scenarios.len()
        );

        let count = scenarios.len();
        let mut next_vu_id: u64 = 1;
        let mut tasks = JoinSet::new();
        for (idx, scenario) in scenarios.into_iter().enumerate() {
            let first_vu_id = next_vu_id;
            next_vu_id = next_vu_id.saturating_add(scenario.executor.max_vus());

            let scenario_run = run_scenario(
                self.transport.clone(),
                self.script.clone(),
                scenario,
                first_vu_id,
                stop.clone(),
            );
            tasks.spawn(async move { (idx, scenario_run.await) });
        }

        let mut reports: Vec<Option<ScenarioReport>> = Vec::new();
        reports.resize_with(count, || None);

        while let Some(joined) = tasks.join_next().await {
            let finished = joined
                .map_err(Error::from)
                .and_then(|(idx, res)| res.map(|report| (idx, report)));

            match finished {
                Ok((idx, report)) => reports[idx] = Some(report),
                Err(err) => {
                    log::error!("scenario failed, aborting the remaining ones: {err}");
                    tasks.shutdown().await;
                    return Err(err);
                }
            }
        }

        Ok(RunSummary {
            scenarios: reports.into_iter().flatten().collect(),
        })
    }
}

async fn run_scenario<T: Transport>(
    transport: Arc<T>,
    script: Arc<Script>,
    scenario: ScenarioConfig,
    first_vu_id: u64,
    stop: StopSignal,
) -> Result<ScenarioReport> {
    let aggregator = Arc::new(ResultAggregator::new()?);
    let state = Arc::new(ScenarioState::default());

    if !scenario.start_offset.is_zero() {
        tokio::select! {
            () = tokio::time::sleep(scenario.start_offset) => {}
            () = stop.stopped() => {}
        }
    }

    if stop.is_stopped() {
        log::info!("scenario `{}` stopped before it started", scenario.name);
        let report = aggregator.finalize();
        return Ok(ScenarioReport { scenario, report });
    }

    let started = Instant::now();
    let scenario_name: Arc<str> = Arc::from(scenario.name.as_str());

    // Dropping the set (scenario aborted) stops the pacer as well.
    let mut ticker = JoinSet::new();
    let (work, pacer) = match &scenario.executor {
        ScenarioExecutor::ConstantVus { .. } => {
            let gate = Arc::new(IterationGate::new(started + scenario.duration));
            (VuWork::Constant { gate }, None)
        }
        ScenarioExecutor::RampingArrivalRate {
            start_rate,
            time_unit,
            pre_allocated_vus,
            max_vus,
            stages,
        } => {
            let schedule = RampingSchedule::new(*start_rate, stages.clone());
            let pacer = Arc::new(ArrivalPacer::new(*pre_allocated_vus, *max_vus));
            ticker.spawn(pace(pacer.clone(), schedule, *time_unit, started));
            (VuWork::RampingArrivalRate { pacer: pacer.clone() }, Some(pacer))
        }
    };

    let vus = scenario.executor.max_vus();
    log::info!(
        "scenario `{}` started: {} with {vus} VU(s) for {:?}",
        scenario.name,
        scenario.executor.kind(),
        scenario.duration
    );

    let mut set = JoinSet::new();
    for scenario_vu in 1..=vus {
        set.spawn(run_vu(VuContext {
            vu_id: first_vu_id.saturating_add(scenario_vu - 1),
            scenario: scenario_name.clone(),
            scenario_vu,
            transport: transport.clone(),
            script: script.clone(),
            aggregator: aggregator.clone(),
            state: state.clone(),
            work: work.clone(),
        }));
    }

    // Soft stop: at the deadline, or earlier on request.
    tokio::select! {
        () = tokio::time::sleep_until(started + scenario.duration) => {}
        () = stop.stopped() => {
            log::info!("scenario `{}` stopping early", scenario.name);
        }
    }
    work.close();

    let mut unstarted = 0;
    let mut capacity_exceeded_events = 0;
    if let Some(pacer) = pacer {
        ticker.shutdown().await;
        unstarted = pacer.pending();
        capacity_exceeded_events = pacer.capacity_exceeded_events();
    }

    // Hard stop: whatever is still running after the graceful period is aborted.
    let hard_deadline = Instant::now() + scenario.graceful_stop;
    let mut join_error = None;
    let drained = tokio::time::timeout_at(hard_deadline, async {
        while let Some(res) = set.join_next().await {
            if let Err(err) = res {
                join_error.get_or_insert(err);
            }
        }
    })
    .await;

    if drained.is_err() {
        log::warn!(
            "scenario `{}`: graceful stop of {:?} elapsed with {} iteration(s) in flight, aborting",
            scenario.name,
            scenario.graceful_stop,
            state.active()
        );
        set.abort_all();
        while let Some(res) = set.join_next().await {
            if let Err(err) = res
                && !err.is_cancelled()
            {
                join_error.get_or_insert(err);
            }
        }
    }

    if let Some(err) = join_error {
        return Err(Error::Join(err));
    }

    aggregator.record_scheduler_stats(SchedulerStats {
        peak_concurrency: state.peak(),
        interrupted: state.interrupted(),
        capacity_exceeded_events,
        unstarted,
    });
    let report = aggregator.finalize();

    log::info!(
        "scenario `{}` finished: {} iteration(s), {} interrupted, {} check(s) failed",
        scenario.name,
        report.iterations_total,
        report.iterations_interrupted,
        report.checks_failed
    );

    Ok(ScenarioReport { scenario, report })
}

/// Feeds due arrival-rate iterations to `pacer` until the schedule ends.
async fn pace(
    pacer: Arc<ArrivalPacer>,
    schedule: RampingSchedule,
    time_unit: Duration,
    started: Instant,
) {
    let total = schedule.total_duration();
    let mut acc = RateAccumulator::new(time_unit);
    let mut last = Duration::ZERO;

    let mut interval = tokio::time::interval_at(started, PACER_TICK);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        let elapsed = started.elapsed().min(total);
        let due = acc.due_between(
            schedule.target_at(last),
            schedule.target_at(elapsed),
            elapsed.saturating_sub(last),
        );
        last = elapsed;
        pacer.update_due(due);

        if schedule.is_done(elapsed) {
            break;
        }
    }
}
