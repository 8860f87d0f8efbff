use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write as _;

use volley_core::{RunSummary, ScenarioExecutor};

use super::OutputFormatter;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _script: &volley_core::Script, _scenarios: &[volley_core::ScenarioConfig]) {
    }

    fn print_summary(&self, summary: &RunSummary) -> anyhow::Result<()> {
        let line = build_summary_line(summary);
        emit_json_line(&line)
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine {
    pub kind: &'static str,
    pub scenarios: Vec<JsonScenarioSummary>,
    pub totals: JsonTotals,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonScenarioSummary {
    pub scenario: String,
    pub executor: String,
    pub duration_secs: f64,

    pub iterations_total: u64,
    pub iterations_failed: u64,
    pub iterations_interrupted: u64,
    pub iterations_unstarted: u64,
    pub peak_concurrency: u64,
    pub capacity_exceeded_events: u64,

    pub checks_total: u64,
    pub checks_passed: u64,
    pub checks_failed: u64,
    pub checks: Vec<JsonCheckSummary>,

    pub network_errors_total: u64,
    pub network_errors: BTreeMap<String, u64>,
    pub render_errors_total: u64,
    pub transport_panics_total: u64,

    pub latency: Option<JsonLatencySummary>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonCheckSummary {
    pub name: String,
    pub passed: u64,
    pub failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_failure: Option<String>,
}

/// Microseconds.
#[derive(Debug, Serialize)]
pub(crate) struct JsonLatencySummary {
    pub count: u64,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub p50: u64,
    pub p90: u64,
    pub p95: u64,
    pub p99: u64,
}

#[derive(Debug, Serialize, Default)]
pub(crate) struct JsonTotals {
    pub iterations_total: u64,
    pub checks_passed_total: u64,
    pub checks_failed_total: u64,
    pub network_errors_total: u64,
}

fn build_summary_line(summary: &RunSummary) -> JsonSummaryLine {
    let mut totals = JsonTotals::default();
    let scenarios = summary
        .scenarios
        .iter()
        .map(|s| {
            let r = &s.report;
            totals.iterations_total = totals.iterations_total.saturating_add(r.iterations_total);
            totals.checks_passed_total = totals.checks_passed_total.saturating_add(r.checks_passed);
            totals.checks_failed_total = totals.checks_failed_total.saturating_add(r.checks_failed);
            totals.network_errors_total = totals
                .network_errors_total
                .saturating_add(r.network_errors_total());

            let capacity_exceeded_events = match s.scenario.executor {
                ScenarioExecutor::RampingArrivalRate { .. } => r.capacity_exceeded_events,
                ScenarioExecutor::ConstantVus { .. } => 0,
            };

            JsonScenarioSummary {
                scenario: s.scenario.name.clone(),
                executor: s.scenario.executor.kind().to_string(),
                duration_secs: s.scenario.duration.as_secs_f64(),
                iterations_total: r.iterations_total,
                iterations_failed: r.iterations_failed,
                iterations_interrupted: r.iterations_interrupted,
                iterations_unstarted: r.iterations_unstarted,
                peak_concurrency: r.peak_concurrency,
                capacity_exceeded_events,
                checks_total: r.checks_total,
                checks_passed: r.checks_passed,
                checks_failed: r.checks_failed,
                checks: r
                    .checks_by_name
                    .iter()
                    .map(|c| JsonCheckSummary {
                        name: c.name.clone(),
                        passed: c.passed,
                        failed: c.failed,
                        first_failure: c.first_failure.clone(),
                    })
                    .collect(),
                network_errors_total: r.network_errors_total(),
                network_errors: r
                    .network_errors
                    .iter()
                    .map(|(k, v)| (k.to_string(), *v))
                    .collect(),
                render_errors_total: r.render_errors,
                transport_panics_total: r.transport_panics,
                latency: r.latency.as_ref().map(|l| JsonLatencySummary {
                    count: l.count,
                    min: l.min_us,
                    max: l.max_us,
                    mean: l.mean_us,
                    p50: l.p50_us,
                    p90: l.p90_us,
                    p95: l.p95_us,
                    p99: l.p99_us,
                }),
            }
        })
        .collect::<Vec<_>>();

    JsonSummaryLine {
        kind: "summary",
        scenarios,
        totals,
    }
}

fn emit_json_line<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    let mut lock = stdout.lock();
    serde_json::to_writer(&mut lock, value)?;
    writeln!(lock)?;
    Ok(())
}
