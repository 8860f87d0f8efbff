use std::fmt::Write as _;

use volley_core::{AggregateReport, RunSummary, ScenarioExecutor};

use super::format::{format_duration, format_micros, format_percent, format_rate};

pub(crate) fn render(summary: &RunSummary) -> String {
    let mut out = String::new();

    if summary.scenarios.is_empty() {
        out.push_str("summary: no scenarios\n");
        return out;
    }

    out.push_str("summary\n");

    let mut totals = Totals::default();

    for s in &summary.scenarios {
        let r = &s.report;
        totals.add(r);

        writeln!(&mut out, "scenario: {}", s.scenario.name).ok();
        writeln!(
            &mut out,
            "  iterations: {} (failed {}, interrupted {}, peak concurrency {})",
            r.iterations_total, r.iterations_failed, r.iterations_interrupted, r.peak_concurrency
        )
        .ok();

        let secs = s.scenario.duration.as_secs_f64();
        if secs > 0.0 {
            writeln!(
                &mut out,
                "  rate: {} iterations/s over {}",
                format_rate((r.iterations_total as f64) / secs),
                format_duration(s.scenario.duration)
            )
            .ok();
        }

        if let ScenarioExecutor::RampingArrivalRate { max_vus, .. } = &s.scenario.executor {
            writeln!(
                &mut out,
                "  arrival rate: unstarted {}, capacity exceeded {} time(s) (max_vus={max_vus})",
                r.iterations_unstarted, r.capacity_exceeded_events
            )
            .ok();
        }

        render_checks(r, &mut out);
        render_errors(r, &mut out);

        if let Some(h) = &r.latency {
            writeln!(
                out,
                "  latency = p50={} p90={} p95={} p99={} mean={} max={} (n={})",
                format_micros(h.p50_us as f64),
                format_micros(h.p90_us as f64),
                format_micros(h.p95_us as f64),
                format_micros(h.p99_us as f64),
                format_micros(h.mean_us),
                format_micros(h.max_us as f64),
                h.count
            )
            .ok();
        } else {
            out.push_str("  latency: n/a\n");
        }

        out.push('\n');
    }

    out.push_str("totals\n");
    writeln!(
        &mut out,
        "  iterations: {} (failed {}, interrupted {})",
        totals.iterations_total, totals.iterations_failed, totals.iterations_interrupted
    )
    .ok();
    writeln!(
        &mut out,
        "  checks: {} passed, {} failed",
        totals.checks_passed, totals.checks_failed
    )
    .ok();
    writeln!(&mut out, "  network_errors_total: {}", totals.network_errors).ok();

    out
}

fn render_checks(r: &AggregateReport, out: &mut String) {
    if r.checks_total == 0 {
        out.push_str("  checks: none recorded\n");
        return;
    }

    writeln!(
        out,
        "  checks: {} total, {} passed, {} failed ({} failed)",
        r.checks_total,
        r.checks_passed,
        r.checks_failed,
        format_percent(r.checks_failed, r.checks_total)
    )
    .ok();

    for c in &r.checks_by_name {
        let mark = if c.failed == 0 { "ok  " } else { "FAIL" };
        writeln!(
            out,
            "    {mark} {}: {} passed, {} failed",
            c.name, c.passed, c.failed
        )
        .ok();
        if let Some(diag) = &c.first_failure {
            writeln!(out, "         first failure: {diag}").ok();
        }
    }
}

fn render_errors(r: &AggregateReport, out: &mut String) {
    let network = r.network_errors_total();
    if network == 0 {
        out.push_str("  network errors: 0\n");
    } else {
        let by_kind = r
            .network_errors
            .iter()
            .map(|(kind, n)| format!("{kind}={n}"))
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(out, "  network errors: {network} ({by_kind})").ok();
    }

    if r.render_errors > 0 {
        writeln!(out, "  render errors: {}", r.render_errors).ok();
    }
    if r.transport_panics > 0 {
        writeln!(out, "  transport panics: {}", r.transport_panics).ok();
    }
}

#[derive(Default)]
struct Totals {
    iterations_total: u64,
    iterations_failed: u64,
    iterations_interrupted: u64,
    checks_passed: u64,
    checks_failed: u64,
    network_errors: u64,
}

impl Totals {
    fn add(&mut self, r: &AggregateReport) {
        self.iterations_total = self.iterations_total.saturating_add(r.iterations_total);
        self.iterations_failed = self.iterations_failed.saturating_add(r.iterations_failed);
        self.iterations_interrupted = self
            .iterations_interrupted
            .saturating_add(r.iterations_interrupted);
        self.checks_passed = self.checks_passed.saturating_add(r.checks_passed);
        self.checks_failed = self.checks_failed.saturating_add(r.checks_failed);
        self.network_errors = self.network_errors.saturating_add(r.network_errors_total());
    }
}
