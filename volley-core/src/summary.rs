use crate::aggregator::AggregateReport;
use crate::config::ScenarioConfig;

#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub scenario: ScenarioConfig,
    pub report: AggregateReport,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub scenarios: Vec<ScenarioReport>,
}

impl RunSummary {
    pub fn checks_failed(&self) -> u64 {
        self.scenarios.iter().map(|s| s.report.checks_failed).sum()
    }

    pub fn iterations_total(&self) -> u64 {
        self.scenarios.iter().map(|s| s.report.iterations_total).sum()
    }

    pub fn network_errors_total(&self) -> u64 {
        self.scenarios
            .iter()
            .map(|s| s.report.network_errors_total())
            .sum()
    }
}
