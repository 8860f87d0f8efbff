mod format;
mod summary;

use format::format_duration;
use summary::render;

use super::OutputFormatter;

pub(crate) struct HumanReadableOutput;

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, script: &volley_core::Script, scenarios: &[volley_core::ScenarioConfig]) {
        println!(
            "script: {} ({} {})",
            script.name, script.template.method, script.template.url
        );
        for s in scenarios {
            println!(
                "scenario: {} executor={} max_vus={} duration={} start_time={} graceful_stop={}",
                s.name,
                s.executor.kind(),
                s.executor.max_vus(),
                format_duration(s.duration),
                format_duration(s.start_offset),
                format_duration(s.graceful_stop)
            );
        }
        if !scenarios.is_empty() {
            println!();
        }
    }

    fn print_summary(&self, summary: &volley_core::RunSummary) -> anyhow::Result<()> {
        print!("{}", render(summary));
        Ok(())
    }
}
