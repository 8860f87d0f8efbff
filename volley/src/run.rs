use std::time::Duration;

use anyhow::Context as _;

use volley_core::{HttpClient, Scheduler, StopSignal};

use crate::cli::RunArgs;
use crate::config_file::{self, ConfigFile};
use crate::env_config::{Settings, merged_env};
use crate::exit_codes::ExitCode;
use crate::output;
use crate::run_error::RunError;
use crate::scripts::BuiltinScript;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);

    let builtin: BuiltinScript = args.script_id.parse().map_err(|_| {
        RunError::InvalidInput(anyhow::anyhow!(
            "unknown script `{}` (see `volley list`)",
            args.script_id
        ))
    })?;

    let env = merged_env(&args.env).map_err(RunError::InvalidInput)?;

    let file = match &args.config {
        Some(path) => config_file::load(path).await.map_err(RunError::InvalidInput)?,
        None => ConfigFile::default(),
    };

    let mut settings = Settings::resolve(file, &env).map_err(RunError::InvalidInput)?;
    settings.overrides =
        std::mem::take(&mut settings.overrides).with_cli(args.vus, args.duration);

    let script = builtin.build(&settings).map_err(RunError::InvalidInput)?;
    script
        .preflight()
        .with_context(|| format!("script `{}` has an invalid request url", script.name))
        .map_err(RunError::InvalidInput)?;

    let scenarios = builtin
        .scenarios(&settings)
        .into_iter()
        .map(|opts| {
            let name = opts.name.clone();
            opts.validate()
                .with_context(|| format!("invalid scenario `{name}`"))
        })
        .collect::<anyhow::Result<Vec<_>>>()
        .map_err(RunError::InvalidInput)?;

    let client = if settings.insecure_skip_tls_verify {
        log::warn!("tls certificate verification is disabled");
        HttpClient::insecure(Some(CONNECT_TIMEOUT))
            .context("failed to set up the http client")
            .map_err(RunError::RuntimeError)?
    } else {
        HttpClient::new(Some(CONNECT_TIMEOUT))
    };

    out.print_header(&script, &scenarios);

    let stop = StopSignal::new();
    let ctrl_c = tokio::spawn(stop_on_ctrl_c(stop.clone()));

    let scheduler = Scheduler::new(client, script);
    let result = scheduler.run(scenarios, stop).await;
    ctrl_c.abort();

    let summary = result
        .context("load test failed")
        .map_err(RunError::RuntimeError)?;

    out.print_summary(&summary).map_err(RunError::RuntimeError)?;

    Ok(ExitCode::from_checks(
        summary.checks_failed() > 0,
        args.fail_on_check_failures,
    ))
}

/// Ctrl-C stops new iterations; in-flight ones still get their graceful stop.
async fn stop_on_ctrl_c(stop: StopSignal) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            eprintln!("interrupted, stopping (in-flight iterations get their graceful stop)");
            stop.stop();
        }
        Err(err) => log::warn!("failed to listen for ctrl-c: {err}"),
    }
}

pub fn list() {
    for script in BuiltinScript::ALL {
        let id = script.to_string();
        println!("{id:<20} {}", script.description());
    }
}
