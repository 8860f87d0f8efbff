use std::time::Duration;

use volley_core::{BodyBuilder, Check, RequestTemplate, ScenarioOptions, Script};

use crate::env_config::{BASE_URL, LOGIN_NAME, LOGIN_PASSWORD, Settings};

pub(crate) const LOGIN_CHECK: &str = "HTTP status code for login is 200";

/// Request scripts compiled into the binary, addressed by id on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
pub(crate) enum BuiltinScript {
    #[strum(serialize = "auth-login")]
    AuthLogin,

    #[strum(serialize = "auth-login-ramping")]
    AuthLoginRamping,
}

impl BuiltinScript {
    pub(crate) const ALL: [Self; 2] = [Self::AuthLogin, Self::AuthLoginRamping];

    pub(crate) fn description(self) -> &'static str {
        match self {
            Self::AuthLogin => {
                "POST credentials to authLogin with constant VUs (VUS x TEST_DURATION)"
            }
            Self::AuthLoginRamping => {
                "POST credentials to authLogin at a ramping arrival rate (RAMPING_UP_*, STAY_*, RAMPING_DOWN_*)"
            }
        }
    }

    /// Scenario used when the config file doesn't define any.
    pub(crate) fn default_scenario(self) -> ScenarioOptions {
        match self {
            Self::AuthLogin => ScenarioOptions {
                name: "constant_load".to_string(),
                executor: Some("constant-vus".to_string()),
                start_time: Some(Duration::ZERO),
                graceful_stop: Some(Duration::from_secs(30)),
                ..ScenarioOptions::default()
            },
            Self::AuthLoginRamping => ScenarioOptions {
                name: "ramping_load".to_string(),
                executor: Some("ramping-arrival-rate".to_string()),
                start_rate: Some(0),
                time_unit: Some(Duration::from_secs(1)),
                start_time: Some(Duration::ZERO),
                graceful_stop: Some(Duration::from_secs(30)),
                ..ScenarioOptions::default()
            },
        }
    }

    /// Scenarios for this run: the file's (or the default), with env/CLI overrides applied.
    pub(crate) fn scenarios(self, settings: &Settings) -> Vec<ScenarioOptions> {
        let mut scenarios = if settings.scenarios.is_empty() {
            vec![self.default_scenario()]
        } else {
            settings.scenarios.clone()
        };

        for opts in &mut scenarios {
            settings.overrides.apply(opts);
        }
        scenarios
    }

    pub(crate) fn build(self, settings: &Settings) -> anyhow::Result<Script> {
        let url = settings.auth_login_url()?;
        settings.require_var(LOGIN_NAME)?;
        settings.require_var(LOGIN_PASSWORD)?;

        let mut params = settings.vars.clone();
        if let Some(base) = &settings.base_url {
            params
                .entry(BASE_URL.to_string())
                .or_insert_with(|| base.clone());
        }

        // Credentials go through parameters so they are never parsed as templates.
        let template = RequestTemplate::post(escape_template(&url))
            .with_header("Content-Type", "application/json")
            .with_body(BodyBuilder::Json(serde_json::json!({
                "loginName": format!("${{{LOGIN_NAME}}}"),
                "loginPassword": format!("${{{LOGIN_PASSWORD}}}"),
            })))
            .with_timeout(settings.request_timeout);

        Ok(Script::new(self.to_string(), template)
            .with_check(Check::status(LOGIN_CHECK, 200))
            .with_params(params))
    }
}

/// Keeps a literal `${` in a resolved url from being read as a parameter.
fn escape_template(url: &str) -> String {
    url.replace("${", "$%7B")
}
