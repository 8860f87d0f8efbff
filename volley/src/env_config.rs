use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context as _;
use volley_core::{ScenarioExecutorKind, ScenarioOptions, Stage};

use crate::cli::parse_duration;
use crate::config_file::{ConfigFile, YamlDuration};

pub(crate) const VUS: &str = "VUS";
pub(crate) const TEST_DURATION: &str = "TEST_DURATION";
pub(crate) const BASE_URL: &str = "BASE_URL";
pub(crate) const AUTH_LOGIN_ENDPOINT: &str = "AUTH_LOGIN_ENDPOINT";
pub(crate) const LOGIN_NAME: &str = "LOGIN_NAME";
pub(crate) const LOGIN_PASSWORD: &str = "LOGIN_PASSWORD";
pub(crate) const INSECURE_SKIP_TLS_VERIFY: &str = "INSECURE_SKIP_TLS_VERIFY";

/// Ramping stages in order, as (rate variable, time variable).
const RAMPING_STAGE_VARS: [(&str, &str); 3] = [
    ("RAMPING_UP_RATE", "RAMPING_UP_TIME"),
    ("STAY_RATE", "STAY_TIME"),
    ("RAMPING_DOWN_RATE", "RAMPING_DOWN_TIME"),
];

pub(crate) const DEFAULT_AUTH_LOGIN_ENDPOINT: &str = "/auth/login";

/// Process environment merged with `--env` overrides.
pub(crate) type EnvVars = BTreeMap<String, String>;

pub(crate) fn merged_env(overrides: &[String]) -> anyhow::Result<EnvVars> {
    let mut map: EnvVars = std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect();

    for raw in overrides {
        let (k, v) = parse_env_override(raw)?;
        map.insert(k, v);
    }

    Ok(map)
}

fn parse_env_override(s: &str) -> anyhow::Result<(String, String)> {
    let (k, v) = s
        .split_once('=')
        .with_context(|| format!("invalid --env (expected KEY=VALUE): {s}"))?;
    if k.is_empty() {
        anyhow::bail!("invalid --env (empty KEY): {s}");
    }
    Ok((k.to_string(), v.to_string()))
}

fn non_empty<'a>(env: &'a EnvVars, key: &str) -> Option<&'a str> {
    env.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn env_bool(env: &EnvVars, key: &str) -> anyhow::Result<Option<bool>> {
    non_empty(env, key)
        .map(|v| match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => anyhow::bail!("{key} must be true or false (got `{v}`)"),
        })
        .transpose()
}

fn env_u64(env: &EnvVars, key: &str) -> anyhow::Result<Option<u64>> {
    non_empty(env, key)
        .map(|v| {
            v.parse::<u64>()
                .with_context(|| format!("{key} must be a non-negative integer (got `{v}`)"))
        })
        .transpose()
}

fn env_duration(env: &EnvVars, key: &str) -> anyhow::Result<Option<Duration>> {
    non_empty(env, key)
        .map(|v| {
            parse_duration(v)
                .or_else(|_| humantime::parse_duration(v))
                .map_err(|_| anyhow::anyhow!("{key} must be a duration like 30s or 1m (got `{v}`)"))
        })
        .transpose()
}

/// Scenario shape overrides shared by every scenario of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ScenarioOverrides {
    pub vus: Option<u64>,
    pub duration: Option<Duration>,
    /// Arrival-rate stages built from the `RAMPING_*`/`STAY_*` pairs.
    pub stages: Option<Vec<Stage>>,
}

impl ScenarioOverrides {
    pub(crate) fn from_env(env: &EnvVars) -> anyhow::Result<Self> {
        let mut stages = Vec::new();
        for (rate_key, time_key) in RAMPING_STAGE_VARS {
            match (env_u64(env, rate_key)?, env_duration(env, time_key)?) {
                (Some(target), Some(duration)) => stages.push(Stage { duration, target }),
                (None, None) => {}
                (Some(_), None) => anyhow::bail!("{rate_key} is set but {time_key} is not"),
                (None, Some(_)) => anyhow::bail!("{time_key} is set but {rate_key} is not"),
            }
        }

        Ok(Self {
            vus: env_u64(env, VUS)?,
            duration: env_duration(env, TEST_DURATION)?,
            stages: (!stages.is_empty()).then_some(stages),
        })
    }

    /// CLI flags win over whatever the environment set.
    #[must_use]
    pub(crate) fn with_cli(mut self, vus: Option<u64>, duration: Option<Duration>) -> Self {
        if vus.is_some() {
            self.vus = vus;
        }
        if duration.is_some() {
            self.duration = duration;
        }
        self
    }

    pub(crate) fn apply(&self, opts: &mut ScenarioOptions) {
        let kind = opts
            .executor
            .as_deref()
            .and_then(|e| e.parse::<ScenarioExecutorKind>().ok());

        if let Some(vus) = self.vus {
            opts.vus = Some(vus);
        }

        match kind {
            Some(ScenarioExecutorKind::RampingArrivalRate) => {
                if let Some(stages) = &self.stages {
                    opts.stages.clone_from(stages);
                }
                if self.duration.is_some() {
                    log::warn!(
                        "scenario `{}`: {TEST_DURATION}/--duration ignored, stages define its length",
                        opts.name
                    );
                }
            }
            // Unknown executors are left for validation to reject.
            _ => {
                if let Some(duration) = self.duration {
                    opts.duration = Some(duration);
                }
            }
        }
    }
}

/// Everything a built-in script needs, with the file < env < CLI precedence applied.
#[derive(Debug, Clone, Default)]
pub(crate) struct Settings {
    pub base_url: Option<String>,
    /// `authLogin` endpoint: a path joined to `base_url`, or an absolute url.
    pub auth_login: String,
    pub vars: BTreeMap<String, String>,
    pub request_timeout: Option<Duration>,
    pub insecure_skip_tls_verify: bool,
    /// Scenarios from the config file; empty means "use the script's default".
    pub scenarios: Vec<ScenarioOptions>,
    pub overrides: ScenarioOverrides,
}

impl Settings {
    pub(crate) fn resolve(file: ConfigFile, env: &EnvVars) -> anyhow::Result<Self> {
        let scenarios = file.scenario_options();
        let overrides = ScenarioOverrides::from_env(env)?;

        let base_url = non_empty(env, BASE_URL)
            .map(str::to_string)
            .or(file.base_url);

        let auth_login = non_empty(env, AUTH_LOGIN_ENDPOINT)
            .map(str::to_string)
            .or_else(|| file.endpoints.get("authLogin").cloned())
            .unwrap_or_else(|| DEFAULT_AUTH_LOGIN_ENDPOINT.to_string());

        let insecure_skip_tls_verify =
            env_bool(env, INSECURE_SKIP_TLS_VERIFY)?.unwrap_or(file.insecure_skip_tls_verify);

        let mut vars = file.vars;
        for key in [LOGIN_NAME, LOGIN_PASSWORD] {
            if let Some(v) = env.get(key) {
                vars.insert(key.to_string(), v.clone());
            }
        }

        Ok(Self {
            base_url,
            auth_login,
            vars,
            request_timeout: file.request_timeout.map(YamlDuration::into_inner),
            insecure_skip_tls_verify,
            scenarios,
            overrides,
        })
    }

    /// Absolute url of the `authLogin` endpoint.
    pub(crate) fn auth_login_url(&self) -> anyhow::Result<String> {
        let endpoint = self.auth_login.trim();
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return Ok(endpoint.to_string());
        }

        let base = self.base_url.as_deref().map(str::trim).context(
            "no base url: set `baseUrl` in the config file or BASE_URL in the environment",
        )?;

        Ok(format!(
            "{}/{}",
            base.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        ))
    }

    pub(crate) fn require_var(&self, key: &str) -> anyhow::Result<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .with_context(|| {
                format!("{key} is not set: add it to `vars` in the config file or the environment")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> EnvVars {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn file(yaml: &str) -> ConfigFile {
        ConfigFile::parse(yaml.as_bytes()).unwrap_or_else(|err| panic!("parse failed: {err:#}"))
    }

    #[test]
    fn parse_env_override_splits_on_first_equals() {
        assert_eq!(
            parse_env_override("A=b=c").ok(),
            Some(("A".to_string(), "b=c".to_string()))
        );
        assert_eq!(
            parse_env_override("EMPTY=").ok(),
            Some(("EMPTY".to_string(), String::new()))
        );
        assert!(parse_env_override("NOPE").is_err());
        assert!(parse_env_override("=value").is_err());
    }

    #[test]
    fn merged_env_applies_overrides_last() {
        let merged = merged_env(&["VOLLEY_TEST_ONLY_KEY=1".to_string(), "VOLLEY_TEST_ONLY_KEY=2".to_string()])
            .unwrap_or_else(|err| panic!("merge failed: {err:#}"));
        assert_eq!(merged.get("VOLLEY_TEST_ONLY_KEY").map(String::as_str), Some("2"));
    }

    #[test]
    fn insecure_tls_comes_from_file_or_env() {
        let from_file = Settings::resolve(file("insecureSkipTlsVerify: true\n"), &env(&[]))
            .unwrap_or_else(|err| panic!("resolve failed: {err:#}"));
        assert!(from_file.insecure_skip_tls_verify);

        let env_wins = Settings::resolve(
            file("insecureSkipTlsVerify: true\n"),
            &env(&[(INSECURE_SKIP_TLS_VERIFY, "false")]),
        )
        .unwrap_or_else(|err| panic!("resolve failed: {err:#}"));
        assert!(!env_wins.insecure_skip_tls_verify);

        let from_env =
            Settings::resolve(ConfigFile::default(), &env(&[(INSECURE_SKIP_TLS_VERIFY, "1")]))
                .unwrap_or_else(|err| panic!("resolve failed: {err:#}"));
        assert!(from_env.insecure_skip_tls_verify);

        assert!(
            Settings::resolve(ConfigFile::default(), &env(&[(INSECURE_SKIP_TLS_VERIFY, "maybe")]))
                .is_err()
        );
    }

    #[test]
    fn env_overrides_file() {
        let settings = Settings::resolve(
            file(
                r#"
baseUrl: http://file.example
endpoints: { authLogin: /from-file }
vars: { LOGIN_NAME: file-user, LOGIN_PASSWORD: file-pass, OTHER: x }
"#,
            ),
            &env(&[
                (BASE_URL, "http://env.example/"),
                (LOGIN_PASSWORD, "env-pass"),
            ]),
        )
        .unwrap_or_else(|err| panic!("resolve failed: {err:#}"));

        assert_eq!(settings.base_url.as_deref(), Some("http://env.example/"));
        assert_eq!(settings.vars.get(LOGIN_NAME).map(String::as_str), Some("file-user"));
        assert_eq!(settings.vars.get(LOGIN_PASSWORD).map(String::as_str), Some("env-pass"));
        assert_eq!(settings.vars.get("OTHER").map(String::as_str), Some("x"));
        assert_eq!(
            settings.auth_login_url().ok().as_deref(),
            Some("http://env.example/from-file")
        );
    }

    #[test]
    fn auth_login_endpoint_defaults_and_absolute_urls() {
        let mut settings = Settings::resolve(
            file("baseUrl: http://base.example\n"),
            &EnvVars::new(),
        )
        .unwrap_or_else(|err| panic!("resolve failed: {err:#}"));
        assert_eq!(
            settings.auth_login_url().ok().as_deref(),
            Some("http://base.example/auth/login")
        );

        settings.auth_login = "https://other.example/login".to_string();
        settings.base_url = None;
        assert_eq!(
            settings.auth_login_url().ok().as_deref(),
            Some("https://other.example/login")
        );

        settings.auth_login = "/login".to_string();
        assert!(settings.auth_login_url().is_err());
    }

    #[test]
    fn require_var_rejects_missing_and_empty() {
        let settings = Settings::resolve(
            ConfigFile::default(),
            &env(&[(LOGIN_NAME, ""), (LOGIN_PASSWORD, "p")]),
        )
        .unwrap_or_else(|err| panic!("resolve failed: {err:#}"));

        assert!(settings.require_var(LOGIN_NAME).is_err());
        assert_eq!(settings.require_var(LOGIN_PASSWORD).ok(), Some("p"));
        assert!(settings.require_var("MISSING").is_err());
    }

    #[test]
    fn overrides_from_env() {
        let o = ScenarioOverrides::from_env(&env(&[
            (VUS, "7"),
            (TEST_DURATION, "2m"),
            ("RAMPING_UP_RATE", "100"),
            ("RAMPING_UP_TIME", "30s"),
            ("RAMPING_DOWN_RATE", "0"),
            ("RAMPING_DOWN_TIME", "10s"),
        ]))
        .unwrap_or_else(|err| panic!("overrides failed: {err:#}"));

        assert_eq!(o.vus, Some(7));
        assert_eq!(o.duration, Some(Duration::from_secs(120)));
        assert_eq!(
            o.stages,
            Some(vec![
                Stage {
                    duration: Duration::from_secs(30),
                    target: 100
                },
                Stage {
                    duration: Duration::from_secs(10),
                    target: 0
                },
            ])
        );
    }

    #[test]
    fn overrides_reject_bad_values() {
        assert!(ScenarioOverrides::from_env(&env(&[(VUS, "lots")])).is_err());
        assert!(ScenarioOverrides::from_env(&env(&[(TEST_DURATION, "soon")])).is_err());
        assert!(ScenarioOverrides::from_env(&env(&[("STAY_RATE", "5")])).is_err());
        assert!(ScenarioOverrides::from_env(&env(&[("STAY_TIME", "5s")])).is_err());
    }

    #[test]
    fn blank_env_values_are_unset() {
        let o = ScenarioOverrides::from_env(&env(&[(VUS, ""), (TEST_DURATION, "  ")]))
            .unwrap_or_else(|err| panic!("overrides failed: {err:#}"));
        assert_eq!(o, ScenarioOverrides::default());
    }

    #[test]
    fn cli_wins_over_env() {
        let o = ScenarioOverrides {
            vus: Some(3),
            duration: Some(Duration::from_secs(5)),
            stages: None,
        }
        .with_cli(Some(9), None);

        assert_eq!(o.vus, Some(9));
        assert_eq!(o.duration, Some(Duration::from_secs(5)));
    }

    #[test]
    fn apply_targets_the_executor() {
        let o = ScenarioOverrides {
            vus: Some(4),
            duration: Some(Duration::from_secs(20)),
            stages: Some(vec![Stage {
                duration: Duration::from_secs(1),
                target: 10,
            }]),
        };

        let mut constant = ScenarioOptions {
            duration: Some(Duration::from_secs(1)),
            ..ScenarioOptions::default()
        };
        o.apply(&mut constant);
        assert_eq!(constant.vus, Some(4));
        assert_eq!(constant.duration, Some(Duration::from_secs(20)));
        assert!(constant.stages.is_empty());

        let mut ramping = ScenarioOptions {
            executor: Some("ramping-arrival-rate".to_string()),
            ..ScenarioOptions::default()
        };
        o.apply(&mut ramping);
        assert_eq!(ramping.vus, Some(4));
        assert_eq!(ramping.duration, None);
        assert_eq!(ramping.stages.len(), 1);
    }
}
