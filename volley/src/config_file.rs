use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;

/// The `--config` YAML document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ConfigFile {
    pub base_url: Option<String>,

    /// Endpoint name (e.g. `authLogin`) to a path or an absolute url.
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,

    /// Template parameters.
    #[serde(default, deserialize_with = "deserialize_vars")]
    pub vars: BTreeMap<String, String>,

    #[serde(default)]
    pub request_timeout: Option<YamlDuration>,

    /// Accept any https certificate (self-signed test environments).
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,

    #[serde(default)]
    pub scenario: Option<ScenarioYaml>,

    #[serde(default)]
    pub scenarios: Vec<ScenarioYaml>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ScenarioYaml {
    pub name: Option<String>,

    /// Executor kind: constant-vus | ramping-arrival-rate
    pub executor: Option<String>,

    pub vus: Option<u64>,

    #[serde(default)]
    pub duration: Option<YamlDuration>,

    #[serde(default)]
    pub start_time: Option<YamlDuration>,

    #[serde(default)]
    pub graceful_stop: Option<YamlDuration>,

    // ramping-arrival-rate
    #[serde(default)]
    pub stages: Vec<StageYaml>,

    pub start_rate: Option<u64>,

    #[serde(default)]
    pub time_unit: Option<YamlDuration>,

    #[serde(rename = "preAllocatedVUs")]
    pub pre_allocated_vus: Option<u64>,

    #[serde(rename = "maxVUs")]
    pub max_vus: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct StageYaml {
    pub target: u64,

    #[serde(default)]
    pub duration: YamlDuration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    pub(crate) fn into_inner(self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(|secs| YamlDuration(Duration::from_secs(secs)))
                    .map_err(|_| E::custom("duration must not be negative"))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("duration must be a non-negative, finite number"));
                }
                Duration::try_from_secs_f64(v)
                    .map(YamlDuration)
                    .map_err(E::custom)
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let d = humantime::parse_duration(v.trim()).map_err(E::custom)?;
                Ok(YamlDuration(d))
            }
        }

        deserializer.deserialize_any(V)
    }
}

/// Accepts scalar values of any YAML type and keeps their string form.
fn deserialize_vars<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = BTreeMap::<String, serde_yaml::Value>::deserialize(deserializer)?;
    let mut out = BTreeMap::new();

    for (k, v) in raw {
        let s = match v {
            serde_yaml::Value::Null => continue,
            serde_yaml::Value::Bool(b) => b.to_string(),
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::String(s) => s,
            _ => {
                return Err(serde::de::Error::custom(format!(
                    "vars.{k} must be a string, number or bool"
                )));
            }
        };
        out.insert(k, s);
    }

    Ok(out)
}

impl ConfigFile {
    pub(crate) fn parse(bytes: &[u8]) -> anyhow::Result<Self> {
        let doc: serde_yaml::Value = serde_yaml::from_slice(bytes)?;
        if doc.is_null() {
            return Ok(Self::default());
        }

        let file: Self = serde_yaml::from_value(doc)?;
        if file.scenario.is_some() && !file.scenarios.is_empty() {
            anyhow::bail!("set either `scenario` or `scenarios`, not both");
        }
        Ok(file)
    }

    /// Scenario options as written in the file (empty when the file has none).
    pub(crate) fn scenario_options(&self) -> Vec<volley_core::ScenarioOptions> {
        let scenarios: Vec<&ScenarioYaml> = match &self.scenario {
            Some(s) => vec![s],
            None => self.scenarios.iter().collect(),
        };

        let total = scenarios.len();
        scenarios
            .into_iter()
            .enumerate()
            .map(|(idx, scenario)| {
                let default_name = if total <= 1 {
                    "default".to_string()
                } else {
                    format!("scenario_{}", idx + 1)
                };
                scenario_yaml_into_options(scenario.clone(), default_name)
            })
            .collect()
    }
}

pub(crate) async fn load(path: &Path) -> anyhow::Result<ConfigFile> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    ConfigFile::parse(&bytes).with_context(|| format!("invalid config file: {}", path.display()))
}

fn scenario_yaml_into_options(
    scenario: ScenarioYaml,
    default_name: String,
) -> volley_core::ScenarioOptions {
    let ScenarioYaml {
        name,
        executor,
        vus,
        duration,
        start_time,
        graceful_stop,
        stages,
        start_rate,
        time_unit,
        pre_allocated_vus,
        max_vus,
    } = scenario;

    volley_core::ScenarioOptions {
        name: name.unwrap_or(default_name),
        executor,
        vus,
        duration: duration.map(YamlDuration::into_inner),
        start_time: start_time.map(YamlDuration::into_inner),
        graceful_stop: graceful_stop.map(YamlDuration::into_inner),
        stages: stages
            .into_iter()
            .map(|s| volley_core::Stage {
                duration: s.duration.into_inner(),
                target: s.target,
            })
            .collect(),
        start_rate,
        time_unit: time_unit.map(YamlDuration::into_inner),
        pre_allocated_vus,
        max_vus,
    }
}
