use std::time::Duration;

/// Grace period used when a scenario doesn't set `gracefulStop`.
pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    /// Target arrival rate (iterations per `time_unit`) reached at the end of the stage.
    pub target: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioExecutor {
    /// A fixed number of VUs, each looping iterations back to back.
    ConstantVus { vus: u64 },

    /// Open-model arrival rate (iterations started per `time_unit`), with ramping stages.
    RampingArrivalRate {
        start_rate: u64,
        time_unit: Duration,
        pre_allocated_vus: u64,
        max_vus: u64,
        stages: Vec<Stage>,
    },
}

impl ScenarioExecutor {
    #[must_use]
    pub fn kind(&self) -> ScenarioExecutorKind {
        match self {
            Self::ConstantVus { .. } => ScenarioExecutorKind::ConstantVus,
            Self::RampingArrivalRate { .. } => ScenarioExecutorKind::RampingArrivalRate,
        }
    }

    /// Upper bound on VU tasks the scheduler spawns for this executor.
    #[must_use]
    pub fn max_vus(&self) -> u64 {
        match self {
            Self::ConstantVus { vus } => *vus,
            Self::RampingArrivalRate { max_vus, .. } => *max_vus,
        }
    }
}

/// Scenario executor kind (the string form used by config files and env).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumString, strum::Display)]
pub enum ScenarioExecutorKind {
    #[strum(serialize = "constant-vus", serialize = "constant")]
    ConstantVus,

    #[strum(serialize = "ramping-arrival-rate", serialize = "ramping-rps")]
    RampingArrivalRate,
}

/// A validated scenario. Only [`validate`] builds these from user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioConfig {
    pub name: String,
    pub executor: ScenarioExecutor,
    /// Nominal run length. For arrival-rate scenarios this is the sum of all stages.
    pub duration: Duration,
    pub start_offset: Duration,
    pub graceful_stop: Duration,
}

/// Unvalidated scenario options, as read from a config file or the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioOptions {
    pub name: String,

    /// Scenario executor. If missing, defaults to constant VUs.
    pub executor: Option<String>,

    pub vus: Option<u64>,
    pub duration: Option<Duration>,
    pub start_time: Option<Duration>,
    pub graceful_stop: Option<Duration>,

    // Ramping arrival rate
    pub stages: Vec<Stage>,
    pub start_rate: Option<u64>,
    pub time_unit: Option<Duration>,
    pub pre_allocated_vus: Option<u64>,
    pub max_vus: Option<u64>,
}

impl ScenarioOptions {
    pub fn validate(self) -> Result<ScenarioConfig, ConfigError> {
        validate(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("`vus` must be a positive integer")]
    InvalidVuCount,

    #[error("`stages` must be a non-empty list of {{ duration, target }} for `ramping-arrival-rate`")]
    EmptyStages,

    #[error("`{0}` must be a positive duration")]
    NonPositiveDuration(&'static str),

    #[error("`duration` is required for `constant-vus`")]
    MissingDuration,

    #[error(
        "invalid `executor` `{0}` (expected `constant-vus` or `ramping-arrival-rate`)"
    )]
    InvalidExecutor(String),

    #[error("`timeUnit` must be a positive duration")]
    InvalidTimeUnit,

    #[error("`maxVUs` must be >= `preAllocatedVUs`")]
    InvalidMaxVus,
}

pub fn validate(opts: ScenarioOptions) -> Result<ScenarioConfig, ConfigError> {
    let executor_name = opts.executor.as_deref().unwrap_or("constant-vus");
    let executor_kind: ScenarioExecutorKind = executor_name
        .parse()
        .map_err(|_| ConfigError::InvalidExecutor(executor_name.to_string()))?;

    if opts.vus == Some(0) {
        return Err(ConfigError::InvalidVuCount);
    }

    let name = if opts.name.is_empty() {
        "default".to_string()
    } else {
        opts.name
    };
    let start_offset = opts.start_time.unwrap_or(Duration::ZERO);
    let graceful_stop = opts.graceful_stop.unwrap_or(DEFAULT_GRACEFUL_STOP);

    match executor_kind {
        ScenarioExecutorKind::ConstantVus => {
            let vus = opts.vus.unwrap_or(1);
            let duration = opts.duration.ok_or(ConfigError::MissingDuration)?;
            if duration.is_zero() {
                return Err(ConfigError::NonPositiveDuration("duration"));
            }

            Ok(ScenarioConfig {
                name,
                executor: ScenarioExecutor::ConstantVus { vus },
                duration,
                start_offset,
                graceful_stop,
            })
        }
        ScenarioExecutorKind::RampingArrivalRate => {
            if opts.stages.is_empty() {
                return Err(ConfigError::EmptyStages);
            }
            if opts.stages.iter().any(|st| st.duration.is_zero()) {
                return Err(ConfigError::NonPositiveDuration("stages[].duration"));
            }
            if opts.duration.is_some_and(|d| d.is_zero()) {
                return Err(ConfigError::NonPositiveDuration("duration"));
            }

            let time_unit = opts.time_unit.unwrap_or(Duration::from_secs(1));
            if time_unit.is_zero() {
                return Err(ConfigError::InvalidTimeUnit);
            }

            let pre_allocated_vus = opts.pre_allocated_vus.or(opts.vus).unwrap_or(1);
            if pre_allocated_vus == 0 {
                return Err(ConfigError::InvalidVuCount);
            }

            let max_vus = opts.max_vus.unwrap_or(pre_allocated_vus);
            if max_vus < pre_allocated_vus {
                return Err(ConfigError::InvalidMaxVus);
            }

            // The stages define the run length; an explicit `duration` is only sanity-checked.
            let duration = opts
                .stages
                .iter()
                .fold(Duration::ZERO, |acc, st| acc.saturating_add(st.duration));

            Ok(ScenarioConfig {
                name,
                executor: ScenarioExecutor::RampingArrivalRate {
                    start_rate: opts.start_rate.unwrap_or(0),
                    time_unit,
                    pre_allocated_vus,
                    max_vus,
                    stages: opts.stages,
                },
                duration,
                start_offset,
                graceful_stop,
            })
        }
    }
}
