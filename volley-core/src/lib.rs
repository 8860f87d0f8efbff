mod aggregator;
mod check;
mod config;
mod error;
mod gate;
mod pacer;
mod run;
mod schedule;
mod script;
mod signal;
mod summary;
mod template;
mod transport;
mod vu;

pub use aggregator::{
    AggregateReport, CheckCounts, IterationOutcome, LatencySummary, ResultAggregator,
    SchedulerStats,
};
pub use check::{Check, CheckAssertionError, CheckResult, Predicate, check};
pub use config::{
    ConfigError, DEFAULT_GRACEFUL_STOP, ScenarioConfig, ScenarioExecutor, ScenarioExecutorKind,
    ScenarioOptions, Stage, validate,
};
pub use error::{Error, Result};
pub use gate::IterationGate;
pub use pacer::{ArrivalPacer, Claim};
pub use run::Scheduler;
pub use schedule::{RampingSchedule, RateAccumulator};
pub use script::Script;
pub use signal::StopSignal;
pub use summary::{RunSummary, ScenarioReport};
pub use template::{BodyBuilder, IterationContext, RenderError, RequestTemplate, render};
pub use transport::{NetworkError, NetworkErrorKind, Transport};
pub use volley_http::{HttpClient, HttpRequest, HttpResponse};
