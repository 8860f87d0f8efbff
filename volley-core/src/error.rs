use crate::config::ConfigError;
use crate::template::RenderError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("invalid script: {0}")]
    Script(#[from] RenderError),

    #[error("invalid scenario: {0}")]
    Config(#[from] ConfigError),

    #[error("latency histogram setup failed: {0}")]
    Histogram(#[from] hdrhistogram::CreationError),

    #[error("no scenarios to run")]
    NoScenarios,
}
