//! Harness failures. Scenario assertion failures are not errors: they are
//! recorded in the report and surface as a failing exit status.

use thiserror::Error;

use forge_threads_core::ThreadError;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Thread(#[from] ThreadError),
    #[error("config: {var}={value:?} is not a valid {expected}")]
    InvalidConfig {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("run id {0:?} must be non-empty and must not contain '::'")]
    InvalidRunId(String),
    #[error("unknown scenario '{0}'")]
    UnknownScenario(String),
}
