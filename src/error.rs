use thiserror::Error;

/// Fatal failures of the provisioning workflow. Every variant aborts the run
/// with exit code 1; per-entry parse problems and DNS registration failures
/// are reported as warnings instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("no valid host entries to expose")]
    NoValidHosts,

    #[error("tunnel login failed: {0}")]
    Auth(String),

    #[error("tunnel provisioning failed: {0}")]
    Provision(String),

    #[error("deploy failed: {message}")]
    Deploy { message: String, logs: String },
}

pub type Result<T> = std::result::Result<T, Error>;
