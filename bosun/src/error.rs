//! Agent error taxonomy.
//!
//! Every failure propagates to the nearest request or session boundary
//! and is surfaced there (a gRPC status, or a remote-shell exit status
//! of 1). Nothing in this crate retries.

use thiserror::Error;

pub type AgentResult<T> = Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Malformed build-file syntax.
    #[error("build file parse error: {0}")]
    Parse(String),

    /// Build file has no FROM instruction.
    #[error("build file must contain at least one FROM instruction")]
    NoBaseImage,

    /// A build file derives from the wrong ancestor image.
    #[error("\"{file}\" must derive from \"{expected}\"")]
    DerivationPolicy { file: String, expected: String },

    /// The build engine reported a failure; the message is passed
    /// through verbatim.
    #[error("{0}")]
    BuildEngine(String),

    /// A remote or local process ended with a non-zero exit code.
    #[error("the command has returned a non-zero ({exit_code}) exit code")]
    CommandFailed { exit_code: i64 },

    /// A repository init hook ended with a non-zero exit code.
    #[error("init hook for \"{repo}\" has returned a non-zero ({exit_code}) exit code")]
    HookFailed { repo: String, exit_code: i64 },

    /// A stream copy or attach failed; ends the session.
    #[error("transport error: {0}")]
    Transport(String),

    /// Offered public key not recognized for the user.
    #[error("public key rejected for user \"{0}\"")]
    AuthRejected(String),

    /// Host user/group database lookup failed. Fatal for builds: the
    /// identifiers are required for file ownership inside the container.
    #[error("user or group lookup failed: {0}")]
    UserLookup(String),

    #[error(transparent)]
    Engine(#[from] bollard::errors::Error),

    #[error(transparent)]
    Ssh(#[from] russh::Error),

    #[error(transparent)]
    Key(#[from] russh::keys::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}
