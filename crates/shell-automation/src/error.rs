//! Error types for shell-automation

use thiserror::Error;

/// Result type alias for shell-automation operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type returned by units of work
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Broad class of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input or configuration; never retried
    Configuration,
    /// A remote command reported failure in its output
    RemoteExecution,
    /// Connection, authentication, timeout or I/O failure
    Transport,
    /// A unit of work failed inside a repeater
    LoopTermination,
}

/// Automation errors
#[derive(Error, Debug)]
pub enum Error {
    /// Session or command execution error
    #[error(transparent)]
    Exec(#[from] shell_executor::Error),

    /// Malformed or unevaluable criteria
    #[error(transparent)]
    Criteria(#[from] shell_criteria::Error),

    /// A unit of work failed; the repeater stopped
    #[error("unit of work failed at iteration {iteration}: {source}")]
    Work {
        /// 1-based iteration that failed
        iteration: usize,
        /// Error returned by the work
        #[source]
        source: BoxError,
    },

    /// A required variable resolved to nothing
    #[error("required variable '{name}' has no value at '{from}'")]
    MissingVariable {
        /// Variable name
        name: String,
        /// Source path
        from: String,
    },

    /// Configuration file could not be read
    #[error("failed to read configuration: {0}")]
    ReadConfig(#[from] std::io::Error),

    /// Configuration YAML could not be parsed
    #[error("failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Referenced environment variables are not set and have no default
    #[error("environment variable not set: {0}")]
    EnvVarNotFound(String),

    /// Configuration values are inconsistent
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// Service request could not be decoded
    #[error("invalid request: {0}")]
    Request(#[from] serde_json::Error),

    /// Error wrapped with the calling context
    #[error("{context}: {source}")]
    Context {
        /// Breadcrumb describing where the error passed through
        context: String,
        /// Wrapped error
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a configuration validation error
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    /// Wrap the error with a breadcrumb
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Classify the error, looking through context wrappers
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Context { source, .. } => source.kind(),
            Self::Exec(e) => match e.kind() {
                shell_executor::ErrorKind::Configuration => ErrorKind::Configuration,
                shell_executor::ErrorKind::RemoteExecution => ErrorKind::RemoteExecution,
                shell_executor::ErrorKind::Transport => ErrorKind::Transport,
            },
            Self::Work { .. } => ErrorKind::LoopTermination,
            Self::Criteria(_)
            | Self::MissingVariable { .. }
            | Self::ReadConfig(_)
            | Self::Yaml(_)
            | Self::EnvVarNotFound(_)
            | Self::Validation(_)
            | Self::Request(_) => ErrorKind::Configuration,
        }
    }
}
