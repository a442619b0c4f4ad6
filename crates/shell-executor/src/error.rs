//! Error types for session and command execution

use std::time::Duration;
use thiserror::Error;

/// Broad class of a failure, used by callers to decide how to report it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input: scheme, regex, criteria, missing fields, runaway continuation
    Configuration,
    /// The remote command ran but its output signalled failure
    RemoteExecution,
    /// Connection, authentication, timeout or I/O failure
    Transport,
}

/// Unified error type for session and command execution
#[derive(Error, Debug)]
pub enum Error {
    /// Target URL uses a scheme other than ssh/scp
    #[error("unsupported scheme '{scheme}' in {url}, expected ssh or scp")]
    UnsupportedScheme {
        /// The scheme found in the URL
        scheme: String,
        /// The offending URL
        url: String,
    },

    /// Target URL could not be parsed
    #[error("invalid target '{url}': {reason}")]
    InvalidTarget {
        /// The offending URL
        url: String,
        /// What was wrong with it
        reason: String,
    },

    /// Extraction regex did not compile
    #[error("invalid extraction regex '{expression}': {source}")]
    InvalidRegex {
        /// The expression as configured
        expression: String,
        /// Underlying compile error
        #[source]
        source: regex::Error,
    },

    /// A required extraction produced no value
    #[error("required key '{key}' was not extracted by '{expression}'")]
    MissingExtraction {
        /// Key that should have been written
        key: String,
        /// Rule expression
        expression: String,
    },

    /// Super-user execution requested without a password
    #[error("can not run as superuser, credential were empty for target {target}")]
    MissingCredential {
        /// Session key of the target
        target: String,
    },

    /// A chain of output-matched continuations ran longer than allowed
    #[error("continuation chain exceeded {limit} steps at command: {command}")]
    ContinuationDepthExceeded {
        /// Configured maximum depth
        limit: usize,
        /// Command whose output would have triggered one more continuation
        command: String,
    },

    /// Session key not present in the manager
    #[error("session not found: {key}")]
    SessionNotFound {
        /// The requested session key
        key: String,
    },

    /// Other invalid configuration
    #[error("invalid configuration: {reason}")]
    Configuration {
        /// What was wrong
        reason: String,
    },

    /// Malformed or unevaluable criteria
    #[error(transparent)]
    Criteria(#[from] shell_criteria::Error),

    /// Output contained a configured error fragment
    #[error(
        "encounter error fragment: ({fragment}), command: {command}, stdout: {stdout}, directory: {directory}"
    )]
    ErrorFragment {
        /// The fragment that matched
        fragment: String,
        /// Command as logged (secure values masked)
        command: String,
        /// Captured output
        stdout: String,
        /// Working directory at the time
        directory: String,
    },

    /// Success fragments were configured and none matched
    #[error(
        "failed to match any fragment: '{expected}', command: {command}, stdout: {stdout}, directory: {directory}"
    )]
    MissingSuccessFragment {
        /// Configured success fragments, comma separated
        expected: String,
        /// Command as logged (secure values masked)
        command: String,
        /// Captured output
        stdout: String,
        /// Working directory at the time
        directory: String,
    },

    /// SSH connection failed
    #[error("SSH connection failed to {host}: {reason}")]
    ConnectionFailed {
        /// The hostname or IP address that failed to connect
        host: String,
        /// The detailed reason for the connection failure
        reason: String,
    },

    /// SSH authentication failed
    #[error("SSH authentication failed for {user}@{host}")]
    AuthenticationFailed {
        /// Remote host
        host: String,
        /// Remote user
        user: String,
    },

    /// No terminator appeared before the deadline
    #[error("timed out after {timeout:?} waiting for command output")]
    Timeout {
        /// Deadline that elapsed
        timeout: Duration,
    },

    /// The remote shell went away
    #[error("session {session} terminated")]
    SessionTerminated {
        /// Session key
        session: String,
    },

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

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
    /// Create an invalid configuration error
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Create an invalid target error
    pub fn invalid_target(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTarget {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a connection failed error
    pub fn connection_failed(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            host: host.into(),
            reason: reason.into(),
        }
    }

    /// Create a session terminated error
    pub fn terminated(session: impl Into<String>) -> Self {
        Self::SessionTerminated {
            session: session.into(),
        }
    }

    /// Wrap the error with a breadcrumb describing the calling context
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
            Self::UnsupportedScheme { .. }
            | Self::InvalidTarget { .. }
            | Self::InvalidRegex { .. }
            | Self::MissingExtraction { .. }
            | Self::MissingCredential { .. }
            | Self::ContinuationDepthExceeded { .. }
            | Self::SessionNotFound { .. }
            | Self::Configuration { .. }
            | Self::Criteria(_) => ErrorKind::Configuration,
            Self::ErrorFragment { .. } | Self::MissingSuccessFragment { .. } => {
                ErrorKind::RemoteExecution
            }
            Self::ConnectionFailed { .. }
            | Self::AuthenticationFailed { .. }
            | Self::Timeout { .. }
            | Self::SessionTerminated { .. }
            | Self::Io(_) => ErrorKind::Transport,
        }
    }

    /// The innermost error, without context wrappers
    pub fn root(&self) -> &Error {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
