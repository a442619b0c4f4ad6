//! Declarative command model
//!
//! A [`ManagedCommand`] is a list of [`Execution`]s plus [`ExecutionOptions`]
//! applied to the session before the first one is sent. Executions with a
//! `match_output` fragment never run on their own; they are continuations
//! triggered by the output of an earlier execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::extract::Extract;

/// Error fragments added to simple commands when error checking is enabled
pub const DEFAULT_ERRORS: [&str; 3] = [
    "command not found",
    "No such file or directory",
    "Error is not recoverable",
];

/// Session preparation applied before the executions run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecutionOptions {
    /// Entries appended to the session PATH
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub system_paths: Vec<String>,
    /// Extra fragments that end output collection
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub terminators: Vec<String>,
    /// Default timeout for each execution, in milliseconds; zero waits forever
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Working directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    /// Environment exported before running
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Add [`DEFAULT_ERRORS`] to commands built by [`ManagedCommand::from_commands`]
    #[serde(default)]
    pub check_error: bool,
}

impl ExecutionOptions {
    /// Options with nothing set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a terminator
    pub fn with_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.terminators.push(terminator.into());
        self
    }

    /// Add a PATH entry
    pub fn with_system_path(mut self, path: impl Into<String>) -> Self {
        self.system_paths.push(path.into());
        self
    }

    /// Set the working directory
    pub fn with_directory(mut self, directory: impl Into<String>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Export an environment variable
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    /// Set the per-execution timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Enable the default error fragments for simple commands
    pub fn with_check_error(mut self) -> Self {
        self.check_error = true;
        self
    }

    /// Default timeout as a duration
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// One command and the rules that judge its output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Execution {
    /// Command text; `$name` references are expanded from the value store
    pub command: String,
    /// Run only as a continuation of output containing this fragment
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub match_output: String,
    /// Placeholder to secret map, substituted only into the text sent
    #[serde(default, skip_serializing)]
    pub secure: BTreeMap<String, String>,
    /// Fragments that mean the command failed
    #[serde(default, rename = "Error", skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Fragments of which at least one must appear
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub success: Vec<String>,
    /// Extraction rules applied to the output
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extract: Vec<Extract>,
    /// Criteria gating the execution, evaluated with `stdout` in scope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    /// Timeout overriding the options, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Execution {
    /// Execution for a command
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Make this a continuation of output containing `fragment`
    pub fn with_match_output(mut self, fragment: impl Into<String>) -> Self {
        self.match_output = fragment.into();
        self
    }

    /// Register a secret substituted for `placeholder` when sending
    pub fn with_secure(mut self, placeholder: impl Into<String>, secret: impl Into<String>) -> Self {
        self.secure.insert(placeholder.into(), secret.into());
        self
    }

    /// Add an error fragment
    pub fn with_error(mut self, fragment: impl Into<String>) -> Self {
        self.errors.push(fragment.into());
        self
    }

    /// Add a success fragment
    pub fn with_success(mut self, fragment: impl Into<String>) -> Self {
        self.success.push(fragment.into());
        self
    }

    /// Add an extraction rule
    pub fn with_extract(mut self, rule: Extract) -> Self {
        self.extract.push(rule);
        self
    }

    /// Gate the execution on criteria
    pub fn with_when(mut self, criteria: impl Into<String>) -> Self {
        self.when = Some(criteria.into());
        self
    }

    /// Override the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Whether this execution only runs as a continuation
    pub fn is_continuation(&self) -> bool {
        !self.match_output.is_empty()
    }
}

/// Ordered executions sharing one set of options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManagedCommand {
    /// Session preparation
    #[serde(default)]
    pub options: ExecutionOptions,
    /// Executions in declared order
    #[serde(default)]
    pub executions: Vec<Execution>,
}

impl ManagedCommand {
    /// Managed command with the given options and no executions
    pub fn new(options: ExecutionOptions) -> Self {
        Self {
            options,
            executions: Vec::new(),
        }
    }

    /// Build one execution per command string
    pub fn from_commands<I, S>(options: ExecutionOptions, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let errors: Vec<String> = if options.check_error {
            DEFAULT_ERRORS.iter().map(|e| e.to_string()).collect()
        } else {
            Vec::new()
        };
        let executions = commands
            .into_iter()
            .map(|command| Execution {
                errors: errors.clone(),
                ..Execution::new(command)
            })
            .collect();
        Self { options, executions }
    }

    /// Append an execution
    pub fn with_execution(mut self, execution: Execution) -> Self {
        self.executions.push(execution);
        self
    }
}

/// Audit record of one command sent to the shell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLog {
    /// Command as logged, with secure placeholders left in place
    pub stdin: String,
    /// Output collected for it
    pub stdout: String,
    /// When the output was collected
    pub timestamp: DateTime<Utc>,
}

impl CommandLog {
    /// Record a command and its output now
    pub fn new(stdin: impl Into<String>, stdout: impl Into<String>) -> Self {
        Self {
            stdin: stdin.into(),
            stdout: stdout.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Outcome of running one managed command
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Key of the session the command ran on
    pub session: String,
    /// Commands and outputs in the order they ran
    pub commands: Vec<CommandLog>,
    /// Values extracted during the run, last writer wins
    pub extracted: Map<String, Value>,
}

impl CommandResult {
    /// Empty result for a session
    pub fn new(session: impl Into<String>) -> Self {
        Self {
            session: session.into(),
            ..Self::default()
        }
    }

    /// All outputs joined with newlines
    pub fn stdout(&self) -> String {
        self.commands
            .iter()
            .map(|log| log.stdout.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Output of the last command sent
    pub fn last_stdout(&self) -> Option<&str> {
        self.commands.last().map(|log| log.stdout.as_str())
    }
}
