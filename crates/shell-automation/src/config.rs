//! Engine configuration with environment variable substitution
//!
//! Configuration is YAML. `${VAR}` and `${VAR:-default}` references are
//! substituted from the process environment before parsing:
//!
//! ```yaml
//! connect_timeout_ms: 15000
//! command_timeout_ms: ${COMMAND_TIMEOUT_MS:-60000}
//! max_continuation_depth: 8
//! ssh:
//!   identity_file: ${HOME}/.ssh/deploy
//!   options: ["-oStrictHostKeyChecking=no"]
//! ```

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use shell_executor::backends::ssh::DEFAULT_PROMPT;
use shell_executor::backends::sudo::DEFAULT_ESCALATION_PREFIX;
use shell_executor::{CommandExecutor, DEFAULT_MAX_CONTINUATION_DEPTH, SshConfig, SshConnector};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use crate::error::{Error, Result};

/// ssh client settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    /// ssh binary
    pub program: String,
    /// Identity file used when a target has none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,
    /// Extra arguments passed to every ssh invocation
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            identity_file: None,
            options: Vec::new(),
        }
    }
}

/// Settings shared by every context of an engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Login deadline
    pub connect_timeout_ms: u64,
    /// Default command deadline; zero waits for terminators alone
    pub command_timeout_ms: u64,
    /// Longest chain of output-triggered continuations
    pub max_continuation_depth: usize,
    /// Prefix for super-user commands
    pub escalation_prefix: String,
    /// Sentinel prompt installed on remote shells
    pub prompt: String,
    /// ssh client settings
    pub ssh: SshSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 30_000,
            command_timeout_ms: 0,
            max_continuation_depth: DEFAULT_MAX_CONTINUATION_DEPTH,
            escalation_prefix: DEFAULT_ESCALATION_PREFIX.to_string(),
            prompt: DEFAULT_PROMPT.to_string(),
            ssh: SshSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Parse YAML configuration, substituting environment variables first
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a YAML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    fn validate(&self) -> Result<()> {
        if self.max_continuation_depth == 0 {
            return Err(Error::validation("max_continuation_depth must be at least 1"));
        }
        if self.prompt.trim().is_empty() || self.prompt.contains('\'') {
            return Err(Error::validation(format!(
                "prompt '{}' must be non-empty and free of single quotes",
                self.prompt
            )));
        }
        if self.ssh.program.is_empty() {
            return Err(Error::validation("ssh.program must not be empty"));
        }
        Ok(())
    }

    /// Login deadline
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Default command deadline, if any
    pub fn command_timeout(&self) -> Option<Duration> {
        Some(Duration::from_millis(self.command_timeout_ms)).filter(|t| !t.is_zero())
    }

    /// Connector spawning the configured ssh client
    pub fn ssh_connector(&self) -> SshConnector {
        let mut config = SshConfig::new()
            .with_program(&self.ssh.program)
            .with_connect_timeout(self.connect_timeout())
            .with_prompt(&self.prompt);
        if let Some(identity) = &self.ssh.identity_file {
            config = config.with_identity_file(identity);
        }
        for option in &self.ssh.options {
            config = config.with_extra_arg(option);
        }
        SshConnector::new(config)
    }

    /// Executor honoring the configured limits
    pub fn command_executor(&self) -> CommandExecutor {
        CommandExecutor::new()
            .with_max_continuation_depth(self.max_continuation_depth)
            .with_escalation_prefix(&self.escalation_prefix)
    }
}

/// Substitute `${VAR}` and `${VAR:-default}` from the environment
///
/// Every unset variable without a default is reported at once.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    static REFERENCE: OnceLock<Regex> = OnceLock::new();
    let reference =
        REFERENCE.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("valid env reference regex"));

    let mut missing = Vec::new();
    let output = reference.replace_all(input, |caps: &Captures<'_>| {
        let (name, default) = match caps[1].split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (&caps[1], None),
        };
        match (std::env::var(name), default) {
            (Ok(value), _) => value,
            (Err(_), Some(default)) => default.to_string(),
            (Err(_), None) => {
                missing.push(name.to_string());
                caps[0].to_string()
            }
        }
    });

    if !missing.is_empty() {
        return Err(Error::EnvVarNotFound(missing.join(", ")));
    }
    Ok(output.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_substitution() {
        let config = EngineConfig::from_yaml_str(
            "command_timeout_ms: ${SHELL_AUTOMATION_TEST_UNSET:-2500}\nssh:\n  options: [\"-q\"]\n",
        )
        .unwrap();
        assert_eq!(config.command_timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_continuation_depth, 16);
        assert_eq!(config.ssh.program, "ssh");
        assert_eq!(config.ssh.options, ["-q"]);
        assert_eq!(config.command_executor().max_continuation_depth(), 16);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(&path, "prompt: \"[ci]$ \"\nescalation_prefix: \"sudo -S \"\n").unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.prompt, "[ci]$ ");
        assert_eq!(config.escalation_prefix, "sudo -S ");

        let err = EngineConfig::from_file(dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, Error::ReadConfig(_)));
    }

    #[test]
    fn test_missing_variable() {
        let err = substitute_env_vars("a: ${SHELL_AUTOMATION_TEST_MISSING}").unwrap_err();
        assert!(matches!(err, Error::EnvVarNotFound(ref name) if name == "SHELL_AUTOMATION_TEST_MISSING"));
    }

    #[test]
    fn test_validation() {
        let err = EngineConfig::from_yaml_str("max_continuation_depth: 0").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = EngineConfig::from_yaml_str("prompt: \"it's> \"").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }
}
