//! Live shell sessions bound to a target

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, trace};

use crate::backends::ssh::shell_escape;
use crate::error::Result;
use crate::os::OperatingSystem;
use crate::target::Target;
use crate::transport::{Connector, Shell, super_user_prompt};

/// How a session should be opened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    /// Host to connect to
    pub target: Target,
    /// Environment exported right after connecting
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Extra PATH entries appended to the detected profile
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub system_paths: Vec<String>,
    /// Transient sessions are not closed on context teardown
    #[serde(default)]
    pub transient: bool,
}

impl SessionRequest {
    /// Request a session for the target
    pub fn new(target: Target) -> Self {
        Self {
            target,
            env: BTreeMap::new(),
            system_paths: Vec::new(),
            transient: false,
        }
    }

    /// Export an environment variable on open
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    /// Add a PATH entry
    pub fn with_system_path(mut self, path: impl Into<String>) -> Self {
        self.system_paths.push(path.into());
        self
    }

    /// Mark the session transient
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }
}

/// A live shell plus what is known about the host behind it
pub struct Session {
    key: String,
    target: Target,
    shell: Box<dyn Shell>,
    os: OperatingSystem,
    current_directory: Option<String>,
    env: BTreeMap<String, String>,
    exported_path: Option<String>,
    transient: bool,
    timeout: Option<Duration>,
    opened_at: DateTime<Utc>,
}

impl Session {
    /// Connect, initialise the shell and detect the operating system
    pub async fn open(
        connector: &dyn Connector,
        request: &SessionRequest,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let target = &request.target;
        let shell = connector.connect(target).await?;
        let mut session = Self {
            key: target.session_key(),
            target: target.clone(),
            shell,
            os: OperatingSystem::default(),
            current_directory: None,
            env: BTreeMap::new(),
            exported_path: None,
            transient: request.transient,
            timeout,
            opened_at: Utc::now(),
        };

        if !target.path.is_empty() {
            session.change_directory(&target.path).await?;
        }
        for (name, value) in &request.env {
            session.set_env(name, value).await?;
        }
        session.os = OperatingSystem::detect(session.shell.as_mut(), timeout).await?;
        session.exported_path = Some(session.os.path.env_value());
        for path in &request.system_paths {
            session.os.path.push(path);
        }
        Ok(session)
    }

    /// Bring a cached session in line with a new request
    pub(crate) async fn refresh(&mut self, request: &SessionRequest) -> Result<()> {
        if !request.target.path.is_empty() {
            self.change_directory(&request.target.path).await?;
        }
        for (name, value) in &request.env {
            self.set_env(name, value).await?;
        }
        if !request.system_paths.is_empty() {
            for path in &request.system_paths {
                self.os.path.push(path);
            }
            self.export_path().await?;
        }
        Ok(())
    }

    /// Cache key, `user@host:port`
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Target the session is connected to
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Detected operating system
    pub fn os(&self) -> &OperatingSystem {
        &self.os
    }

    /// Mutable access to the detected profile, e.g. to push PATH entries
    pub fn os_mut(&mut self) -> &mut OperatingSystem {
        &mut self.os
    }

    /// Directory the shell was last moved into
    pub fn current_directory(&self) -> Option<&str> {
        self.current_directory.as_deref()
    }

    /// Environment exported through this session
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Whether the session is skipped on context teardown
    pub fn is_transient(&self) -> bool {
        self.transient
    }

    /// When the session was opened
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Prompt that marks the end of a command's output
    pub fn shell_prompt(&self) -> &str {
        self.shell.prompt()
    }

    /// Prompt shown by a root shell
    pub fn super_user_prompt(&self) -> String {
        super_user_prompt(self.shell.prompt())
    }

    /// Run a raw command
    ///
    /// The command text may carry secrets and is never logged here.
    pub async fn run(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
        terminators: &[String],
    ) -> Result<String> {
        let timeout = timeout.or(self.timeout).filter(|t| !t.is_zero());
        trace!(session = %self.key, len = command.len(), "sending command");
        let output = self.shell.run(command, timeout, terminators).await?;
        trace!(session = %self.key, len = output.len(), "received output");
        Ok(output)
    }

    /// Change the working directory
    ///
    /// A path with a file extension resolves to its parent. The tracked
    /// directory only moves when the shell did not report a missing directory.
    pub async fn change_directory(&mut self, directory: &str) -> Result<String> {
        let directory = resolve_directory(directory);
        if directory.is_empty() || self.current_directory.as_deref() == Some(directory.as_str()) {
            return Ok(String::new());
        }
        let output = self
            .run(&format!("cd {}", shell_escape(&directory)), None, &[])
            .await?;
        if !output.to_lowercase().contains("no such file or directory") {
            debug!(session = %self.key, %directory, "changed directory");
            self.current_directory = Some(directory);
        }
        Ok(output)
    }

    /// Export an environment variable, skipping values that are already set
    pub async fn set_env(&mut self, name: &str, value: &str) -> Result<String> {
        if self.env.get(name).map(String::as_str) == Some(value) {
            return Ok(String::new());
        }
        let output = self
            .run(&format!("export {}={}", name, shell_escape(value)), None, &[])
            .await?;
        self.env.insert(name.to_string(), value.to_string());
        Ok(output)
    }

    /// Track a `cd` issued as part of a command
    pub(crate) fn record_directory(&mut self, directory: &str, output: &str) {
        if !output.to_lowercase().contains("no such file or directory") {
            self.current_directory = Some(directory.to_string());
        }
    }

    /// Track an `export` issued as part of a command
    pub(crate) fn record_env(&mut self, name: &str, value: &str) {
        self.env.insert(name.to_string(), value.to_string());
    }

    /// Export PATH from the profile when it changed since the last export
    pub async fn export_path(&mut self) -> Result<()> {
        let value = self.os.path.env_value();
        if value.is_empty() || self.exported_path.as_deref() == Some(value.as_str()) {
            return Ok(());
        }
        self.run(&format!("export PATH={}", shell_escape(&value)), None, &[])
            .await?;
        self.exported_path = Some(value);
        Ok(())
    }

    /// Leave the remote shell
    pub async fn close(mut self) -> Result<()> {
        debug!(session = %self.key, "closing session");
        self.shell
            .close()
            .await
            .map_err(|e| e.with_context(format!("close session {}", self.key)))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("os", &self.os)
            .field("current_directory", &self.current_directory)
            .field("transient", &self.transient)
            .finish_non_exhaustive()
    }
}

fn resolve_directory(directory: &str) -> String {
    let path = Path::new(directory);
    if path.extension().is_some() {
        if let Some(parent) = path.parent() {
            return parent.to_string_lossy().into_owned();
        }
    }
    directory.to_string()
}

/// Directory of a plain `cd X` command, one not chained with `&&` or `;`
pub(crate) fn plain_cd(command: &str) -> Option<&str> {
    let directory = command.trim().strip_prefix("cd ")?.trim();
    if directory.is_empty() || command.contains("&&") || command.contains(';') {
        return None;
    }
    Some(directory.trim_matches(|c| c == '\'' || c == '"'))
}

/// Name and value of a plain `export K=V` command
pub(crate) fn plain_export(command: &str) -> Option<(&str, &str)> {
    let assignment = command.trim().strip_prefix("export ")?.trim();
    if command.contains("&&") || command.contains(';') {
        return None;
    }
    let (name, value) = assignment.split_once('=')?;
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }
    Some((name, value.trim_matches(|c| c == '\'' || c == '"')))
}
