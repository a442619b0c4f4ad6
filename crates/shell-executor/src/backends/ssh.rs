//! SSH remote shell backend using the CLI
//!
//! Each session is one `ssh -tt` child process. After login the remote prompt
//! is replaced with a fixed sentinel and input echo is switched off, so the
//! end of every command's output can be found by looking for that sentinel.
//! Password authentication goes through `sshpass -e`, which reads the password
//! from the environment rather than the command line.

use async_io::Timer;
use async_process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use async_trait::async_trait;
use futures_lite::{AsyncReadExt, AsyncWriteExt, future};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::target::Target;
use crate::transport::{Connector, Shell, strip_control_sequences};

/// Prompt installed on every remote shell
pub const DEFAULT_PROMPT: &str = "[shell-automation]$ ";

/// SSH connection configuration
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// ssh binary to run
    program: String,
    /// Path to identity file (private key) used when the target has none
    identity_file: Option<PathBuf>,
    /// Additional SSH arguments
    extra_args: Vec<String>,
    /// Deadline for login and prompt installation
    connect_timeout: Duration,
    /// Sentinel prompt; must not contain a single quote
    prompt: String,
    /// Quiet period to drain trailing output after a non-prompt terminator
    settle_time: Duration,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            identity_file: None,
            extra_args: Vec::new(),
            connect_timeout: Duration::from_secs(30),
            prompt: DEFAULT_PROMPT.to_string(),
            settle_time: Duration::from_millis(100),
        }
    }
}

impl SshConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ssh binary
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Set the identity file (private key)
    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    /// Add extra SSH arguments
    pub fn with_extra_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Set the login deadline
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the sentinel prompt
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Set the drain period used after a non-prompt terminator
    pub fn with_settle_time(mut self, settle_time: Duration) -> Self {
        self.settle_time = settle_time;
        self
    }

    /// The sentinel prompt
    pub fn prompt(&self) -> &str {
        &self.prompt
    }
}

/// Opens interactive shells by spawning the ssh client
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    config: SshConfig,
}

impl SshConnector {
    /// Create a connector with the given configuration
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    fn command(&self, target: &Target) -> Command {
        let mut command = match target.password() {
            Some(password) => {
                let mut command = Command::new("sshpass");
                command
                    .arg("-e")
                    .arg(&self.config.program)
                    .env("SSHPASS", password);
                command
            }
            None => Command::new(&self.config.program),
        };

        command
            .arg("-tt")
            .arg("-p")
            .arg(target.port.to_string())
            .arg("-o")
            .arg(format!(
                "ConnectTimeout={}",
                self.config.connect_timeout.as_secs().max(1)
            ));
        if let Some(identity) = target
            .identity_file()
            .or(self.config.identity_file.as_ref())
        {
            command.arg("-i").arg(identity);
        }
        for arg in &self.config.extra_args {
            command.arg(arg);
        }
        command.arg(target.host_string());

        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, target: &Target) -> Result<Box<dyn Shell>> {
        info!(host = %target.host, port = target.port, user = %target.username(), "connecting");
        let mut child = self
            .command(target)
            .spawn()
            .map_err(|e| Error::connection_failed(&target.host, format!("failed to spawn ssh: {e}")))?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(Error::connection_failed(&target.host, "ssh stdio unavailable"));
        };

        let mut shell = SshShell {
            host: target.host.clone(),
            user: target.username().to_string(),
            child,
            stdin,
            stdout,
            stderr,
            pending: Vec::new(),
            buffer: String::new(),
            prompt: self.config.prompt.clone(),
            settle_time: self.config.settle_time,
            unsynced: false,
        };
        shell.handshake(self.config.connect_timeout).await?;
        Ok(Box::new(shell))
    }
}

enum Read {
    Data,
    Eof,
    TimedOut,
}

/// A remote shell running inside an ssh child process
pub struct SshShell {
    host: String,
    user: String,
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    stderr: ChildStderr,
    /// Bytes not yet decodable as UTF-8
    pending: Vec<u8>,
    buffer: String,
    prompt: String,
    settle_time: Duration,
    /// A timed-out command may still be writing; its prompt is outstanding
    unsynced: bool,
}

impl SshShell {
    async fn handshake(&mut self, timeout: Duration) -> Result<()> {
        // the prompt is split so the echoed input line can not match it
        let (head, tail) = split_prompt(&self.prompt);
        let init = format!("stty -echo 2>/dev/null; unset PROMPT_COMMAND; export PS1='{head}''{tail}'");
        self.write_line(&init).await?;

        let deadline = Instant::now() + timeout;
        loop {
            if self.buffer.contains(&self.prompt) {
                self.buffer.clear();
                debug!(host = %self.host, "shell ready");
                return Ok(());
            }
            match self.read_some(Some(deadline)).await? {
                Read::Data => {}
                Read::Eof => return Err(self.connect_failure("connection closed").await),
                Read::TimedOut => {
                    return Err(self.connect_failure("timed out waiting for shell prompt").await);
                }
            }
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn read_some(&mut self, deadline: Option<Instant>) -> Result<Read> {
        let mut chunk = [0u8; 4096];
        let read = async { self.stdout.read(&mut chunk).await.map(Some) };
        let read = match deadline {
            Some(deadline) => {
                future::or(read, async {
                    Timer::at(deadline).await;
                    Ok::<_, std::io::Error>(None)
                })
                .await?
            }
            None => read.await?,
        };
        match read {
            None => Ok(Read::TimedOut),
            Some(0) => Ok(Read::Eof),
            Some(n) => {
                self.pending.extend_from_slice(&chunk[..n]);
                self.decode();
                Ok(Read::Data)
            }
        }
    }

    fn decode(&mut self) {
        match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                self.buffer.push_str(text);
                self.pending.clear();
            }
            // incomplete sequence at the end: keep it for the next read
            Err(err) if err.error_len().is_none() => {
                let valid = err.valid_up_to();
                self.buffer
                    .push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                self.pending.drain(..valid);
            }
            Err(_) => {
                self.buffer.push_str(&String::from_utf8_lossy(&self.pending));
                self.pending.clear();
            }
        }
    }

    /// Whether output is complete; `Some(true)` when it ended at the prompt
    fn output_end(&self, terminators: &[String]) -> Option<bool> {
        if self.buffer.contains(&self.prompt) {
            return Some(true);
        }
        let stripped = strip_control_sequences(&self.buffer);
        if stripped.contains(&self.prompt) {
            return Some(true);
        }
        terminators
            .iter()
            .any(|t| !t.is_empty() && (self.buffer.contains(t.as_str()) || stripped.contains(t.as_str())))
            .then_some(false)
    }

    async fn settle(&mut self) -> Result<()> {
        while !self.buffer.contains(&self.prompt) {
            let deadline = Instant::now() + self.settle_time;
            match self.read_some(Some(deadline)).await? {
                Read::Data => {}
                Read::Eof | Read::TimedOut => break,
            }
        }
        Ok(())
    }

    /// Discard the output of a timed-out command up to its prompt
    async fn resync(&mut self, deadline: Option<Instant>, timeout: Option<Duration>) -> Result<()> {
        loop {
            if let Some(index) = self.buffer.rfind(&self.prompt) {
                let stale = index + self.prompt.len();
                debug!(host = %self.host, discarded = stale, "resynchronized shell");
                self.buffer.drain(..stale);
                self.unsynced = false;
                return Ok(());
            }
            match self.read_some(deadline).await? {
                Read::Data => {}
                Read::Eof => return Err(Error::terminated(format!("{}@{}", self.user, self.host))),
                Read::TimedOut => {
                    return Err(Error::Timeout {
                        timeout: timeout.unwrap_or_default(),
                    });
                }
            }
        }
    }

    async fn connect_failure(&mut self, reason: &str) -> Error {
        let mut collected = Vec::new();
        let mut chunk = [0u8; 1024];
        let deadline = Instant::now() + Duration::from_millis(500);
        loop {
            let read = async { self.stderr.read(&mut chunk).await.map(Some) };
            let timer = async {
                Timer::at(deadline).await;
                Ok::<_, std::io::Error>(None)
            };
            match future::or(read, timer).await {
                Ok(Some(n)) if n > 0 => collected.extend_from_slice(&chunk[..n]),
                _ => break,
            }
        }
        let stderr = String::from_utf8_lossy(&collected).trim().to_string();
        if stderr.contains("Permission denied") || stderr.contains("Authentication failed") {
            return Error::AuthenticationFailed {
                host: self.host.clone(),
                user: self.user.clone(),
            };
        }
        let reason = if stderr.is_empty() { reason.to_string() } else { stderr };
        Error::connection_failed(&self.host, reason)
    }
}

#[async_trait]
impl Shell for SshShell {
    fn prompt(&self) -> &str {
        &self.prompt
    }

    async fn run(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
        terminators: &[String],
    ) -> Result<String> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        if self.unsynced {
            self.resync(deadline, timeout).await?;
        }
        // anything still buffered belongs to the previous command
        self.buffer.clear();
        self.write_line(command).await?;

        loop {
            if let Some(at_prompt) = self.output_end(terminators) {
                if !at_prompt {
                    self.settle().await?;
                }
                let output = std::mem::take(&mut self.buffer);
                return Ok(clean_output(&output, &self.prompt));
            }
            match self.read_some(deadline).await? {
                Read::Data => {}
                Read::Eof => {
                    return Err(Error::terminated(format!("{}@{}", self.user, self.host)));
                }
                Read::TimedOut => {
                    warn!(host = %self.host, ?timeout, "command timed out");
                    self.unsynced = true;
                    return Err(Error::Timeout {
                        timeout: timeout.unwrap_or_default(),
                    });
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Err(e) = self.write_line("exit").await {
            debug!(host = %self.host, error = %e, "shell already gone");
        }
        if let Err(e) = self.child.kill() {
            debug!(host = %self.host, error = %e, "ssh already exited");
        }
        self.child.status().await?;
        Ok(())
    }
}

/// Split the prompt into two halves at a character boundary
fn split_prompt(prompt: &str) -> (&str, &str) {
    let half = prompt.chars().count() / 2;
    let mid = prompt
        .char_indices()
        .nth(half)
        .map_or(prompt.len(), |(index, _)| index);
    prompt.split_at(mid)
}

/// Drop carriage returns and the trailing prompt
fn clean_output(output: &str, prompt: &str) -> String {
    let mut text = output.replace('\r', "");
    if let Some(index) = text.rfind(prompt) {
        if text[index + prompt.len()..].trim().is_empty() {
            text.truncate(index);
        }
    }
    text.trim().to_string()
}

/// Escape a string for safe inclusion in a shell command
pub fn shell_escape(s: &str) -> String {
    // Simple escaping for common cases
    if s.is_empty() {
        return "''".to_string();
    }
    if s.contains(|c: char| c.is_whitespace() || "\"'\\$`!*?<>|&;()[]{}".contains(c)) {
        // Use single quotes and escape any single quotes in the string
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_escape() {
        assert_eq!(shell_escape("simple"), "simple");
        assert_eq!(shell_escape("with space"), "'with space'");
        assert_eq!(shell_escape("with'quote"), "'with'\"'\"'quote'");
        assert_eq!(shell_escape("$variable"), "'$variable'");
        assert_eq!(shell_escape("path/to/file"), "path/to/file");
        assert_eq!(shell_escape(""), "''");
    }

    #[test]
    fn test_ssh_config() {
        let config = SshConfig::new()
            .with_identity_file("/home/alice/.ssh/id_rsa")
            .with_extra_arg("-oStrictHostKeyChecking=no")
            .with_prompt("[x]$ ");

        assert_eq!(config.prompt(), "[x]$ ");
        assert_eq!(config.extra_args, ["-oStrictHostKeyChecking=no"]);
        assert_eq!(config.program, "ssh");
    }

    #[test]
    fn test_command_line() {
        let target = Target::parse("ssh://alice@db01:2222/srv").unwrap();
        let connector = SshConnector::new(SshConfig::new().with_extra_arg("-q"));
        let command = format!("{:?}", connector.command(&target));
        assert!(command.contains("\"ssh\""), "{command}");
        assert!(command.contains("\"2222\""), "{command}");
        assert!(command.contains("\"alice@db01\""), "{command}");
        assert!(!command.contains("sshpass"), "{command}");
    }

    #[test]
    fn test_prompt_split_and_cleanup() {
        let (head, tail) = split_prompt(DEFAULT_PROMPT);
        assert_eq!(format!("{head}{tail}"), DEFAULT_PROMPT);
        assert!(!format!("'{head}''{tail}'").contains(DEFAULT_PROMPT));

        let raw = format!("line one\r\nline two\r\n{DEFAULT_PROMPT}");
        assert_eq!(clean_output(&raw, DEFAULT_PROMPT), "line one\nline two");
    }
}
