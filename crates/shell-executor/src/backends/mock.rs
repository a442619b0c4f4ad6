//! Scripted in-memory transport for tests
//!
//! [`MockConnector`] hands out shells that answer commands from a script and
//! record everything sent to them. Unscripted commands answer with the output
//! of a plain Ubuntu host for the OS probes and with nothing otherwise.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::target::Target;
use crate::transport::{Connector, Shell};

/// Prompt reported by mock shells
pub const MOCK_PROMPT: &str = "[mock]$ ";

/// One command received by a mock shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    /// Session key of the shell
    pub session: String,
    /// Text exactly as sent, secrets included
    pub command: String,
    /// Terminators passed with it
    pub terminators: Vec<String>,
    /// Timeout passed with it
    pub timeout: Option<Duration>,
}

#[derive(Debug, Default)]
struct MockState {
    responses: HashMap<String, VecDeque<String>>,
    calls: Vec<MockCall>,
    connections: Vec<String>,
    closed: Vec<String>,
    connect_error: Option<String>,
}

/// Connector producing scripted shells
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    /// Connector with no scripted responses
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Answer `command` with `output` every time
    pub fn respond(self, command: impl Into<String>, output: impl Into<String>) -> Self {
        self.respond_sequence(command, [output])
    }

    /// Answer `command` with each output in turn, repeating the last one
    pub fn respond_sequence<I, S>(self, command: impl Into<String>, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let outputs = outputs.into_iter().map(Into::into).collect();
        self.lock().responses.insert(command.into(), outputs);
        self
    }

    /// Fail every connection attempt
    pub fn fail_connect(self, reason: impl Into<String>) -> Self {
        self.lock().connect_error = Some(reason.into());
        self
    }

    /// Every call received, in order
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    /// Every command received, in order
    pub fn commands(&self) -> Vec<String> {
        self.lock().calls.iter().map(|call| call.command.clone()).collect()
    }

    /// How many times `command` was received
    pub fn count(&self, command: &str) -> usize {
        self.lock().calls.iter().filter(|call| call.command == command).count()
    }

    /// Session keys of the shells opened, in order
    pub fn connections(&self) -> Vec<String> {
        self.lock().connections.clone()
    }

    /// Session keys of the shells closed, in order
    pub fn closed(&self) -> Vec<String> {
        self.lock().closed.clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, target: &Target) -> Result<Box<dyn Shell>> {
        let mut state = self.lock();
        if let Some(reason) = &state.connect_error {
            return Err(Error::connection_failed(&target.host, reason.clone()));
        }
        state.connections.push(target.session_key());
        Ok(Box::new(MockShell {
            session: target.session_key(),
            user: target.username().to_string(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockShell {
    session: String,
    user: String,
    state: Arc<Mutex<MockState>>,
}

impl MockShell {
    fn default_output(&self, command: &str) -> String {
        match command {
            "sw_vers" => "bash: sw_vers: command not found".to_string(),
            "lsb_release -a" => "Distributor ID:\tUbuntu\nDescription:\tUbuntu 22.04.3 LTS\nRelease:\t22.04\nCodename:\tjammy".to_string(),
            "uname -s" => "Linux".to_string(),
            "uname -m" => "x86_64".to_string(),
            "echo $PATH" => "/usr/local/bin:/usr/bin:/bin".to_string(),
            "echo $USER" => self.user.clone(),
            _ => String::new(),
        }
    }
}

#[async_trait]
impl Shell for MockShell {
    fn prompt(&self) -> &str {
        MOCK_PROMPT
    }

    async fn run(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
        terminators: &[String],
    ) -> Result<String> {
        let scripted = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.calls.push(MockCall {
                session: self.session.clone(),
                command: command.to_string(),
                terminators: terminators.to_vec(),
                timeout,
            });
            state.responses.get_mut(command).and_then(|outputs| {
                if outputs.len() > 1 {
                    outputs.pop_front()
                } else {
                    outputs.front().cloned()
                }
            })
        };
        Ok(scripted.unwrap_or_else(|| self.default_output(command)))
    }

    async fn close(&mut self) -> Result<()> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .closed
            .push(self.session.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[smol_potat::test]
    async fn test_scripted_sequence_repeats_last() {
        let mock = MockConnector::new().respond_sequence("status", ["running", "done"]);
        let target = Target::parse("ssh://alice@db01").unwrap();
        let mut shell = mock.connect(&target).await.unwrap();

        assert_eq!(shell.run("status", None, &[]).await.unwrap(), "running");
        assert_eq!(shell.run("status", None, &[]).await.unwrap(), "done");
        assert_eq!(shell.run("status", None, &[]).await.unwrap(), "done");
        assert_eq!(shell.run("echo $USER", None, &[]).await.unwrap(), "alice");
        assert_eq!(mock.count("status"), 3);
        assert_eq!(mock.connections(), ["alice@db01:22"]);
    }
}
