//! Managed command execution over a session

use shell_criteria::ValueStore;
use std::time::Duration;
use tracing::debug;

use crate::backends::sudo::SudoRewriter;
use crate::command::{CommandLog, CommandResult, Execution, ExecutionOptions, ManagedCommand};
use crate::error::{Error, Result};
use crate::extract::extract;
use crate::session::{Session, plain_cd, plain_export};
use crate::transport::contains_fragment;

/// Longest chain of output-triggered continuations allowed by default
pub const DEFAULT_MAX_CONTINUATION_DEPTH: usize = 16;

/// Runs managed commands against sessions
///
/// Each primary execution (one without `match_output`) runs in declared
/// order. After every execution the first continuation whose fragment
/// appears in the output is queued next, up to the continuation depth.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    max_continuation_depth: usize,
    sudo: SudoRewriter,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self {
            max_continuation_depth: DEFAULT_MAX_CONTINUATION_DEPTH,
            sudo: SudoRewriter::default(),
        }
    }
}

impl CommandExecutor {
    /// Create an executor with default limits
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the continuation depth limit
    pub fn with_max_continuation_depth(mut self, depth: usize) -> Self {
        self.max_continuation_depth = depth;
        self
    }

    /// Set the prefix used for super-user execution
    pub fn with_escalation_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.sudo = self.sudo.with_prefix(prefix);
        self
    }

    /// The continuation depth limit
    pub fn max_continuation_depth(&self) -> usize {
        self.max_continuation_depth
    }

    /// Run a managed command
    pub async fn run(
        &self,
        session: &mut Session,
        command: &ManagedCommand,
        state: &mut ValueStore,
    ) -> Result<CommandResult> {
        let mut result = CommandResult::new(session.key());
        apply_options(session, &command.options).await?;
        session.export_path().await?;

        for (index, _) in command
            .executions
            .iter()
            .enumerate()
            .filter(|(_, execution)| !execution.is_continuation())
        {
            self.run_chain(session, command, index, state, &mut result)
                .await?;
        }
        Ok(result)
    }

    /// Run a managed command through the escalation prefix
    pub async fn run_as_super_user(
        &self,
        session: &mut Session,
        command: &ManagedCommand,
        state: &mut ValueStore,
    ) -> Result<CommandResult> {
        let rewritten = self.sudo.rewrite(command, session.target())?;
        self.run(session, &rewritten, state).await
    }

    async fn run_chain(
        &self,
        session: &mut Session,
        command: &ManagedCommand,
        primary: usize,
        state: &mut ValueStore,
        result: &mut CommandResult,
    ) -> Result<()> {
        let mut pending = vec![primary];
        let mut depth = 0;
        while let Some(index) = pending.pop() {
            let execution = &command.executions[index];
            let Some(stdout) = execute(session, &command.options, execution, state, result).await?
            else {
                continue;
            };

            let next = command.executions.iter().position(|candidate| {
                candidate.is_continuation() && contains_fragment(&stdout, &candidate.match_output)
            });
            if let Some(next) = next {
                depth += 1;
                if depth > self.max_continuation_depth {
                    return Err(Error::ContinuationDepthExceeded {
                        limit: self.max_continuation_depth,
                        command: execution.command.clone(),
                    });
                }
                pending.push(next);
            }
        }
        Ok(())
    }
}

async fn apply_options(session: &mut Session, options: &ExecutionOptions) -> Result<()> {
    for path in &options.system_paths {
        session.os_mut().path.push(path);
    }
    for (name, value) in &options.env {
        session.set_env(name, value).await?;
    }
    if let Some(directory) = options.directory.as_deref().filter(|d| !d.is_empty()) {
        session.change_directory(directory).await?;
    }
    Ok(())
}

/// Publish the remote user as `os.user`, leaving a caller's scalar `os` alone
fn publish_user(state: &mut ValueStore, user: &str) {
    if state.get("os").is_some_and(|os| !os.is_object()) {
        debug!(user, "os is not a map; not publishing os.user");
        return;
    }
    state.set("os.user", user);
}

/// Run one execution; `None` when its `when` gate was false
async fn execute(
    session: &mut Session,
    options: &ExecutionOptions,
    execution: &Execution,
    state: &mut ValueStore,
    result: &mut CommandResult,
) -> Result<Option<String>> {
    publish_user(state, &session.os().user);
    if let Some(when) = execution.when.as_deref().filter(|w| !w.trim().is_empty()) {
        if !when_satisfied(when, state, result)? {
            debug!(session = %session.key(), command = %execution.command, %when, "skipping command");
            return Ok(None);
        }
    }

    let logged = state.expand(&execution.command);
    let mut sent = logged.clone();
    for (placeholder, secret) in &execution.secure {
        sent = sent.replace(placeholder.as_str(), secret);
    }

    let mut terminators = options.terminators.clone();
    terminators.push(session.super_user_prompt());
    terminators.extend(execution.errors.iter().filter(|e| !e.is_empty()).cloned());
    let timeout = execution
        .timeout_ms
        .or(options.timeout_ms)
        .map(Duration::from_millis);

    debug!(session = %session.key(), command = %logged, "running command");
    let stdout = session.run(&sent, timeout, &terminators).await?;
    debug!(session = %session.key(), stdout_len = stdout.len(), "command finished");
    result.commands.push(CommandLog::new(&logged, &stdout));

    if sent == logged {
        if let Some(directory) = plain_cd(&logged) {
            session.record_directory(directory, &stdout);
        } else if let Some((name, value)) = plain_export(&logged) {
            session.record_env(name, value);
        }
    }

    let directory = session.current_directory().unwrap_or_default().to_string();
    if let Some(fragment) = execution
        .errors
        .iter()
        .find(|fragment| contains_fragment(&stdout, fragment))
    {
        return Err(Error::ErrorFragment {
            fragment: fragment.clone(),
            command: logged,
            stdout,
            directory,
        });
    }

    let success: Vec<&str> = execution
        .success
        .iter()
        .map(String::as_str)
        .filter(|fragment| !fragment.is_empty())
        .collect();
    if !success.is_empty() && !success.iter().any(|fragment| contains_fragment(&stdout, fragment)) {
        return Err(Error::MissingSuccessFragment {
            expected: success.join(","),
            command: logged,
            stdout,
            directory,
        });
    }

    let lines: Vec<&str> = stdout.lines().collect();
    extract(&execution.extract, &lines, state, &mut result.extracted)?;
    Ok(Some(stdout))
}

/// Evaluate a `when` gate with the previous output in scope
///
/// A bare word tests whether the previous output contains it.
fn when_satisfied(when: &str, state: &ValueStore, result: &CommandResult) -> Result<bool> {
    let when = when.trim();
    let expression = if is_bare_word(when) {
        format!("$stdout:/{when}/")
    } else {
        when.to_string()
    };
    let criteria = shell_criteria::parse(&expression)?;

    let mut scope = state.clone();
    scope.set("stdout", result.last_stdout().unwrap_or_default());
    scope.set("output", result.stdout());
    Ok(criteria.evaluate(&scope)?)
}

fn is_bare_word(text: &str) -> bool {
    !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}
