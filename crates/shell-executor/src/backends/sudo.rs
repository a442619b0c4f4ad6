//! Privilege escalation by command rewriting
//!
//! A super-user request is turned into an ordinary [`ManagedCommand`]: every
//! command gets the escalation prefix, `Password` becomes a terminator, and a
//! trailing continuation answers the prompt with the target's password. The
//! password travels only as a secure value, so the audit record shows the
//! `**sudo**` placeholder.
//!
//! # Example
//!
//! ```
//! use shell_executor::{Credential, ManagedCommand, ExecutionOptions, Target};
//! use shell_executor::backends::sudo::SudoRewriter;
//!
//! let target = Target::parse("ssh://deploy@db01")
//!     .unwrap()
//!     .with_credential(Credential::new("deploy").with_password("s3cret"));
//! let command = ManagedCommand::from_commands(ExecutionOptions::new(), ["systemctl restart nginx"]);
//!
//! let rewritten = SudoRewriter::new().rewrite(&command, &target).unwrap();
//! assert_eq!(rewritten.executions[0].command, "sudo -p 'Password:' systemctl restart nginx");
//! assert_eq!(rewritten.executions[1].match_output, "Password");
//! ```

use crate::command::{Execution, ManagedCommand};
use crate::error::{Error, Result};
use crate::target::Target;

/// Prefix added to escalated commands; the explicit prompt keeps its case stable
pub const DEFAULT_ESCALATION_PREFIX: &str = "sudo -p 'Password:' ";

/// Secure placeholder standing in for the password
pub const PASSWORD_PLACEHOLDER: &str = "**sudo**";

/// Fragment of the password prompt
pub const PASSWORD_PROMPT: &str = "Password";

/// Rewrites managed commands to run through sudo
#[derive(Debug, Clone)]
pub struct SudoRewriter {
    prefix: String,
}

impl Default for SudoRewriter {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_ESCALATION_PREFIX.to_string(),
        }
    }
}

impl SudoRewriter {
    /// Create a rewriter with the default prefix
    pub fn new() -> Self {
        Self::default()
    }

    /// Use another escalation prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// The escalation prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Rewrite a command for super-user execution on the target
    ///
    /// Root targets get the command back unchanged. Anyone else needs a
    /// password on the target's credential.
    pub fn rewrite(&self, command: &ManagedCommand, target: &Target) -> Result<ManagedCommand> {
        if target.username() == "root" {
            return Ok(command.clone());
        }
        let password = target.password().ok_or_else(|| Error::MissingCredential {
            target: target.session_key(),
        })?;

        let mut rewritten = command.clone();
        if !rewritten.options.terminators.iter().any(|t| t == PASSWORD_PROMPT) {
            rewritten.options.terminators.push(PASSWORD_PROMPT.to_string());
        }

        let mut errors = vec![PASSWORD_PROMPT.to_string()];
        let mut extract = Vec::new();
        for execution in &mut rewritten.executions {
            execution.command = self.escalate(&execution.command);
            for fragment in &execution.errors {
                if !errors.contains(fragment) {
                    errors.push(fragment.clone());
                }
            }
            for rule in &execution.extract {
                if !extract.contains(rule) {
                    extract.push(rule.clone());
                }
            }
        }

        rewritten.executions.push(Execution {
            errors,
            extract,
            ..Execution::new(PASSWORD_PLACEHOLDER)
                .with_match_output(PASSWORD_PROMPT)
                .with_secure(PASSWORD_PLACEHOLDER, password)
        });
        Ok(rewritten)
    }

    fn escalate(&self, command: &str) -> String {
        if command.len() <= 1 || command.trim_start().starts_with("sudo ") {
            command.to_string()
        } else {
            format!("{}{}", self.prefix, command)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ExecutionOptions;
    use crate::extract::Extract;
    use crate::target::Credential;

    fn target(user: &str, password: &str) -> Target {
        Target::parse("ssh://db01")
            .unwrap()
            .with_credential(Credential::new(user).with_password(password))
    }

    #[test]
    fn test_rewrite_adds_password_continuation() {
        let command = ManagedCommand::new(ExecutionOptions::new())
            .with_execution(
                Execution::new("apt-get update")
                    .with_error("E: Unable")
                    .with_extract(Extract::new(r"Fetched (\S+)", "fetched")),
            )
            .with_execution(Execution::new("sudo whoami"))
            .with_execution(Execution::new("l"));

        let rewritten = SudoRewriter::new().rewrite(&command, &target("deploy", "pw")).unwrap();
        let commands: Vec<_> = rewritten.executions.iter().map(|e| e.command.as_str()).collect();
        assert_eq!(
            commands,
            ["sudo -p 'Password:' apt-get update", "sudo whoami", "l", "**sudo**"]
        );
        assert_eq!(rewritten.options.terminators, ["Password"]);

        let answer = &rewritten.executions[3];
        assert_eq!(answer.match_output, "Password");
        assert_eq!(answer.errors, ["Password", "E: Unable"]);
        assert_eq!(answer.extract.len(), 1);
        assert_eq!(answer.secure[PASSWORD_PLACEHOLDER], "pw");
    }

    #[test]
    fn test_root_and_missing_password() {
        let command = ManagedCommand::from_commands(ExecutionOptions::new(), ["id"]);
        let rewritten = SudoRewriter::new().rewrite(&command, &target("root", "")).unwrap();
        assert_eq!(rewritten, command);

        let err = SudoRewriter::new().rewrite(&command, &target("deploy", "")).unwrap_err();
        assert!(matches!(err, Error::MissingCredential { .. }));
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }
}
