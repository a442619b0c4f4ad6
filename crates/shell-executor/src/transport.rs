//! Transport traits for interactive remote shells
//!
//! A [`Connector`] turns a [`Target`] into a live [`Shell`]. The shell accepts
//! one command at a time and reads output until its prompt or one of the
//! supplied terminators shows up.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::target::Target;

/// An interactive shell multiplexing many commands over one connection
#[async_trait]
pub trait Shell: Send {
    /// Prompt the shell prints when it is ready for input
    fn prompt(&self) -> &str;

    /// Send a command and collect its output
    ///
    /// Reading stops at the prompt or at the first of `terminators`. A
    /// `timeout` of `None` waits for those alone.
    async fn run(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
        terminators: &[String],
    ) -> Result<String>;

    /// Leave the shell and release the connection
    async fn close(&mut self) -> Result<()>;
}

/// Opens shells on remote targets
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to the target and return a ready shell
    async fn connect(&self, target: &Target) -> Result<Box<dyn Shell>>;
}

/// Remove ANSI escape and control sequences from terminal output
pub fn strip_control_sequences(text: &str) -> String {
    strip_ansi_escapes::strip_str(text)
}

/// Whether `output` contains `fragment`, either verbatim or once escape sequences are removed
pub fn contains_fragment(output: &str, fragment: &str) -> bool {
    !fragment.is_empty()
        && (output.contains(fragment) || strip_control_sequences(output).contains(fragment))
}

/// Turn the prompt into its super-user form by swapping the last `$` for `#`
pub fn super_user_prompt(prompt: &str) -> String {
    match prompt.rfind('$') {
        Some(index) => format!("{}#{}", &prompt[..index], &prompt[index + 1..]),
        None => prompt.to_string(),
    }
}
