//! Bounded repetition of a unit of work until exit criteria hold
//!
//! Each iteration invokes the work, extracts values from its output and, when
//! an exit expression is set, evaluates it against the context state overlaid
//! with everything extracted so far. A work error stops the loop at once.

use async_io::Timer;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shell_criteria::{ValueStore, value_to_string};
use shell_executor::{CommandResult, Extract, ManagedCommand, SessionRequest, extract};
use std::time::Duration;
use tracing::debug;

use crate::context::Context;
use crate::error::{BoxError, Error, Result};

/// Key a JSON array output is stored under
pub const SLICE_KEY: &str = "data";

/// Key the raw text output is published under
pub const VALUE_KEY: &str = "value";

/// Output of a unit of work
///
/// Text output that is a complete JSON document also carries its structured
/// form; a JSON array is wrapped under [`SLICE_KEY`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Output {
    /// Raw text
    pub text: Option<String>,
    /// Structured form
    pub structured: Option<Map<String, Value>>,
}

impl Output {
    /// Output from text, parsing it when it is a JSON object or array
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let structured = serde_json::from_str::<Value>(text.trim())
            .ok()
            .and_then(structure);
        Self {
            text: Some(text),
            structured,
        }
    }

    /// Output from a JSON value
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(text) => Self::from_text(text),
            Value::Object(_) | Value::Array(_) => Self {
                text: None,
                structured: structure(value),
            },
            other => Self {
                text: Some(value_to_string(&other)),
                structured: None,
            },
        }
    }

    /// Text to extract from: the raw text, else the structure as JSON
    pub fn extractable(&self) -> String {
        match (&self.text, &self.structured) {
            (Some(text), _) => text.clone(),
            (None, Some(map)) => Value::Object(map.clone()).to_string(),
            (None, None) => String::new(),
        }
    }
}

fn structure(value: Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map),
        Value::Array(items) => {
            let mut map = Map::new();
            map.insert(SLICE_KEY.to_string(), Value::Array(items));
            Some(map)
        }
        _ => None,
    }
}

impl From<String> for Output {
    fn from(text: String) -> Self {
        Self::from_text(text)
    }
}

impl From<&str> for Output {
    fn from(text: &str) -> Self {
        Self::from_text(text)
    }
}

impl From<Value> for Output {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}

impl From<&CommandResult> for Output {
    fn from(result: &CommandResult) -> Self {
        Self::from_text(result.stdout())
    }
}

/// Structured extraction: copy `from` in the output to `name`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Variable {
    /// Destination key
    pub name: String,
    /// Dotted source path; defaults to the name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub from: String,
    /// Value used when the source is absent; text is expanded against the output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Fail when the result is absent or empty
    #[serde(default)]
    pub required: bool,
}

impl Variable {
    /// Variable copied from the same key
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Read from another path
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    /// Fallback value
    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Require a non-empty value
    pub fn with_required(mut self) -> Self {
        self.required = true;
        self
    }

    fn source(&self) -> &str {
        if self.from.is_empty() { &self.name } else { &self.from }
    }

    fn resolve(&self, input: &ValueStore) -> Option<Value> {
        input
            .get(self.source())
            .filter(|value| !is_empty(value))
            .cloned()
            .or_else(|| {
                self.value.as_ref().map(|value| match value {
                    Value::String(text) => Value::String(input.expand(text)),
                    other => other.clone(),
                })
            })
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.is_empty(),
        _ => false,
    }
}

/// How a repeat loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepeatOutcome {
    /// Iterations run
    pub iterations: usize,
    /// Whether the exit criteria stopped the loop
    pub exit_satisfied: bool,
}

/// Work invoked by a [`Repeater`]
#[async_trait]
pub trait UnitOfWork: Send {
    /// Run once; `None` means nothing to extract
    async fn run(&mut self, context: &mut Context) -> std::result::Result<Option<Output>, BoxError>;
}

/// Unit of work backed by a closure that does not need the context
pub struct WorkFn<F>(pub F);

impl<F> WorkFn<F>
where
    F: FnMut() -> std::result::Result<Option<Output>, BoxError> + Send,
{
    /// Wrap a closure
    pub fn new(work: F) -> Self {
        Self(work)
    }
}

#[async_trait]
impl<F> UnitOfWork for WorkFn<F>
where
    F: FnMut() -> std::result::Result<Option<Output>, BoxError> + Send,
{
    async fn run(&mut self, _context: &mut Context) -> std::result::Result<Option<Output>, BoxError> {
        (self.0)()
    }
}

/// Unit of work running a managed command; its combined stdout is the output
#[derive(Debug, Clone)]
pub struct ManagedCommandWork {
    request: SessionRequest,
    command: ManagedCommand,
    super_user: bool,
}

impl ManagedCommandWork {
    /// Run `command` on the requested session
    pub fn new(request: SessionRequest, command: ManagedCommand) -> Self {
        Self {
            request,
            command,
            super_user: false,
        }
    }

    /// Run through the escalation prefix
    pub fn as_super_user(mut self) -> Self {
        self.super_user = true;
        self
    }
}

#[async_trait]
impl UnitOfWork for ManagedCommandWork {
    async fn run(&mut self, context: &mut Context) -> std::result::Result<Option<Output>, BoxError> {
        let result = context
            .run(&self.request, &self.command, self.super_user)
            .await?;
        Ok(Some(Output::from(&result)))
    }
}

/// Repeat settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Repeater {
    /// Maximum iterations; zero counts as one
    #[serde(default = "default_repeat")]
    pub repeat: usize,
    /// Pause after every invocation, in milliseconds
    #[serde(default)]
    pub sleep_time_ms: u64,
    /// Criteria that stop the loop when true
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub exit: String,
    /// Regex extraction applied to the text output
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extract: Vec<Extract>,
    /// Structured extraction applied to the structured output
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<Variable>,
}

fn default_repeat() -> usize {
    1
}

impl Default for Repeater {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Repeater {
    /// Repeat up to `repeat` times
    pub fn new(repeat: usize) -> Self {
        Self {
            repeat,
            sleep_time_ms: 0,
            exit: String::new(),
            extract: Vec::new(),
            variables: Vec::new(),
        }
    }

    /// Pause after every invocation
    pub fn with_sleep_time(mut self, sleep: Duration) -> Self {
        self.sleep_time_ms = sleep.as_millis() as u64;
        self
    }

    /// Stop once `criteria` holds
    pub fn with_exit(mut self, criteria: impl Into<String>) -> Self {
        self.exit = criteria.into();
        self
    }

    /// Add a regex extraction rule
    pub fn with_extract(mut self, rule: Extract) -> Self {
        self.extract.push(rule);
        self
    }

    /// Add a structured extraction rule
    pub fn with_variable(mut self, variable: Variable) -> Self {
        self.variables.push(variable);
        self
    }

    /// Run the work until the exit criteria hold or the iterations run out
    ///
    /// The exit expression is parsed before the first invocation, so a
    /// malformed one fails without running anything.
    pub async fn run<W>(
        &self,
        context: &mut Context,
        work: &mut W,
        extracted: &mut Map<String, Value>,
    ) -> Result<RepeatOutcome>
    where
        W: UnitOfWork + ?Sized,
    {
        let exit = match self.exit.trim() {
            "" => None,
            exit => Some(shell_criteria::parse(exit)?),
        };
        let repeat = self.repeat.max(1);
        let sleep = Duration::from_millis(self.sleep_time_ms);

        for iteration in 1..=repeat {
            let output = work.run(context).await;
            if !sleep.is_zero() {
                Timer::after(sleep).await;
            }
            let Some(output) = output.map_err(|source| Error::Work { iteration, source })? else {
                continue;
            };

            self.apply(context.state_mut(), &output, extracted)?;

            if let Some(exit) = &exit {
                let mut scope = context.state().clone();
                scope.overlay(extracted);
                if exit.evaluate(&scope)? {
                    debug!(context = %context.id(), iteration, exit = %self.exit, "exit criteria satisfied");
                    return Ok(RepeatOutcome {
                        iterations: iteration,
                        exit_satisfied: true,
                    });
                }
            }
        }
        Ok(RepeatOutcome {
            iterations: repeat,
            exit_satisfied: false,
        })
    }

    /// Variables read the structured output; text output leaves them the
    /// values extracted so far, including earlier iterations.
    fn apply(
        &self,
        state: &mut ValueStore,
        output: &Output,
        extracted: &mut Map<String, Value>,
    ) -> Result<()> {
        let input = match &output.structured {
            Some(map) => ValueStore::from_map(map.clone()),
            None => ValueStore::from_map(extracted.clone()),
        };
        for variable in &self.variables {
            match variable.resolve(&input) {
                Some(value) => {
                    extracted.insert(variable.name.clone(), value.clone());
                    state.set(&variable.name, value);
                }
                None if variable.required => {
                    return Err(Error::MissingVariable {
                        name: variable.name.clone(),
                        from: variable.source().to_string(),
                    });
                }
                None => {}
            }
        }

        let text = output.extractable();
        let lines: Vec<&str> = text.lines().collect();
        extract(&self.extract, &lines, state, extracted)?;
        extracted.insert(VALUE_KEY.to_string(), Value::String(text));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_output_adapters() {
        let output = Output::from_text(r#"{"testStatus": "done"}"#);
        assert_eq!(output.structured.unwrap()["testStatus"], "done");

        let output = Output::from_value(json!([1, 2]));
        assert_eq!(output.structured.as_ref().unwrap()[SLICE_KEY], json!([1, 2]));
        assert_eq!(output.extractable(), r#"{"data":[1,2]}"#);

        let output = Output::from_text("plain text");
        assert!(output.structured.is_none());
        assert_eq!(Output::from_value(json!(42)).text.as_deref(), Some("42"));
    }

    #[test]
    fn test_variable_resolution() {
        let input = ValueStore::from_map(
            json!({"job": {"state": "", "id": 7}, "host": "db01"})
                .as_object()
                .cloned()
                .unwrap(),
        );
        assert_eq!(Variable::new("id").with_from("job.id").resolve(&input), Some(json!(7)));
        assert_eq!(
            Variable::new("state")
                .with_from("job.state")
                .with_value("unknown")
                .resolve(&input),
            Some(json!("unknown"))
        );
        assert_eq!(
            Variable::new("url").with_from("nope").with_value("ssh://$host").resolve(&input),
            Some(json!("ssh://db01"))
        );
        assert_eq!(Variable::new("missing").resolve(&input), None);
    }

    #[test]
    fn test_wire_format() {
        let repeater: Repeater = serde_json::from_str(
            r#"{"Exit": "$status:done", "SleepTimeMs": 100, "Variables": [{"Name": "status", "From": "testStatus"}]}"#,
        )
        .unwrap();
        assert_eq!(repeater.repeat, 1);
        assert_eq!(repeater.sleep_time_ms, 100);
        assert_eq!(repeater.variables[0].source(), "testStatus");
    }
}
