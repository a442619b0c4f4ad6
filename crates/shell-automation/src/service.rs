//! Service convention and the exec service
//!
//! Every service answers `run(context, request)` with a [`ServiceResponse`];
//! failures are reported in the response rather than returned, with the
//! error message prefixed by the service and request that produced it.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use shell_executor::{ExecutionOptions, ManagedCommand, SessionRequest};
use std::fmt;
use tracing::warn;

use crate::context::Context;
use crate::error::{Error, Result};

/// Outcome of a service call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// The request succeeded
    Ok,
    /// The request failed; see the error message
    Error,
}

/// Response returned by every service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceResponse {
    /// Whether the call succeeded
    pub status: Status,
    /// Error message when the call failed
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    /// Response payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

impl ServiceResponse {
    /// Successful response carrying a payload
    pub fn ok(response: Value) -> Self {
        Self {
            status: Status::Ok,
            error: String::new(),
            response: Some(response),
        }
    }

    /// Failed response carrying the error message
    pub fn error(error: impl fmt::Display) -> Self {
        Self {
            status: Status::Error,
            error: error.to_string(),
            response: None,
        }
    }

    /// Whether the call succeeded
    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}

/// A service callable with a context and a typed request
#[async_trait]
pub trait Service: Send + Sync {
    /// Requests the service understands
    type Request: DeserializeOwned + Send;

    /// Service id used in error breadcrumbs
    fn id(&self) -> &str;

    /// Handle one request
    async fn run(&self, context: &mut Context, request: Self::Request) -> ServiceResponse;

    /// Decode a JSON request and handle it
    async fn run_json(&self, context: &mut Context, request: Value) -> ServiceResponse {
        match serde_json::from_value::<Self::Request>(request) {
            Ok(request) => self.run(context, request).await,
            Err(e) => ServiceResponse::error(Error::from(e).with_context(self.id().to_string())),
        }
    }
}

/// Requests handled by [`ExecService`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ExecRequest {
    /// Open or reuse a session
    OpenSession(SessionRequest),
    /// Close a session by key
    CloseSession {
        /// Session key, `user@host:port`
        session: String,
    },
    /// Run a managed command
    Run {
        /// Session to run on
        session: SessionRequest,
        /// Command to run
        command: ManagedCommand,
        /// Run through the escalation prefix
        #[serde(default)]
        super_user: bool,
    },
    /// Run plain command strings
    RunCommands {
        /// Session to run on
        session: SessionRequest,
        /// Commands in order
        commands: Vec<String>,
        /// Options shared by the commands
        #[serde(default)]
        options: ExecutionOptions,
        /// Run through the escalation prefix
        #[serde(default)]
        super_user: bool,
    },
}

impl ExecRequest {
    fn action(&self) -> &'static str {
        match self {
            Self::OpenSession(_) => "open_session",
            Self::CloseSession { .. } => "close_session",
            Self::Run { .. } => "run",
            Self::RunCommands { .. } => "run_commands",
        }
    }
}

/// Service running commands on remote shells
#[derive(Debug, Clone)]
pub struct ExecService {
    id: String,
}

impl Default for ExecService {
    fn default() -> Self {
        Self {
            id: "exec".to_string(),
        }
    }
}

impl ExecService {
    /// Create the service
    pub fn new() -> Self {
        Self::default()
    }

    async fn handle(&self, context: &mut Context, request: ExecRequest) -> Result<Value> {
        match request {
            ExecRequest::OpenSession(request) => {
                let key = context.open_session(&request).await?;
                let os = context
                    .sessions()
                    .get(&key)
                    .map(|session| serde_json::to_value(session.os()))
                    .transpose()?;
                Ok(json!({ "session": key, "os": os }))
            }
            ExecRequest::CloseSession { session } => {
                let closed = context.close_session(&session).await?;
                Ok(json!({ "session": session, "closed": closed }))
            }
            ExecRequest::Run {
                session,
                command,
                super_user,
            } => {
                let result = context.run(&session, &command, super_user).await?;
                Ok(serde_json::to_value(result)?)
            }
            ExecRequest::RunCommands {
                session,
                commands,
                options,
                super_user,
            } => {
                let command = ManagedCommand::from_commands(options, commands);
                let result = context.run(&session, &command, super_user).await?;
                Ok(serde_json::to_value(result)?)
            }
        }
    }
}

#[async_trait]
impl Service for ExecService {
    type Request = ExecRequest;

    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, context: &mut Context, request: ExecRequest) -> ServiceResponse {
        let breadcrumb = format!("{}.{}", self.id, request.action());
        match self.handle(context, request).await {
            Ok(response) => ServiceResponse::ok(response),
            Err(e) => {
                let e = e.with_context(breadcrumb);
                warn!(context = %context.id(), error = %e, "service request failed");
                ServiceResponse::error(e)
            }
        }
    }
}
