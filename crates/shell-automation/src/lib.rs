//! Execution contexts, repeaters and the exec service
//!
//! This crate ties sessions, the value store and the criteria language
//! together:
//!
//! - [`Context`] owns the sessions, state and deferred cleanups of one caller
//! - [`Repeater`] runs a [`UnitOfWork`] until exit criteria hold
//! - [`ExecService`] exposes session and command operations through the
//!   [`Service`] convention
//! - [`EngineConfig`] carries the settings shared by contexts
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde_json::Map;
//! use shell_automation::{Context, EngineConfig, ManagedCommandWork, Repeater};
//! use shell_executor::{ExecutionOptions, ManagedCommand, SessionRequest, Target};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut context = Context::with_ssh(Arc::new(EngineConfig::default()));
//! let request = SessionRequest::new(Target::parse("ssh://deploy@build01")?);
//! let command = ManagedCommand::from_commands(ExecutionOptions::new(), ["systemctl is-active app"]);
//!
//! let repeater = Repeater::new(10)
//!     .with_sleep_time(std::time::Duration::from_secs(3))
//!     .with_exit("$value:active");
//! let mut work = ManagedCommandWork::new(request, command);
//! let outcome = repeater.run(&mut context, &mut work, &mut Map::new()).await?;
//! assert!(outcome.exit_satisfied);
//!
//! context.close().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod context;
pub mod error;
pub mod repeater;
pub mod service;

pub use config::{EngineConfig, SshSettings, substitute_env_vars};
pub use context::Context;
pub use error::{BoxError, Error, ErrorKind, Result};
pub use repeater::{ManagedCommandWork, Output, RepeatOutcome, Repeater, UnitOfWork, Variable, WorkFn};
pub use service::{ExecRequest, ExecService, Service, ServiceResponse, Status};
