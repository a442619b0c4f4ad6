//! Persistent remote shell sessions and managed command execution
//!
//! This crate opens interactive shells on remote hosts, keeps them cached per
//! `user@host:port`, and runs [`ManagedCommand`]s over them: ordered
//! executions judged by error and success fragments, chained by matching
//! their output, and mined for values with regex extraction.
//!
//! ```no_run
//! use std::sync::Arc;
//! use shell_criteria::ValueStore;
//! use shell_executor::{
//!     CommandExecutor, ExecutionOptions, ManagedCommand, SessionManager, SessionRequest, SshConnector, Target,
//! };
//!
//! # async fn example() -> shell_executor::Result<()> {
//! let mut sessions = SessionManager::new(Arc::new(SshConnector::default()));
//! let session = sessions
//!     .open(&SessionRequest::new(Target::parse("ssh://deploy@build01/opt/app")?))
//!     .await?;
//!
//! let command = ManagedCommand::from_commands(ExecutionOptions::new().with_check_error(), ["make release"]);
//! let mut state = ValueStore::new();
//! let result = CommandExecutor::new().run(session, &command, &mut state).await?;
//! println!("{}", result.stdout());
//!
//! sessions.close_all().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod backends;
pub mod command;
pub mod error;
pub mod executor;
pub mod extract;
pub mod manager;
pub mod os;
pub mod session;
pub mod target;
pub mod transport;

pub use backends::{SshConfig, SshConnector, SudoRewriter};
#[cfg(any(test, feature = "test-utils"))]
pub use backends::MockConnector;
pub use command::{CommandLog, CommandResult, DEFAULT_ERRORS, Execution, ExecutionOptions, ManagedCommand};
pub use error::{Error, ErrorKind, Result};
pub use executor::{CommandExecutor, DEFAULT_MAX_CONTINUATION_DEPTH};
pub use extract::{Extract, extract};
pub use manager::SessionManager;
pub use os::{OperatingSystem, SystemPath};
pub use session::{Session, SessionRequest};
pub use target::{Credential, Target};
pub use transport::{Connector, Shell};
