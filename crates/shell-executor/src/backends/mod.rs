//! Shell transports and command rewriting
//!
//! [`ssh`] is the production transport. [`sudo`] rewrites managed commands
//! for super-user execution. [`mock`] is a scripted transport for tests.

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod ssh;
pub mod sudo;

#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockConnector;
pub use ssh::{SshConfig, SshConnector};
pub use sudo::SudoRewriter;
