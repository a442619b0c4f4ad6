//! Per-call execution context
//!
//! A [`Context`] owns everything one caller accumulates while automating:
//! the session cache, the value store and deferred cleanups. Contexts are
//! independent of each other; two contexts targeting the same host hold two
//! sessions. Teardown is explicit through [`Context::close`].

use shell_criteria::ValueStore;
use shell_executor::{
    CommandExecutor, CommandResult, Connector, ManagedCommand, SessionManager, SessionRequest,
};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::Result;

type Cleanup = Box<dyn FnOnce() + Send>;

/// Owner of sessions, state and deferred cleanups for one caller
pub struct Context {
    id: Uuid,
    config: Arc<EngineConfig>,
    state: ValueStore,
    sessions: SessionManager,
    executor: CommandExecutor,
    deferred: Vec<Cleanup>,
    closed: bool,
}

impl Context {
    /// Create a context opening shells through `connector`
    pub fn new(connector: Arc<dyn Connector>, config: Arc<EngineConfig>) -> Self {
        let mut sessions = SessionManager::new(connector);
        if let Some(timeout) = config.command_timeout() {
            sessions = sessions.with_command_timeout(timeout);
        }
        let context = Self {
            id: Uuid::new_v4(),
            executor: config.command_executor(),
            config,
            state: ValueStore::new(),
            sessions,
            deferred: Vec::new(),
            closed: false,
        };
        debug!(context = %context.id, "created context");
        context
    }

    /// Create a context using the configured ssh client
    pub fn with_ssh(config: Arc<EngineConfig>) -> Self {
        let connector = Arc::new(config.ssh_connector());
        Self::new(connector, config)
    }

    /// Unique id, used in logs
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared value store
    pub fn state(&self) -> &ValueStore {
        &self.state
    }

    /// Shared value store, mutably
    pub fn state_mut(&mut self) -> &mut ValueStore {
        &mut self.state
    }

    /// Session cache
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Session cache, mutably
    pub fn sessions_mut(&mut self) -> &mut SessionManager {
        &mut self.sessions
    }

    /// Open or reuse a session, returning its key
    pub async fn open_session(&mut self, request: &SessionRequest) -> Result<String> {
        let session = self.sessions.open(request).await?;
        Ok(session.key().to_string())
    }

    /// Close one session; `false` when none was open under the key
    pub async fn close_session(&mut self, key: &str) -> Result<bool> {
        Ok(self.sessions.close(key).await?)
    }

    /// Run a managed command on the requested session, opening it if needed
    pub async fn run(
        &mut self,
        request: &SessionRequest,
        command: &ManagedCommand,
        super_user: bool,
    ) -> Result<CommandResult> {
        let Self {
            sessions,
            executor,
            state,
            ..
        } = self;
        let session = sessions.open(request).await?;
        let result = if super_user {
            executor.run_as_super_user(session, command, state).await?
        } else {
            executor.run(session, command, state).await?
        };
        Ok(result)
    }

    /// Register a cleanup run on [`Context::close`], most recent first
    pub fn defer(&mut self, cleanup: impl FnOnce() + Send + 'static) {
        self.deferred.push(Box::new(cleanup));
    }

    /// Whether the context was closed
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Close sessions in reverse opening order, then run deferred cleanups
    ///
    /// Cleanups run even when closing a session failed; that failure is
    /// returned afterwards. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let sessions = self.sessions.close_all().await;
        while let Some(cleanup) = self.deferred.pop() {
            cleanup();
        }
        info!(context = %self.id, "closed context");
        Ok(sessions?)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if !self.closed && (!self.sessions.is_empty() || !self.deferred.is_empty()) {
            warn!(
                context = %self.id,
                sessions = self.sessions.len(),
                cleanups = self.deferred.len(),
                "context dropped without close"
            );
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("sessions", &self.sessions)
            .field("state", &self.state)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
