//! Session cache keyed by `user@host:port`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::session::{Session, SessionRequest};
use crate::transport::Connector;

/// Opens, caches and closes sessions for one context
///
/// At most one session exists per key. Non-transient sessions are closed in
/// reverse opening order by [`SessionManager::close_all`].
pub struct SessionManager {
    connector: Arc<dyn Connector>,
    sessions: HashMap<String, Session>,
    opened: Vec<String>,
    command_timeout: Option<Duration>,
}

impl SessionManager {
    /// Create a manager opening shells through `connector`
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            sessions: HashMap::new(),
            opened: Vec::new(),
            command_timeout: None,
        }
    }

    /// Default timeout for commands on sessions opened from now on
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout).filter(|t| !t.is_zero());
        self
    }

    /// Return the cached session for the target or open a new one
    ///
    /// A cached session is moved back into the target path and picks up the
    /// request's env and PATH entries; values already in place are skipped.
    pub async fn open(&mut self, request: &SessionRequest) -> Result<&mut Session> {
        let target = &request.target;
        target.validate_scheme()?;
        let key = target.session_key();

        if self.sessions.contains_key(&key) {
            let session = self
                .sessions
                .get_mut(&key)
                .ok_or_else(|| Error::SessionNotFound { key: key.clone() })?;
            session.refresh(request).await?;
            return Ok(session);
        }

        let session = Session::open(self.connector.as_ref(), request, self.command_timeout).await?;
        info!(
            session = %key,
            os = %session.os().name,
            version = %session.os().version,
            transient = request.transient,
            "opened session"
        );
        if !request.transient {
            self.opened.push(key.clone());
        }
        Ok(self.sessions.entry(key).or_insert(session))
    }

    /// Cached session by key
    pub fn get(&self, key: &str) -> Option<&Session> {
        self.sessions.get(key)
    }

    /// Cached session by key, mutably
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Session> {
        self.sessions.get_mut(key)
    }

    /// Whether a session is cached under the key
    pub fn contains(&self, key: &str) -> bool {
        self.sessions.contains_key(key)
    }

    /// Number of cached sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are cached
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Close one session; `false` when none was cached under the key
    pub async fn close(&mut self, key: &str) -> Result<bool> {
        self.opened.retain(|opened| opened != key);
        let Some(session) = self.sessions.remove(key) else {
            return Ok(false);
        };
        session.close().await?;
        info!(session = %key, "closed session");
        Ok(true)
    }

    /// Close sessions opened through this manager, most recent first
    ///
    /// Every session is attempted; the first failure is returned. Transient
    /// sessions are left open.
    pub async fn close_all(&mut self) -> Result<()> {
        let mut first_error = None;
        while let Some(key) = self.opened.pop() {
            let Some(session) = self.sessions.remove(&key) else {
                continue;
            };
            match session.close().await {
                Ok(()) => info!(session = %key, "closed session"),
                Err(e) => {
                    warn!(session = %key, error = %e, "failed to close session");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.sessions.keys().collect::<Vec<_>>())
            .field("opened", &self.opened)
            .finish_non_exhaustive()
    }
}
