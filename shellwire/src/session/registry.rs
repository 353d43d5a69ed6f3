//! Registry of running sessions.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use futures_util::stream::BoxStream;
use log::debug;
use tokio::sync::broadcast;

use super::builder::LaunchConfig;
use super::command::Command;
use super::events::SessionEvent;
use super::shell::ShellSession;
use super::SessionId;
use crate::dialect::DialectRegistry;
use crate::error::{Result, SessionError};
use crate::transport::TerminalSize;

/// Sessions keyed by id, plus the dialects they may be started with.
///
/// Create one per application and share it; there is no global instance.
pub struct SessionRegistry {
    dialects: Arc<RwLock<DialectRegistry>>,
    sessions: RwLock<HashMap<SessionId, ShellSession>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Create a registry with the built-in dialects.
    pub fn new() -> Self {
        Self::with_dialects(DialectRegistry::with_builtins())
    }

    pub fn with_dialects(dialects: DialectRegistry) -> Self {
        Self {
            dialects: Arc::new(RwLock::new(dialects)),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Shared dialect registry, for registering dialects at runtime.
    pub fn dialects(&self) -> Arc<RwLock<DialectRegistry>> {
        self.dialects.clone()
    }

    /// Start a session and register it.
    pub async fn start(&self, config: LaunchConfig) -> Result<SessionId> {
        let dialects = self
            .dialects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let id = SessionId::new();
        let session = ShellSession::start(id, config, &dialects).await?;
        self.sessions_mut().insert(id, session);
        debug!("registered session {}", id);
        Ok(id)
    }

    /// Look up a session handle.
    pub fn session(&self, id: &SessionId) -> Result<ShellSession> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| {
                SessionError::NotFound {
                    id: id.to_string(),
                }
                .into()
            })
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn execute(
        &self,
        id: &SessionId,
        text: &str,
        silent: bool,
        styled: Option<&str>,
    ) -> Result<Command> {
        self.session(id)?.execute(text, silent, styled).await
    }

    pub async fn send_key(&self, id: &SessionId, data: &[u8]) -> Result<()> {
        self.session(id)?.send_key(data).await
    }

    pub async fn resize(&self, id: &SessionId, size: TerminalSize) -> Result<()> {
        self.session(id)?.resize(size).await
    }

    /// Kill the session's backend and forget it.
    pub async fn stop(&self, id: &SessionId) -> Result<()> {
        let session = self.sessions_mut().remove(id).ok_or_else(|| SessionError::NotFound {
            id: id.to_string(),
        })?;
        session.stop().await
    }

    /// Stop every session.
    pub async fn stop_all(&self) {
        let sessions: Vec<ShellSession> = self.sessions_mut().drain().map(|(_, s)| s).collect();
        for session in sessions {
            if let Err(e) = session.stop().await {
                debug!("error stopping session {}: {}", session.id(), e);
            }
        }
    }

    pub fn subscribe(&self, id: &SessionId) -> Result<broadcast::Receiver<SessionEvent>> {
        Ok(self.session(id)?.subscribe())
    }

    pub fn stdout_stream(&self, id: &SessionId, cid: i64) -> Result<BoxStream<'static, Bytes>> {
        self.session(id)?.stdout_stream(cid)
    }

    pub fn stderr_stream(&self, id: &SessionId) -> Result<BoxStream<'static, Bytes>> {
        Ok(self.session(id)?.stderr_stream())
    }

    pub fn finish_stream(&self, id: &SessionId) -> Result<BoxStream<'static, Command>> {
        Ok(self.session(id)?.finish_stream())
    }

    pub fn commands(&self, id: &SessionId) -> Result<Vec<Command>> {
        Ok(self.session(id)?.commands())
    }

    pub fn command(&self, id: &SessionId, cid: i64) -> Result<Command> {
        self.session(id)?
            .command(cid)
            .ok_or_else(|| SessionError::CommandNotFound { cid }.into())
    }

    pub fn num_commands(&self, id: &SessionId) -> Result<usize> {
        Ok(self.session(id)?.num_commands())
    }

    pub fn stdout_is_finished(&self, id: &SessionId, cid: i64) -> Result<bool> {
        self.session(id)?.stdout_is_finished(cid)
    }

    fn sessions_mut(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<SessionId, ShellSession>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }
}
