//! A submitted command and its lifecycle.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::SessionId;
use crate::boundary::BoundaryResult;

/// Command id of internal follow-up commands, never stored in history.
pub const SILENT_CID: i64 = -1;

/// Where a command is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Submitted,
    /// Wrapped with a boundary marker, not yet written.
    SentinelWrapped,
    Dispatched,
    /// Output has started arriving.
    Accumulating,
    Finished {
        ok: bool,
    },
    /// The session was killed while the command ran.
    Aborted,
}

/// Why a command finished without its closing boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// `command_timeout` elapsed first.
    TimedOut,
    /// The backend exited.
    Disconnected,
}

/// Snapshot of a command.
#[derive(Debug, Clone)]
pub struct Command {
    pub session_id: SessionId,

    /// Position in the session history; [`SILENT_CID`] for silent commands.
    pub cid: i64,

    /// Text as submitted.
    pub text: String,

    /// Everything actually sent to the shell, markers included.
    pub exact: String,

    /// Caller-supplied rendering of the command (e.g. with highlighting).
    pub styled: Option<String>,

    /// Tracked directory and user when the command was submitted.
    pub cwd: Option<String>,
    pub user: Option<String>,

    pub started_at: DateTime<Utc>,

    /// Session clock when the command was submitted.
    pub clock: u64,

    pub state: CommandState,

    /// Set once the boundary was found or the command failed.
    pub finished: bool,

    /// Raw output as received, escapes included.
    pub stdout: String,
    pub stderr: String,

    /// Output between the boundaries, escapes removed.
    pub response: Option<String>,

    pub exit_status: Option<String>,
    pub exit_ok: bool,

    pub marker: Option<String>,

    pub failure: Option<Failure>,

    pub elapsed: Option<Duration>,
}

impl Command {
    pub(crate) fn new(
        session_id: SessionId,
        cid: i64,
        text: &str,
        styled: Option<&str>,
        cwd: Option<String>,
        user: Option<String>,
        clock: u64,
    ) -> Self {
        Self {
            session_id,
            cid,
            text: text.to_string(),
            exact: String::new(),
            styled: styled.map(str::to_string),
            cwd,
            user,
            started_at: Utc::now(),
            clock,
            state: CommandState::Submitted,
            finished: false,
            stdout: String::new(),
            stderr: String::new(),
            response: None,
            exit_status: None,
            exit_ok: false,
            marker: None,
            failure: None,
            elapsed: None,
        }
    }

    pub fn is_silent(&self) -> bool {
        self.cid == SILENT_CID
    }

    pub fn is_aborted(&self) -> bool {
        self.state == CommandState::Aborted
    }

    /// Finished or aborted; no more output will be attributed to it.
    pub fn is_settled(&self) -> bool {
        self.finished || self.is_aborted()
    }

    /// Lines of the extracted response.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.response.as_deref().unwrap_or_default().lines()
    }

    pub(crate) fn wrap(&mut self, exact: String, marker: String) {
        self.exact = exact;
        self.marker = Some(marker);
        self.state = CommandState::SentinelWrapped;
    }

    pub(crate) fn complete(&mut self, result: BoundaryResult, ok: bool) {
        self.response = Some(result.response);
        self.exit_status = Some(result.exit_status);
        self.exit_ok = ok;
        self.finished = true;
        self.state = CommandState::Finished { ok };
    }

    pub(crate) fn fail(&mut self, failure: Failure) {
        self.failure = Some(failure);
        self.exit_ok = false;
        self.finished = true;
        self.state = CommandState::Finished { ok: false };
    }

    pub(crate) fn abort(&mut self) {
        self.state = CommandState::Aborted;
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.response {
            Some(response) => write!(f, "{}", response),
            None => write!(f, "{}", self.stdout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(cid: i64) -> Command {
        Command::new(SessionId::new(), cid, "ls", None, None, None, 0)
    }

    #[test]
    fn test_lifecycle() {
        let mut c = command(0);
        assert_eq!(c.state, CommandState::Submitted);
        c.wrap("echo m; ls ; echo m$?m".into(), "m".into());
        assert_eq!(c.state, CommandState::SentinelWrapped);

        c.complete(
            BoundaryResult {
                response: "a\nb\n".into(),
                exit_status: "0".into(),
            },
            true,
        );
        assert!(c.finished && c.exit_ok);
        assert_eq!(c.lines().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(c.to_string(), "a\nb\n");
    }

    #[test]
    fn test_abort_leaves_unfinished() {
        let mut c = command(3);
        c.stdout.push_str("partial");
        c.abort();
        assert!(!c.finished);
        assert!(c.is_settled());
        assert_eq!(c.to_string(), "partial");
    }

    #[test]
    fn test_fail() {
        let mut c = command(SILENT_CID);
        assert!(c.is_silent());
        c.fail(Failure::TimedOut);
        assert_eq!(c.state, CommandState::Finished { ok: false });
        assert_eq!(c.exit_status, None);
    }
}
