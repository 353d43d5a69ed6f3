//! Shell sessions and the registry that owns them.
//!
//! A [`ShellSession`] drives one backend: it gates submissions so a single
//! command is in flight, runs a pump task that feeds backend output to the
//! boundary detector, and broadcasts [`SessionEvent`]s as commands progress.

mod builder;
mod command;
mod events;
#[cfg(test)]
pub(crate) mod mock;
mod registry;
mod shell;

pub use builder::{LaunchConfig, SessionBuilder, SessionOptions};
pub use command::{Command, CommandState, Failure, SILENT_CID};
pub use events::SessionEvent;
pub use registry::SessionRegistry;
pub use shell::ShellSession;

use std::fmt;

use uuid::Uuid;

/// Unique identifier of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
