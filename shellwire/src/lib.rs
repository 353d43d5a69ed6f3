//! # Shellwire
//!
//! Async engine for driving interactive shells as if they spoke a protocol.
//!
//! Shells only produce a byte stream. Shellwire wraps every command with a
//! random boundary marker, feeds it to bash, cmd or PowerShell running over
//! pipes, a pseudo-terminal or an SSH channel, and scans the output to
//! recover each command's own response and exit status. It also tracks
//! the working directory and user between commands.
//!
//! ## Features
//!
//! - Submit-time check that a command is syntactically complete
//! - Echo-marker and prompt-marker boundary detection, stateful across chunks
//! - Local (pipes), PTY (portable-pty) and SSH (russh) backends
//! - One command in flight per session, many independent sessions
//! - Event streams for output, finished commands and context changes
//! - Serde-loadable dialect definitions for additional shells
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shellwire::{SessionBuilder, SessionRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), shellwire::Error> {
//!     let registry = SessionRegistry::new();
//!     let id = registry
//!         .start(SessionBuilder::local("bash").dialect("bash").build()?)
//!         .await?;
//!
//!     let command = registry.execute(&id, "uname -a", false, None).await?;
//!     let done = registry.session(&id)?.wait_finished(command.cid).await?;
//!     println!("{} (exit {:?})", done, done.exit_status);
//!
//!     registry.stop(&id).await?;
//!     Ok(())
//! }
//! ```

pub mod boundary;
pub mod dialect;
pub mod error;
pub mod session;
pub mod transport;

// Re-export main types for convenience
pub use dialect::{DialectRegistry, InteractionKind, ShellDialectSpec, is_closed};
pub use error::{Error, Result};
pub use session::{
    Command, CommandState, LaunchConfig, SessionBuilder, SessionEvent, SessionId, SessionOptions,
    SessionRegistry, ShellSession,
};
pub use transport::{AuthMethod, BackendKind, HostKeyVerification, ProcessBackend, TerminalSize};
