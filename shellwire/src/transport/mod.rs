//! Process backends: where a session's shell actually runs.
//!
//! A backend spawns (or connects to) a shell and turns its output into an
//! ordered stream of [`BackendEvent`]s. The session layer never touches
//! pipes, PTYs or SSH channels directly.
//!
//! - [`LocalProcess`]: child process over pipes
//! - [`PtyProcess`]: child process under a pseudo-terminal
//! - [`RemoteShell`]: shell channel on an SSH connection

mod codec;
pub mod config;
mod local;
mod outbox;
mod pty;
mod ssh;

pub use codec::{Codec, StreamDecoder};
pub use config::{
    AuthMethod, BackendKind, HostKeyVerification, ProcessConfig, RemoteConfig, TerminalSize,
};
pub use local::LocalProcess;
pub use pty::PtyProcess;
pub use ssh::RemoteShell;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;

/// Capacity of a backend's event channel.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Something a backend observed, delivered in arrival order.
///
/// Output chunks are always whole UTF-8; backends decode before sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    Stdout(Bytes),
    Stderr(Bytes),
    /// The process or channel went away. Always the last event.
    Exit(ExitInfo),
}

/// How a backend's process ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<String>,
}

/// Signals a session can deliver to its shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
    Kill,
    Hangup,
}

#[cfg(unix)]
impl From<Signal> for nix::sys::signal::Signal {
    fn from(signal: Signal) -> Self {
        use nix::sys::signal::Signal as NixSignal;
        match signal {
            Signal::Interrupt => NixSignal::SIGINT,
            Signal::Terminate => NixSignal::SIGTERM,
            Signal::Kill => NixSignal::SIGKILL,
            Signal::Hangup => NixSignal::SIGHUP,
        }
    }
}

impl From<Signal> for russh::Sig {
    fn from(signal: Signal) -> Self {
        match signal {
            Signal::Interrupt => russh::Sig::INT,
            Signal::Terminate => russh::Sig::TERM,
            Signal::Kill => russh::Sig::KILL,
            Signal::Hangup => russh::Sig::HUP,
        }
    }
}

/// A running (or startable) shell process.
///
/// `start` is called exactly once and hands back the event receiver; all
/// other methods take `&self` so a started backend can be shared.
#[async_trait]
pub trait ProcessBackend: Send + Sync {
    /// Spawn or connect, returning the ordered event stream.
    async fn start(&mut self) -> Result<mpsc::Receiver<BackendEvent>>;

    /// Write raw bytes to the shell's input.
    async fn write(&self, data: &[u8]) -> Result<()>;

    /// Write one line of input followed by the shell's newline.
    async fn execute(&self, line: &str) -> Result<()> {
        let mut data = String::with_capacity(line.len() + 2);
        data.push_str(line);
        data.push_str(self.newline());
        self.write(data.as_bytes()).await
    }

    /// Terminate the process. `None` kills outright.
    async fn kill(&self, signal: Option<Signal>) -> Result<()>;

    /// Line terminator appended by [`execute`](Self::execute).
    fn newline(&self) -> &str;

    fn is_running(&self) -> bool;

    /// Terminal controls, for backends running under a terminal.
    fn terminal(&self) -> Option<&dyn TerminalControl> {
        None
    }
}

/// Controls only meaningful for terminal-backed sessions.
#[async_trait]
pub trait TerminalControl: Send + Sync {
    async fn resize(&self, size: TerminalSize) -> Result<()>;

    fn size(&self) -> TerminalSize;

    /// Ask the shell to clear the screen.
    async fn clear(&self) -> Result<()>;

    /// Stop delivering output until [`resume`](Self::resume).
    fn pause(&self);

    fn resume(&self);
}
