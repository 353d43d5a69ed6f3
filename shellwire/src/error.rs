//! Error types for shellwire.

use std::io;
use thiserror::Error;

/// Main error type for shellwire operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Process backend errors (spawn, connection, I/O)
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Boundary detection errors
    #[error("Boundary error: {0}")]
    Boundary(#[from] BoundaryError),

    /// Session-level errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Shell dialect errors
    #[error("Dialect error: {0}")]
    Dialect(#[from] DialectError),
}

impl Error {
    /// Whether the caller may edit the command and resubmit.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Session(SessionError::SyntaxNotClosed { .. }))
    }
}

/// Process backend errors (local process, PTY, SSH).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to spawn a local process or pseudo-terminal
    #[error("Failed to spawn '{program}': {reason}")]
    SpawnFailed { program: String, reason: String },

    /// Failed to connect to a remote host
    #[error("Connection failed to {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Authentication failed
    #[error("Authentication failed for user '{user}'")]
    AuthenticationFailed { user: String },

    /// SSH key error
    #[error("SSH key error: {0}")]
    Key(String),

    /// Host key did not match the one recorded in known_hosts
    #[error("Host key for {host}:{port} changed (known_hosts line {line})")]
    HostKeyChanged { host: String, port: u16, line: usize },

    /// Host not present in known_hosts under strict verification
    #[error("Host {host}:{port} is not in known_hosts")]
    HostKeyUnknown { host: String, port: u16 },

    /// known_hosts could not be read or written
    #[error("known_hosts error: {0}")]
    KnownHosts(String),

    /// Failed to open the shell channel
    #[error("Failed to open shell channel")]
    ChannelOpenFailed,

    /// Unknown text encoding label
    #[error("Unknown encoding '{0}'")]
    UnknownEncoding(String),

    /// Backend has not been started
    #[error("Backend not started - call start() first")]
    NotStarted,

    /// Backend already started
    #[error("Backend already started")]
    AlreadyStarted,

    /// The process or connection went away
    #[error("Backend disconnected")]
    Disconnected,

    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Boundary detection errors.
#[derive(Error, Debug)]
pub enum BoundaryError {
    /// Every generated marker collided with the command text
    #[error("Could not generate a boundary marker absent from the command after {attempts} attempts")]
    MarkerCollision { attempts: usize },

    /// The dialect's marker alphabet is empty
    #[error("Dialect '{dialect}' has an empty marker alphabet")]
    EmptyAlphabet { dialect: String },

    /// The dialect has no prompt commands but the prompt strategy was requested
    #[error("Dialect '{dialect}' cannot override its prompt")]
    PromptUnsupported { dialect: String },

    /// Invalid regex pattern
    #[error("Invalid regex pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Session-level errors.
#[derive(Error, Debug)]
pub enum SessionError {
    /// No session registered under this id
    #[error("Session '{id}' not found")]
    NotFound { id: String },

    /// The session's backend has exited or was stopped
    #[error("Session '{id}' is no longer running")]
    Dead { id: String },

    /// Submitted text is not a syntactically complete command
    #[error("Command is not closed: {text:?}")]
    SyntaxNotClosed { text: String },

    /// No command with this cid exists in the session history
    #[error("Command {cid} not found")]
    CommandNotFound { cid: i64 },

    /// The backend has no terminal to control
    #[error("Backend does not support terminal operation '{operation}'")]
    TerminalUnsupported { operation: &'static str },

    /// Invalid launch configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

/// Shell dialect errors.
#[derive(Error, Debug)]
pub enum DialectError {
    /// No dialect is registered under this name
    #[error("Unsupported dialect '{name}'")]
    Unsupported { name: String },

    /// Dialect exists but cannot drive the requested interaction kind
    #[error("Dialect '{name}' does not support {interaction} interaction")]
    InteractionUnsupported { name: String, interaction: String },

    /// Dialect already registered
    #[error("Dialect '{name}' is already registered")]
    AlreadyRegistered { name: String },

    /// Invalid dialect definition
    #[error("Invalid dialect definition: {message}")]
    InvalidDefinition { message: String },
}

/// Result type alias using shellwire's Error.
pub type Result<T> = std::result::Result<T, Error>;
