//! Backend launch configuration.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// Local program launch parameters, shared by the pipe and PTY backends.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Executable to run (e.g. "bash", "cmd.exe", "pwsh").
    pub program: String,

    pub args: Vec<String>,

    /// Working directory; inherited when `None`.
    pub cwd: Option<PathBuf>,

    /// Extra environment variables.
    pub env: Vec<(String, String)>,

    /// Encoding label for the process's stdio (e.g. "gbk", "windows-1252").
    /// UTF-8 when `None`.
    pub encoding: Option<String>,

    /// Initial terminal size (PTY backend only).
    pub terminal_size: TerminalSize,
}

impl ProcessConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: vec![],
            cwd: None,
            env: vec![],
            encoding: None,
            terminal_size: TerminalSize::default(),
        }
    }
}

/// Host key verification mode, analogous to OpenSSH's `StrictHostKeyChecking`.
#[derive(Debug, Clone, Default)]
pub enum HostKeyVerification {
    /// Reject unknown and changed keys. Connection fails if the host
    /// is not already in known_hosts.
    Strict,

    /// Accept and auto-learn unknown keys, but reject changed keys.
    /// This is the default and matches common SSH client behavior.
    #[default]
    AcceptNew,

    /// Accept all keys without checking. For testing and lab use only.
    Disabled,
}

/// Remote shell connection configuration.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Target host (hostname or IP address).
    pub host: String,

    /// SSH port (default: 22).
    pub port: u16,

    /// Username for authentication.
    pub username: String,

    /// Authentication method.
    pub auth: AuthMethod,

    /// Connection timeout.
    pub timeout: Duration,

    /// Interval between keepalive requests on an idle connection.
    pub keepalive_interval: Option<Duration>,

    /// PTY to request on the shell channel; `None` opens a plain shell.
    pub terminal: Option<TerminalSize>,

    /// Host key verification mode.
    pub host_key_verification: HostKeyVerification,

    /// Path to known_hosts file.
    pub known_hosts_path: Option<PathBuf>,
}

impl RemoteConfig {
    pub fn new(host: impl Into<String>, username: impl Into<String>, auth: AuthMethod) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: username.into(),
            auth,
            timeout: Duration::from_secs(30),
            keepalive_interval: Some(Duration::from_secs(30)),
            terminal: Some(TerminalSize::default()),
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
        }
    }

    /// Get the socket address for connection.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Authentication method for remote connections.
#[derive(Debug, Clone)]
pub enum AuthMethod {
    /// Password authentication.
    Password(SecretString),

    /// Private key authentication.
    PrivateKey {
        /// Path to the private key file.
        path: PathBuf,
        /// Optional passphrase for encrypted keys.
        passphrase: Option<SecretString>,
    },
}

/// Which backend a session runs on.
#[derive(Debug, Clone)]
pub enum BackendKind {
    /// Local child process over pipes.
    Local(ProcessConfig),

    /// Local child process under a pseudo-terminal.
    Pty(ProcessConfig),

    /// Shell channel on an SSH connection.
    Remote(RemoteConfig),
}

impl BackendKind {
    /// Whether this backend runs the shell under a terminal.
    pub fn is_terminal(&self) -> bool {
        match self {
            BackendKind::Local(_) => false,
            BackendKind::Pty(_) => true,
            BackendKind::Remote(config) => config.terminal.is_some(),
        }
    }

    /// Short label for logging.
    pub fn label(&self) -> String {
        match self {
            BackendKind::Local(c) => format!("local:{}", c.program),
            BackendKind::Pty(c) => format!("pty:{}", c.program),
            BackendKind::Remote(c) => format!("ssh:{}@{}", c.username, c.socket_addr()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_defaults() {
        let config = RemoteConfig::new(
            "10.0.0.1",
            "admin",
            AuthMethod::Password(SecretString::from("pw".to_string())),
        );
        assert_eq!(config.port, 22);
        assert_eq!(config.socket_addr(), "10.0.0.1:22");
        assert!(config.terminal.is_some());
    }

    #[test]
    fn test_backend_kind_is_terminal() {
        assert!(!BackendKind::Local(ProcessConfig::new("bash")).is_terminal());
        assert!(BackendKind::Pty(ProcessConfig::new("bash")).is_terminal());

        let mut remote = RemoteConfig::new(
            "h",
            "u",
            AuthMethod::PrivateKey {
                path: "/k".into(),
                passphrase: None,
            },
        );
        assert!(BackendKind::Remote(remote.clone()).is_terminal());
        remote.terminal = None;
        assert!(!BackendKind::Remote(remote).is_terminal());
    }

    #[test]
    fn test_debug_hides_password() {
        let auth = AuthMethod::Password(SecretString::from("hunter2".to_string()));
        assert!(!format!("{:?}", auth).contains("hunter2"));
    }
}
