//! Builder for session launch configuration.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::dialect::InteractionKind;
use crate::error::{Result, SessionError};
use crate::transport::{
    AuthMethod, BackendKind, HostKeyVerification, ProcessConfig, RemoteConfig, TerminalSize,
};

/// Per-session behavior knobs.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Fail a command whose closing boundary never arrives. Waits forever
    /// when `None`.
    pub command_timeout: Option<Duration>,

    /// Read the directory and user as soon as the session starts.
    pub sync_context: bool,

    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            command_timeout: None,
            sync_context: true,
            event_capacity: 1024,
        }
    }
}

/// Everything needed to start a session.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Registered dialect name.
    pub dialect: String,
    pub interaction: InteractionKind,
    pub backend: BackendKind,
    pub options: SessionOptions,
}

enum Target {
    Local,
    Pty,
    Remote {
        host: String,
        port: u16,
        username: Option<String>,
        auth: Option<AuthMethod>,
        timeout: Duration,
        pty: bool,
        host_key_verification: HostKeyVerification,
        known_hosts_path: Option<PathBuf>,
    },
}

/// Builder for [`LaunchConfig`].
///
/// # Example
///
/// ```rust,no_run
/// use shellwire::{SessionBuilder, SessionRegistry};
///
/// # async fn example() -> Result<(), shellwire::Error> {
/// let registry = SessionRegistry::new();
/// let config = SessionBuilder::local("bash").dialect("bash").build()?;
/// let id = registry.start(config).await?;
/// let command = registry.execute(&id, "ls -la", false, None).await?;
/// # Ok(())
/// # }
/// ```
pub struct SessionBuilder {
    target: Target,
    dialect: String,
    process: ProcessConfig,
    options: SessionOptions,
}

impl SessionBuilder {
    fn with_target(target: Target, program: &str) -> Self {
        Self {
            target,
            dialect: "bash".to_string(),
            process: ProcessConfig::new(program),
            options: SessionOptions::default(),
        }
    }

    /// Run `program` as a local child over pipes.
    pub fn local(program: &str) -> Self {
        Self::with_target(Target::Local, program)
    }

    /// Run `program` under a local pseudo-terminal.
    pub fn pty(program: &str) -> Self {
        Self::with_target(Target::Pty, program)
    }

    /// Open a shell on a remote host over SSH.
    pub fn remote(host: impl Into<String>) -> Self {
        Self::with_target(
            Target::Remote {
                host: host.into(),
                port: 22,
                username: None,
                auth: None,
                timeout: Duration::from_secs(30),
                pty: true,
                host_key_verification: HostKeyVerification::default(),
                known_hosts_path: None,
            },
            "",
        )
    }

    /// Set the dialect name (default: "bash").
    pub fn dialect(mut self, name: impl Into<String>) -> Self {
        self.dialect = name.into();
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.process.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.process.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.process.env.push((key.into(), value.into()));
        self
    }

    /// Set the process's stdio encoding label (e.g. "gbk").
    pub fn encoding(mut self, label: impl Into<String>) -> Self {
        self.process.encoding = Some(label.into());
        self
    }

    pub fn terminal_size(mut self, cols: u16, rows: u16) -> Self {
        self.process.terminal_size = TerminalSize { cols, rows };
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.options.command_timeout = Some(timeout);
        self
    }

    /// Whether to read directory and user right after start (default: true).
    pub fn sync_context(mut self, enabled: bool) -> Self {
        self.options.sync_context = enabled;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.options.event_capacity = capacity;
        self
    }

    /// Set the SSH port (default: 22).
    pub fn port(mut self, value: u16) -> Self {
        if let Target::Remote { port, .. } = &mut self.target {
            *port = value;
        }
        self
    }

    pub fn username(mut self, value: impl Into<String>) -> Self {
        if let Target::Remote { username, .. } = &mut self.target {
            *username = Some(value.into());
        }
        self
    }

    /// Set password authentication.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        if let Target::Remote { auth, .. } = &mut self.target {
            *auth = Some(AuthMethod::Password(SecretString::from(password.into())));
        }
        self
    }

    /// Set private key authentication.
    pub fn private_key(mut self, key_path: impl Into<PathBuf>) -> Self {
        if let Target::Remote { auth, .. } = &mut self.target {
            *auth = Some(AuthMethod::PrivateKey {
                path: key_path.into(),
                passphrase: None,
            });
        }
        self
    }

    /// Set private key authentication with passphrase.
    pub fn private_key_with_passphrase(
        mut self,
        key_path: impl Into<PathBuf>,
        passphrase: impl Into<String>,
    ) -> Self {
        if let Target::Remote { auth, .. } = &mut self.target {
            *auth = Some(AuthMethod::PrivateKey {
                path: key_path.into(),
                passphrase: Some(SecretString::from(passphrase.into())),
            });
        }
        self
    }

    /// Set the connection timeout.
    pub fn timeout(mut self, value: Duration) -> Self {
        if let Target::Remote { timeout, .. } = &mut self.target {
            *timeout = value;
        }
        self
    }

    /// Request a PTY on the remote channel (default: true).
    pub fn remote_pty(mut self, enabled: bool) -> Self {
        if let Target::Remote { pty, .. } = &mut self.target {
            *pty = enabled;
        }
        self
    }

    pub fn host_key_verification(mut self, mode: HostKeyVerification) -> Self {
        if let Target::Remote {
            host_key_verification,
            ..
        } = &mut self.target
        {
            *host_key_verification = mode;
        }
        self
    }

    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        if let Target::Remote {
            known_hosts_path, ..
        } = &mut self.target
        {
            *known_hosts_path = Some(path.into());
        }
        self
    }

    /// Build the launch configuration.
    ///
    /// The interaction kind follows from the backend: pipes are driven as
    /// commands, anything with a terminal as a terminal.
    pub fn build(self) -> Result<LaunchConfig> {
        let backend = match self.target {
            Target::Local => BackendKind::Local(self.process),
            Target::Pty => BackendKind::Pty(self.process),
            Target::Remote {
                host,
                port,
                username,
                auth,
                timeout,
                pty,
                host_key_verification,
                known_hosts_path,
            } => {
                let username = username.ok_or_else(|| SessionError::InvalidConfig {
                    message: "Username is required".to_string(),
                })?;
                let auth = auth.ok_or_else(|| SessionError::InvalidConfig {
                    message: "Password or private key is required".to_string(),
                })?;
                let mut remote = RemoteConfig::new(host, username, auth);
                remote.port = port;
                remote.timeout = timeout;
                remote.terminal = pty.then_some(self.process.terminal_size);
                remote.host_key_verification = host_key_verification;
                remote.known_hosts_path = known_hosts_path;
                BackendKind::Remote(remote)
            }
        };

        let interaction = if backend.is_terminal() {
            InteractionKind::Terminal
        } else {
            InteractionKind::Command
        };

        Ok(LaunchConfig {
            dialect: self.dialect,
            interaction,
            backend,
            options: self.options,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_build() {
        let config = SessionBuilder::local("bash")
            .args(["--norc"])
            .env("LANG", "C")
            .command_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        assert_eq!(config.dialect, "bash");
        assert_eq!(config.interaction, InteractionKind::Command);
        assert_eq!(config.options.command_timeout, Some(Duration::from_secs(5)));
        match config.backend {
            BackendKind::Local(process) => {
                assert_eq!(process.program, "bash");
                assert_eq!(process.args, vec!["--norc"]);
                assert_eq!(process.env, vec![("LANG".into(), "C".into())]);
            }
            other => panic!("unexpected backend {:?}", other),
        }
    }

    #[test]
    fn test_pty_is_terminal() {
        let config = SessionBuilder::pty("pwsh").dialect("powershell").build().unwrap();
        assert_eq!(config.interaction, InteractionKind::Terminal);
    }

    #[test]
    fn test_remote_requires_username_and_auth() {
        assert!(SessionBuilder::remote("h").password("pw").build().is_err());
        assert!(SessionBuilder::remote("h").username("u").build().is_err());

        let config = SessionBuilder::remote("h")
            .username("u")
            .password("pw")
            .port(2222)
            .remote_pty(false)
            .build()
            .unwrap();
        assert_eq!(config.interaction, InteractionKind::Command);
        match config.backend {
            BackendKind::Remote(remote) => {
                assert_eq!(remote.socket_addr(), "h:2222");
                assert!(remote.terminal.is_none());
            }
            other => panic!("unexpected backend {:?}", other),
        }
    }
}
