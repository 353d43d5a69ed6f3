//! Remote shell over SSH using russh.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, warn};
use russh::client::{self, Handle, Msg};
use russh::keys::{PrivateKeyWithHashAlg, PublicKey, load_secret_key};
use russh::{Channel, ChannelMsg};
use secrecy::ExposeSecret;
use tokio::sync::{mpsc, oneshot};

use super::codec::Codec;
use super::config::{AuthMethod, HostKeyVerification, RemoteConfig, TerminalSize};
use super::outbox::{Outbox, OutboxReceiver, Outgoing, outbox};
use super::{
    BackendEvent, EVENT_CHANNEL_CAPACITY, ExitInfo, ProcessBackend, Signal, TerminalControl,
};
use crate::error::{Result, TransportError};

/// Shell channel on an SSH connection.
///
/// Input written before the connection is up is queued and flushed in
/// order once the channel opens.
pub struct RemoteShell {
    config: RemoteConfig,
    newline: String,
    outbox: Outbox,
    pending: Option<OutboxReceiver>,
    running: Arc<AtomicBool>,
    size: Mutex<TerminalSize>,
}

impl RemoteShell {
    pub fn new(config: RemoteConfig, newline: impl Into<String>) -> Self {
        let (outbox, pending) = outbox();
        let size = config.terminal.unwrap_or_default();
        Self {
            config,
            newline: newline.into(),
            outbox,
            pending: Some(pending),
            running: Arc::new(AtomicBool::new(false)),
            size: Mutex::new(size),
        }
    }
}

#[async_trait]
impl ProcessBackend for RemoteShell {
    async fn start(&mut self) -> Result<mpsc::Receiver<BackendEvent>> {
        let pending = self.pending.take().ok_or(TransportError::AlreadyStarted)?;
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();

        tokio::spawn(run_connection(
            self.config.clone(),
            pending,
            tx,
            ready_tx,
            self.running.clone(),
        ));

        ready_rx.await.map_err(|_| TransportError::Disconnected)??;
        Ok(rx)
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        self.outbox.push(Outgoing::Data(data.to_vec()))
    }

    async fn kill(&self, signal: Option<Signal>) -> Result<()> {
        match signal {
            Some(signal) => self.outbox.push(Outgoing::Signal(signal)),
            None => self.outbox.push(Outgoing::Close),
        }
    }

    fn newline(&self) -> &str {
        &self.newline
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn terminal(&self) -> Option<&dyn TerminalControl> {
        if self.config.terminal.is_some() {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl TerminalControl for RemoteShell {
    async fn resize(&self, size: TerminalSize) -> Result<()> {
        self.outbox.push(Outgoing::Resize(size))?;
        if let Ok(mut current) = self.size.lock() {
            *current = size;
        }
        Ok(())
    }

    fn size(&self) -> TerminalSize {
        self.size.lock().map(|s| *s).unwrap_or_default()
    }

    async fn clear(&self) -> Result<()> {
        self.write(b"\x0c").await
    }

    // Flow control is left to the SSH window.
    fn pause(&self) {}

    fn resume(&self) {}
}

/// Connect, open the shell, then shuttle data until the channel closes.
async fn run_connection(
    config: RemoteConfig,
    mut outbox: OutboxReceiver,
    events: mpsc::Sender<BackendEvent>,
    ready: oneshot::Sender<Result<()>>,
    running: Arc<AtomicBool>,
) {
    let connection = match SshConnection::connect(config).await {
        Ok(connection) => connection,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let channel = match connection.open_shell().await {
        Ok(channel) => channel,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    running.store(true, Ordering::SeqCst);
    let _ = ready.send(Ok(()));

    let info = pump_channel(channel, &mut outbox, &events).await;
    running.store(false, Ordering::SeqCst);
    if let Err(e) = connection.close().await {
        debug!("error closing SSH connection: {}", e);
    }
    debug!("remote shell exited: {:?}", info);
    let _ = events.send(BackendEvent::Exit(info)).await;
}

async fn pump_channel(
    mut channel: Channel<Msg>,
    outbox: &mut OutboxReceiver,
    events: &mpsc::Sender<BackendEvent>,
) -> ExitInfo {
    let codec = Codec::default();
    let mut stdout = codec.decoder();
    let mut stderr = codec.decoder();
    let mut info = ExitInfo::default();

    loop {
        tokio::select! {
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => {
                    let text = stdout.decode(&data, false);
                    if !text.is_empty() && events.send(BackendEvent::Stdout(Bytes::from(text))).await.is_err() {
                        break;
                    }
                }
                Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                    let text = stderr.decode(&data, false);
                    if !text.is_empty() && events.send(BackendEvent::Stderr(Bytes::from(text))).await.is_err() {
                        break;
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    info.code = Some(exit_status as i32);
                }
                Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                    info.signal = Some(format!("SIG{:?}", signal_name));
                }
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            },
            out = outbox.recv() => {
                let result = match out {
                    Some(Outgoing::Data(bytes)) => channel.data(&bytes[..]).await,
                    Some(Outgoing::Resize(size)) => {
                        channel
                            .window_change(size.cols as u32, size.rows as u32, 0, 0)
                            .await
                    }
                    Some(Outgoing::Signal(signal)) => channel.signal(signal.into()).await,
                    Some(Outgoing::Close) | None => {
                        let _ = channel.close().await;
                        break;
                    }
                };
                if let Err(e) = result {
                    warn!("SSH channel write failed: {}", e);
                    break;
                }
            }
        }
    }
    info
}

/// An authenticated SSH connection.
struct SshConnection {
    session: Handle<SshHandler>,
    config: RemoteConfig,
}

impl SshConnection {
    /// Connect to the SSH server and authenticate.
    async fn connect(config: RemoteConfig) -> Result<Self> {
        let ssh_config = Arc::new(client::Config {
            keepalive_interval: config.keepalive_interval,
            ..Default::default()
        });

        let host_key_error: Arc<Mutex<Option<TransportError>>> = Arc::new(Mutex::new(None));

        let handler = SshHandler {
            host: config.host.clone(),
            port: config.port,
            host_key_verification: config.host_key_verification.clone(),
            known_hosts_path: config.known_hosts_path.clone(),
            host_key_error: host_key_error.clone(),
        };

        debug!("connecting to {}", config.socket_addr());
        let mut session = tokio::time::timeout(
            config.timeout,
            client::connect(ssh_config, (config.host.as_str(), config.port), handler),
        )
        .await
        .map_err(|_| TransportError::Timeout(config.timeout))?
        .map_err(|e| {
            // Prefer the detailed host-key error over russh's generic one
            if let Some(hk_err) = host_key_error.lock().ok().and_then(|mut e| e.take()) {
                return hk_err;
            }
            match e {
                russh::Error::IO(source) => TransportError::ConnectionFailed {
                    host: config.host.clone(),
                    port: config.port,
                    source,
                },
                other => TransportError::Ssh(other),
            }
        })?;

        Self::authenticate(&mut session, &config).await?;

        Ok(Self { session, config })
    }

    /// Open a session channel and start the shell, with a PTY if configured.
    async fn open_shell(&self) -> Result<Channel<Msg>> {
        let channel = self
            .session
            .channel_open_session()
            .await
            .map_err(|_| TransportError::ChannelOpenFailed)?;

        if let Some(size) = self.config.terminal {
            channel
                .request_pty(true, "xterm", size.cols as u32, size.rows as u32, 0, 0, &[])
                .await
                .map_err(TransportError::Ssh)?;
        }

        channel
            .request_shell(true)
            .await
            .map_err(TransportError::Ssh)?;

        Ok(channel)
    }

    async fn authenticate(session: &mut Handle<SshHandler>, config: &RemoteConfig) -> Result<()> {
        let success = match &config.auth {
            AuthMethod::Password(password) => session
                .authenticate_password(&config.username, password.expose_secret())
                .await
                .map_err(TransportError::Ssh)?
                .success(),
            AuthMethod::PrivateKey { path, passphrase } => {
                let key = load_secret_key(path, passphrase.as_ref().map(|p| p.expose_secret()))
                    .map_err(|e| TransportError::Key(e.to_string()))?;

                let hash_alg = session
                    .best_supported_rsa_hash()
                    .await
                    .map_err(TransportError::Ssh)?
                    .flatten();

                session
                    .authenticate_publickey(
                        &config.username,
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await
                    .map_err(TransportError::Ssh)?
                    .success()
            }
        };

        if !success {
            return Err(TransportError::AuthenticationFailed {
                user: config.username.clone(),
            }
            .into());
        }

        Ok(())
    }

    async fn close(self) -> Result<()> {
        self.session
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
            .map_err(TransportError::Ssh)?;
        Ok(())
    }
}

/// russh client handler enforcing the configured host key policy.
struct SshHandler {
    host: String,
    port: u16,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    host_key_error: Arc<Mutex<Option<TransportError>>>,
}

impl SshHandler {
    /// `Ok(true)` if matched, `Ok(false)` if unknown, `Err` if the key changed.
    fn check_known_hosts(&self, pubkey: &PublicKey) -> std::result::Result<bool, TransportError> {
        let result = match &self.known_hosts_path {
            Some(path) => russh::keys::check_known_hosts_path(&self.host, self.port, pubkey, path),
            None => russh::keys::check_known_hosts(&self.host, self.port, pubkey),
        };

        match result {
            Ok(matched) => Ok(matched),
            Err(russh::keys::Error::KeyChanged { line }) => Err(TransportError::HostKeyChanged {
                host: self.host.clone(),
                port: self.port,
                line,
            }),
            Err(e) => Err(TransportError::KnownHosts(e.to_string())),
        }
    }

    fn learn_host_key(&self, pubkey: &PublicKey) -> std::result::Result<(), TransportError> {
        let result = match &self.known_hosts_path {
            Some(path) => {
                russh::keys::known_hosts::learn_known_hosts_path(&self.host, self.port, pubkey, path)
            }
            None => russh::keys::known_hosts::learn_known_hosts(&self.host, self.port, pubkey),
        };
        result.map_err(|e| TransportError::KnownHosts(e.to_string()))
    }

    fn reject(&self, error: TransportError) -> bool {
        if let Ok(mut slot) = self.host_key_error.lock() {
            *slot = Some(error);
        }
        false
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let accepted = match self.host_key_verification {
            HostKeyVerification::Disabled => true,
            HostKeyVerification::AcceptNew => match self.check_known_hosts(server_public_key) {
                Ok(true) => true,
                Ok(false) => {
                    if let Err(e) = self.learn_host_key(server_public_key) {
                        warn!("Failed to save host key: {}", e);
                    }
                    true
                }
                Err(e) => self.reject(e),
            },
            HostKeyVerification::Strict => match self.check_known_hosts(server_public_key) {
                Ok(true) => true,
                Ok(false) => self.reject(TransportError::HostKeyUnknown {
                    host: self.host.clone(),
                    port: self.port,
                }),
                Err(e) => self.reject(e),
            },
        };
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use secrecy::SecretString;

    use super::*;

    fn config(port: u16) -> RemoteConfig {
        let mut config = RemoteConfig::new(
            "127.0.0.1",
            "nobody",
            AuthMethod::Password(SecretString::from("x".to_string())),
        );
        config.port = port;
        config.timeout = Duration::from_secs(5);
        config.host_key_verification = HostKeyVerification::Disabled;
        config
    }

    #[tokio::test]
    async fn test_input_before_start_is_queued_in_order() {
        let mut shell = RemoteShell::new(config(22), "\n");
        shell.execute("first").await.unwrap();
        shell.execute("second").await.unwrap();

        let mut pending = shell.pending.take().unwrap();
        assert_eq!(pending.recv().await, Some(Outgoing::Data(b"first\n".to_vec())));
        assert_eq!(pending.recv().await, Some(Outgoing::Data(b"second\n".to_vec())));
    }

    #[tokio::test]
    async fn test_connect_failure_rejects_start() {
        // Nothing listens on the discard port in test environments.
        let mut shell = RemoteShell::new(config(9), "\n");
        assert!(shell.start().await.is_err());
        assert!(!shell.is_running());
    }

    #[tokio::test]
    async fn test_terminal_only_with_pty() {
        let mut no_pty = config(22);
        no_pty.terminal = None;
        assert!(RemoteShell::new(no_pty, "\n").terminal().is_none());

        let shell = RemoteShell::new(config(22), "\n");
        let terminal = shell.terminal().unwrap();
        terminal.resize(TerminalSize { cols: 120, rows: 30 }).await.unwrap();
        assert_eq!(terminal.size(), TerminalSize { cols: 120, rows: 30 });
    }
}
