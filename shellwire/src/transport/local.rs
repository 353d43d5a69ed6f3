//! Local child process over pipes.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{Mutex, mpsc};

use super::codec::{Codec, StreamDecoder};
use super::config::ProcessConfig;
use super::{BackendEvent, EVENT_CHANNEL_CAPACITY, ExitInfo, ProcessBackend, Signal};
use crate::error::{Result, TransportError};

const READ_BUFFER_SIZE: usize = 8192;

/// Shell running as a plain child process, stdio over pipes.
pub struct LocalProcess {
    config: ProcessConfig,
    newline: String,
    codec: Codec,
    stdin: Mutex<Option<ChildStdin>>,
    kill_tx: Option<mpsc::UnboundedSender<()>>,
    pid: Option<u32>,
    running: Arc<AtomicBool>,
}

impl LocalProcess {
    pub fn new(config: ProcessConfig, newline: impl Into<String>) -> Result<Self> {
        let codec = Codec::for_label(config.encoding.as_deref())?;
        Ok(Self {
            config,
            newline: newline.into(),
            codec,
            stdin: Mutex::new(None),
            kill_tx: None,
            pid: None,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn spawn_failed(&self, reason: impl ToString) -> TransportError {
        TransportError::SpawnFailed {
            program: self.config.program.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl ProcessBackend for LocalProcess {
    async fn start(&mut self) -> Result<mpsc::Receiver<BackendEvent>> {
        if self.kill_tx.is_some() {
            return Err(TransportError::AlreadyStarted.into());
        }

        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.config.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &self.config.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|e| self.spawn_failed(e))?;
        let stdin = child.stdin.take().ok_or_else(|| self.spawn_failed("no stdin pipe"))?;
        let stdout = child.stdout.take().ok_or_else(|| self.spawn_failed("no stdout pipe"))?;
        let stderr = child.stderr.take().ok_or_else(|| self.spawn_failed("no stderr pipe"))?;
        self.pid = child.id();
        debug!("spawned {} (pid {:?})", self.config.program, self.pid);

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let stdout_task = tokio::spawn(pump_stream(
            stdout,
            self.codec.decoder(),
            tx.clone(),
            BackendEvent::Stdout,
        ));
        let stderr_task = tokio::spawn(pump_stream(
            stderr,
            self.codec.decoder(),
            tx.clone(),
            BackendEvent::Stderr,
        ));

        let (kill_tx, mut kill_rx) = mpsc::unbounded_channel::<()>();
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                Some(()) = kill_rx.recv() => {
                    if let Err(e) = child.start_kill() {
                        warn!("failed to kill child: {}", e);
                    }
                    child.wait().await
                }
            };
            // Drain both pipes before reporting the exit.
            let _ = stdout_task.await;
            let _ = stderr_task.await;
            running.store(false, Ordering::SeqCst);

            let info = match status {
                Ok(status) => exit_info(status),
                Err(e) => {
                    warn!("failed to wait on child: {}", e);
                    ExitInfo::default()
                }
            };
            debug!("child exited: {:?}", info);
            let _ = tx.send(BackendEvent::Exit(info)).await;
        });

        *self.stdin.lock().await = Some(stdin);
        self.kill_tx = Some(kill_tx);
        Ok(rx)
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(TransportError::NotStarted)?;
        let encoded = self.codec.encode(data);
        stdin.write_all(&encoded).await.map_err(TransportError::Io)?;
        stdin.flush().await.map_err(TransportError::Io)?;
        Ok(())
    }

    async fn kill(&self, signal: Option<Signal>) -> Result<()> {
        let kill_tx = self.kill_tx.as_ref().ok_or(TransportError::NotStarted)?;

        #[cfg(unix)]
        if let (Some(signal), Some(pid)) = (signal, self.pid) {
            use nix::sys::signal::{Signal as NixSignal, kill};
            use nix::unistd::Pid;

            return kill(Pid::from_raw(pid as i32), NixSignal::from(signal))
                .map_err(|e| TransportError::Io(e.into()).into());
        }
        #[cfg(not(unix))]
        let _ = signal;

        // Already exited if the monitor task is gone.
        let _ = kill_tx.send(());
        Ok(())
    }

    fn newline(&self) -> &str {
        &self.newline
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Forward one pipe to the event channel until EOF.
async fn pump_stream<R>(
    mut reader: R,
    mut decoder: StreamDecoder,
    tx: mpsc::Sender<BackendEvent>,
    wrap: fn(Bytes) -> BackendEvent,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = decoder.decode(&buf[..n], false);
                if !text.is_empty() && tx.send(wrap(Bytes::from(text))).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!("pipe read error: {}", e);
                break;
            }
        }
    }
    let tail = decoder.decode(&[], true);
    if !tail.is_empty() {
        let _ = tx.send(wrap(Bytes::from(tail))).await;
    }
}

fn exit_info(status: ExitStatus) -> ExitInfo {
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status
            .signal()
            .and_then(|s| nix::sys::signal::Signal::try_from(s).ok())
            .map(|s| s.as_str().to_string())
    };
    #[cfg(not(unix))]
    let signal = None;

    ExitInfo {
        code: status.code(),
        signal,
    }
}
