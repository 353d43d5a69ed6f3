//! Local child process under a pseudo-terminal.
//!
//! portable-pty is blocking, so the PTY is bridged with two threads: a
//! reader that forwards output (and reaps the child on EOF) and a writer
//! fed through a channel so input stays ordered.

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, mpsc as std_mpsc};
use std::thread;

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, warn};
use portable_pty::{ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use tokio::sync::mpsc;

use super::codec::Codec;
use super::config::{ProcessConfig, TerminalSize};
use super::{
    BackendEvent, EVENT_CHANNEL_CAPACITY, ExitInfo, ProcessBackend, Signal, TerminalControl,
};
use crate::error::{Result, TransportError};

const READ_BUFFER_SIZE: usize = 4096;

/// Form feed; interactive shells redraw on it.
const CLEAR_SCREEN: &[u8] = b"\x0c";

/// Shell running under a pseudo-terminal.
pub struct PtyProcess {
    config: ProcessConfig,
    newline: String,
    codec: Codec,
    handles: Option<PtyHandles>,
    running: Arc<AtomicBool>,
    paused: Arc<PauseGate>,
}

struct PtyHandles {
    input: std_mpsc::Sender<Vec<u8>>,
    master: Mutex<Box<dyn MasterPty + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    pid: Option<u32>,
    size: Mutex<TerminalSize>,
}

/// Blocks the reader thread while output is paused.
#[derive(Default)]
struct PauseGate {
    paused: Mutex<bool>,
    changed: Condvar,
}

impl PauseGate {
    fn set(&self, paused: bool) {
        if let Ok(mut guard) = self.paused.lock() {
            *guard = paused;
            self.changed.notify_all();
        }
    }

    fn wait_while_paused(&self) {
        if let Ok(guard) = self.paused.lock() {
            drop(self.changed.wait_while(guard, |paused| *paused));
        }
    }
}

impl PtyProcess {
    pub fn new(config: ProcessConfig, newline: impl Into<String>) -> Result<Self> {
        let codec = Codec::for_label(config.encoding.as_deref())?;
        Ok(Self {
            config,
            newline: newline.into(),
            codec,
            handles: None,
            running: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(PauseGate::default()),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.handles.as_ref().and_then(|h| h.pid)
    }

    fn handles(&self) -> Result<&PtyHandles> {
        Ok(self.handles.as_ref().ok_or(TransportError::NotStarted)?)
    }

    fn spawn_failed(&self, reason: impl ToString) -> TransportError {
        TransportError::SpawnFailed {
            program: self.config.program.clone(),
            reason: reason.to_string(),
        }
    }
}

fn pty_size(size: TerminalSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

#[async_trait]
impl ProcessBackend for PtyProcess {
    async fn start(&mut self) -> Result<mpsc::Receiver<BackendEvent>> {
        if self.handles.is_some() {
            return Err(TransportError::AlreadyStarted.into());
        }

        let size = self.config.terminal_size;
        let pair = native_pty_system()
            .openpty(pty_size(size))
            .map_err(|e| self.spawn_failed(e))?;

        let mut builder = CommandBuilder::new(&self.config.program);
        builder.args(&self.config.args);
        for (key, value) in &self.config.env {
            builder.env(key, value);
        }
        if let Some(cwd) = &self.config.cwd {
            builder.cwd(cwd);
        }

        let mut child = pair
            .slave
            .spawn_command(builder)
            .map_err(|e| self.spawn_failed(e))?;
        // The reader only sees EOF once every slave handle is closed.
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| self.spawn_failed(e))?;
        let mut writer = pair.master.take_writer().map_err(|e| self.spawn_failed(e))?;
        debug!("spawned {} under pty (pid {:?})", self.config.program, pid);

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut decoder = self.codec.decoder();
        let running = self.running.clone();
        let paused = self.paused.clone();
        running.store(true, Ordering::SeqCst);

        thread::spawn(move || {
            let mut buf = [0u8; READ_BUFFER_SIZE];
            loop {
                paused.wait_while_paused();
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let text = decoder.decode(&buf[..n], false);
                        if !text.is_empty()
                            && tx.blocking_send(BackendEvent::Stdout(Bytes::from(text))).is_err()
                        {
                            break;
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    // Linux reports EIO once the slave side is gone.
                    Err(e) => {
                        debug!("pty read ended: {}", e);
                        break;
                    }
                }
            }

            let info = match child.wait() {
                Ok(status) => ExitInfo {
                    code: Some(status.exit_code() as i32),
                    signal: None,
                },
                Err(e) => {
                    warn!("failed to wait on pty child: {}", e);
                    ExitInfo::default()
                }
            };
            running.store(false, Ordering::SeqCst);
            debug!("pty child exited: {:?}", info);
            let _ = tx.blocking_send(BackendEvent::Exit(info));
        });

        let (input_tx, input_rx) = std_mpsc::channel::<Vec<u8>>();
        thread::spawn(move || {
            while let Ok(data) = input_rx.recv() {
                if let Err(e) = writer.write_all(&data).and_then(|_| writer.flush()) {
                    warn!("pty write error: {}", e);
                    break;
                }
            }
        });

        self.handles = Some(PtyHandles {
            input: input_tx,
            master: Mutex::new(pair.master),
            killer: Mutex::new(killer),
            pid,
            size: Mutex::new(size),
        });
        Ok(rx)
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        self.handles()?
            .input
            .send(self.codec.encode(data))
            .map_err(|_| TransportError::Disconnected)?;
        Ok(())
    }

    async fn kill(&self, signal: Option<Signal>) -> Result<()> {
        let handles = self.handles()?;

        #[cfg(unix)]
        if let (Some(signal), Some(pid)) = (signal, handles.pid) {
            use nix::sys::signal::{Signal as NixSignal, kill};
            use nix::unistd::Pid;

            return kill(Pid::from_raw(pid as i32), NixSignal::from(signal))
                .map_err(|e| TransportError::Io(e.into()).into());
        }
        #[cfg(not(unix))]
        let _ = signal;

        // A paused reader would never see EOF.
        self.paused.set(false);
        let mut killer = handles
            .killer
            .lock()
            .map_err(|_| TransportError::Disconnected)?;
        killer.kill().map_err(TransportError::Io)?;
        Ok(())
    }

    fn newline(&self) -> &str {
        &self.newline
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn terminal(&self) -> Option<&dyn TerminalControl> {
        Some(self)
    }
}

#[async_trait]
impl TerminalControl for PtyProcess {
    async fn resize(&self, size: TerminalSize) -> Result<()> {
        let handles = self.handles()?;
        handles
            .master
            .lock()
            .map_err(|_| TransportError::Disconnected)?
            .resize(pty_size(size))
            .map_err(|e| TransportError::Io(std::io::Error::other(e.to_string())))?;
        if let Ok(mut current) = handles.size.lock() {
            *current = size;
        }
        Ok(())
    }

    fn size(&self) -> TerminalSize {
        self.handles
            .as_ref()
            .and_then(|h| h.size.lock().ok().map(|s| *s))
            .unwrap_or(self.config.terminal_size)
    }

    async fn clear(&self) -> Result<()> {
        self.write(CLEAR_SCREEN).await
    }

    fn pause(&self) {
        self.paused.set(true);
    }

    fn resume(&self) {
        self.paused.set(false);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_pty_output_and_exit() {
        let mut config = ProcessConfig::new("sh");
        config.args = vec!["-c".into(), "printf ready; exit 4".into()];
        let mut process = PtyProcess::new(config, "\n").unwrap();
        let mut rx = process.start().await.unwrap();

        let mut out = String::new();
        let info = loop {
            match rx.recv().await {
                Some(BackendEvent::Stdout(b)) => out.push_str(&String::from_utf8_lossy(&b)),
                Some(BackendEvent::Stderr(_)) => {}
                Some(BackendEvent::Exit(info)) => break info,
                None => panic!("stream ended without Exit"),
            }
        };
        assert!(out.contains("ready"));
        assert_eq!(info.code, Some(4));
    }

    #[tokio::test]
    async fn test_resize_updates_size() {
        let mut process = PtyProcess::new(ProcessConfig::new("cat"), "\n").unwrap();
        let _rx = process.start().await.unwrap();
        let terminal = process.terminal().unwrap();
        let size = TerminalSize { cols: 132, rows: 50 };
        terminal.resize(size).await.unwrap();
        assert_eq!(terminal.size(), size);
        process.kill(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_terminal_ops_before_start() {
        let process = PtyProcess::new(ProcessConfig::new("sh"), "\n").unwrap();
        assert!(process.write(b"x").await.is_err());
        assert_eq!(process.size(), TerminalSize::default());
    }

    #[tokio::test]
    async fn test_kill_with_signal() {
        let mut process = PtyProcess::new(ProcessConfig::new("cat"), "\n").unwrap();
        let mut rx = process.start().await.unwrap();
        process.kill(Some(Signal::Kill)).await.unwrap();

        loop {
            match rx.recv().await {
                Some(BackendEvent::Exit(_)) => break,
                Some(_) => {}
                None => panic!("stream ended without Exit"),
            }
        }
        assert!(!process.is_running());
    }

    #[test]
    fn test_pause_gate_blocks_until_resumed() {
        let gate = Arc::new(PauseGate::default());
        gate.set(true);

        let (done_tx, done_rx) = std_mpsc::channel();
        let waiter = gate.clone();
        thread::spawn(move || {
            waiter.wait_while_paused();
            let _ = done_tx.send(());
        });

        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());
        gate.set(false);
        assert!(done_rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }
}
