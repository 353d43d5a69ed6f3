//! Scripted in-memory backend for session tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{Result, TransportError};
use crate::transport::{BackendEvent, ExitInfo, ProcessBackend, Signal};

/// Maps a command to `(output, exit status)`; `None` leaves it hanging.
pub(crate) type Script = Arc<dyn Fn(&str) -> Option<(String, String)> + Send + Sync>;

/// Replies like a tiny bash to echo-wrapped commands, or to plain lines
/// once a marker prompt is installed.
pub(crate) struct ScriptedBackend {
    tx: mpsc::Sender<BackendEvent>,
    rx: Option<mpsc::Receiver<BackendEvent>>,
    writes: Arc<Mutex<Vec<String>>>,
    script: Script,
    running: AtomicBool,
    /// Marker of the installed prompt.
    prompt: Mutex<Option<String>>,
}

impl ScriptedBackend {
    pub fn new(script: Script) -> Self {
        let (tx, rx) = mpsc::channel(64);
        Self {
            tx,
            rx: Some(rx),
            writes: Arc::new(Mutex::new(Vec::new())),
            script,
            running: AtomicBool::new(false),
            prompt: Mutex::new(None),
        }
    }

    /// Inject events as if the shell produced them.
    pub fn sender(&self) -> mpsc::Sender<BackendEvent> {
        self.tx.clone()
    }

    pub fn writes(&self) -> Arc<Mutex<Vec<String>>> {
        self.writes.clone()
    }
}

pub(crate) fn shell_script(command: &str) -> Option<(String, String)> {
    let command = command.split(" # ").next().unwrap_or(command);
    match command {
        "pwd" => Some(("/home/tester\n".into(), "0".into())),
        "whoami" => Some(("tester\n".into(), "0".into())),
        "false" => Some((String::new(), "1".into())),
        _ => command
            .strip_prefix("echo ")
            .map(|text| (format!("{text}\n"), "0".into())),
    }
}

/// Split `echo M; CMD ; echo M$?M` (or the closing echo on its own line)
/// into `(M, CMD)`.
fn parse_echo_wrapped(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix("echo ")?;
    let (marker, rest) = rest.split_once("; ")?;
    let closing = format!("echo {marker}$?{marker}");
    let command = rest
        .strip_suffix(&format!(" ; {closing}"))
        .or_else(|| rest.strip_suffix(&format!("\n{closing}")))?;
    Some((marker, command))
}

/// Bash's prompt restore line.
pub(crate) const PROMPT_RESTORE: &str = "PS1=$__sw_ps1 PS2=$__sw_ps2";

/// Marker from a bash `... PS1='M$?M' ...` install line.
fn parse_prompt_install(line: &str) -> Option<&str> {
    let (_, rest) = line.split_once("PS1='")?;
    let (marker, _) = rest.split_once("$?")?;
    Some(marker)
}

#[async_trait]
impl ProcessBackend for ScriptedBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<BackendEvent>> {
        self.running.store(true, Ordering::SeqCst);
        Ok(self.rx.take().ok_or(TransportError::AlreadyStarted)?)
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        let line = String::from_utf8_lossy(data)
            .trim_end_matches('\n')
            .to_string();
        self.writes.lock().unwrap().push(line.clone());

        let reply = if let Some(marker) = parse_prompt_install(&line) {
            *self.prompt.lock().unwrap() = Some(marker.to_string());
            Some(format!("{line}\r\n{marker}0{marker}"))
        } else if line == PROMPT_RESTORE {
            *self.prompt.lock().unwrap() = None;
            Some(format!("{line}\r\n$ "))
        } else if let Some(marker) = self.prompt.lock().unwrap().clone() {
            (self.script)(&line)
                .map(|(output, status)| format!("{line}\r\n{output}{marker}{status}{marker}"))
        } else if let Some((marker, command)) = parse_echo_wrapped(&line) {
            (self.script)(command)
                .map(|(output, status)| format!("{marker}\n{output}{marker}{status}{marker}\n"))
        } else {
            None
        };

        if let Some(reply) = reply {
            self.tx
                .send(BackendEvent::Stdout(Bytes::from(reply)))
                .await
                .map_err(|_| TransportError::Disconnected)?;
        }
        Ok(())
    }

    async fn kill(&self, _signal: Option<Signal>) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.tx.try_send(BackendEvent::Exit(ExitInfo {
            code: None,
            signal: Some("SIGKILL".into()),
        }));
        Ok(())
    }

    fn newline(&self) -> &str {
        "\n"
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[test]
fn test_parse_echo_wrapped() {
    assert_eq!(
        parse_echo_wrapped("echo abcd; ls -l ; echo abcd$?abcd"),
        Some(("abcd", "ls -l"))
    );
    assert_eq!(
        parse_echo_wrapped("echo abcd; ls # all\necho abcd$?abcd"),
        Some(("abcd", "ls # all"))
    );
    assert_eq!(parse_echo_wrapped("PS1='x'"), None);
}

#[test]
fn test_parse_prompt_install() {
    assert_eq!(
        parse_prompt_install("__sw_ps1=$PS1 __sw_ps2=$PS2; PS1='abcd$?abcd'; PS2='efgh'"),
        Some("abcd")
    );
    assert_eq!(parse_prompt_install("echo abcd; ls ; echo abcd$?abcd"), None);
}
