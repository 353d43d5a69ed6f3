//! A single shell session.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use bytes::Bytes;
use futures_util::stream::{self, BoxStream};
use futures_util::{StreamExt, future};
use log::{debug, info, trace, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Semaphore, broadcast, mpsc, oneshot};

use super::SessionId;
use super::builder::{LaunchConfig, SessionOptions};
use super::command::{Command, CommandState, Failure, SILENT_CID};
use super::events::{SessionEvent, into_stream};
use crate::boundary::{BoundaryDetector, Detection, Strategy};
use crate::dialect::{DialectRegistry, InteractionKind, ShellDialectSpec, is_closed};
use crate::error::{DialectError, Error, Result, SessionError};
use crate::transport::{
    BackendEvent, BackendKind, ExitInfo, LocalProcess, ProcessBackend, PtyProcess, RemoteShell,
    Signal, TerminalControl, TerminalSize,
};

/// A running shell with at most one command in flight.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct ShellSession {
    inner: Arc<Inner>,
}

struct Inner {
    id: SessionId,
    dialect: Arc<ShellDialectSpec>,
    interaction: InteractionKind,
    strategy: Strategy,
    backend: Arc<dyn ProcessBackend>,
    options: SessionOptions,
    state: Mutex<SessionState>,
    /// One permit; held from submission until the command and its
    /// follow-ups have finished.
    gate: Semaphore,
    events: broadcast::Sender<SessionEvent>,
}

#[derive(Default)]
struct SessionState {
    /// Settled visible commands, in cid order.
    history: Vec<Command>,
    in_flight: Option<InFlight>,
    next_cid: i64,
    next_seq: u64,
    cwd: Option<String>,
    user: Option<String>,
    clock: u64,
    alive: bool,
}

struct InFlight {
    /// Distinguishes dispatches, so a stale timer never fails a later command.
    seq: u64,
    command: Command,
    detector: BoundaryDetector,
    started: Instant,
    done: Option<oneshot::Sender<Command>>,
}

impl SessionState {
    fn find(&self, cid: i64) -> Option<&Command> {
        if let Some(flight) = &self.in_flight {
            if flight.command.cid == cid && !flight.command.is_silent() {
                return Some(&flight.command);
            }
        }
        self.history.iter().rev().find(|c| c.cid == cid)
    }

    fn visible_in_flight(&self) -> Option<&Command> {
        self.in_flight
            .as_ref()
            .map(|f| &f.command)
            .filter(|c| !c.is_silent())
    }
}

impl ShellSession {
    /// Resolve the dialect, create the backend and start it.
    pub async fn start(
        id: SessionId,
        config: LaunchConfig,
        dialects: &DialectRegistry,
    ) -> Result<Self> {
        let dialect = dialects.resolve(&config.dialect, config.interaction)?;

        if config.backend.is_terminal() != (config.interaction == InteractionKind::Terminal) {
            return Err(SessionError::InvalidConfig {
                message: format!(
                    "{} interaction does not match backend {}",
                    config.interaction,
                    config.backend.label()
                ),
            }
            .into());
        }

        debug!("starting session {} on {}", id, config.backend.label());
        let newline = dialect.newline.clone();
        let backend: Box<dyn ProcessBackend> = match config.backend {
            BackendKind::Local(process) => Box::new(LocalProcess::new(process, newline)?),
            BackendKind::Pty(process) => Box::new(PtyProcess::new(process, newline)?),
            BackendKind::Remote(remote) => Box::new(RemoteShell::new(remote, newline)),
        };

        Self::with_backend(id, dialect, config.interaction, backend, config.options).await
    }

    /// Start a session on an already constructed backend.
    pub async fn with_backend(
        id: SessionId,
        dialect: Arc<ShellDialectSpec>,
        interaction: InteractionKind,
        mut backend: Box<dyn ProcessBackend>,
        options: SessionOptions,
    ) -> Result<Self> {
        if !dialect.supports(interaction) {
            return Err(DialectError::InteractionUnsupported {
                name: dialect.name.clone(),
                interaction: interaction.to_string(),
            }
            .into());
        }

        let strategy = Strategy::for_session(&dialect, interaction);
        let backend_events = backend.start().await?;
        let (events, _) = broadcast::channel(options.event_capacity.max(1));

        let inner = Arc::new(Inner {
            id,
            dialect,
            interaction,
            strategy,
            backend: Arc::from(backend),
            options,
            state: Mutex::new(SessionState {
                alive: true,
                ..Default::default()
            }),
            gate: Semaphore::new(1),
            events,
        });
        info!(
            "session {} started ({}, {:?})",
            id, inner.dialect.name, inner.strategy
        );

        tokio::spawn(pump(inner.clone(), backend_events));

        if inner.options.sync_context {
            if let Ok(permit) = inner.gate.try_acquire() {
                permit.forget();
                let inner = inner.clone();
                tokio::spawn(async move {
                    inner.resync().await;
                    inner.release();
                });
            }
        }

        Ok(Self { inner })
    }

    /// Submit a command.
    ///
    /// Waits until the previous command and its follow-ups have finished,
    /// then returns a snapshot of the dispatched command. Use
    /// [`wait_finished`](Self::wait_finished) or the event streams to see it
    /// complete. Silent commands get cid [`SILENT_CID`] and stay out of the
    /// history.
    pub async fn execute(&self, text: &str, silent: bool, styled: Option<&str>) -> Result<Command> {
        self.inner.ensure_alive()?;
        if !is_closed(&self.inner.dialect, text) {
            return Err(SessionError::SyntaxNotClosed {
                text: text.to_string(),
            }
            .into());
        }

        self.inner.acquire().await?;
        match self.inner.dispatch(text, !silent, styled).await {
            Ok((command, done)) => {
                let inner = self.inner.clone();
                tokio::spawn(async move {
                    let settled = done.await.ok();
                    if let Some(command) = &settled {
                        inner.restore_prompt(command).await;
                    }
                    if !silent && settled.is_some_and(|c| c.failure.is_none()) {
                        inner.resync().await;
                    }
                    inner.release();
                });
                Ok(command)
            }
            Err(e) => {
                self.inner.release();
                Err(e)
            }
        }
    }

    /// Write raw input (keystrokes, control characters) to the shell.
    pub async fn send_key(&self, data: &[u8]) -> Result<()> {
        self.inner.ensure_alive()?;
        self.inner.state().clock += 1;
        self.inner.backend.write(data).await
    }

    pub async fn resize(&self, size: TerminalSize) -> Result<()> {
        self.inner.ensure_alive()?;
        let terminal = self.terminal().ok_or(SessionError::TerminalUnsupported {
            operation: "resize",
        })?;
        self.inner.state().clock += 1;
        terminal.resize(size).await
    }

    /// Terminal controls, when the backend runs under a terminal.
    pub fn terminal(&self) -> Option<&dyn TerminalControl> {
        self.inner.backend.terminal()
    }

    /// Tear the backend down.
    ///
    /// A command in flight is abandoned: it stays unfinished and reports
    /// [`CommandState::Aborted`].
    pub async fn kill(&self, signal: Option<Signal>) -> Result<()> {
        let inner = &self.inner;
        {
            let mut state = inner.state();
            state.alive = false;
            if let Some(flight) = state.in_flight.take() {
                let mut command = flight.command;
                debug!("session {}: aborting command {}", inner.id, command.cid);
                command.abort();
                if !command.is_silent() {
                    state.history.push(command);
                }
            }
        }
        inner.gate.close();

        if inner.backend.is_running() {
            inner.backend.kill(signal).await?;
        }
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        info!("stopping session {}", self.inner.id);
        self.kill(None).await
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn dialect(&self) -> &ShellDialectSpec {
        &self.inner.dialect
    }

    pub fn interaction(&self) -> InteractionKind {
        self.inner.interaction
    }

    pub fn strategy(&self) -> Strategy {
        self.inner.strategy
    }

    pub fn is_alive(&self) -> bool {
        self.inner.state().alive
    }

    pub fn cwd(&self) -> Option<String> {
        self.inner.state().cwd.clone()
    }

    pub fn user(&self) -> Option<String> {
        self.inner.state().user.clone()
    }

    /// Monotonic counter bumped by output, key sends and resizes.
    pub fn clock(&self) -> u64 {
        self.inner.state().clock
    }

    /// All visible commands, oldest first.
    pub fn commands(&self) -> Vec<Command> {
        let state = self.inner.state();
        let mut commands = state.history.clone();
        commands.extend(state.visible_in_flight().cloned());
        commands
    }

    pub fn command(&self, cid: i64) -> Option<Command> {
        self.inner.state().find(cid).cloned()
    }

    pub fn num_commands(&self) -> usize {
        let state = self.inner.state();
        state.history.len() + usize::from(state.visible_in_flight().is_some())
    }

    pub fn stdout_is_finished(&self, cid: i64) -> Result<bool> {
        self.command(cid)
            .map(|c| c.finished)
            .ok_or_else(|| SessionError::CommandNotFound { cid }.into())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Stdout of one command: what arrived so far, then live chunks until
    /// it settles.
    pub fn stdout_stream(&self, cid: i64) -> Result<BoxStream<'static, Bytes>> {
        let (backlog, settled, rx) = {
            let state = self.inner.state();
            let command = state
                .find(cid)
                .ok_or(SessionError::CommandNotFound { cid })?;
            (
                Bytes::from(command.stdout.clone()),
                command.is_settled(),
                self.inner.events.subscribe(),
            )
        };

        let backlog = stream::iter((!backlog.is_empty()).then_some(backlog));
        if settled {
            return Ok(backlog.boxed());
        }

        let live = into_stream(rx)
            .take_while(move |event| {
                future::ready(match event {
                    SessionEvent::CommandFinished(command) => command.cid != cid,
                    SessionEvent::Disconnected(_) => false,
                    _ => true,
                })
            })
            .filter_map(move |event| {
                future::ready(match event {
                    SessionEvent::Stdout {
                        cid: Some(c),
                        data,
                    } if c == cid => Some(data),
                    _ => None,
                })
            });
        Ok(backlog.chain(live).boxed())
    }

    /// All stderr from now until the session ends.
    pub fn stderr_stream(&self) -> BoxStream<'static, Bytes> {
        until_disconnected(self.subscribe())
            .filter_map(|event| {
                future::ready(match event {
                    SessionEvent::Stderr { data, .. } => Some(data),
                    _ => None,
                })
            })
            .boxed()
    }

    /// Visible commands as they finish.
    pub fn finish_stream(&self) -> BoxStream<'static, Command> {
        until_disconnected(self.subscribe())
            .filter_map(|event| {
                future::ready(match event {
                    SessionEvent::CommandFinished(command) => Some(*command),
                    _ => None,
                })
            })
            .boxed()
    }

    /// Wait until command `cid` settles and return its final snapshot.
    pub async fn wait_finished(&self, cid: i64) -> Result<Command> {
        let mut rx = {
            let state = self.inner.state();
            let command = state
                .find(cid)
                .ok_or(SessionError::CommandNotFound { cid })?;
            if command.is_settled() || !state.alive {
                return Ok(command.clone());
            }
            self.inner.events.subscribe()
        };

        loop {
            match rx.recv().await {
                Ok(SessionEvent::CommandFinished(command)) if command.cid == cid => {
                    return Ok(*command);
                }
                Ok(SessionEvent::Disconnected(_)) | Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(_)) => {
                    if self.command(cid).is_some_and(|c| c.is_settled()) {
                        break;
                    }
                }
                Ok(_) => {}
            }
        }
        self.command(cid)
            .ok_or_else(|| SessionError::CommandNotFound { cid }.into())
    }
}

impl std::fmt::Debug for ShellSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellSession")
            .field("id", &self.inner.id)
            .field("dialect", &self.inner.dialect.name)
            .field("strategy", &self.inner.strategy)
            .finish()
    }
}

fn until_disconnected(
    rx: broadcast::Receiver<SessionEvent>,
) -> impl futures_core::Stream<Item = SessionEvent> + Send + 'static {
    into_stream(rx).take_while(|event| {
        future::ready(!matches!(event, SessionEvent::Disconnected(_)))
    })
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dead(&self) -> Error {
        SessionError::Dead {
            id: self.id.to_string(),
        }
        .into()
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.state().alive {
            Ok(())
        } else {
            Err(self.dead())
        }
    }

    async fn acquire(&self) -> Result<()> {
        self.gate.acquire().await.map_err(|_| self.dead())?.forget();
        Ok(())
    }

    fn release(&self) {
        self.gate.add_permits(1);
    }

    /// Wrap and write a command; the gate must be held.
    ///
    /// The returned receiver yields the settled command. It is dropped
    /// without a value if the command is aborted.
    async fn dispatch(
        self: &Arc<Self>,
        text: &str,
        visible: bool,
        styled: Option<&str>,
    ) -> Result<(Command, oneshot::Receiver<Command>)> {
        let wrapped = self.strategy.begin(&self.dialect, text)?;
        let (done_tx, done_rx) = oneshot::channel();

        let (seq, cid) = {
            let mut state = self.state();
            if !state.alive {
                return Err(self.dead());
            }
            let cid = if visible {
                state.next_cid += 1;
                state.next_cid - 1
            } else {
                SILENT_CID
            };
            let seq = state.next_seq;
            state.next_seq += 1;

            let mut command = Command::new(
                self.id,
                cid,
                text,
                styled,
                state.cwd.clone(),
                state.user.clone(),
                state.clock,
            );
            command.wrap(wrapped.exact, wrapped.marker);
            state.in_flight = Some(InFlight {
                seq,
                command,
                detector: wrapped.detector,
                started: Instant::now(),
                done: Some(done_tx),
            });
            (seq, cid)
        };
        trace!("session {}: dispatching {:?}", self.id, wrapped.dispatch);

        if let Err(e) = self.backend.execute(&wrapped.dispatch).await {
            let mut state = self.state();
            if state.in_flight.as_ref().is_some_and(|f| f.seq == seq) {
                state.in_flight = None;
            }
            warn!("session {}: dispatch failed: {}", self.id, e);
            return Err(e);
        }

        if let Some(timeout) = self.options.command_timeout {
            let inner = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                inner.expire(seq);
            });
        }

        let mut state = self.state();
        let snapshot = match state.in_flight.as_mut() {
            Some(flight) if flight.seq == seq => {
                if flight.command.state == CommandState::SentinelWrapped {
                    flight.command.state = CommandState::Dispatched;
                }
                flight.command.clone()
            }
            // Already settled by the time the write returned.
            _ => state.find(cid).cloned().unwrap_or_else(|| {
                let mut command = Command::new(self.id, cid, text, styled, None, None, state.clock);
                command.state = CommandState::Dispatched;
                command
            }),
        };
        Ok((snapshot, done_rx))
    }

    /// Run a silent command and return the last line of its response.
    async fn query(self: &Arc<Self>, text: &str) -> Option<String> {
        let (_, done) = self.dispatch(text, false, None).await.ok()?;
        let command = done.await.ok()?;
        self.restore_prompt(&command).await;
        if !command.exit_ok {
            return None;
        }
        command
            .response
            .as_deref()?
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .map(str::to_string)
    }

    /// Put the shell's own prompt back after a prompt-wrapped command.
    ///
    /// Skipped when the command failed, since the shell may still be busy.
    async fn restore_prompt(&self, command: &Command) {
        if self.strategy != Strategy::Prompt || command.failure.is_some() || !self.state().alive {
            return;
        }
        let Some(restore) = self.dialect.prompt.as_ref().and_then(|p| p.restore.as_deref()) else {
            return;
        };
        trace!("session {}: restoring prompt", self.id);
        if let Err(e) = self.backend.execute(restore).await {
            warn!("session {}: failed to restore prompt: {}", self.id, e);
        }
    }

    /// Re-read directory and user; the gate must be held.
    async fn resync(self: &Arc<Self>) {
        let cwd = self.query(self.dialect.current_directory_command()).await;
        let user = self.query(self.dialect.user_command()).await;

        let changed = {
            let mut state = self.state();
            let mut changed = false;
            if cwd.is_some() && state.cwd != cwd {
                state.cwd = cwd;
                changed = true;
            }
            if user.is_some() && state.user != user {
                state.user = user;
                changed = true;
            }
            changed.then(|| (state.cwd.clone(), state.user.clone()))
        };

        if let Some((cwd, user)) = changed {
            debug!("session {}: context {:?} {:?}", self.id, cwd, user);
            let _ = self.events.send(SessionEvent::ContextChanged { cwd, user });
        }
    }

    /// Record a settled command and wake whoever waits on it.
    fn settle(&self, state: &mut SessionState, flight: InFlight) {
        let InFlight {
            mut command,
            started,
            done,
            ..
        } = flight;
        command.elapsed = Some(started.elapsed());
        debug!(
            "session {}: command {} settled ({:?})",
            self.id, command.cid, command.state
        );
        if !command.is_silent() {
            state.history.push(command.clone());
            let _ = self
                .events
                .send(SessionEvent::CommandFinished(Box::new(command.clone())));
        }
        if let Some(done) = done {
            let _ = done.send(command);
        }
    }

    /// Returns a line to feed when the detector asks for one.
    fn on_stdout(&self, data: Bytes) -> Option<String> {
        let mut state = self.state();
        state.clock += 1;

        let Some(flight) = state.in_flight.as_mut() else {
            let _ = self.events.send(SessionEvent::Stdout { cid: None, data });
            return None;
        };

        let command = &mut flight.command;
        command.stdout.push_str(&String::from_utf8_lossy(&data));
        if matches!(
            command.state,
            CommandState::SentinelWrapped | CommandState::Dispatched
        ) {
            command.state = CommandState::Accumulating;
        }
        if !command.is_silent() {
            let _ = self.events.send(SessionEvent::Stdout {
                cid: Some(command.cid),
                data: data.clone(),
            });
        }

        match flight.detector.accumulate(&data) {
            Detection::Pending | Detection::Settled(_) => None,
            Detection::Feed(line) => Some(line),
            Detection::Completed(result) => {
                let mut flight = state.in_flight.take()?;
                let ok = self.dialect.is_success(&result.exit_status);
                flight.command.complete(result, ok);
                self.settle(&mut state, flight);
                None
            }
        }
    }

    fn on_stderr(&self, data: Bytes) {
        let mut state = self.state();
        state.clock += 1;
        let cid = match state.in_flight.as_mut() {
            Some(flight) => {
                flight
                    .command
                    .stderr
                    .push_str(&String::from_utf8_lossy(&data));
                if flight.command.is_silent() {
                    return;
                }
                Some(flight.command.cid)
            }
            None => None,
        };
        let _ = self.events.send(SessionEvent::Stderr { cid, data });
    }

    fn on_exit(&self, info: ExitInfo) {
        {
            let mut state = self.state();
            state.alive = false;
            if let Some(mut flight) = state.in_flight.take() {
                warn!(
                    "session {}: backend exited during command {}",
                    self.id, flight.command.cid
                );
                flight.command.fail(Failure::Disconnected);
                self.settle(&mut state, flight);
            }
        }
        self.gate.close();
        info!("session {} ended: {:?}", self.id, info);
        let _ = self.events.send(SessionEvent::Disconnected(info));
    }

    fn expire(&self, seq: u64) {
        let mut state = self.state();
        if !state.in_flight.as_ref().is_some_and(|f| f.seq == seq) {
            return;
        }
        if let Some(mut flight) = state.in_flight.take() {
            warn!(
                "session {}: command {} timed out",
                self.id, flight.command.cid
            );
            flight.command.fail(Failure::TimedOut);
            self.settle(&mut state, flight);
        }
    }
}

/// Owns the backend's event receiver for the life of the session.
async fn pump(inner: Arc<Inner>, mut events: mpsc::Receiver<BackendEvent>) {
    let mut exit = ExitInfo::default();
    while let Some(event) = events.recv().await {
        match event {
            BackendEvent::Stdout(data) => {
                if let Some(line) = inner.on_stdout(data) {
                    let inner = inner.clone();
                    tokio::spawn(async move {
                        if let Err(e) = inner.backend.execute(&line).await {
                            warn!("session {}: failed to feed line: {}", inner.id, e);
                        }
                    });
                }
            }
            BackendEvent::Stderr(data) => inner.on_stderr(data),
            BackendEvent::Exit(info) => {
                exit = info;
                break;
            }
        }
    }
    inner.on_exit(exit);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_test::assert_pending;

    use super::*;
    use crate::dialect::builtin;
    use crate::session::mock::{PROMPT_RESTORE, ScriptedBackend, Script, shell_script};

    struct Harness {
        session: ShellSession,
        tx: mpsc::Sender<BackendEvent>,
        writes: Arc<Mutex<Vec<String>>>,
    }

    async fn harness(script: Script, options: SessionOptions) -> Harness {
        harness_with(script, options, InteractionKind::Command).await
    }

    async fn harness_with(
        script: Script,
        options: SessionOptions,
        interaction: InteractionKind,
    ) -> Harness {
        let backend = ScriptedBackend::new(script);
        let tx = backend.sender();
        let writes = backend.writes();
        let session = ShellSession::with_backend(
            SessionId::new(),
            Arc::new(builtin::bash()),
            interaction,
            Box::new(backend),
            options,
        )
        .await
        .unwrap();
        Harness {
            session,
            tx,
            writes,
        }
    }

    fn quiet() -> SessionOptions {
        SessionOptions {
            sync_context: false,
            ..Default::default()
        }
    }

    fn hanging() -> Script {
        Arc::new(|command: &str| {
            if command.starts_with("sleep") || command.starts_with("tail") {
                None
            } else {
                shell_script(command)
            }
        })
    }

    async fn next_matching<F>(rx: &mut broadcast::Receiver<SessionEvent>, mut f: F) -> SessionEvent
    where
        F: FnMut(&SessionEvent) -> bool,
    {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for event")
                .unwrap();
            if f(&event) {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn test_execute_and_wait() {
        let h = harness(Arc::new(shell_script), quiet()).await;
        let command = h.session.execute("echo hello", false, None).await.unwrap();
        assert_eq!(command.cid, 0);
        assert!(command.marker.is_some());
        assert!(command.exact.contains("echo hello"));

        let done = h.session.wait_finished(0).await.unwrap();
        assert_eq!(done.response.as_deref(), Some("hello\n"));
        assert_eq!(done.exit_status.as_deref(), Some("0"));
        assert!(done.finished && done.exit_ok);
        assert_eq!(done.state, CommandState::Finished { ok: true });
        assert!(h.session.stdout_is_finished(0).unwrap());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_ok() {
        let h = harness(Arc::new(shell_script), quiet()).await;
        h.session.execute("false", false, None).await.unwrap();
        let done = h.session.wait_finished(0).await.unwrap();
        assert!(done.finished);
        assert!(!done.exit_ok);
        assert_eq!(done.state, CommandState::Finished { ok: false });
        assert_eq!(done.exit_status.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_trailing_comment_still_closes() {
        let h = harness(Arc::new(shell_script), quiet()).await;
        let command = h.session.execute("echo hi # note", false, None).await.unwrap();
        assert!(command.exact.contains("# note\necho "));

        let done = h.session.wait_finished(0).await.unwrap();
        assert_eq!(done.response.as_deref(), Some("hi\n"));
        assert!(done.exit_ok);
    }

    #[tokio::test]
    async fn test_prompt_restored_after_each_command() {
        let h = harness_with(Arc::new(shell_script), quiet(), InteractionKind::Terminal).await;
        assert_eq!(h.session.strategy(), Strategy::Prompt);

        h.session.execute("echo hi", false, None).await.unwrap();
        let done = h.session.wait_finished(0).await.unwrap();
        assert_eq!(done.response.as_deref(), Some("hi\n"));
        assert!(done.exit_ok);

        // Queued behind the first command's restore and context queries.
        h.session.execute("echo done", false, None).await.unwrap();
        h.session.wait_finished(1).await.unwrap();

        let writes = h.writes.lock().unwrap().clone();
        assert!(writes[0].starts_with("__sw_ps1=$PS1 __sw_ps2=$PS2; PS1='"));
        assert_eq!(writes[1], "echo hi");
        assert_eq!(writes[2], PROMPT_RESTORE);
        let installs = writes.iter().filter(|w| w.contains("PS1='")).count();
        let restores = writes.iter().filter(|w| *w == PROMPT_RESTORE).count();
        assert!(installs >= 2);
        assert!(restores >= installs - 1);
        assert_eq!(h.session.cwd().as_deref(), Some("/home/tester"));
    }

    #[tokio::test]
    async fn test_cids_increase_and_silent_commands_are_hidden() {
        let h = harness(Arc::new(shell_script), quiet()).await;
        for expected in 0..3 {
            let command = h.session.execute("echo x", false, None).await.unwrap();
            assert_eq!(command.cid, expected);
        }
        let silent = h.session.execute("echo quiet", true, None).await.unwrap();
        assert_eq!(silent.cid, SILENT_CID);

        let cids: Vec<i64> = h.session.commands().iter().map(|c| c.cid).collect();
        assert_eq!(cids, vec![0, 1, 2]);
        assert_eq!(h.session.num_commands(), 3);
        assert!(h.session.command(SILENT_CID).is_none());
    }

    #[tokio::test]
    async fn test_follow_ups_track_context() {
        let h = harness(Arc::new(shell_script), quiet()).await;
        let mut rx = h.session.subscribe();
        h.session
            .execute("echo hi", false, Some("\x1b[1mecho hi\x1b[0m"))
            .await
            .unwrap();

        let event = next_matching(&mut rx, |e| matches!(e, SessionEvent::ContextChanged { .. })).await;
        match event {
            SessionEvent::ContextChanged { cwd, user } => {
                assert_eq!(cwd.as_deref(), Some("/home/tester"));
                assert_eq!(user.as_deref(), Some("tester"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(h.session.cwd().as_deref(), Some("/home/tester"));

        let writes = h.writes.lock().unwrap();
        assert!(writes[0].contains("; echo hi ;"));
        assert!(writes[1].contains("; pwd ;"));
        assert!(writes[2].contains("; whoami ;"));

        let first = h.session.command(0).unwrap();
        assert_eq!(first.styled.as_deref(), Some("\x1b[1mecho hi\x1b[0m"));
        // Context is captured at submit time, before the follow-ups ran.
        assert_eq!(first.cwd, None);
    }

    #[tokio::test]
    async fn test_initial_sync() {
        let h = harness(Arc::new(shell_script), SessionOptions::default()).await;
        let mut rx = h.session.subscribe();
        let command = h.session.execute("echo after", false, None).await.unwrap();
        // The sync holds the gate, so the first visible command sees its result.
        assert_eq!(command.cwd.as_deref(), Some("/home/tester"));
        assert_eq!(command.user.as_deref(), Some("tester"));
        next_matching(&mut rx, |e| matches!(e, SessionEvent::CommandFinished(_))).await;
    }

    #[tokio::test]
    async fn test_second_execute_waits_for_first() {
        let h = harness(hanging(), quiet()).await;
        let first = h.session.execute("sleep 10", false, None).await.unwrap();

        let mut second = tokio_test::task::spawn(h.session.execute("echo next", false, None));
        assert_pending!(second.poll());
        assert_eq!(h.writes.lock().unwrap().len(), 1);

        let m = first.marker.unwrap();
        h.tx.send(BackendEvent::Stdout(Bytes::from(format!("{m}\n{m}0{m}\n"))))
            .await
            .unwrap();

        let second = second.await.unwrap();
        assert_eq!(second.cid, 1);
        assert!(h.session.command(0).unwrap().finished);
    }

    #[tokio::test]
    async fn test_syntax_not_closed_dispatches_nothing() {
        let h = harness(Arc::new(shell_script), quiet()).await;
        let err = h.session.execute("echo $(date", false, None).await.unwrap_err();
        assert!(err.is_recoverable());
        assert!(h.writes.lock().unwrap().is_empty());
        assert_eq!(h.session.num_commands(), 0);
    }

    #[tokio::test]
    async fn test_kill_while_accumulating_aborts() {
        let h = harness(hanging(), quiet()).await;
        let mut rx = h.session.subscribe();
        let command = h.session.execute("tail -f log", false, None).await.unwrap();

        let m = command.marker.unwrap();
        h.tx.send(BackendEvent::Stdout(Bytes::from(format!("{m}\npartial\n"))))
            .await
            .unwrap();
        next_matching(&mut rx, |e| matches!(e, SessionEvent::Stdout { cid: Some(0), .. })).await;
        assert_eq!(h.session.command(0).unwrap().state, CommandState::Accumulating);

        h.session.kill(None).await.unwrap();

        let aborted = h.session.command(0).unwrap();
        assert_eq!(aborted.state, CommandState::Aborted);
        assert!(!aborted.finished);
        assert!(aborted.stdout.contains("partial"));
        assert!(!h.session.stdout_is_finished(0).unwrap());

        next_matching(&mut rx, |e| matches!(e, SessionEvent::Disconnected(_))).await;
        assert!(h.session.execute("echo x", false, None).await.is_err());
    }

    #[tokio::test]
    async fn test_unexpected_exit_fails_in_flight_command() {
        let h = harness(hanging(), quiet()).await;
        let mut rx = h.session.subscribe();
        let command = h.session.execute("sleep 10", false, None).await.unwrap();

        let m = command.marker.unwrap();
        h.tx.send(BackendEvent::Stdout(Bytes::from(format!("{m}\nhalf"))))
            .await
            .unwrap();
        h.tx.send(BackendEvent::Exit(ExitInfo {
            code: Some(1),
            signal: None,
        }))
        .await
        .unwrap();

        let finished = next_matching(&mut rx, |e| matches!(e, SessionEvent::CommandFinished(_))).await;
        let SessionEvent::CommandFinished(failed) = finished else {
            unreachable!()
        };
        assert!(failed.finished);
        assert!(!failed.exit_ok);
        assert_eq!(failed.exit_status, None);
        assert_eq!(failed.failure, Some(Failure::Disconnected));
        assert!(failed.stdout.ends_with("half"));

        match next_matching(&mut rx, |e| matches!(e, SessionEvent::Disconnected(_))).await {
            SessionEvent::Disconnected(info) => assert_eq!(info.code, Some(1)),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(!h.session.is_alive());
        let err = h.session.execute("echo x", false, None).await.unwrap_err();
        assert!(matches!(err, Error::Session(SessionError::Dead { .. })));
        // History stays queryable.
        assert_eq!(h.session.num_commands(), 1);
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let options = SessionOptions {
            command_timeout: Some(Duration::from_millis(50)),
            ..quiet()
        };
        let h = harness(hanging(), options).await;
        h.session.execute("sleep 10", false, None).await.unwrap();
        let done = h.session.wait_finished(0).await.unwrap();
        assert_eq!(done.failure, Some(Failure::TimedOut));
        assert_eq!(done.state, CommandState::Finished { ok: false });

        // The gate is released without follow-ups.
        let next = h.session.execute("echo next", false, None).await.unwrap();
        assert_eq!(next.cid, 1);
    }

    #[tokio::test]
    async fn test_stray_output_has_no_cid() {
        let h = harness(Arc::new(shell_script), quiet()).await;
        let mut rx = h.session.subscribe();
        h.tx.send(BackendEvent::Stdout(Bytes::from_static(b"motd\n")))
            .await
            .unwrap();
        match next_matching(&mut rx, |e| matches!(e, SessionEvent::Stdout { .. })).await {
            SessionEvent::Stdout { cid, data } => {
                assert_eq!(cid, None);
                assert_eq!(&data[..], b"motd\n");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(h.session.clock(), 1);
    }

    #[tokio::test]
    async fn test_stdout_stream_ends_with_command() {
        let h = harness(hanging(), quiet()).await;
        let command = h.session.execute("sleep 1", false, None).await.unwrap();
        let stream = h.session.stdout_stream(0).unwrap();

        let m = command.marker.unwrap();
        let output = format!("{m}\nline\n{m}0{m}\n");
        h.tx.send(BackendEvent::Stdout(Bytes::from(output.clone())))
            .await
            .unwrap();

        let chunks: Vec<Bytes> = tokio::time::timeout(Duration::from_secs(5), stream.collect())
            .await
            .unwrap();
        let collected: Vec<u8> = chunks.concat();
        assert_eq!(collected, output.as_bytes());
    }

    #[tokio::test]
    async fn test_stderr_is_attributed() {
        let h = harness(hanging(), quiet()).await;
        let mut rx = h.session.subscribe();
        h.session.execute("sleep 1", false, None).await.unwrap();
        h.tx.send(BackendEvent::Stderr(Bytes::from_static(b"warning\n")))
            .await
            .unwrap();
        next_matching(&mut rx, |e| matches!(e, SessionEvent::Stderr { cid: Some(0), .. })).await;
        assert_eq!(h.session.command(0).unwrap().stderr, "warning\n");
    }

    #[tokio::test]
    async fn test_resize_needs_terminal() {
        let h = harness(Arc::new(shell_script), quiet()).await;
        let err = h
            .session
            .resize(TerminalSize { cols: 100, rows: 30 })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Session(SessionError::TerminalUnsupported { .. })
        ));
    }

    #[tokio::test]
    async fn test_send_key_ticks_clock() {
        let h = harness(Arc::new(shell_script), quiet()).await;
        h.session.send_key(b"\x03").await.unwrap();
        assert_eq!(h.session.clock(), 1);
        assert_eq!(h.writes.lock().unwrap().as_slice(), ["\x03".to_string()]);
    }

    #[tokio::test]
    async fn test_unsupported_interaction() {
        let backend = ScriptedBackend::new(Arc::new(shell_script));
        let err = ShellSession::with_backend(
            SessionId::new(),
            Arc::new(ShellDialectSpec::new("sh")),
            InteractionKind::Terminal,
            Box::new(backend),
            quiet(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Dialect(DialectError::InteractionUnsupported { .. })
        ));
    }
}
