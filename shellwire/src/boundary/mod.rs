//! Boundary detection: finding a command's own output in a shell's stream.
//!
//! Shells have no structured protocol, so each command is wrapped with a
//! random marker and the incoming bytes are scanned for it. Two strategies
//! exist and one is picked per session from the dialect's capabilities:
//!
//! - [`EchoDetector`]: markers are echoed around the command (pipes)
//! - [`PromptDetector`]: markers are baked into the shell prompt (terminals)

mod buffer;
mod echo;
pub mod marker;
mod prompt;

pub use buffer::OutputBuffer;
pub use echo::{EchoDetector, wrap_command};
pub use prompt::{PromptDetector, install_line};

use log::debug;

use crate::dialect::{ContinuationPrompt, InteractionKind, ShellDialectSpec};
use crate::error::{BoundaryError, Result};

/// A command's extracted output and exit status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryResult {
    /// Output between the boundaries, ANSI escapes removed.
    pub response: String,

    /// Expanded exit-status variable, trimmed.
    pub exit_status: String,
}

/// Outcome of feeding one chunk to a detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// Boundary not seen yet; keep accumulating.
    Pending,

    /// The shell is ready for the next line of a multi-line command.
    Feed(String),

    /// The boundary was found by this chunk.
    Completed(BoundaryResult),

    /// The boundary had already been found; nothing new to report.
    Settled(BoundaryResult),
}

/// Detection strategy, resolved once when a session starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Echo markers around the command; `skip_echo` drops echoed input first.
    Echo { skip_echo: bool },

    /// Override the prompt to carry the marker.
    Prompt,
}

impl Strategy {
    /// Pick the strategy for a dialect driven with `interaction`.
    pub fn for_session(spec: &ShellDialectSpec, interaction: InteractionKind) -> Self {
        match interaction {
            InteractionKind::Terminal if spec.can_override_prompt() => Strategy::Prompt,
            InteractionKind::Terminal => Strategy::Echo { skip_echo: true },
            InteractionKind::Command => Strategy::Echo {
                skip_echo: spec.echoes_input,
            },
        }
    }

    /// Wrap `command` with a fresh marker and create its detector.
    pub fn begin(&self, spec: &ShellDialectSpec, command: &str) -> Result<WrappedCommand> {
        match *self {
            Strategy::Echo { skip_echo } => {
                let marker = marker::generate(&spec.name, &spec.marker_alphabet, &[command])?;
                let wrapped = wrap_command(spec, &marker, command);
                debug!("echo-wrapped command with marker {:?}", marker);
                Ok(WrappedCommand {
                    detector: BoundaryDetector::Echo(EchoDetector::new(spec, marker.clone(), skip_echo)),
                    marker,
                    exact: wrapped.clone(),
                    dispatch: wrapped,
                })
            }
            Strategy::Prompt => {
                let prompt = spec
                    .prompt
                    .as_ref()
                    .ok_or_else(|| BoundaryError::PromptUnsupported {
                        dialect: spec.name.clone(),
                    })?;
                let marker =
                    marker::generate(&spec.name, &spec.marker_alphabet, &[command, prompt.set.as_str()])?;
                let continuation = match &prompt.continuation {
                    ContinuationPrompt::Settable(_) => marker::generate(
                        &spec.name,
                        &spec.marker_alphabet,
                        &[command, prompt.set.as_str(), marker.as_str()],
                    )?,
                    ContinuationPrompt::Fixed(text) => text.clone(),
                };
                let install = install_line(spec, prompt, &marker, &continuation);
                debug!("prompt-wrapped command with marker {:?}", marker);
                Ok(WrappedCommand {
                    detector: BoundaryDetector::Prompt(PromptDetector::new(
                        marker.clone(),
                        &continuation,
                        command,
                    )?),
                    exact: format!("{install}{}{command}", spec.newline),
                    dispatch: install,
                    marker,
                })
            }
        }
    }
}

/// A command wrapped for dispatch, with the detector tracking it.
#[derive(Debug)]
pub struct WrappedCommand {
    pub marker: String,

    /// Everything the shell will receive for this command.
    pub exact: String,

    /// The first line to send; further lines come from [`Detection::Feed`].
    pub dispatch: String,

    pub detector: BoundaryDetector,
}

/// Per-command detector, one variant per strategy.
#[derive(Debug)]
pub enum BoundaryDetector {
    Echo(EchoDetector),
    Prompt(PromptDetector),
}

impl BoundaryDetector {
    /// Feed a chunk of output.
    pub fn accumulate(&mut self, chunk: &[u8]) -> Detection {
        match self {
            BoundaryDetector::Echo(d) => d.accumulate(chunk),
            BoundaryDetector::Prompt(d) => d.accumulate(chunk),
        }
    }

    pub fn marker(&self) -> &str {
        match self {
            BoundaryDetector::Echo(d) => d.marker(),
            BoundaryDetector::Prompt(d) => d.marker(),
        }
    }

    pub fn outcome(&self) -> Option<&BoundaryResult> {
        match self {
            BoundaryDetector::Echo(d) => d.outcome(),
            BoundaryDetector::Prompt(d) => d.outcome(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.outcome().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::builtin;

    #[test]
    fn test_strategy_selection() {
        let bash = builtin::bash();
        let cmd = builtin::cmd();
        assert_eq!(
            Strategy::for_session(&bash, InteractionKind::Command),
            Strategy::Echo { skip_echo: false }
        );
        assert_eq!(
            Strategy::for_session(&cmd, InteractionKind::Command),
            Strategy::Echo { skip_echo: true }
        );
        assert_eq!(
            Strategy::for_session(&bash, InteractionKind::Terminal),
            Strategy::Prompt
        );

        let plain = ShellDialectSpec::new("sh")
            .with_interactions(&[InteractionKind::Command, InteractionKind::Terminal]);
        assert_eq!(
            Strategy::for_session(&plain, InteractionKind::Terminal),
            Strategy::Echo { skip_echo: true }
        );
    }

    #[test]
    fn test_begin_echo() {
        let bash = builtin::bash();
        let wrapped = Strategy::Echo { skip_echo: false }
            .begin(&bash, "echo hi")
            .unwrap();
        let m = &wrapped.marker;
        assert_eq!(wrapped.dispatch, format!("echo {m}; echo hi ; echo {m}$?{m}"));
        assert_eq!(wrapped.exact, wrapped.dispatch);
        assert_eq!(wrapped.detector.marker(), m);
        assert!(!wrapped.detector.is_finished());
    }

    #[test]
    fn test_begin_prompt() {
        let bash = builtin::bash();
        let wrapped = Strategy::Prompt.begin(&bash, "ls").unwrap();
        let m = &wrapped.marker;
        assert!(wrapped.dispatch.starts_with(&format!("__sw_ps1=$PS1 __sw_ps2=$PS2; PS1='{m}$?{m}'; PS2='")));
        assert!(wrapped.exact.ends_with("\nls"));
    }

    #[test]
    fn test_begin_prompt_without_prompt_commands() {
        let plain = ShellDialectSpec::new("sh");
        assert!(Strategy::Prompt.begin(&plain, "ls").is_err());
    }

    #[test]
    fn test_markers_absent_from_command() {
        let bash = builtin::bash();
        for _ in 0..50 {
            let command = "echo abcdefghijklmnopqrstuvwxyz";
            let wrapped = Strategy::Echo { skip_echo: false }.begin(&bash, command).unwrap();
            assert!(!command.contains(&wrapped.marker));
        }
    }
}
