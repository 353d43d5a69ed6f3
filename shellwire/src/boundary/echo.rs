//! Echo-based boundary detection for piped (non-terminal) sessions.
//!
//! The command is bracketed by two `echo` statements:
//!
//! ```text
//! echo wxyz; <command> ; echo wxyz$?wxyz
//! ```
//!
//! so stdout carries three copies of the marker. Text between the first and
//! second is the command's own output; text between the second and third is
//! the expanded exit status.
//!
//! When the command's tail would swallow or break the closing echo (a line
//! comment, a lone `&`, a trailing delimiter or line break), the closing
//! echo goes on its own line instead.

use log::debug;

use super::buffer::OutputBuffer;
use super::{BoundaryResult, Detection};
use crate::dialect::{ShellDialectSpec, ends_in_comment};

/// Build the marker-wrapped text for `command`.
pub fn wrap_command(spec: &ShellDialectSpec, marker: &str, command: &str) -> String {
    let echo = &spec.echo_command;
    let delim = &spec.statement_delimiter;
    let joint = if needs_own_line(spec, command) {
        spec.newline.clone()
    } else {
        format!(" {delim} ")
    };
    format!(
        "{echo} {marker}{delim} {command}{joint}{echo} {marker}{exit}{marker}",
        exit = spec.exit_status.variable
    )
}

fn needs_own_line(spec: &ShellDialectSpec, command: &str) -> bool {
    let text = command.trim_end();
    let delim = spec.statement_delimiter.as_str();
    (text.ends_with('&') && !text.ends_with("&&"))
        || (!delim.is_empty() && text.ends_with(delim))
        || command.trim_end_matches([' ', '\t']).ends_with('\n')
        || ends_in_comment(spec, command)
}

/// How the shell's echo of the submitted text looks, so marker copies in
/// it can be told apart from the ones the echo statements print.
#[derive(Debug, Clone)]
struct EchoedInput {
    /// `echo ` as typed before the opening and closing markers.
    prefix: String,

    /// Unexpanded exit status variable between the closing markers.
    exit: String,
}

impl EchoedInput {
    fn covers(&self, buffer: &OutputBuffer, at: usize, len: usize) -> bool {
        let before = |s: &str| {
            !s.is_empty() && at >= s.len() && buffer.has_at(at - s.len(), s.as_bytes())
        };
        let exit_follows = !self.exit.is_empty() && buffer.has_at(at + len, self.exit.as_bytes());
        before(&self.prefix) || before(&self.exit) || exit_follows
    }
}

/// Incremental detector for one echo-wrapped command.
#[derive(Debug)]
pub struct EchoDetector {
    marker: String,

    /// Set when the shell echoes input.
    echoed: Option<EchoedInput>,

    buffer: OutputBuffer,

    outcome: Option<BoundaryResult>,
}

impl EchoDetector {
    /// Create a detector. `skip_echo` ignores marker copies that belong to
    /// the shell's echo of the submitted text.
    pub fn new(spec: &ShellDialectSpec, marker: impl Into<String>, skip_echo: bool) -> Self {
        let echoed = skip_echo.then(|| EchoedInput {
            prefix: format!("{} ", spec.echo_command),
            exit: spec.exit_status.variable.clone(),
        });
        Self {
            marker: marker.into(),
            echoed,
            buffer: OutputBuffer::default(),
            outcome: None,
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Feed a chunk of stdout.
    pub fn accumulate(&mut self, chunk: &[u8]) -> Detection {
        if let Some(outcome) = &self.outcome {
            return Detection::Settled(outcome.clone());
        }
        self.buffer.extend(chunk);
        match detect(&self.buffer, &self.marker, self.echoed.as_ref()) {
            Some(outcome) => {
                debug!("echo boundary {:?} complete, status {:?}", self.marker, outcome.exit_status);
                self.outcome = Some(outcome.clone());
                Detection::Completed(outcome)
            }
            None => Detection::Pending,
        }
    }

    pub fn outcome(&self) -> Option<&BoundaryResult> {
        self.outcome.as_ref()
    }
}

/// Extract the response and exit status from a complete buffer.
///
/// Returns `None` while fewer than three markers are present.
fn detect(buffer: &OutputBuffer, marker: &str, echoed: Option<&EchoedInput>) -> Option<BoundaryResult> {
    let needle = marker.as_bytes();
    if needle.is_empty() {
        return None;
    }

    // Next printed marker at or after `from`, plus the last echoed copy
    // passed over on the way.
    let next = |mut from: usize| -> Option<(usize, Option<usize>)> {
        let mut skipped = None;
        loop {
            let at = buffer.find(needle, from)?;
            match echoed {
                Some(input) if input.covers(buffer, at, needle.len()) => {
                    skipped = Some(at);
                    from = at + needle.len();
                }
                _ => return Some((at, skipped)),
            }
        }
    };

    let (first, _) = next(0)?;
    let (second, echo_between) = next(first + needle.len())?;
    let (third, _) = next(second + needle.len())?;

    // The rest of the opening marker's line is echo noise (trailing blanks
    // from cmd's `echo`, a CR under a terminal).
    let after_first = first + needle.len();
    let response_start = match buffer.find_line_end(after_first) {
        Some(nl) if nl < second => nl + 1,
        _ => after_first,
    };
    // A closing echo on its own line is echoed after the command's output.
    let response_end = echo_between
        .map(|at| buffer.line_start(at).max(response_start))
        .unwrap_or(second);

    Some(BoundaryResult {
        response: buffer.slice_lossy(response_start, response_end),
        exit_status: buffer.slice_lossy(second + needle.len(), third).trim().to_string(),
    })
}
