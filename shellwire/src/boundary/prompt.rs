//! Prompt-based boundary detection for terminal sessions.
//!
//! Under a pseudo-terminal the shell echoes input and redraws its own line
//! editor, so echo markers are unreliable. Instead the prompt itself is
//! overridden to print `<marker><exit status><marker>`. Each prompt then
//! marks the end of the previous command's output.
//!
//! Lifecycle of one command:
//!
//! 1. the prompt-install line is sent; its new prompt confirms installation
//! 2. command lines are fed one at a time; a continuation prompt after a
//!    line means the shell wants the next one
//! 3. output starts after the first line ending following the last line fed
//! 4. output ends at the first line ending immediately followed by the marker

use log::{debug, trace};
use regex::bytes::Regex;

use super::buffer::OutputBuffer;
use super::{BoundaryResult, Detection};
use crate::dialect::{ContinuationPrompt, PromptCommands, ShellDialectSpec};
use crate::error::{BoundaryError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Waiting for the overridden prompt to appear.
    Installing,

    /// `fed` lines sent; output begins at `response_start` once known.
    Running {
        fed: usize,
        response_start: Option<usize>,
    },
}

/// Build the line that captures the current prompt and installs the marker
/// prompt (and continuation prompt).
pub fn install_line(spec: &ShellDialectSpec, prompt: &PromptCommands, marker: &str, continuation: &str) -> String {
    let delim = &spec.statement_delimiter;
    let mut line = match &prompt.get {
        Some(get) => format!("{get}{delim} "),
        None => String::new(),
    };
    line.push_str(&prompt.set.replace("{marker}", marker));
    if let ContinuationPrompt::Settable(template) = &prompt.continuation {
        line.push_str(&format!("{delim} {}", template.replace("{marker}", continuation)));
    }
    line
}

/// Incremental detector for one prompt-delimited command.
#[derive(Debug)]
pub struct PromptDetector {
    marker: String,
    lines: Vec<String>,
    buffer: OutputBuffer,
    phase: Phase,
    scan_from: usize,

    /// Line ending followed by the marker.
    end_pattern: Regex,

    /// Line ending followed by the continuation prompt.
    continuation_pattern: Regex,

    outcome: Option<BoundaryResult>,
}

impl PromptDetector {
    /// Create a detector for `command` using `marker` and `continuation`.
    pub fn new(marker: impl Into<String>, continuation: &str, command: &str) -> Result<Self> {
        let marker = marker.into();
        let end_pattern = Regex::new(&format!(r"\n{}", regex::escape(&marker)))
            .map_err(BoundaryError::from)?;
        let continuation_pattern = Regex::new(&format!(r"\n{}", regex::escape(continuation)))
            .map_err(BoundaryError::from)?;
        let mut lines: Vec<String> = command.lines().map(str::to_string).collect();
        if lines.is_empty() {
            lines.push(String::new());
        }
        Ok(Self {
            marker,
            lines,
            buffer: OutputBuffer::default(),
            phase: Phase::Installing,
            scan_from: 0,
            end_pattern,
            continuation_pattern,
            outcome: None,
        })
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Feed a chunk of terminal output.
    pub fn accumulate(&mut self, chunk: &[u8]) -> Detection {
        if let Some(outcome) = &self.outcome {
            return Detection::Settled(outcome.clone());
        }
        self.buffer.extend(chunk);

        match self.phase {
            Phase::Installing => match self.find_prompt(self.scan_from) {
                Some((_, _, end)) => {
                    trace!("prompt {:?} installed", self.marker);
                    self.scan_from = end;
                    self.phase = Phase::Running {
                        fed: 1,
                        response_start: None,
                    };
                    Detection::Feed(self.lines[0].clone())
                }
                None => Detection::Pending,
            },
            Phase::Running {
                fed,
                mut response_start,
            } => {
                if response_start.is_none() {
                    match self.buffer.find_line_end(self.scan_from) {
                        Some(nl) => response_start = Some(nl + 1),
                        None => return Detection::Pending,
                    }
                    self.phase = Phase::Running { fed, response_start };
                }
                let Some(start) = response_start else {
                    return Detection::Pending;
                };

                if fed < self.lines.len() {
                    if let Some(m) = self.buffer.search_from(&self.continuation_pattern, start - 1) {
                        self.scan_from = m.end();
                        self.phase = Phase::Running {
                            fed: fed + 1,
                            response_start: None,
                        };
                        return Detection::Feed(self.lines[fed].clone());
                    }
                }

                match self.find_prompt(start - 1) {
                    Some((newline, exit_status, _)) => {
                        let outcome = BoundaryResult {
                            response: self.buffer.slice_lossy(start, newline + 1),
                            exit_status,
                        };
                        debug!("prompt boundary {:?} complete, status {:?}", self.marker, outcome.exit_status);
                        self.outcome = Some(outcome.clone());
                        Detection::Completed(outcome)
                    }
                    None => Detection::Pending,
                }
            }
        }
    }

    /// Find `\n<marker><status><marker>` at or after `from`.
    ///
    /// Returns the newline offset, the trimmed status and the end offset.
    fn find_prompt(&self, from: usize) -> Option<(usize, String, usize)> {
        let m = self.buffer.search_from(&self.end_pattern, from)?;
        let status_start = m.end();
        let close = self.buffer.find(self.marker.as_bytes(), status_start)?;
        let status = self.buffer.slice_lossy(status_start, close).trim().to_string();
        Some((m.start(), status, close + self.marker.len()))
    }

    pub fn outcome(&self) -> Option<&BoundaryResult> {
        self.outcome.as_ref()
    }
}
