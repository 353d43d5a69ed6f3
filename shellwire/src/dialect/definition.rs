//! Shell dialect definition.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Whether the shell uses POSIX or Windows paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PathKind {
    #[default]
    Posix,
    Win32,
}

/// How a session talks to its shell.
///
/// `Command` sessions run over plain pipes and are driven with echoed
/// markers; `Terminal` sessions run under a pseudo-terminal, where the
/// shell's prompt is overridden to carry the marker instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Command,
    Terminal,
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InteractionKind::Command => write!(f, "command"),
            InteractionKind::Terminal => write!(f, "terminal"),
        }
    }
}

/// A pair of nested scope delimiters, e.g. `(`/`)` or `case`/`esac`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopePair {
    pub open: String,
    pub close: String,
}

impl ScopePair {
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
        }
    }
}

/// A string quote character and whether escapes are honored inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRule {
    pub quote: char,
    pub escapes: bool,
}

/// Exit-status variable syntax.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatusSyntax {
    /// Expression the shell expands to the last exit status (`$?`).
    pub variable: String,

    /// Expanded value meaning success (`0`, `True`).
    pub success: String,
}

/// Commands used to inspect and change the shell's location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryCommands {
    /// Prints the current directory.
    pub current: String,

    /// Changes directory; `{path}` is replaced with the quoted target.
    pub change: String,

    /// Lists the current directory.
    pub list: String,

    /// Prints the current user.
    pub user: String,
}

/// Continuation prompt handling for the prompt strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContinuationPrompt {
    /// Command template setting the continuation prompt; `{marker}` is replaced.
    Settable(String),

    /// The shell's fixed continuation prompt text.
    Fixed(String),
}

/// Commands to capture, override and restore the interactive prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptCommands {
    /// Captures the current prompt into a shell variable. Runs just before
    /// each override.
    #[serde(default)]
    pub get: Option<String>,

    /// Template installing a prompt of `{marker}<exit status>{marker}`.
    pub set: String,

    /// Puts back the prompt captured by `get`.
    #[serde(default)]
    pub restore: Option<String>,

    pub continuation: ContinuationPrompt,
}

/// Immutable description of one shell's syntax and capabilities.
///
/// Built-in dialects live in [`builtin`](super::builtin); additional ones can
/// be deserialized from configuration and registered with a
/// [`DialectRegistry`](super::DialectRegistry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellDialectSpec {
    /// Dialect name (e.g., "bash", "cmd", "powershell").
    pub name: String,

    pub path_kind: PathKind,

    /// Characters that escape the next character.
    pub escape_chars: Vec<char>,

    /// Nested scope delimiters.
    pub scopes: Vec<ScopePair>,

    /// String quote rules.
    pub quotes: Vec<QuoteRule>,

    /// A doubled quote inside a string stands for a literal quote.
    #[serde(default)]
    pub quote_doubling: bool,

    /// Strings may span newlines.
    #[serde(default)]
    pub multiline_strings: bool,

    pub line_comments: Vec<String>,

    /// Markers that must be followed by more input (`|`, `&&`).
    pub line_continuations: Vec<String>,

    pub statement_delimiter: String,

    /// Line terminator sent after each command.
    pub newline: String,

    pub exit_status: ExitStatusSyntax,

    pub echo_command: String,

    /// The shell writes piped input back to stdout.
    #[serde(default)]
    pub echoes_input: bool,

    pub directory: DirectoryCommands,

    #[serde(default)]
    pub prompt: Option<PromptCommands>,

    /// Interaction kinds this dialect can drive.
    pub interactions: Vec<InteractionKind>,

    /// Characters boundary markers are drawn from.
    pub marker_alphabet: String,
}

impl ShellDialectSpec {
    /// Create a dialect with POSIX-like defaults and no syntax rules.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path_kind: PathKind::Posix,
            escape_chars: vec![],
            scopes: vec![],
            quotes: vec![],
            quote_doubling: false,
            multiline_strings: false,
            line_comments: vec![],
            line_continuations: vec![],
            statement_delimiter: ";".to_string(),
            newline: "\n".to_string(),
            exit_status: ExitStatusSyntax {
                variable: "$?".to_string(),
                success: "0".to_string(),
            },
            echo_command: "echo".to_string(),
            echoes_input: false,
            directory: DirectoryCommands {
                current: "pwd".to_string(),
                change: "cd {path}".to_string(),
                list: "ls".to_string(),
                user: "whoami".to_string(),
            },
            prompt: None,
            interactions: vec![InteractionKind::Command],
            marker_alphabet: "abcdefghijklmnopqrstuvwxyz".to_string(),
        }
    }

    pub fn with_path_kind(mut self, kind: PathKind) -> Self {
        self.path_kind = kind;
        self
    }

    pub fn with_escape(mut self, c: char) -> Self {
        self.escape_chars.push(c);
        self
    }

    pub fn with_scope(mut self, open: impl Into<String>, close: impl Into<String>) -> Self {
        self.scopes.push(ScopePair::new(open, close));
        self
    }

    pub fn with_quote(mut self, quote: char, escapes: bool) -> Self {
        self.quotes.push(QuoteRule { quote, escapes });
        self
    }

    pub fn with_quote_doubling(mut self, enabled: bool) -> Self {
        self.quote_doubling = enabled;
        self
    }

    pub fn with_multiline_strings(mut self, enabled: bool) -> Self {
        self.multiline_strings = enabled;
        self
    }

    pub fn with_line_comment(mut self, marker: impl Into<String>) -> Self {
        self.line_comments.push(marker.into());
        self
    }

    pub fn with_line_continuation(mut self, marker: impl Into<String>) -> Self {
        self.line_continuations.push(marker.into());
        self
    }

    pub fn with_statement_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.statement_delimiter = delimiter.into();
        self
    }

    pub fn with_newline(mut self, newline: impl Into<String>) -> Self {
        self.newline = newline.into();
        self
    }

    pub fn with_exit_status(mut self, variable: impl Into<String>, success: impl Into<String>) -> Self {
        self.exit_status = ExitStatusSyntax {
            variable: variable.into(),
            success: success.into(),
        };
        self
    }

    pub fn with_echo_command(mut self, command: impl Into<String>) -> Self {
        self.echo_command = command.into();
        self
    }

    pub fn with_echoes_input(mut self, echoes: bool) -> Self {
        self.echoes_input = echoes;
        self
    }

    pub fn with_directory(mut self, directory: DirectoryCommands) -> Self {
        self.directory = directory;
        self
    }

    pub fn with_prompt(mut self, prompt: PromptCommands) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn with_interactions(mut self, kinds: &[InteractionKind]) -> Self {
        self.interactions = kinds.to_vec();
        self
    }

    pub fn with_marker_alphabet(mut self, alphabet: impl Into<String>) -> Self {
        self.marker_alphabet = alphabet.into();
        self
    }

    /// Whether this dialect can drive the given interaction kind.
    pub fn supports(&self, kind: InteractionKind) -> bool {
        self.interactions.contains(&kind)
    }

    /// Whether the prompt can be overridden to carry a boundary marker.
    pub fn can_override_prompt(&self) -> bool {
        self.prompt.is_some()
    }

    /// Quote a path for use as a command argument.
    pub fn quote_path(&self, path: &str) -> String {
        match self.path_kind {
            PathKind::Posix => format!("'{}'", path.replace('\'', r"'\''")),
            PathKind::Win32 => format!("\"{}\"", path.replace('"', "")),
        }
    }

    /// Command changing the current directory to `path`.
    pub fn change_directory_command(&self, path: &str) -> String {
        self.directory.change.replace("{path}", &self.quote_path(path))
    }

    pub fn current_directory_command(&self) -> &str {
        &self.directory.current
    }

    pub fn list_command(&self) -> &str {
        &self.directory.list
    }

    pub fn user_command(&self) -> &str {
        &self.directory.user
    }

    /// Whether an exit status string means success.
    pub fn is_success(&self, status: &str) -> bool {
        status.trim() == self.exit_status.success
    }
}
