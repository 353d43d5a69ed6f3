//! Shell dialect definitions.
//!
//! A dialect captures one shell's quoting, escaping and scoping rules plus
//! the commands the engine needs to wrap output in markers and to track the
//! working directory and user.

pub mod builtin;
mod definition;
mod registry;
mod validator;

pub use definition::{
    ContinuationPrompt, DirectoryCommands, ExitStatusSyntax, InteractionKind, PathKind,
    PromptCommands, QuoteRule, ScopePair, ShellDialectSpec,
};
pub use registry::DialectRegistry;
pub use validator::{ends_in_comment, is_closed};
