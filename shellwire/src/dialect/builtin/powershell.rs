//! PowerShell dialect (Windows PowerShell and pwsh).
//!
//! `$?` is a boolean in PowerShell, so success reads back as `True`. The
//! continuation prompt (`>> `) is built into the host and cannot be changed.

use crate::dialect::{
    ContinuationPrompt, DirectoryCommands, InteractionKind, PathKind, PromptCommands,
    ShellDialectSpec,
};

/// Create the PowerShell dialect.
pub fn dialect() -> ShellDialectSpec {
    ShellDialectSpec::new("powershell")
        .with_path_kind(PathKind::Win32)
        .with_escape('`')
        .with_scope("{", "}")
        .with_scope("(", ")")
        .with_scope("[", "]")
        .with_quote('"', true)
        .with_quote('\'', false)
        .with_quote_doubling(true)
        .with_multiline_strings(true)
        .with_line_comment("#")
        .with_line_continuation("|")
        .with_statement_delimiter(";")
        .with_newline("\n")
        .with_exit_status("$?", "True")
        .with_echo_command("echo")
        .with_directory(DirectoryCommands {
            current: "(Get-Location).Path".into(),
            change: "Set-Location -LiteralPath {path}".into(),
            list: "Get-ChildItem".into(),
            user: "[Environment]::UserName".into(),
        })
        .with_prompt(PromptCommands {
            get: Some("$__sw_prompt = $function:prompt".into()),
            set: "function prompt { '{marker}' + $? + '{marker}' }".into(),
            restore: Some("$function:prompt = $__sw_prompt".into()),
            continuation: ContinuationPrompt::Fixed(">> ".into()),
        })
        .with_interactions(&[InteractionKind::Command, InteractionKind::Terminal])
}
