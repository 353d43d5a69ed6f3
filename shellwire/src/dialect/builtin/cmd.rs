//! Windows `cmd.exe` dialect.
//!
//! The exit status is read through `!errorlevel!`, so sessions must launch
//! cmd with delayed expansion enabled (`cmd /V:ON`); `%errorlevel%` would be
//! expanded when the whole wrapped line is parsed, before the command runs.
//!
//! cmd writes piped input back to stdout, prompt included, which the echo
//! detector skips before looking for markers.

use crate::dialect::{
    ContinuationPrompt, DirectoryCommands, InteractionKind, PathKind, PromptCommands,
    ShellDialectSpec,
};

/// Create the cmd dialect.
pub fn dialect() -> ShellDialectSpec {
    ShellDialectSpec::new("cmd")
        .with_path_kind(PathKind::Win32)
        .with_escape('^')
        .with_scope("(", ")")
        .with_quote('"', false)
        .with_multiline_strings(false)
        .with_line_comment("rem ")
        .with_line_comment("REM ")
        .with_line_comment("::")
        .with_line_continuation("|")
        .with_line_continuation("||")
        .with_line_continuation("&&")
        .with_statement_delimiter("&")
        .with_newline("\r\n")
        .with_exit_status("!errorlevel!", "0")
        .with_echo_command("echo")
        .with_echoes_input(true)
        .with_directory(DirectoryCommands {
            current: "cd".into(),
            change: "cd /d {path}".into(),
            list: "dir".into(),
            user: "echo %USERNAME%".into(),
        })
        .with_prompt(PromptCommands {
            get: Some(r#"set "__sw_prompt=%PROMPT%""#.into()),
            set: "prompt {marker}%errorlevel%{marker}".into(),
            restore: Some("prompt %__sw_prompt%".into()),
            continuation: ContinuationPrompt::Fixed("More? ".into()),
        })
        .with_interactions(&[InteractionKind::Command, InteractionKind::Terminal])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmd_dialect() {
        let cmd = dialect();
        assert_eq!(cmd.name, "cmd");
        assert_eq!(cmd.path_kind, PathKind::Win32);
        assert_eq!(cmd.statement_delimiter, "&");
        assert!(cmd.echoes_input);
        assert_eq!(cmd.newline, "\r\n");
    }

    #[test]
    fn test_cmd_comments_and_escapes() {
        let cmd = dialect();
        assert!(crate::dialect::is_closed(&cmd, "rem (unbalanced"));
        assert!(crate::dialect::is_closed(&cmd, "echo ^("));
        assert!(!crate::dialect::is_closed(&cmd, "if exist x ("));
    }
}
