//! Bash (and POSIX sh-compatible) dialect.
//!
//! Prompt overrides go through `PS1`/`PS2`, both of which bash expands at
//! display time, so `$?` in `PS1` reports the status of the command that just
//! ran.

use crate::dialect::{
    ContinuationPrompt, DirectoryCommands, InteractionKind, PathKind, PromptCommands,
    ShellDialectSpec,
};

/// Create the bash dialect.
pub fn dialect() -> ShellDialectSpec {
    ShellDialectSpec::new("bash")
        .with_path_kind(PathKind::Posix)
        .with_escape('\\')
        .with_scope("{", "}")
        .with_scope("(", ")")
        .with_scope("[", "]")
        .with_scope("if", "fi")
        .with_scope("case", "esac")
        .with_scope("do", "done")
        .with_quote('"', true)
        .with_quote('\'', false)
        .with_multiline_strings(true)
        .with_line_comment("#")
        .with_line_continuation("|")
        .with_line_continuation("||")
        .with_line_continuation("&&")
        .with_statement_delimiter(";")
        .with_newline("\n")
        .with_exit_status("$?", "0")
        .with_echo_command("echo")
        .with_directory(DirectoryCommands {
            current: "pwd".into(),
            change: "cd {path}".into(),
            list: "ls".into(),
            user: "whoami".into(),
        })
        .with_prompt(PromptCommands {
            get: Some("__sw_ps1=$PS1 __sw_ps2=$PS2".into()),
            set: "PS1='{marker}$?{marker}'".into(),
            restore: Some("PS1=$__sw_ps1 PS2=$__sw_ps2".into()),
            continuation: ContinuationPrompt::Settable("PS2='{marker}'".into()),
        })
        .with_interactions(&[InteractionKind::Command, InteractionKind::Terminal])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bash_dialect() {
        let bash = dialect();
        assert_eq!(bash.name, "bash");
        assert_eq!(bash.path_kind, PathKind::Posix);
        assert!(bash.supports(InteractionKind::Command));
        assert!(bash.supports(InteractionKind::Terminal));
        assert!(bash.can_override_prompt());
        assert!(!bash.echoes_input);
    }

    #[test]
    fn test_bash_directory_commands() {
        let bash = dialect();
        assert_eq!(bash.current_directory_command(), "pwd");
        assert_eq!(bash.user_command(), "whoami");
        assert_eq!(bash.change_directory_command("/var/log"), "cd '/var/log'");
    }
}
