//! End-to-end tests against a real bash. Skipped where bash is missing.

#![cfg(unix)]

use std::path::Path;
use std::time::Duration;

use shellwire::{SessionBuilder, SessionRegistry, ShellSession};

const BASH: &str = "/bin/bash";

async fn bash_session(registry: &SessionRegistry, pty: bool) -> Option<ShellSession> {
    if !Path::new(BASH).exists() {
        eprintln!("{} not found, skipping", BASH);
        return None;
    }
    let _ = env_logger::builder().is_test(true).try_init();

    let builder = if pty {
        SessionBuilder::pty(BASH).terminal_size(200, 50)
    } else {
        SessionBuilder::local(BASH)
    };
    let config = builder
        .args(["--norc", "--noprofile"])
        .env("TERM", "dumb")
        .command_timeout(Duration::from_secs(10))
        .build()
        .unwrap();
    let id = registry.start(config).await.unwrap();
    Some(registry.session(&id).unwrap())
}

#[tokio::test]
async fn test_pipe_session_end_to_end() {
    let registry = SessionRegistry::new();
    let Some(session) = bash_session(&registry, false).await else {
        return;
    };

    let command = session
        .execute("cd /tmp && echo $((6 * 7))", false, None)
        .await
        .unwrap();
    let done = session.wait_finished(command.cid).await.unwrap();
    assert_eq!(done.response.as_deref(), Some("42\n"));
    assert!(done.exit_ok);

    // Queues behind the directory follow-ups.
    session.execute("true", true, None).await.unwrap();
    assert_eq!(session.cwd().as_deref(), Some("/tmp"));
    assert!(session.user().is_some());

    let command = session
        .execute("for i in 1 2 3\ndo\necho $i\ndone", false, None)
        .await
        .unwrap();
    let done = session.wait_finished(command.cid).await.unwrap();
    assert_eq!(done.response.as_deref(), Some("1\n2\n3\n"));

    let command = session
        .execute("ls /nonexistent-shellwire-dir", false, None)
        .await
        .unwrap();
    let done = session.wait_finished(command.cid).await.unwrap();
    assert!(done.finished);
    assert!(!done.exit_ok);
    assert_ne!(done.exit_status.as_deref(), Some("0"));

    let command = session.execute("echo hi # trailing note", false, None).await.unwrap();
    let done = session.wait_finished(command.cid).await.unwrap();
    assert_eq!(done.response.as_deref(), Some("hi\n"));
    assert!(done.exit_ok);

    let err = session
        .execute("echo \"unterminated", false, None)
        .await
        .unwrap_err();
    assert!(err.is_recoverable());

    assert_eq!(session.num_commands(), 4);
    registry.stop(&session.id()).await.unwrap();
}

#[tokio::test]
async fn test_pty_session_uses_prompt() {
    let registry = SessionRegistry::new();
    let Some(session) = bash_session(&registry, true).await else {
        return;
    };

    let command = session.execute("echo hi", false, None).await.unwrap();
    let done = tokio::time::timeout(Duration::from_secs(15), session.wait_finished(command.cid))
        .await
        .unwrap()
        .unwrap();
    assert!(done.finished);
    assert!(done.response.unwrap_or_default().contains("hi"));
    assert!(done.exit_ok);

    // Runs after the user's prompt was put back and overridden again.
    let command = session.execute("echo again", false, None).await.unwrap();
    let done = tokio::time::timeout(Duration::from_secs(15), session.wait_finished(command.cid))
        .await
        .unwrap()
        .unwrap();
    assert!(done.response.unwrap_or_default().contains("again"));

    registry.stop(&session.id()).await.unwrap();
}
