//! Local shell example: run a few commands through a local bash.
//!
//! This example starts a shell as a child process, runs each command given
//! on the command line, streams its output as it arrives and prints the
//! extracted response, exit status and tracked directory.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example local_shell -- "ls -la" "cd /tmp" "pwd"
//! ```
//!
//! Under a pseudo-terminal instead of pipes:
//! ```bash
//! cargo run --example local_shell -- --pty "echo hi"
//! ```

use std::env;
use std::io::{self, Write};
use std::time::Duration;

use futures_util::StreamExt;
use shellwire::{SessionBuilder, SessionRegistry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging (set RUST_LOG=debug for verbose output)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut pty = false;
    let mut shell = "bash".to_string();
    let mut commands = Vec::new();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--pty" => pty = true,
            "--shell" => shell = args.next().unwrap_or(shell),
            _ => commands.push(arg),
        }
    }
    if commands.is_empty() {
        commands = vec!["uname -a".into(), "cd /tmp".into(), "ls | head -5".into()];
    }

    let builder = if pty {
        SessionBuilder::pty(&shell)
    } else {
        SessionBuilder::local(&shell)
    };
    let config = builder
        .dialect("bash")
        .command_timeout(Duration::from_secs(30))
        .build()?;

    let registry = SessionRegistry::new();
    let id = registry.start(config).await?;
    let session = registry.session(&id)?;
    println!("Started {} ({:?})", shell, session.strategy());

    for text in &commands {
        println!("\n$ {}", text);
        println!("{}", "-".repeat(50));

        let command = match session.execute(text, false, None).await {
            Ok(command) => command,
            Err(e) if e.is_recoverable() => {
                eprintln!("Not a complete command: {}", e);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let mut stream = session.stdout_stream(command.cid)?;
        let mut total_bytes = 0usize;
        while let Some(chunk) = stream.next().await {
            total_bytes += chunk.len();
        }

        let done = session.wait_finished(command.cid).await?;
        print!("{}", done);
        io::stdout().flush()?;
        println!("{}", "-".repeat(50));
        println!(
            "exit {:?} ({}), {} raw bytes in {:?}",
            done.exit_status,
            if done.exit_ok { "ok" } else { "failed" },
            total_bytes,
            done.elapsed.unwrap_or_default()
        );
    }

    // A silent command queues behind the last command's follow-ups, so the
    // tracked context is current once it has been dispatched.
    session.execute("true", true, None).await?;
    println!("\ncwd: {:?}, user: {:?}", session.cwd(), session.user());

    registry.stop(&id).await?;
    println!("Done!");
    Ok(())
}
