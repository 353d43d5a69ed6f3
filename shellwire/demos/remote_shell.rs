//! Remote shell example: drive a shell on an SSH host.
//!
//! Opens a shell channel (with a PTY, so the prompt strategy is used),
//! runs a command and prints every session event while it runs.
//!
//! # Prerequisites
//!
//! - SSH server reachable on the target host
//! - Valid credentials (username/password or SSH key)
//!
//! # Usage
//!
//! With password authentication:
//! ```bash
//! cargo run --example remote_shell -- --host localhost --user your_username --password your_password
//! ```
//!
//! With SSH key authentication and a plain (non-PTY) channel:
//! ```bash
//! cargo run --example remote_shell -- --host localhost --user your_username --key ~/.ssh/id_ed25519 --no-pty
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use shellwire::{SessionBuilder, SessionEvent, SessionRegistry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    println!("Connecting to {}:{}...", args.host, args.port);

    let mut builder = SessionBuilder::remote(&args.host)
        .port(args.port)
        .username(&args.user)
        .dialect("bash")
        .remote_pty(!args.no_pty)
        .timeout(Duration::from_secs(args.timeout));

    if let Some(password) = &args.password {
        builder = builder.password(password);
    } else if let Some(key_path) = &args.key {
        builder = builder.private_key(key_path);
    } else {
        eprintln!("Error: Must provide either --password or --key");
        std::process::exit(1);
    }

    let registry = SessionRegistry::new();
    let id = registry.start(builder.build()?).await?;
    let session = registry.session(&id)?;
    println!("Connected! ({:?})", session.strategy());

    let mut events = session.subscribe();
    let command = session.execute(&args.command, false, None).await?;
    println!("\nExecuting: {}", command.text);
    println!("{}", "-".repeat(50));

    loop {
        match events.recv().await? {
            SessionEvent::Stdout { cid: Some(cid), data } if cid == command.cid => {
                log::debug!("{} bytes of output", data.len());
            }
            SessionEvent::CommandFinished(done) if done.cid == command.cid => {
                print!("{}", done);
                println!("{}", "-".repeat(50));
                println!(
                    "exit {:?} in {:?}",
                    done.exit_status,
                    done.elapsed.unwrap_or_default()
                );
                break;
            }
            SessionEvent::Disconnected(info) => {
                eprintln!("Disconnected: {:?}", info);
                break;
            }
            _ => {}
        }
    }

    println!("\nClosing connection...");
    registry.stop(&id).await?;
    println!("Done!");

    Ok(())
}

/// Simple argument parser (avoiding external dependencies)
struct Args {
    host: String,
    port: u16,
    user: String,
    password: Option<String>,
    key: Option<PathBuf>,
    timeout: u64,
    no_pty: bool,
    command: String,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut parsed = Self {
            host: "localhost".to_string(),
            port: 22,
            user: env::var("USER").unwrap_or_else(|_| "root".to_string()),
            password: None,
            key: None,
            timeout: 30,
            no_pty: false,
            command: "uname -a".to_string(),
        };

        let mut i = 1;
        while i < args.len() {
            let value = args.get(i + 1).cloned();
            match args[i].as_str() {
                "--host" | "-h" => parsed.host = value.unwrap_or(parsed.host),
                "--port" | "-p" => {
                    parsed.port = value.and_then(|v| v.parse().ok()).unwrap_or(22)
                }
                "--user" | "-u" => parsed.user = value.unwrap_or(parsed.user),
                "--password" | "-P" => parsed.password = value,
                "--key" | "-k" => parsed.key = value.map(PathBuf::from),
                "--timeout" | "-t" => {
                    parsed.timeout = value.and_then(|v| v.parse().ok()).unwrap_or(30)
                }
                "--command" | "-c" => parsed.command = value.unwrap_or(parsed.command),
                "--no-pty" => {
                    parsed.no_pty = true;
                    i += 1;
                    continue;
                }
                "--help" => {
                    Self::print_help();
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {}", other);
                    i += 1;
                    continue;
                }
            }
            i += 2;
        }

        parsed
    }

    fn print_help() {
        println!(
            r#"shellwire remote_shell example

USAGE:
    cargo run --example remote_shell -- [OPTIONS]

OPTIONS:
    -h, --host <HOST>        Target host [default: localhost]
    -p, --port <PORT>        SSH port [default: 22]
    -u, --user <USER>        Username [default: $USER]
    -P, --password <PASS>    Password for authentication
    -k, --key <PATH>         Path to SSH private key
    -t, --timeout <SECS>     Connection timeout [default: 30]
    -c, --command <CMD>      Command to run [default: uname -a]
    --no-pty                 Open a plain shell channel without a PTY
    --help                   Print this help message
"#
        );
    }
}
