//! pty-relay
//!
//! Runs a command on a pseudoterminal and copies its output to stdout, then
//! exits with the command's exit code.
//!
//! # Usage
//!
//! ```bash
//! # Give a terminal-only tool a TTY from a pipeline
//! pty-relay some-cli --flag arg | tee log.txt
//!
//! # Fix the terminal size the child sees
//! pty-relay --cols 200 --rows 50 top -b -n 1
//! ```

use std::io;
use std::process::ExitCode;

use clap::Parser;
use pty_relay::error::USAGE;
use pty_relay::{CliArgs, Command, Config, Relay, RelayError};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> ExitCode {
    // Logs go to stderr so stdout carries only the child's output
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            // --help and --version land here too
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        },
    };

    match run(&args) {
        Ok(code) => ExitCode::from(exit_status(code)),
        Err(RelayError::Usage) => {
            eprintln!("{}", USAGE);
            ExitCode::FAILURE
        },
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("pty-relay: {}", e);
            ExitCode::FAILURE
        },
    }
}

fn run(args: &CliArgs) -> Result<i32, RelayError> {
    let command = Command::from_args(&args.command)?;
    let config = Config::load_with_args(args)?;
    let command = command.term(config.term.as_deref())?;

    let relay = Relay::new(config.relay_settings());
    let mut stdout = io::stdout().lock();
    let outcome = relay.run(&command, config.window_size(), &mut stdout)?;

    tracing::info!("child {}", outcome.status);
    Ok(outcome.exit_code())
}

/// Process exit status for a child exit code; anything outside 0..=255 is a failure
fn exit_status(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}
