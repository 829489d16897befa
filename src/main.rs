pub mod builtins;
pub mod config;
pub mod execution;
pub mod jobs;
pub mod parser;
pub mod shell;
pub mod sig;
pub mod sys;

use std::env;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{Cli, LOG_ENV};
use crate::shell::Shell;
use crate::sig::{handler, install_sighandler};

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    install_sighandler(libc::SIGINT, handler)
        .context("cannot install SIGINT handler")?;

    if let Ok(exe) = env::current_exe() {
        env::set_var("shell", exe);
    }

    let mut shell = Shell::new(cli.settings());
    match &cli.batch_file {
        Some(path) => shell.run_batch(path)?,
        None => shell.run_interactive()?,
    }

    Ok(())
}
