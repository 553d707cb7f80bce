//! # luau-bridge
//!
//! Run a Luau script against a host environment.
//!
//! Globals come from an optional TOML file: tables and arrays become host
//! objects the script reads and writes through proxies. Every script also
//! gets a built-in `host` object with `host.log(level, message)` and
//! `host.now()`.
//!
//! ## Configuration
//!
//! Reads `$XDG_CONFIG_HOME/luau-bridge/config.toml`, created with defaults on
//! first run. Pass `--config` to use another file.
//!
//! ## Running
//!
//! ```bash
//! luau-bridge script.luau --env globals.toml
//!
//! # From stdin, with debug logging
//! echo 'return 1 + 1' | RUST_LOG=debug luau-bridge -
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use luau_bridge_cli::config::Config;
use luau_bridge_cli::runner;
use luau_bridge_core::Environment;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "luau-bridge", version, about = "Run Luau scripts against host environments")]
struct Cli {
    /// Script file, or `-` for stdin
    script: String,

    /// TOML file whose top-level keys become script globals
    #[arg(long, value_name = "FILE")]
    env: Option<PathBuf>,

    /// Configuration file (default: $XDG_CONFIG_HOME/luau-bridge/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Leave the standard libraries and globals writable
    #[arg(long)]
    no_sandbox: bool,

    /// Chunk name used in error locations
    #[arg(long, value_name = "NAME")]
    chunk_name: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => Config::load(path),
        None => Config::load_default(),
    };
    let level = loaded
        .as_ref()
        .map(|config| config.log.level.clone())
        .unwrap_or_else(|_| "warn".to_string());

    // Initialize logging; RUST_LOG wins over the configured level
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level)),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let config = match loaded {
        Ok(config) => config,
        Err(e) if cli.config.is_some() => {
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            info!("Failed to load config, using defaults: {:#}", e);
            Config::default()
        }
    };

    match run(&cli, config) {
        Ok(output) => {
            if !output.is_empty() {
                println!("{output}");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, config: Config) -> Result<String> {
    let mut session = config.session;
    if cli.no_sandbox {
        session.sandbox = false;
    }
    session.chunk_name = runner::chunk_name(&cli.script, cli.chunk_name.as_deref(), &session);
    session.validate().context("Invalid session options")?;

    let env = match &cli.env {
        Some(path) => Environment::load(path)
            .with_context(|| format!("Failed to load environment: {}", path.display()))?,
        None => Environment::new(),
    };
    debug!(globals = env.len(), sandbox = session.sandbox, "prepared environment");

    let source = runner::read_script(&cli.script)?;
    runner::run(&session, env, &source)
}
