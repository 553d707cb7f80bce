//! Script execution for the CLI.

use crate::host_api;
use anyhow::{Context, Result};
use luau_bridge_core::{Environment, HostValue, SessionConfig};
use luau_bridge_runtime::Bridge;
use std::fs;
use std::io::{self, Read};
use tracing::{debug, warn};

/// Read a script from `path`, or from stdin when `path` is `-`.
pub fn read_script(path: &str) -> Result<String> {
    if path == "-" {
        let mut source = String::new();
        io::stdin()
            .read_to_string(&mut source)
            .context("Failed to read script from stdin")?;
        return Ok(source);
    }
    fs::read_to_string(path).with_context(|| format!("Failed to read script: {path}"))
}

/// Chunk name for a script path: the explicit name when given, otherwise
/// the path itself for files and the configured name for stdin.
pub fn chunk_name(path: &str, explicit: Option<&str>, config: &SessionConfig) -> String {
    match explicit {
        Some(name) => name.to_string(),
        None if path != "-" => format!("={path}"),
        None => config.chunk_name.clone(),
    }
}

/// Run `source` in a fresh session seeded with `env` plus the built-in
/// `host` object, and return its results formatted for output.
pub fn run(config: &SessionConfig, env: Environment, source: &str) -> Result<String> {
    let mut env = env;
    if env.get("host").is_some() {
        warn!("environment defines 'host'; the built-in host object is not installed");
    } else {
        env.insert("host", host_api::host_object());
    }

    let mut bridge = Bridge::new(config.clone());
    let env_id = bridge.register_environment(env);
    let session = bridge.create_session(env_id)?;
    debug!(session = %session.id(), chunk = %config.chunk_name, "running script");

    let outcome = session.exec(source).map(|results| format_results(&results));
    bridge.close_session(session);
    Ok(outcome?)
}

/// Results joined by tabs, each rendered like Luau `tostring`.
pub fn format_results(results: &[HostValue]) -> String {
    results
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\t")
}
