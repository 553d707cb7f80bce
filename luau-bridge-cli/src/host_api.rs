//! Built-in `host` global available to every script run by the CLI.
//!
//! - `host.log(level, message)` forwards to `tracing` under the `script`
//!   target
//! - `host.now()` returns wall-clock milliseconds since the Unix epoch

use luau_bridge_core::{HostCall, HostError, HostResult, HostValue, MapObject};
use std::str::FromStr;

/// Log level accepted by `host.log`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl FromStr for LogLevel {
    type Err = HostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(HostError::new(format!("unknown log level '{other}'"))),
        }
    }
}

/// The frozen `host` object.
pub fn host_object() -> MapObject {
    MapObject::new("host")
        .with("log", HostValue::function("log", log))
        .with("now", HostValue::function("now", now))
        .frozen()
}

fn log(call: HostCall) -> HostResult<Vec<HostValue>> {
    let level: LogLevel = call.string(0)?.parse()?;
    let message = call.arg(1).to_string();
    match level {
        LogLevel::Trace => tracing::trace!(target: "script", env = %call.env, "{}", message),
        LogLevel::Debug => tracing::debug!(target: "script", env = %call.env, "{}", message),
        LogLevel::Info => tracing::info!(target: "script", env = %call.env, "{}", message),
        LogLevel::Warn => tracing::warn!(target: "script", env = %call.env, "{}", message),
        LogLevel::Error => tracing::error!(target: "script", env = %call.env, "{}", message),
    }
    Ok(Vec::new())
}

fn now(_call: HostCall) -> HostResult<Vec<HostValue>> {
    Ok(vec![HostValue::Number(now_millis() as f64)])
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
