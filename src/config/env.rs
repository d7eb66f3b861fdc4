//! Environment variable configuration support.
//!
//! `SSHWEB_CONFIG` selects the config file. A handful of `SSHWEB_*` variables
//! override individual file values, so a container can run from an otherwise
//! default configuration.

use crate::config::types::*;

/// Apply `SSHWEB_*` overrides on top of a loaded configuration.
///
/// Invalid values are reported as errors instead of being silently ignored.
pub fn apply_env_overrides(config: &mut AppConfig) -> anyhow::Result<()> {
    if let Some(v) = opt_env("SSHWEB_LISTEN") {
        config.server.listen = v;
    }
    if let Some(v) = opt_env("SSHWEB_ALLOWED_ORIGINS") {
        config.server.allowed_origins = parse_csv(&v);
    }
    if let Some(v) = opt_env("SSHWEB_LOG_LEVEL") {
        config.logging.level = parse_log_level(&v)?;
    }
    if let Some(v) = opt_env("SSHWEB_LOG_FORMAT") {
        config.logging.format = parse_log_format(&v)?;
    }
    if let Some(v) = opt_env("SSHWEB_VOICE_ENDPOINT") {
        config.voice.endpoint = v;
    }
    if std::env::var("SSHWEB_VOICE_ENABLED").is_ok() {
        config.voice.enabled = parse_bool_env("SSHWEB_VOICE_ENABLED", config.voice.enabled);
    }
    if std::env::var("SSHWEB_METRICS_ENABLED").is_ok() {
        config.metrics.enabled = parse_bool_env("SSHWEB_METRICS_ENABLED", config.metrics.enabled);
    }
    if let Some(v) = opt_env("SSHWEB_DUPLICATE_START") {
        config.sessions.duplicate_start = parse_duplicate_policy(&v)?;
    }
    Ok(())
}

fn opt_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_bool_env(key: &str, default: bool) -> bool {
    opt_env(key)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

fn parse_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

fn parse_log_level(s: &str) -> anyhow::Result<LogLevel> {
    match s.to_ascii_lowercase().as_str() {
        "trace" => Ok(LogLevel::Trace),
        "debug" => Ok(LogLevel::Debug),
        "info" => Ok(LogLevel::Info),
        "warn" => Ok(LogLevel::Warn),
        "error" => Ok(LogLevel::Error),
        _ => anyhow::bail!("invalid log level: '{s}'"),
    }
}

fn parse_log_format(s: &str) -> anyhow::Result<LogFormat> {
    match s.to_ascii_lowercase().as_str() {
        "pretty" => Ok(LogFormat::Pretty),
        "json" => Ok(LogFormat::Json),
        _ => anyhow::bail!("invalid log format: '{s}'"),
    }
}

fn parse_duplicate_policy(s: &str) -> anyhow::Result<DuplicateStartPolicy> {
    match s.to_ascii_lowercase().as_str() {
        "replace" => Ok(DuplicateStartPolicy::Replace),
        "reject" => Ok(DuplicateStartPolicy::Reject),
        _ => anyhow::bail!("invalid duplicate start policy: '{s}'"),
    }
}
