pub mod env;
pub mod redact;
pub mod types;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::Path;
use types::{AppConfig, HostKeyPolicy};

/// Maximum config file size (1 MB)
const MAX_CONFIG_SIZE: u64 = 1_048_576;

/// Load and validate configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("reading config metadata: {}", path.display()))?;
    if metadata.len() > MAX_CONFIG_SIZE {
        anyhow::bail!(
            "config file too large: {} bytes (max {} bytes)",
            metadata.len(),
            MAX_CONFIG_SIZE
        );
    }

    check_config_file_permissions(path);

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config: {}", path.display()))?;
    parse_config(&content)
}

/// On Unix, warn if the config file is readable by group or others,
/// since it may contain password hashes and private keys.
#[cfg(unix)]
fn check_config_file_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    match std::fs::metadata(path) {
        Ok(meta) => {
            let mode = meta.permissions().mode();
            if mode & 0o077 != 0 {
                tracing::warn!(
                    path = %path.display(),
                    mode = format!("{:04o}", mode & 0o7777),
                    "Config file is readable by group/others. \
                     Consider restricting permissions to 0600."
                );
            }
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Could not check config file permissions"
            );
        }
    }
}

#[cfg(not(unix))]
fn check_config_file_permissions(_path: &Path) {}

/// Parse configuration from a TOML string
pub fn parse_config(content: &str) -> Result<AppConfig> {
    let config: AppConfig = toml::from_str(content).context("parsing TOML configuration")?;
    validate_config(&config)?;
    Ok(config)
}

/// Effective configuration: file (or defaults when it does not exist),
/// then `SSHWEB_*` env overrides, then validation.
pub fn resolve_config(path: &Path) -> Result<AppConfig> {
    let mut config = if path.exists() {
        load_config(path)?
    } else {
        eprintln!(
            "No config file at {}, using defaults and environment variables",
            path.display()
        );
        AppConfig::default()
    };
    env::apply_env_overrides(&mut config)?;
    validate_config(&config)?;
    Ok(config)
}

/// Validate an already-constructed AppConfig (e.g. after env overrides).
pub fn validate_config(config: &AppConfig) -> Result<()> {
    validate_server(config)?;
    validate_ssh(config)?;
    validate_bridge(config)?;
    validate_voice(config)?;
    validate_users(config)?;
    Ok(())
}

fn validate_server(config: &AppConfig) -> Result<()> {
    if config.server.listen.is_empty() {
        anyhow::bail!("server.listen must not be empty");
    }
    config
        .server
        .listen
        .parse::<SocketAddr>()
        .with_context(|| format!("server.listen is not a socket address: {}", config.server.listen))?;
    Ok(())
}

fn validate_ssh(config: &AppConfig) -> Result<()> {
    let ssh = &config.ssh;
    if ssh.default_port == 0 {
        anyhow::bail!("ssh.default_port must be > 0");
    }
    if ssh.connect_timeout_secs == 0 {
        anyhow::bail!("ssh.connect_timeout_secs must be > 0");
    }
    if ssh.auth_timeout_secs == 0 {
        anyhow::bail!("ssh.auth_timeout_secs must be > 0");
    }
    if ssh.term.is_empty() {
        anyhow::bail!("ssh.term must not be empty");
    }
    if ssh.cols == 0 || ssh.rows == 0 {
        anyhow::bail!("ssh.cols and ssh.rows must be > 0");
    }
    if ssh.host_key_policy == HostKeyPolicy::KnownHosts && ssh.known_hosts_path.is_none() {
        anyhow::bail!("ssh.known_hosts_path is required when host_key_policy = \"known_hosts\"");
    }
    if ssh.host_key_policy == HostKeyPolicy::AcceptAny {
        tracing::warn!(
            "ssh.host_key_policy is 'accept_any'. Remote host keys are not verified; \
             set host_key_policy = \"known_hosts\" for production deployments."
        );
    }
    Ok(())
}

fn validate_bridge(config: &AppConfig) -> Result<()> {
    let bridge = &config.bridge;
    if bridge.input_queue_capacity == 0 {
        anyhow::bail!("bridge.input_queue_capacity must be > 0");
    }
    if bridge.output_queue_capacity == 0 {
        anyhow::bail!("bridge.output_queue_capacity must be > 0");
    }
    if bridge.output_stall_timeout_secs == 0 {
        anyhow::bail!("bridge.output_stall_timeout_secs must be > 0");
    }
    if bridge.max_input_bytes == 0 {
        anyhow::bail!("bridge.max_input_bytes must be > 0");
    }
    Ok(())
}

fn validate_voice(config: &AppConfig) -> Result<()> {
    let voice = &config.voice;
    if !voice.enabled {
        return Ok(());
    }
    if !(voice.endpoint.starts_with("http://") || voice.endpoint.starts_with("https://")) {
        anyhow::bail!(
            "voice.endpoint must use http or https scheme: {}",
            voice.endpoint
        );
    }
    if voice.timeout_secs == 0 {
        anyhow::bail!("voice.timeout_secs must be > 0");
    }
    if voice.max_upload_bytes == 0 {
        anyhow::bail!("voice.max_upload_bytes must be > 0");
    }
    Ok(())
}

fn validate_users(config: &AppConfig) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for user in &config.users {
        if user.username.is_empty() {
            anyhow::bail!("user entry has empty username");
        }
        if !seen.insert(&user.username) {
            anyhow::bail!("duplicate username: {}", user.username);
        }
        if user.password_hash.is_empty() {
            anyhow::bail!("user '{}' has an empty password_hash", user.username);
        }
        if user.host.is_empty() {
            anyhow::bail!("user '{}' has an empty host", user.username);
        }
        match (&user.private_key, &user.private_key_path) {
            (Some(_), Some(_)) => anyhow::bail!(
                "user '{}' must set only one of private_key or private_key_path",
                user.username
            ),
            (None, None) => anyhow::bail!(
                "user '{}' must set private_key or private_key_path",
                user.username
            ),
            _ => {}
        }
    }
    Ok(())
}
