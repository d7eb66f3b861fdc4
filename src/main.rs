use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing::{error, info};

use sshweb::cli::{Cli, Command};
use sshweb::config;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Command::HashPassword { password }) => {
            return sshweb::identity::password::hash_password_cli(password.as_deref());
        }
        Some(Command::CheckConfig) => {
            let cfg = config::resolve_config(&cli.config)?;
            println!("Configuration is valid.");
            println!("  Listen: {}", cfg.server.listen);
            println!("  Duplicate start: {}", cfg.sessions.duplicate_start);
            println!("  Host key policy: {}", cfg.ssh.host_key_policy);
            println!(
                "  Voice: {}",
                if cfg.voice.enabled {
                    cfg.voice.endpoint.as_str()
                } else {
                    "disabled"
                }
            );
            println!("  Users: {}", cfg.users.len());
            return Ok(());
        }
        Some(Command::ShowConfig { format }) => {
            let cfg = config::resolve_config(&cli.config)?;
            let redacted = config::redact::redact_config(&cfg);
            match format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&redacted)?),
                "toml" => println!("{}", toml::to_string_pretty(&redacted)?),
                other => anyhow::bail!("unknown format '{}' (available: toml, json)", other),
            }
            return Ok(());
        }
        Some(Command::HealthCheck { addr, timeout }) => {
            let rt = tokio::runtime::Runtime::new()?;
            let result = rt.block_on(health_check(addr, *timeout));
            match result {
                Ok(()) => {
                    println!("OK: {} is healthy", addr);
                    return Ok(());
                }
                Err(e) => {
                    eprintln!("FAIL: {}: {:#}", addr, e);
                    std::process::exit(1);
                }
            }
        }
        Some(Command::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "sshweb", &mut std::io::stdout());
            return Ok(());
        }
        Some(Command::Run) | None => {}
    }

    let app_config = config::resolve_config(&cli.config)?;

    // CLI override > config
    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| app_config.logging.level.to_string());
    sshweb::logging::setup_logging(&log_level, app_config.logging.format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %app_config.server.listen,
        "Starting sshweb gateway"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        if let Err(e) = sshweb::server::run(app_config).await {
            error!(error = %e, "Server error");
            std::process::exit(1);
        }
    });

    Ok(())
}

async fn health_check(addr: &str, timeout_secs: u64) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()?;
    let resp = client.get(format!("http://{}/health", addr)).send().await?;
    if !resp.status().is_success() {
        anyhow::bail!("HTTP {}", resp.status());
    }
    Ok(())
}
