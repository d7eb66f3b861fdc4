use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "sshweb",
    version,
    about = "Browser gateway for interactive SSH shells with voice commands"
)]
pub struct Cli {
    /// Path to configuration file (also settable via SSHWEB_CONFIG env var)
    #[arg(short, long, default_value = "config.toml", env = "SSHWEB_CONFIG")]
    pub config: PathBuf,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway (default when no subcommand is given)
    Run,
    /// Hash a password using Argon2id for use in config
    HashPassword {
        /// Password to hash (if not provided, reads from stdin)
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Validate configuration file
    CheckConfig,
    /// Show the effective configuration (with sensitive fields redacted)
    ShowConfig {
        /// Output format: toml or json
        #[arg(long, default_value = "toml")]
        format: String,
    },
    /// Health check: query the gateway's /health endpoint
    HealthCheck {
        /// Gateway address (host:port)
        #[arg(long, default_value = "127.0.0.1:5000")]
        addr: String,
        /// Timeout in seconds
        #[arg(long, default_value = "5")]
        timeout: u64,
    },
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}
