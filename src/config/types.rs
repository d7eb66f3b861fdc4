use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// What happens when a client starts a session while one is still live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateStartPolicy {
    /// Tear down the live session, then start the new one.
    #[default]
    Replace,
    /// Refuse the new start with an already-active error.
    Reject,
}

impl fmt::Display for DuplicateStartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicateStartPolicy::Replace => write!(f, "replace"),
            DuplicateStartPolicy::Reject => write!(f, "reject"),
        }
    }
}

/// How remote host keys are checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyPolicy {
    #[default]
    AcceptAny,
    KnownHosts,
}

impl fmt::Display for HostKeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostKeyPolicy::AcceptAny => write!(f, "accept_any"),
            HostKeyPolicy::KnownHosts => write!(f, "known_hosts"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default, rename = "users")]
    pub users: Vec<UserConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Origins allowed by CORS. Empty means any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// Seconds to wait for live sessions to close on shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            allowed_origins: Vec::new(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_shutdown_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SshConfig {
    #[serde(default = "default_ssh_port")]
    pub default_port: u16,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,
    /// 0 disables keepalives.
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_secs: u64,
    #[serde(default = "default_term")]
    pub term: String,
    #[serde(default = "default_cols")]
    pub cols: u32,
    #[serde(default = "default_rows")]
    pub rows: u32,
    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,
    pub known_hosts_path: Option<PathBuf>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            default_port: default_ssh_port(),
            connect_timeout_secs: default_connect_timeout(),
            auth_timeout_secs: default_auth_timeout(),
            keepalive_interval_secs: default_keepalive_interval(),
            term: default_term(),
            cols: default_cols(),
            rows: default_rows(),
            host_key_policy: HostKeyPolicy::default(),
            known_hosts_path: None,
        }
    }
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    15
}

fn default_auth_timeout() -> u64 {
    20
}

fn default_keepalive_interval() -> u64 {
    30
}

fn default_term() -> String {
    "xterm".to_string()
}

fn default_cols() -> u32 {
    80
}

fn default_rows() -> u32 {
    24
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionsConfig {
    #[serde(default)]
    pub duplicate_start: DuplicateStartPolicy,
    /// Seconds to wait for a replaced or logged-out session to finish closing.
    #[serde(default = "default_teardown_timeout")]
    pub teardown_timeout_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            duplicate_start: DuplicateStartPolicy::default(),
            teardown_timeout_secs: default_teardown_timeout(),
        }
    }
}

fn default_teardown_timeout() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeConfig {
    #[serde(default = "default_input_queue")]
    pub input_queue_capacity: usize,
    #[serde(default = "default_output_queue")]
    pub output_queue_capacity: usize,
    /// A client that accepts no output for this long is disconnected.
    #[serde(default = "default_output_stall_timeout")]
    pub output_stall_timeout_secs: u64,
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            input_queue_capacity: default_input_queue(),
            output_queue_capacity: default_output_queue(),
            output_stall_timeout_secs: default_output_stall_timeout(),
            max_input_bytes: default_max_input_bytes(),
        }
    }
}

fn default_input_queue() -> usize {
    256
}

fn default_output_queue() -> usize {
    1024
}

fn default_output_stall_timeout() -> u64 {
    30
}

fn default_max_input_bytes() -> usize {
    65_536
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VoiceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_voice_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_voice_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Append a newline so the shell executes the command immediately.
    #[serde(default)]
    pub append_newline: bool,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_voice_endpoint(),
            timeout_secs: default_voice_timeout(),
            max_upload_bytes: default_max_upload_bytes(),
            append_newline: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_voice_endpoint() -> String {
    "http://127.0.0.1:8000/voice-to-command".to_string()
}

fn default_voice_timeout() -> u64 {
    60
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// A login account. The password is checked at `/api/login`; the remaining
/// fields describe the shell target returned to the browser on success.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserConfig {
    pub username: String,
    pub password_hash: String,
    pub host: String,
    /// Account on the remote host. Defaults to `username`.
    pub remote_username: Option<String>,
    pub private_key: Option<String>,
    pub private_key_path: Option<PathBuf>,
    pub uid: Option<u64>,
}

impl UserConfig {
    pub fn remote_username(&self) -> &str {
        self.remote_username.as_deref().unwrap_or(&self.username)
    }
}
