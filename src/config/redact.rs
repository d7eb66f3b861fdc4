use crate::config::types::AppConfig;

/// Redact sensitive fields in a config for safe display.
/// Replaces password hashes and inline private keys with "***".
pub fn redact_config(cfg: &AppConfig) -> AppConfig {
    let mut redacted = cfg.clone();

    for user in &mut redacted.users {
        if !user.password_hash.is_empty() {
            user.password_hash = "***".to_string();
        }
        if user.private_key.is_some() {
            user.private_key = Some("***".to_string());
        }
    }

    redacted
}
