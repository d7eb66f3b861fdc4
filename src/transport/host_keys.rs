use crate::config::types::HostKeyPolicy;
use russh::keys::PublicKey;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Decides whether a remote host key is acceptable.
#[derive(Debug, Clone)]
pub struct HostKeyVerifier {
    policy: HostKeyPolicy,
    known_hosts_path: Option<PathBuf>,
}

impl HostKeyVerifier {
    pub fn new(policy: HostKeyPolicy, known_hosts_path: Option<PathBuf>) -> Self {
        Self {
            policy,
            known_hosts_path,
        }
    }

    pub fn accept_any() -> Self {
        Self::new(HostKeyPolicy::AcceptAny, None)
    }

    pub fn policy(&self) -> HostKeyPolicy {
        self.policy
    }

    /// Returns true if the key may be trusted for `host:port`.
    ///
    /// Under `known_hosts`, unknown hosts and changed keys are both rejected.
    pub fn verify(&self, host: &str, port: u16, key: &PublicKey) -> bool {
        match self.policy {
            HostKeyPolicy::AcceptAny => true,
            HostKeyPolicy::KnownHosts => {
                let Some(path) = &self.known_hosts_path else {
                    warn!(host = %host, "host key rejected: no known_hosts file configured");
                    return false;
                };
                match russh::keys::check_known_hosts_path(host, port, key, path) {
                    Ok(true) => {
                        debug!(host = %host, port = port, "host key matches known_hosts");
                        true
                    }
                    Ok(false) => {
                        warn!(host = %host, port = port, "host key rejected: host not in known_hosts");
                        false
                    }
                    Err(e) => {
                        warn!(host = %host, port = port, error = %e, "host key rejected");
                        false
                    }
                }
            }
        }
    }
}
