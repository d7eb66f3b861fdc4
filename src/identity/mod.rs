//! Login accounts for the browser front end.
//!
//! A successful login returns the shell target stored for the account, which
//! the browser then uses to start its session.

pub mod password;

use crate::config::types::UserConfig;
use anyhow::Context;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Dummy hash for timing-safe user enumeration prevention
const DUMMY_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$AAAAAAAAAAAAAAAAAAAAAA$AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("unknown username")]
    InvalidUsername,
    #[error("wrong password")]
    InvalidPassword,
}

impl IdentityError {
    /// Code returned to the browser.
    pub fn code(&self) -> &'static str {
        match self {
            IdentityError::InvalidUsername => "INVALID_USERNAME",
            IdentityError::InvalidPassword => "INVALID_PASSWORD",
        }
    }
}

/// Account details handed to the browser after login.
#[derive(Clone, Serialize)]
pub struct Identity {
    pub uid: u64,
    pub name: String,
    /// Shell host.
    pub ip: String,
    /// Account on the shell host.
    pub remote_username: String,
    pub sshkey: String,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("uid", &self.uid)
            .field("name", &self.name)
            .field("ip", &self.ip)
            .field("remote_username", &self.remote_username)
            .field("sshkey", &"***")
            .finish()
    }
}

/// Checks login credentials.
///
/// Verification is CPU-bound; async callers should run it on a blocking
/// thread.
pub trait IdentityProvider: Send + Sync {
    fn verify(&self, username: &str, password: &str) -> Result<Identity, IdentityError>;
}

struct Account {
    password_hash: String,
    identity: Identity,
}

/// Accounts declared as `[[users]]` in the config file.
pub struct ConfigIdentityProvider {
    accounts: HashMap<String, Account>,
}

impl ConfigIdentityProvider {
    /// Build from config, reading `private_key_path` files up front.
    pub fn from_config(users: &[UserConfig]) -> anyhow::Result<Self> {
        let mut accounts = HashMap::with_capacity(users.len());
        for (index, user) in users.iter().enumerate() {
            let sshkey = match (&user.private_key, &user.private_key_path) {
                (Some(key), _) => key.clone(),
                (None, Some(path)) => std::fs::read_to_string(path).with_context(|| {
                    format!(
                        "reading private key for user '{}': {}",
                        user.username,
                        path.display()
                    )
                })?,
                (None, None) => anyhow::bail!("user '{}' has no private key", user.username),
            };
            let identity = Identity {
                uid: user.uid.unwrap_or(index as u64 + 1),
                name: user.username.clone(),
                ip: user.host.clone(),
                remote_username: user.remote_username().to_string(),
                sshkey,
            };
            accounts.insert(
                user.username.clone(),
                Account {
                    password_hash: user.password_hash.clone(),
                    identity,
                },
            );
        }
        Ok(Self { accounts })
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

impl IdentityProvider for ConfigIdentityProvider {
    fn verify(&self, username: &str, password: &str) -> Result<Identity, IdentityError> {
        let Some(account) = self.accounts.get(username) else {
            tracing::debug!(username = %username, "User not found, performing dummy verification");
            let _ = password::verify_password(password, DUMMY_HASH);
            return Err(IdentityError::InvalidUsername);
        };
        if password::verify_password(password, &account.password_hash) {
            Ok(account.identity.clone())
        } else {
            Err(IdentityError::InvalidPassword)
        }
    }
}
