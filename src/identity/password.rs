use anyhow::Result;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// Hash a password using Argon2id with OWASP-recommended parameters
/// (19 MiB, 2 iterations, 1 lane).
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2::Params::new(19456, 2, 1, None)
            .map_err(|e| anyhow::anyhow!("invalid argon2 params: {}", e))?,
    );
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash password: {}", e))?;
    Ok(hash.to_string())
}

/// Verify a password against an Argon2 hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to parse password hash");
            return false;
        }
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// CLI entrypoint for the hash-password subcommand
pub fn hash_password_cli(password: Option<&str>) -> Result<()> {
    let password = match password {
        Some(p) => p.to_string(),
        None => {
            eprintln!("Enter password: ");
            let mut input = String::new();
            std::io::stdin().read_line(&mut input)?;
            input.trim().to_string()
        }
    };

    if password.is_empty() {
        anyhow::bail!("password must not be empty");
    }

    println!("{}", hash_password(&password)?);
    Ok(())
}
