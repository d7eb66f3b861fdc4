use crate::error::GatewayError;
use russh::keys::PrivateKey;

/// Decode private key material supplied by the client (OpenSSH or PKCS#8 PEM).
///
/// Browsers commonly submit keys with CRLF line endings or surrounding
/// whitespace, so the text is normalized before decoding.
pub fn decode_private_key(material: &str, passphrase: Option<&str>) -> Result<PrivateKey, GatewayError> {
    let normalized = normalize_key_text(material);
    if normalized.is_empty() {
        return Err(GatewayError::Authentication(
            "private key is empty".to_string(),
        ));
    }
    russh::keys::decode_secret_key(&normalized, passphrase)
        .map_err(|e| GatewayError::Authentication(format!("invalid private key: {}", e)))
}

fn normalize_key_text(material: &str) -> String {
    let mut text = material.trim().replace("\r\n", "\n");
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text
}
