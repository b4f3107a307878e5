//! HMAC-SHA256 webhook signatures (`X-Hub-Signature-256: sha256=<hex>`)

use super::error::ApiError;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";
const SIGNATURE_PREFIX: &str = "sha256=";

/// Check `header` against the HMAC of the raw request body.
///
/// The `sha256=` prefix is optional. Comparison is constant time.
pub fn verify_signature(secret: &[u8], body: &[u8], header: &str) -> Result<(), ApiError> {
    let digest = header.strip_prefix(SIGNATURE_PREFIX).unwrap_or(header);
    let received = hex::decode(digest.trim()).map_err(|_| ApiError::InvalidSignatureFormat)?;

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| ApiError::InvalidSignature)?;
    mac.update(body);
    mac.verify_slice(&received)
        .map_err(|_| ApiError::InvalidSignature)
}

/// Signature header value for `body`, as the webhook sender computes it
pub fn sign(secret: &[u8], body: &[u8]) -> Result<String, ApiError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| ApiError::InvalidSignature)?;
    mac.update(body);
    Ok(format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    ))
}
