//! HMAC-SHA256 webhook signatures

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Prefix carried by the signature header value
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Serialize a payload to its canonical JSON body
///
/// Compact output with object keys in lexicographic order, so sender and
/// receiver hash identical bytes.
pub fn canonical_json<T: Serialize>(payload: &T) -> crate::Result<Vec<u8>> {
    // serde_json::Value maps are ordered by key
    let value = serde_json::to_value(payload)?;
    Ok(serde_json::to_vec(&value)?)
}

/// Compute the `sha256=<hex>` signature over a body
pub fn compute_signature(secret: &[u8], body: &[u8]) -> crate::Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| crate::X402Error::config(format!("Invalid webhook secret: {}", e)))?;
    mac.update(body);
    Ok(format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Verify a received signature header against the body
///
/// The comparison is constant-time; malformed hex is compared against zeros
/// so it takes the same path as a wrong signature.
pub fn verify_signature(secret: &[u8], body: &[u8], signature: &str) -> bool {
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);

    let provided = signature
        .strip_prefix(SIGNATURE_PREFIX)
        .unwrap_or(signature);
    let expected = hex::decode(provided).unwrap_or_else(|_| vec![0u8; 32]);

    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_signature_roundtrip() {
        let secret = b"whsec_test";
        let body = br#"{"event_type":"payment.settled"}"#;
        let sig = compute_signature(secret, body).unwrap();
        assert!(sig.starts_with("sha256="));
        assert!(verify_signature(secret, body, &sig));
    }

    #[test]
    fn test_signature_without_prefix_is_accepted() {
        let secret = b"whsec_test";
        let body = b"payload";
        let sig = compute_signature(secret, body).unwrap();
        assert!(verify_signature(secret, body, &sig[SIGNATURE_PREFIX.len()..]));
    }

    #[test]
    fn test_wrong_secret_and_tampered_body() {
        let body = b"payload";
        let sig = compute_signature(b"secret-1", body).unwrap();
        assert!(!verify_signature(b"secret-2", body, &sig));
        assert!(!verify_signature(b"secret-1", b"tampered", &sig));
        assert!(!verify_signature(b"secret-1", body, "sha256=not-hex"));
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let body = canonical_json(&json!({"b": 1, "a": {"d": 2, "c": 3}})).unwrap();
        assert_eq!(body, br#"{"a":{"c":3,"d":2},"b":1}"#.to_vec());
    }
}
