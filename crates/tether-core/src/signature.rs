//! Signing primitives used by the handshake.
//!
//! The handshake never looks at how a signature is produced. It only needs
//! a [`Signer`] that both ends agree on and a source of fresh salts.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// Number of random bytes in a challenge salt.
pub const SALT_LEN: usize = 16;

/// Failure producing a signature.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("unusable signing key: {0}")]
    InvalidKey(String),
}

/// Keyed message authentication over an ordered list of parts.
pub trait Signer: Send + Sync {
    /// Sign `parts` with `secret`.
    fn sign(&self, secret: &str, parts: &[&str]) -> Result<String, SignatureError>;

    /// Check `signature` against `parts`. A secret that cannot sign never
    /// verifies anything.
    fn verify(&self, secret: &str, parts: &[&str], signature: &str) -> bool {
        self.sign(secret, parts)
            .is_ok_and(|expected| expected == signature)
    }
}

/// HMAC-SHA256 over the parts joined with `\n`, hex encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct HmacSigner;

impl HmacSigner {
    fn mac(secret: &str, parts: &[&str]) -> Result<HmacSha256, SignatureError> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                mac.update(b"\n");
            }
            mac.update(part.as_bytes());
        }
        Ok(mac)
    }
}

impl Signer for HmacSigner {
    fn sign(&self, secret: &str, parts: &[&str]) -> Result<String, SignatureError> {
        Ok(hex::encode(Self::mac(secret, parts)?.finalize().into_bytes()))
    }

    fn verify(&self, secret: &str, parts: &[&str], signature: &str) -> bool {
        let Ok(bytes) = hex::decode(signature) else {
            return false;
        };
        Self::mac(secret, parts).is_ok_and(|mac| mac.verify_slice(&bytes).is_ok())
    }
}

/// Fresh hex-encoded random salt.
pub fn random_salt() -> String {
    let mut buf = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Milliseconds since the unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_compute_the_same_signature() {
        let device = HmacSigner;
        let driver = HmacSigner;
        let ts = 1_700_000_000_123u64.to_string();
        let a = device.sign("s3cret", &["abcd", &ts]).unwrap();
        let b = driver.sign("s3cret", &["abcd", &ts]).unwrap();
        assert_eq!(a, b);
        assert!(driver.verify("s3cret", &["abcd", &ts], &a));
    }

    #[test]
    fn signature_depends_on_every_input() {
        let signer = HmacSigner;
        let sign = |secret: &str, parts: &[&str]| signer.sign(secret, parts).unwrap();
        let base = sign("k", &["salt", "1"]);
        assert_ne!(base, sign("other", &["salt", "1"]));
        assert_ne!(base, sign("k", &["salt2", "1"]));
        assert_ne!(base, sign("k", &["salt", "2"]));
        // part boundaries matter
        assert_ne!(sign("k", &["ab", "c"]), sign("k", &["a", "bc"]));
    }

    #[test]
    fn verify_rejects_garbage() {
        let signer = HmacSigner;
        assert!(!signer.verify("k", &["x"], "not-hex"));
        assert!(!signer.verify("k", &["x"], ""));
        let good = signer.sign("k", &["x"]).unwrap();
        let mut bad = good.clone();
        bad.replace_range(0..1, if good.starts_with('0') { "1" } else { "0" });
        assert!(!signer.verify("k", &["x"], &bad));
    }

    #[test]
    fn empty_and_long_secrets_still_sign() {
        let signer = HmacSigner;
        let long = "k".repeat(4096);
        for secret in ["", long.as_str()] {
            let signature = signer.sign(secret, &["salt", "1"]).unwrap();
            assert!(signer.verify(secret, &["salt", "1"], &signature));
        }
    }

    #[test]
    fn salts_are_fresh() {
        let a = random_salt();
        let b = random_salt();
        assert_eq!(a.len(), SALT_LEN * 2);
        assert_ne!(a, b);
    }
}
