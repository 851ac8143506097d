//! Request signing shared by every venue adapter.
//!
//! One signer, parameterized by venue base path; there are no per-module
//! signing helpers and no credential globals.

use crate::domain::types::Credentials;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use std::sync::atomic::{AtomicU64, Ordering};

type HmacSha512 = Hmac<Sha512>;

/// Per-credential request signer with a strictly monotonic nonce source.
///
/// The nonce starts at the wall-clock millisecond and only moves forward,
/// so a burst of requests within the same millisecond still gets distinct,
/// increasing nonces and signatures are never reusable.
pub struct Signer {
    nonce: AtomicU64,
}

impl Signer {
    pub fn new() -> Self {
        Self {
            nonce: AtomicU64::new(chrono::Utc::now().timestamp_millis() as u64),
        }
    }

    /// Next nonce: max(now_millis, last + 1).
    pub fn next_nonce(&self) -> u64 {
        let now = chrono::Utc::now().timestamp_millis() as u64;
        self.nonce
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now)
    }

    /// Sign `(method, path, nonce, body)`: the payload is digested with
    /// SHA-256, then the digest is authenticated with HMAC-SHA512 under the
    /// API secret. Hex-encoded.
    pub fn sign(
        &self,
        creds: &Credentials,
        method: &str,
        path: &str,
        nonce: u64,
        body: &str,
    ) -> String {
        let payload = format!("{}{}{}{}", method, path, nonce, body);
        let digest = Sha256::digest(payload.as_bytes());

        let mut mac = HmacSha512::new_from_slice(creds.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(&digest);
        hex::encode(mac.finalize().into_bytes())
    }
}

impl Default for Signer {
    fn default() -> Self {
        Self::new()
    }
}
