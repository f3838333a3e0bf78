//! Hash chain engine
//!
//! Each entry is authenticated with HMAC-SHA256 over its canonical encoding
//! (own `hash` field excluded, `prevHash` included). Without the key an
//! attacker who can edit the file cannot forge a valid chain.

use super::canonical::canonical_json;
use super::entry::HASH_FIELD;
use super::{AuditError, Result};
use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Length of a hex-encoded HMAC-SHA256 digest
pub const HASH_HEX_LEN: usize = 64;

/// Secret used to key the hash chain
#[derive(Clone)]
pub struct IntegrityKey(Zeroizing<Vec<u8>>);

impl IntegrityKey {
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        Self(Zeroizing::new(key.as_ref().to_vec()))
    }

    /// Build a key from configuration, treating an empty secret as "no key"
    pub fn from_config(secret: Option<&str>) -> Option<Self> {
        secret.filter(|s| !s.is_empty()).map(Self::new)
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for IntegrityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("IntegrityKey([REDACTED])")
    }
}

/// Compute the chain hash of `entry`, ignoring any `hash` field it carries.
pub fn compute_hash(entry: &Map<String, Value>, key: &IntegrityKey) -> Result<String> {
    let mut unsigned = entry.clone();
    unsigned.remove(HASH_FIELD);
    let canonical = canonical_json(&Value::Object(unsigned));

    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| AuditError::config(format!("HMAC initialization failed: {}", e)))?;
    mac.update(canonical.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Compare two hex hashes in constant time
pub(crate) fn hashes_match(expected: &str, actual: &str) -> bool {
    expected.len() == actual.len() && bool::from(expected.as_bytes().ct_eq(actual.as_bytes()))
}
