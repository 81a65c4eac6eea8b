//! Identity digests
//!
//! A re-probe of a configured device compares a digest of the identity text
//! taken before the probe with one computed from the fresh IDENTIFY data.
//! A mismatch means a different physical device now sits at the address.
//!
//! # Usage
//!
//! ```
//! use protocol::integrity::IdentityDigest;
//!
//! let before = IdentityDigest::of("WDC WD10EZEX", "01.01A01", "WD-WCC3F1234567");
//! let after = IdentityDigest::of("WDC WD10EZEX", "01.01A01", "WD-WCC3F7654321");
//! assert_ne!(before, after);
//! ```

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

/// Digest over the model, revision and serial text of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityDigest(pub u32);

impl IdentityDigest {
    /// Digest the three identity fields
    ///
    /// Each field is followed by its length so that text moving between
    /// adjacent fields changes the digest.
    pub fn of(model: &str, revision: &str, serial: &str) -> Self {
        let mut hasher = Hasher::new();
        for field in [model, revision, serial] {
            hasher.update(field.as_bytes());
            hasher.update(&(field.len() as u32).to_le_bytes());
        }
        Self(hasher.finalize())
    }
}

impl std::fmt::Display for IdentityDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}
