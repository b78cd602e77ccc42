use std::fmt;

use sha2::{Digest, Sha256};

/// A 128-bit content fingerprint.
///
/// Equality is bitwise. The all-zero value is distinguished: it means
/// "no content" and is never produced for actual data.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash(pub [u8; 16]);

impl ContentHash {
    pub const ZERO: ContentHash = ContentHash([0; 16]);

    /// Fingerprints a byte blob (SHA-256, truncated to 128 bits).
    pub fn of(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut bytes = [0; 16];
        bytes.copy_from_slice(&digest[..16]);
        ContentHash(bytes)
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// The upper 64 bits, used for slot selection in hash-indexed tables.
    pub fn hi(&self) -> u64 {
        let mut word = [0; 8];
        word.copy_from_slice(&self.0[8..]);
        u64::from_le_bytes(word)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({self})")
    }
}
