//! 64-bit hash token.

use crate::token::traits::Token;
use siphasher::sip::SipHasher13;
use std::hash::Hasher;

/// Ring token backed by a 64-bit SipHash-1-3 digest.
///
/// The hasher uses fixed zero keys so every node computes the same token for
/// the same bytes; ownership must not depend on process-local randomness.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct HashToken(pub u64);

impl Token for HashToken {
    fn zero() -> Self {
        HashToken(0)
    }

    fn max() -> Self {
        HashToken(u64::MAX)
    }

    fn distance_to(&self, other: &Self) -> Self {
        HashToken(other.0.wrapping_sub(self.0))
    }
}

impl HashToken {
    /// Creates a token from a byte slice.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = SipHasher13::new();
        hasher.write(data);
        HashToken(hasher.finish())
    }

    /// Creates a token from a string key.
    pub fn from_key(key: &str) -> Self {
        Self::from_bytes(key.as_bytes())
    }
}
