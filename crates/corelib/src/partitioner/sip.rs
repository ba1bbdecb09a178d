//! SipHash partitioner implementation.

use crate::partitioner::traits::Partitioner;
use crate::token::HashToken;

/// Partitioner hashing key bytes with SipHash-1-3.
#[derive(Clone, Copy, Debug, Default)]
pub struct SipPartitioner;

impl Partitioner for SipPartitioner {
    type TokenType = HashToken;

    fn partition(&self, key: &[u8]) -> Self::TokenType {
        HashToken::from_bytes(key)
    }

    fn name(&self) -> &'static str {
        "SipPartitioner"
    }
}
