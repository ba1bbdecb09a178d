//! Token abstraction module for consistent hashing.
//!
//! Tokens represent positions on the hash ring and must be comparable,
//! hashable, and thread-safe.

pub mod hash;
pub mod traits;

pub use hash::HashToken;
pub use traits::Token;
