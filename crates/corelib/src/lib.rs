//! Core library for consistent hashing.
//!
//! This crate provides the placement primitives the cache is built on:
//! - Token types and the partitioner that maps keys to tokens
//! - Node and virtual node abstractions
//! - The hash ring and its builder
//! - Topology versions and per-key owner sets

pub mod error;
pub mod node;
pub mod partitioner;
pub mod ring;
pub mod token;
pub mod topology;
pub mod vnode;

pub use error::{Error, Result};
pub use node::{Node, NodeId};
pub use partitioner::Partitioner;
pub use ring::{HashRing, Ring, RingBuilder};
pub use token::Token;
pub use topology::{Owners, TopologyVersion};
pub use vnode::VirtualNode;
