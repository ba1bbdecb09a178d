//! CLI for the replicated cache.
//!
//! Provides commands for:
//! - Inspecting key ownership on a ring
//! - Running puts against an in-process cluster under node churn

pub mod commands;
pub mod config;

pub use commands::{Command, CommandResult};
pub use config::CliConfig;
