//! A2A Gateway: agent-to-agent task coordination.
//!
//! Tracks delegated tasks through their lifecycle, broadcasts lifecycle
//! events with `Last-Event-ID` replay, and meters every client with
//! per-endpoint token buckets.

pub mod a2a;
pub mod config;
pub mod logging;

/// Crate version, reported by the Agent Card and health check.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests;
