//! A2A (Agent-to-Agent) task coordination.
//!
//! - Task ledger: lifecycle state machine over a pluggable [`ledger::TaskStore`]
//! - Event bus: publish/subscribe with a bounded `Last-Event-ID` replay window
//! - Admission control: per-client, per-endpoint token buckets
//! - HTTP gateway (axum) exposing all three

pub mod types;
pub mod error;
pub mod lifecycle;
pub mod ledger;
pub mod events;
pub mod stream;
pub mod rate_limit;
pub mod validation;
pub mod agent_card;
pub mod handler;
pub mod server;
