//! Event gateway.
//!
//! Accepts batches of marketing events over HTTP, validates them, and
//! publishes each one to a NATS JetStream stream with message-id
//! deduplication. Per-event publish failures are isolated and summarized in
//! the batch result.

pub mod broker;
pub mod config;
pub mod event;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod pipeline;
pub mod utils;
pub mod validation;
