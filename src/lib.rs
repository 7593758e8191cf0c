//! graphwarden - social graph crawl and moderation workers.
//!
//! Workers coordinate only through a shared key-value store (Redis in
//! production): a three-lane priority queue, TTL caches for dedup and
//! friend-count change detection, and per-worker heartbeats.

// Domain enums expose `from_str` returning Option, not the FromStr trait.
#![allow(clippy::should_implement_trait)]

pub mod cache;
pub mod classifier;
pub mod config;
pub mod gate;
pub mod models;
pub mod platform;
pub mod queue;
pub mod repository;
pub mod status;
pub mod store;
pub mod worker;

#[cfg(test)]
mod test_support;
