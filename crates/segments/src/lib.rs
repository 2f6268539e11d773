//! # Segment oracle
//!
//! Answers "is this user (or browser) in segment X" for campaign targeting.
//!
//! - [`SegmentProvider`] is the capability every membership source
//!   implements; [`RemoteSegmentProvider`] talks HTTP,
//!   [`StaticSegmentProvider`] answers from a fixed table.
//! - [`SegmentOracle`] dispatches by the provider key stored on each campaign
//!   segment, guards providers with circuit breakers and timeouts, and keeps
//!   server-side [`BloomFilter`]s of large segments populated in the
//!   background.
//! - [`SegmentSession`] wraps one request and round-trips the client's
//!   opaque cache blob so repeat visitors skip provider calls entirely.
//!
//! Unknown provider keys are errors, never a silent `false`.
mod bloom;
mod breaker;
mod config;
mod error;
mod oracle;
mod provider;
mod remote;
mod session;

pub use crate::bloom::BloomFilter;
pub use crate::breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};
pub use crate::config::{RemoteProviderConfig, SegmentConfig, StaticProviderConfig};
pub use crate::error::SegmentError;
pub use crate::oracle::SegmentOracle;
pub use crate::provider::{SegmentInfo, SegmentProvider, StaticSegment, StaticSegmentProvider};
pub use crate::remote::{RemoteSegmentProvider, REMOTE_PROVIDER};
pub use crate::session::{ClientCacheEntry, Scope, SegmentSession};

// Re-exported so downstream crates can implement `SegmentProvider`.
pub use async_trait::async_trait;
