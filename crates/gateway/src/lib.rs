//! Keygate gateway: resilient invocation layer for the credential
//! authority.
//!
//! Every logical upstream call flows through three guards, in order:
//!
//! 1. [`breaker::CircuitBreaker`] - fast-fails while the upstream is
//!    known to be struggling
//! 2. [`bulkhead::Bulkhead`] - bounds in-flight calls and queue depth
//! 3. [`retry::RetryPolicy`] - retries idempotent attempts with
//!    exponential backoff and jitter
//!
//! [`upstream::UpstreamClient`] wires the three together and exposes one
//! method per upstream endpoint.

pub mod breaker;
pub mod bulkhead;
pub mod config;
pub mod errors;
pub mod retry;
pub mod upstream;
