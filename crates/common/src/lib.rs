//! Common utilities and types shared across Keygate components.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT claims, signing, and verification (the token capability)
pub mod jwt;
