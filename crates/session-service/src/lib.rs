//! Keygate session service.
//!
//! Issues refresh sessions, rotates refresh tokens with reuse detection,
//! and manages session lifecycle (logout, bulk logout, per-device
//! revocation) over a shared key-value store.
//!
//! The heart of the crate is [`rotation::RotationEngine`], a per-session
//! state machine (ACTIVE, GRACE, REVOKED) driven by presented refresh
//! tokens. Storage goes through the [`store::SessionStore`] trait so the
//! engine can run against Redis in production and an in-memory store in
//! tests.

pub mod config;
pub mod errors;
pub mod rotation;
pub mod routes;
pub mod store;
