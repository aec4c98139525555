//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Use these types
//! for all sensitive values: store URLs with embedded credentials, signing
//! key material, and refresh tokens held outside of request scope.
//!
//! `SecretBox<T>` and `SecretString` implement `Debug` with redaction, so any
//! struct that derives `Debug` while containing a secret gets safe logging
//! behavior automatically. Secrets are zeroized on drop.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct StoreConfig {
//!     url: SecretString, // Debug shows "[REDACTED]"
//! }
//!
//! let cfg = StoreConfig {
//!     url: SecretString::from("redis://:hunter2@localhost:6379"),
//! };
//! assert!(!format!("{cfg:?}").contains("hunter2"));
//! let _plain: &str = cfg.url.expose_secret();
//! ```

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretBox, SecretString};
