//! JWT claims and the signing/verification capability shared by Keygate
//! services.
//!
//! The gateway and the session service never implement signature algorithms
//! themselves; they consume a [`TokenVault`] that signs and verifies EdDSA
//! (Ed25519) tokens via `jsonwebtoken`, with key material generated by
//! `ring`. Two token kinds exist, distinguished by the `typ` claim:
//!
//! - **access** — short-lived, carries only `sub`
//! - **refresh** — long-lived, carries `sub`, `jti`, `sid`
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Only EdDSA (Ed25519) is accepted
//! - Error messages are generic to prevent information leakage; detail is
//!   logged at debug level
//! - The `sub` field is redacted in Debug output

use base64::{engine::general_purpose::STANDARD, Engine as _};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// Tokens larger than this are rejected before any base64 decode or
/// signature verification. Typical tokens are 300-500 bytes.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Clock skew tolerance applied to `exp` during verification (seconds).
pub const VERIFY_LEEWAY_SECONDS: u64 = 60;

/// `typ` claim value for access tokens.
pub const TOKEN_TYPE_ACCESS: &str = "access";

/// `typ` claim value for refresh tokens.
pub const TOKEN_TYPE_REFRESH: &str = "refresh";

// =============================================================================
// Error Types
// =============================================================================

/// Errors from the token capability.
///
/// Verification failures collapse into a single generic variant so callers
/// cannot distinguish "bad signature" from "expired" from "wrong type".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtError {
    /// Any verification failure: malformed, oversized, expired, bad
    /// signature, or wrong token type.
    #[error("The token is invalid or expired")]
    InvalidToken,

    /// Key material could not be parsed or generated.
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    /// Signing operation failed.
    #[error("Token signing failed: {0}")]
    Signing(String),
}

// =============================================================================
// Claims Types
// =============================================================================

/// Claims carried by an access token.
#[derive(Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user identifier) - redacted in Debug output.
    pub sub: String,
    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,
    /// Issued-at timestamp (Unix epoch seconds).
    pub iat: i64,
    /// Token type discriminator, always [`TOKEN_TYPE_ACCESS`].
    pub typ: String,
}

impl fmt::Debug for AccessClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessClaims")
            .field("sub", &"[REDACTED]")
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .field("typ", &self.typ)
            .finish()
    }
}

/// Claims carried by a refresh token.
///
/// `jti` identifies the specific issuance and `sid` ties the token to a
/// session family; together they drive rotation and reuse detection.
#[derive(Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// Subject (user identifier) - redacted in Debug output.
    pub sub: String,
    /// Unique id of this issuance.
    pub jti: String,
    /// Session id (one per device/login).
    pub sid: String,
    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,
    /// Issued-at timestamp (Unix epoch seconds).
    pub iat: i64,
    /// Token type discriminator, always [`TOKEN_TYPE_REFRESH`].
    pub typ: String,
}

impl fmt::Debug for RefreshClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshClaims")
            .field("sub", &"[REDACTED]")
            .field("jti", &self.jti)
            .field("sid", &self.sid)
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .field("typ", &self.typ)
            .finish()
    }
}

// =============================================================================
// Key Generation
// =============================================================================

/// Generate an EdDSA (Ed25519) signing keypair using a CSPRNG.
///
/// Returns the PKCS8 document containing the private key; the public key is
/// derived from it when constructing a [`TokenVault`].
///
/// # Errors
///
/// Returns `JwtError::InvalidKey` if the system RNG fails.
pub fn generate_signing_key() -> Result<Vec<u8>, JwtError> {
    let rng = SystemRandom::new();
    let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
        .map_err(|e| JwtError::InvalidKey(format!("keypair generation failed: {e}")))?;
    Ok(pkcs8.as_ref().to_vec())
}

/// Decode a base64-encoded PKCS8 signing key (the on-disk / env format).
///
/// # Errors
///
/// Returns `JwtError::InvalidKey` if the base64 is malformed.
pub fn decode_signing_key_base64(encoded: &str) -> Result<Vec<u8>, JwtError> {
    STANDARD
        .decode(encoded)
        .map_err(|e| JwtError::InvalidKey(format!("base64 decode failed: {e}")))
}

// =============================================================================
// TokenVault
// =============================================================================

/// Signs and verifies access and refresh tokens with a single Ed25519 key.
///
/// Construct once at startup from config and share by reference; all
/// methods take `&self` and the underlying keys are immutable.
pub struct TokenVault {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    access_ttl_secs: i64,
    refresh_ttl_secs: i64,
}

impl fmt::Debug for TokenVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenVault")
            .field("encoding", &"[REDACTED]")
            .field("decoding", &"[REDACTED]")
            .field("issuer", &self.issuer)
            .field("access_ttl_secs", &self.access_ttl_secs)
            .field("refresh_ttl_secs", &self.refresh_ttl_secs)
            .finish()
    }
}

impl TokenVault {
    /// Build a vault from a PKCS8 Ed25519 private key document.
    ///
    /// # Errors
    ///
    /// Returns `JwtError::InvalidKey` if the key material does not parse.
    pub fn from_pkcs8(
        pkcs8: &[u8],
        issuer: String,
        access_ttl_secs: i64,
        refresh_ttl_secs: i64,
    ) -> Result<Self, JwtError> {
        let key_pair = Ed25519KeyPair::from_pkcs8(pkcs8)
            .map_err(|e| JwtError::InvalidKey(format!("keypair parsing failed: {e}")))?;
        let public_key = key_pair.public_key().as_ref().to_vec();

        Ok(Self {
            encoding: EncodingKey::from_ed_der(pkcs8),
            decoding: DecodingKey::from_ed_der(&public_key),
            issuer,
            access_ttl_secs,
            refresh_ttl_secs,
        })
    }

    /// Refresh token lifetime in seconds (also the full session TTL).
    #[must_use]
    pub fn refresh_ttl_secs(&self) -> i64 {
        self.refresh_ttl_secs
    }

    /// Sign an access token for `sub`.
    ///
    /// # Errors
    ///
    /// Returns `JwtError::Signing` if encoding fails.
    pub fn sign_access(&self, sub: &str) -> Result<String, JwtError> {
        let now = chrono::Utc::now().timestamp();
        let claims = AccessClaims {
            sub: sub.to_string(),
            exp: now + self.access_ttl_secs,
            iat: now,
            typ: TOKEN_TYPE_ACCESS.to_string(),
        };
        self.sign(&claims)
    }

    /// Sign a refresh token binding `sub`, `jti`, and `sid`.
    ///
    /// # Errors
    ///
    /// Returns `JwtError::Signing` if encoding fails.
    pub fn sign_refresh(&self, sub: &str, jti: &str, sid: &str) -> Result<String, JwtError> {
        let now = chrono::Utc::now().timestamp();
        let claims = RefreshClaims {
            sub: sub.to_string(),
            jti: jti.to_string(),
            sid: sid.to_string(),
            exp: now + self.refresh_ttl_secs,
            iat: now,
            typ: TOKEN_TYPE_REFRESH.to_string(),
        };
        self.sign(&claims)
    }

    /// Verify an access token, returning its claims.
    ///
    /// # Errors
    ///
    /// Returns `JwtError::InvalidToken` on any verification failure.
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, JwtError> {
        let claims: AccessClaims = self.verify(token)?;
        if claims.typ != TOKEN_TYPE_ACCESS {
            tracing::debug!(target: "common.jwt", typ = %claims.typ, "Token rejected: wrong type");
            return Err(JwtError::InvalidToken);
        }
        Ok(claims)
    }

    /// Verify a refresh token, returning its claims.
    ///
    /// # Errors
    ///
    /// Returns `JwtError::InvalidToken` on any verification failure.
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, JwtError> {
        let claims: RefreshClaims = self.verify(token)?;
        if claims.typ != TOKEN_TYPE_REFRESH {
            tracing::debug!(target: "common.jwt", typ = %claims.typ, "Token rejected: wrong type");
            return Err(JwtError::InvalidToken);
        }
        Ok(claims)
    }

    // Issuer is attached at sign time so Validation::set_issuer can check it
    // without the typed claims carrying `iss` in their public shape.
    fn sign<C: Serialize>(&self, claims: &C) -> Result<String, JwtError> {
        #[derive(Serialize)]
        struct WithIssuer<'a, C: Serialize> {
            #[serde(flatten)]
            claims: &'a C,
            iss: &'a str,
        }

        let mut header = Header::new(Algorithm::EdDSA);
        header.typ = Some("JWT".to_string());
        let wrapped = WithIssuer {
            claims,
            iss: &self.issuer,
        };
        encode(&header, &wrapped, &self.encoding)
            .map_err(|e| JwtError::Signing(format!("JWT encoding failed: {e}")))
    }

    fn verify<C: serde::de::DeserializeOwned>(&self, token: &str) -> Result<C, JwtError> {
        // Size check before any parsing or cryptographic work.
        if token.len() > MAX_JWT_SIZE_BYTES {
            tracing::debug!(
                target: "common.jwt",
                token_size = token.len(),
                max_size = MAX_JWT_SIZE_BYTES,
                "Token rejected: size exceeds maximum allowed"
            );
            return Err(JwtError::InvalidToken);
        }

        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.leeway = VERIFY_LEEWAY_SECONDS;
        validation.set_issuer(&[&self.issuer]);
        validation.validate_aud = false;

        let data = decode::<C>(token, &self.decoding, &validation).map_err(|e| {
            tracing::debug!(target: "common.jwt", error = %e, "Token verification failed");
            JwtError::InvalidToken
        })?;
        Ok(data.claims)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn test_vault() -> TokenVault {
        let pkcs8 = generate_signing_key().unwrap();
        TokenVault::from_pkcs8(&pkcs8, "keygate-test".to_string(), 900, 1_209_600).unwrap()
    }

    #[test]
    fn test_generate_and_parse_keypair() {
        let pkcs8 = generate_signing_key().unwrap();
        assert!(!pkcs8.is_empty());
        let vault = TokenVault::from_pkcs8(&pkcs8, "iss".to_string(), 60, 120);
        assert!(vault.is_ok());
    }

    #[test]
    fn test_from_pkcs8_rejects_garbage() {
        let result = TokenVault::from_pkcs8(&[0u8; 16], "iss".to_string(), 60, 120);
        assert!(matches!(result, Err(JwtError::InvalidKey(_))));
    }

    #[test]
    fn test_decode_signing_key_base64_roundtrip() {
        let pkcs8 = generate_signing_key().unwrap();
        let encoded = STANDARD.encode(&pkcs8);
        let decoded = decode_signing_key_base64(&encoded).unwrap();
        assert_eq!(decoded, pkcs8);
    }

    #[test]
    fn test_decode_signing_key_base64_invalid() {
        let result = decode_signing_key_base64("!!!not-base64!!!");
        assert!(matches!(result, Err(JwtError::InvalidKey(_))));
    }

    #[test]
    fn test_access_token_roundtrip() {
        let vault = test_vault();
        let token = vault.sign_access("user-1").unwrap();
        let claims = vault.verify_access(&token).unwrap();

        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.typ, TOKEN_TYPE_ACCESS);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_refresh_token_roundtrip() {
        let vault = test_vault();
        let token = vault.sign_refresh("user-1", "jti-1", "sid-1").unwrap();
        let claims = vault.verify_refresh(&token).unwrap();

        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.jti, "jti-1");
        assert_eq!(claims.sid, "sid-1");
        assert_eq!(claims.typ, TOKEN_TYPE_REFRESH);
    }

    #[test]
    fn test_access_token_rejected_as_refresh() {
        let vault = test_vault();
        let token = vault.sign_access("user-1").unwrap();
        assert!(matches!(
            vault.verify_refresh(&token),
            Err(JwtError::InvalidToken)
        ));
    }

    #[test]
    fn test_refresh_token_rejected_as_access() {
        let vault = test_vault();
        let token = vault.sign_refresh("user-1", "jti-1", "sid-1").unwrap();
        assert!(matches!(
            vault.verify_access(&token),
            Err(JwtError::InvalidToken)
        ));
    }

    #[test]
    fn test_verify_rejects_token_from_other_key() {
        let vault_a = test_vault();
        let vault_b = test_vault();

        let token = vault_a.sign_refresh("user-1", "jti-1", "sid-1").unwrap();
        assert!(matches!(
            vault_b.verify_refresh(&token),
            Err(JwtError::InvalidToken)
        ));
    }

    #[test]
    fn test_verify_rejects_oversized_token() {
        let vault = test_vault();
        let oversized = "a".repeat(MAX_JWT_SIZE_BYTES + 1);
        assert!(matches!(
            vault.verify_refresh(&oversized),
            Err(JwtError::InvalidToken)
        ));
    }

    #[test]
    fn test_verify_rejects_malformed_token() {
        let vault = test_vault();
        assert!(matches!(
            vault.verify_refresh("not-a-jwt"),
            Err(JwtError::InvalidToken)
        ));
    }

    #[test]
    fn test_claims_debug_redacts_sub() {
        let claims = RefreshClaims {
            sub: "secret-user-id".to_string(),
            jti: "jti-1".to_string(),
            sid: "sid-1".to_string(),
            exp: 2_000_000_000,
            iat: 1_000_000_000,
            typ: TOKEN_TYPE_REFRESH.to_string(),
        };

        let debug_str = format!("{claims:?}");
        assert!(!debug_str.contains("secret-user-id"));
        assert!(debug_str.contains("[REDACTED]"));
    }

    #[test]
    fn test_vault_debug_redacts_keys() {
        let vault = test_vault();
        let debug_str = format!("{vault:?}");
        assert!(debug_str.contains("[REDACTED]"));
        assert!(debug_str.contains("keygate-test"));
    }

    #[test]
    fn test_expired_token_rejected() {
        let pkcs8 = generate_signing_key().unwrap();
        // Negative TTL puts exp in the past, beyond the 60s leeway.
        let vault =
            TokenVault::from_pkcs8(&pkcs8, "keygate-test".to_string(), -3600, -3600).unwrap();
        let token = vault.sign_refresh("user-1", "jti-1", "sid-1").unwrap();
        assert!(matches!(
            vault.verify_refresh(&token),
            Err(JwtError::InvalidToken)
        ));
    }
}
