//! Password hashing and session tokens for the HTTP surface.
//!
//! Passwords are bcrypt-hashed. Session tokens are HMAC-SHA256 based,
//! scoped to a (user_id, expiry) pair.
//! Format: `abacus_st_<user_id>_<expires_unix>_<hmac_hex>`

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Token prefix used to identify abacus session tokens.
const TOKEN_PREFIX: &str = "abacus_st_";

/// Session lifetime in seconds.
pub const SESSION_TTL_SECS: i64 = 24 * 60 * 60;

/// Errors that can occur during auth operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid token format: {0}")]
    InvalidFormat(String),

    #[error("token HMAC verification failed")]
    HmacMismatch,

    #[error("token expired")]
    Expired,

    #[error("missing auth secret")]
    MissingSecret,

    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

/// Configuration for token signing and validation.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// The HMAC secret key bytes.
    pub secret: Vec<u8>,
}

impl AuthConfig {
    /// Create a new AuthConfig with the given secret.
    pub fn new(secret: Vec<u8>) -> Self {
        Self { secret }
    }

    /// Create an AuthConfig from the `ABACUS_AUTH_SECRET` environment
    /// variable. The value must be hex-encoded (as written by
    /// `abacus init`).
    pub fn from_env() -> Result<Self, AuthError> {
        let secret_hex =
            std::env::var("ABACUS_AUTH_SECRET").map_err(|_| AuthError::MissingSecret)?;
        let secret = hex::decode(&secret_hex).map_err(|e| {
            AuthError::InvalidFormat(format!("ABACUS_AUTH_SECRET is not valid hex: {e}"))
        })?;
        Ok(Self::new(secret))
    }
}

/// Claims extracted from a validated session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionClaims {
    /// The authenticated user.
    pub user_id: i64,
    /// Expiry as a unix timestamp.
    pub expires_at: i64,
}

/// Hash a password for storage.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    Ok(bcrypt::hash(password, bcrypt::DEFAULT_COST)?)
}

/// Verify a password against a stored hash. Malformed hashes verify as
/// false rather than erroring.
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// Issue a session token for a user.
///
/// The HMAC-SHA256 is computed over `<user_id>:<expires_unix>`.
pub fn issue_session_token(config: &AuthConfig, user_id: i64, now: DateTime<Utc>) -> String {
    let expires_at = now.timestamp() + SESSION_TTL_SECS;
    let message = format!("{user_id}:{expires_at}");
    let mac = compute_hmac(&config.secret, message.as_bytes());
    let hmac_hex = hex::encode(mac);
    format!("{TOKEN_PREFIX}{user_id}_{expires_at}_{hmac_hex}")
}

/// Validate a session token and extract its claims.
///
/// Parses the format, recomputes the HMAC with constant-time comparison,
/// then checks expiry.
pub fn validate_session_token(
    config: &AuthConfig,
    token: &str,
    now: DateTime<Utc>,
) -> Result<SessionClaims, AuthError> {
    let rest = token.strip_prefix(TOKEN_PREFIX).ok_or_else(|| {
        AuthError::InvalidFormat(format!("token must start with {TOKEN_PREFIX:?}"))
    })?;

    // <user_id>_<expires_unix>_<hmac_hex>
    let mut parts = rest.splitn(3, '_');
    let (user_id_str, expires_str, hmac_hex) = match (parts.next(), parts.next(), parts.next()) {
        (Some(u), Some(e), Some(h)) => (u, e, h),
        _ => {
            return Err(AuthError::InvalidFormat(
                "expected <user_id>_<expires>_<hmac>".to_owned(),
            ));
        }
    };

    let user_id: i64 = user_id_str
        .parse()
        .map_err(|_| AuthError::InvalidFormat(format!("invalid user id {user_id_str:?}")))?;
    let expires_at: i64 = expires_str
        .parse()
        .map_err(|_| AuthError::InvalidFormat(format!("invalid expiry {expires_str:?}")))?;

    let provided_mac = hex::decode(hmac_hex)
        .map_err(|e| AuthError::InvalidFormat(format!("invalid hex in hmac: {e}")))?;

    let message = format!("{user_id}:{expires_at}");
    verify_hmac_constant_time(&config.secret, message.as_bytes(), &provided_mac)?;

    if expires_at <= now.timestamp() {
        return Err(AuthError::Expired);
    }

    Ok(SessionClaims {
        user_id,
        expires_at,
    })
}

/// Compute HMAC-SHA256 over the given message with the given key.
fn compute_hmac(key: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

/// Verify HMAC using the `hmac` crate's constant-time `verify_slice`.
fn verify_hmac_constant_time(
    key: &[u8],
    message: &[u8],
    expected_mac: &[u8],
) -> Result<(), AuthError> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(message);
    mac.verify_slice(expected_mac)
        .map_err(|_| AuthError::HmacMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_config() -> AuthConfig {
        AuthConfig::new(b"test-secret-key-for-abacus".to_vec())
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn issue_and_validate_roundtrip() {
        let config = test_config();
        let now = fixed_now();

        let token = issue_session_token(&config, 42, now);
        assert!(token.starts_with("abacus_st_42_"));

        let claims = validate_session_token(&config, &token, now).unwrap();
        assert_eq!(claims.user_id, 42);
        assert_eq!(claims.expires_at, now.timestamp() + SESSION_TTL_SECS);
    }

    #[test]
    fn token_expires() {
        let config = test_config();
        let now = fixed_now();
        let token = issue_session_token(&config, 7, now);

        let later = now + chrono::Duration::seconds(SESSION_TTL_SECS + 1);
        let result = validate_session_token(&config, &token, later);
        assert!(matches!(result.unwrap_err(), AuthError::Expired));
    }

    #[test]
    fn token_valid_just_before_expiry() {
        let config = test_config();
        let now = fixed_now();
        let token = issue_session_token(&config, 7, now);

        let almost = now + chrono::Duration::seconds(SESSION_TTL_SECS - 1);
        assert!(validate_session_token(&config, &token, almost).is_ok());
    }

    #[test]
    fn reject_tampered_hmac() {
        let config = test_config();
        let token = issue_session_token(&config, 1, fixed_now());

        let mut tampered = token.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == 'a' { 'b' } else { 'a' });

        let result = validate_session_token(&config, &tampered, fixed_now());
        assert!(matches!(result.unwrap_err(), AuthError::HmacMismatch));
    }

    #[test]
    fn reject_tampered_user_id() {
        let config = test_config();
        let token = issue_session_token(&config, 1, fixed_now());
        let tampered = token.replacen("abacus_st_1_", "abacus_st_2_", 1);

        let result = validate_session_token(&config, &tampered, fixed_now());
        assert!(matches!(result.unwrap_err(), AuthError::HmacMismatch));
    }

    #[test]
    fn reject_wrong_secret() {
        let config = test_config();
        let token = issue_session_token(&config, 1, fixed_now());

        let other = AuthConfig::new(b"a-different-secret".to_vec());
        let result = validate_session_token(&other, &token, fixed_now());
        assert!(matches!(result.unwrap_err(), AuthError::HmacMismatch));
    }

    #[test]
    fn reject_malformed_tokens() {
        let config = test_config();
        for bad in ["", "abacus_st_", "abacus_st_xyz", "wrong_prefix_1_2_ff"] {
            let result = validate_session_token(&config, bad, fixed_now());
            assert!(
                matches!(result, Err(AuthError::InvalidFormat(_))),
                "expected InvalidFormat for {bad:?}"
            );
        }
    }

    #[test]
    fn password_hash_verifies() {
        let hash = hash_password("hunter2").unwrap();
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
    }

    #[test]
    fn malformed_hash_verifies_false() {
        assert!(!verify_password("anything", "not-a-bcrypt-hash"));
    }
}
