//! Access-token validation for the upgrade handshake.
//!
//! Tokens are HS256 JWTs minted by the auth subsystem and carried in the
//! `access_token` cookie. Refresh tokens are valid signatures too but must
//! never open a connection.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::utils::FanoutError;

/// Claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub user_id: String,
    #[serde(default)]
    pub is_refresh: bool,
    pub exp: usize,
}

/// Validate a token's signature and expiry against the configured secret.
pub fn validate_token(secret: &str, token: &str) -> Result<TokenClaims, FanoutError> {
    let data = decode::<TokenClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| FanoutError::InvalidToken(e.to_string()))?;
    Ok(data.claims)
}

/// Sign a token. Issuing real tokens is the auth subsystem's job; this
/// exists for the smoke-test client and the test suite.
pub fn sign_token(
    secret: &str,
    user_id: &str,
    is_refresh: bool,
    ttl: chrono::Duration,
) -> Result<String, FanoutError> {
    let claims = TokenClaims {
        user_id: user_id.to_string(),
        is_refresh,
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| FanoutError::Internal(format!("failed to sign token: {e}")))
}

/// Extract the access token from a `Cookie` request header.
pub fn token_from_cookies(header: &str) -> Option<&str> {
    header
        .split(';')
        .map(str::trim)
        .find_map(|pair| pair.strip_prefix("access_token="))
        .filter(|token| !token.is_empty())
}
