use chrono::Utc;

use super::{RawToken, TokenGenerator};
use crate::store::Store;
use crate::types::{Token, User};

#[derive(Debug, PartialEq, Eq)]
pub enum TokenValidationError {
    InvalidScheme,
    InvalidToken,
    TokenExpired,
    InternalError,
}

pub struct ValidatedToken {
    pub token: Token,
    pub user: Option<User>,
}

/// Extracts a token string from a Basic auth header.
/// Expects format: Basic base64(x-token:actual_token)
fn extract_basic_auth_token(encoded: &str) -> Option<String> {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    let decoded = STANDARD.decode(encoded).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (username, password) = credentials.split_once(':')?;

    (username == "x-token").then(|| password.to_string())
}

/// Extracts a raw token from an Authorization header (Bearer or Basic).
/// `Ok(None)` means no header was sent.
pub fn extract_token_from_header(
    auth_header: Option<&str>,
) -> Result<Option<RawToken>, TokenValidationError> {
    let Some(header) = auth_header else {
        return Ok(None);
    };

    let raw = if let Some(bearer) = header.strip_prefix("Bearer ") {
        bearer.trim().to_string()
    } else if let Some(basic) = header.strip_prefix("Basic ") {
        extract_basic_auth_token(basic.trim()).ok_or(TokenValidationError::InvalidToken)?
    } else {
        return Err(TokenValidationError::InvalidScheme);
    };

    raw.parse::<RawToken>()
        .map(Some)
        .map_err(|_| TokenValidationError::InvalidToken)
}

/// Validates a raw token against the store and resolves its user, if any.
pub fn validate_token(
    store: &dyn Store,
    raw: &RawToken,
) -> Result<ValidatedToken, TokenValidationError> {
    let token = store
        .get_token_by_lookup(raw.lookup())
        .map_err(|_| TokenValidationError::InternalError)?
        .ok_or(TokenValidationError::InvalidToken)?;

    let verified = TokenGenerator::new()
        .verify(raw, &token.token_hash)
        .map_err(|_| TokenValidationError::InternalError)?;
    if !verified {
        return Err(TokenValidationError::InvalidToken);
    }

    if token.expires_at.is_some_and(|exp| exp < Utc::now()) {
        return Err(TokenValidationError::TokenExpired);
    }

    let user = match &token.user_id {
        Some(user_id) => store
            .get_user(user_id)
            .map_err(|_| TokenValidationError::InternalError)?,
        None => None,
    };

    if let Err(e) = store.update_token_last_used(&token.id) {
        tracing::warn!("Failed to update token last_used_at: {e}");
    }

    Ok(ValidatedToken { token, user })
}
