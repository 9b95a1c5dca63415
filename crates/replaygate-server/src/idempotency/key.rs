//! Idempotency token validation and cache key construction.

use std::fmt;

use uuid::Uuid;

use super::error::TokenError;

/// Length of the hyphenated `8-4-4-4-12` UUID form.
const HYPHENATED_LEN: usize = 36;

/// A validated client-supplied idempotency token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdempotencyToken(Uuid);

impl IdempotencyToken {
    /// Validates a raw header value.
    ///
    /// Blank or longer than `max_len` characters is a length violation;
    /// anything that isn't a hyphenated UUID is a format violation.
    pub fn parse(raw: &str, max_len: usize) -> Result<Self, TokenError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || raw.chars().count() > max_len {
            return Err(TokenError::Length { max: max_len });
        }
        if trimmed.len() != HYPHENATED_LEN {
            return Err(TokenError::Format);
        }
        Uuid::try_parse(trimmed)
            .map(Self)
            .map_err(|_| TokenError::Format)
    }
}

impl fmt::Display for IdempotencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

/// Composite key: lowercased route path, token, body digest.
///
/// Two requests share a key iff they hit the same route (ignoring case) with
/// the same token and the same hashed body prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    route: String,
    token: IdempotencyToken,
    body_hash: String,
}

impl CacheKey {
    pub fn new(path: &str, token: &IdempotencyToken, body_hash: &str) -> Self {
        Self {
            route: path.to_lowercase(),
            token: *token,
            body_hash: body_hash.to_ascii_lowercase(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "idem:{}|{}|{}", self.route, self.token, self.body_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "3fa85f64-5717-4562-b3fc-2c963f66afa6";

    #[test]
    fn accepts_hyphenated_uuid() {
        let token = IdempotencyToken::parse(TOKEN, 128).unwrap();
        assert_eq!(token.to_string(), TOKEN);

        let upper = IdempotencyToken::parse(&TOKEN.to_uppercase(), 128).unwrap();
        assert_eq!(upper, token);
    }

    #[test]
    fn rejects_blank_and_too_long() {
        assert_eq!(
            IdempotencyToken::parse("   ", 128),
            Err(TokenError::Length { max: 128 })
        );
        assert_eq!(
            IdempotencyToken::parse(&"a".repeat(129), 128),
            Err(TokenError::Length { max: 128 })
        );
    }

    #[test]
    fn rejects_non_uuid_and_non_hyphenated_forms() {
        for raw in [
            "not-a-uuid",
            "3fa85f6457174562b3fc2c963f66afa6",
            "{3fa85f64-5717-4562-b3fc-2c963f66afa6}",
            "3fa85f64-5717-4562-b3fc-2c963f66afaz",
        ] {
            assert_eq!(
                IdempotencyToken::parse(raw, 128),
                Err(TokenError::Format),
                "{raw}"
            );
        }
    }

    #[test]
    fn key_normalizes_path_case() {
        let token = IdempotencyToken::parse(TOKEN, 128).unwrap();
        let a = CacheKey::new("/API/v1/Todos", &token, "ABCDEF");
        let b = CacheKey::new("/api/v1/todos", &token, "abcdef");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), format!("idem:/api/v1/todos|{TOKEN}|abcdef"));
    }

    #[test]
    fn key_components_distinguish_requests() {
        let token = IdempotencyToken::parse(TOKEN, 128).unwrap();
        let other = IdempotencyToken::parse("7c9e6679-7425-40de-944b-e07fc1f90ae7", 128).unwrap();
        let base = CacheKey::new("/todos", &token, "aa");
        assert_ne!(base, CacheKey::new("/orders", &token, "aa"));
        assert_ne!(base, CacheKey::new("/todos", &other, "aa"));
        assert_ne!(base, CacheKey::new("/todos", &token, "bb"));
    }
}
