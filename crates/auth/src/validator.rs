use tollgate_config::constants::JWT_FRESHNESS_WINDOW;

use crate::secret::{Claims, JwtSecret};

/// Why a bearer token was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing auth header")]
    MissingHeader,

    #[error("missing jwt token")]
    MissingToken,

    #[error("invalid jwt signature")]
    InvalidSignature,

    /// The token could not be decoded: bad encoding, foreign algorithm, or an
    /// `exp`/`nbf` claim that rules it out.
    #[error("invalid jwt token: {0}")]
    InvalidToken(String),

    #[error("stale jwt token")]
    StaleToken,
}

/// Validate an `Authorization` header value (`<scheme> <token>`) against
/// `secret` at wall-clock time `now_ms`.
///
/// The scheme word is not inspected. A token without `iat` counts as issued
/// at the epoch, so it is always stale.
pub fn validate_bearer(
    header: Option<&str>,
    secret: &JwtSecret,
    now_ms: u64,
) -> Result<Claims, AuthError> {
    let header = header
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or(AuthError::MissingHeader)?;
    let token = header
        .split_whitespace()
        .nth(1)
        .ok_or(AuthError::MissingToken)?;

    let claims = secret.decode(token)?;

    let drift_ms = (now_ms as f64 - claims.issued_at_ms()).abs();
    if drift_ms > JWT_FRESHNESS_WINDOW.as_millis() as f64 {
        return Err(AuthError::StaleToken);
    }
    Ok(claims)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const IAT: u64 = 1_700_000_000;
    const IAT_MS: u64 = IAT * 1000;

    fn bearer(secret: &JwtSecret, claims: &Claims) -> String {
        format!("Bearer {}", secret.encode(claims).unwrap())
    }

    #[test]
    fn missing_or_blank_header() {
        let secret = JwtSecret::random();
        assert_eq!(
            validate_bearer(None, &secret, IAT_MS),
            Err(AuthError::MissingHeader)
        );
        assert_eq!(
            validate_bearer(Some("  "), &secret, IAT_MS),
            Err(AuthError::MissingHeader)
        );
    }

    #[test]
    fn scheme_without_token() {
        let secret = JwtSecret::random();
        for header in ["Bearer", "Bearer   ", " token-only "] {
            assert_eq!(
                validate_bearer(Some(header), &secret, IAT_MS),
                Err(AuthError::MissingToken),
                "{header:?}"
            );
        }
    }

    #[test]
    fn foreign_secret_is_invalid_signature() {
        let ours = JwtSecret::random();
        let theirs = JwtSecret::random();
        let header = bearer(&theirs, &Claims::issued_at(IAT));
        assert_eq!(
            validate_bearer(Some(&header), &ours, IAT_MS),
            Err(AuthError::InvalidSignature)
        );
    }

    #[test]
    fn garbage_token_is_invalid() {
        let secret = JwtSecret::random();
        assert!(matches!(
            validate_bearer(Some("Bearer not.a.jwt"), &secret, IAT_MS),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn freshness_window_boundary() {
        let secret = JwtSecret::random();
        let header = bearer(&secret, &Claims::issued_at(IAT));

        for now in [IAT_MS, IAT_MS + 5000, IAT_MS - 5000] {
            assert!(validate_bearer(Some(&header), &secret, now).is_ok(), "{now}");
        }
        for now in [IAT_MS + 5001, IAT_MS - 5001, IAT_MS + 10_000] {
            assert_eq!(
                validate_bearer(Some(&header), &secret, now),
                Err(AuthError::StaleToken),
                "{now}"
            );
        }
    }

    #[test]
    fn fractional_iat_is_measured_in_milliseconds() {
        let secret = JwtSecret::random();
        let claims = Claims {
            iat: Some(IAT as f64 + 0.5),
            exp: None,
        };
        let header = bearer(&secret, &claims);

        let accepted = validate_bearer(Some(&header), &secret, IAT_MS).unwrap();
        assert_eq!(accepted.iat, Some(1_700_000_000.5));
        assert!(validate_bearer(Some(&header), &secret, IAT_MS + 5500).is_ok());
        assert_eq!(
            validate_bearer(Some(&header), &secret, IAT_MS + 5501),
            Err(AuthError::StaleToken)
        );
        assert_eq!(
            validate_bearer(Some(&header), &secret, IAT_MS - 4501),
            Err(AuthError::StaleToken)
        );
    }

    #[test]
    fn non_numeric_iat_is_invalid() {
        let secret = JwtSecret::random();
        let token = secret
            .encode(&serde_json::json!({"iat": "yesterday"}))
            .unwrap();
        assert!(matches!(
            validate_bearer(Some(&format!("Bearer {token}")), &secret, IAT_MS),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn absent_iat_is_stale() {
        let secret = JwtSecret::random();
        let header = bearer(&secret, &Claims::default());
        assert_eq!(
            validate_bearer(Some(&header), &secret, IAT_MS),
            Err(AuthError::StaleToken)
        );
    }

    #[test]
    fn scheme_word_and_extra_whitespace_are_tolerated() {
        let secret = JwtSecret::random();
        let token = secret.encode(&Claims::issued_at(IAT)).unwrap();
        let header = format!("  bearer\t{token}  ");
        let claims = validate_bearer(Some(&header), &secret, IAT_MS).unwrap();
        assert_eq!(claims.iat, Some(IAT as f64));
    }

    #[test]
    fn repeated_validation_is_idempotent() {
        let secret = JwtSecret::random();
        let header = bearer(&secret, &Claims::issued_at(IAT));
        let first = validate_bearer(Some(&header), &secret, IAT_MS + 1200);
        let second = validate_bearer(Some(&header), &secret, IAT_MS + 1200);
        assert!(first.is_ok());
        assert_eq!(first, second);
    }
}
