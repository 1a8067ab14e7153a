//! Session token validation
//!
//! Identity lives in the platform's external identity provider; this
//! service only verifies the HS256 session tokens it issues and trusts
//! the `sub` claim as the user id. Tokens arrive as a Bearer header or,
//! for WebSocket upgrades where browsers cannot set headers, as a
//! `?token=` query parameter. Dev mode additionally accepts a bare
//! `X-User-Id` header so local clients can skip token plumbing.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::types::{CaselineError, Result};

/// Claims carried by a session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: u64,
}

/// Authenticated requester
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthedUser {
    pub user_id: String,
}

/// Verifies session tokens from the identity provider
#[derive(Clone)]
pub struct SessionValidator {
    decoding_key: DecodingKey,
    dev_mode: bool,
}

impl SessionValidator {
    /// Create a validator
    ///
    /// Outside dev mode the secret must be at least 32 characters.
    pub fn new(secret: &str, dev_mode: bool) -> Result<Self> {
        if !dev_mode && secret.len() < 32 {
            return Err(CaselineError::Config(
                "SESSION_SECRET must be at least 32 characters".to_string(),
            ));
        }
        Ok(Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            dev_mode,
        })
    }

    /// Validate a raw token and return its claims
    ///
    /// Expiry is checked by the decoder; an expired token is Unauthorized.
    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| CaselineError::Unauthorized(format!("invalid session token: {}", e)))?;

        if data.claims.sub.is_empty() {
            return Err(CaselineError::Unauthorized(
                "session token has no subject".to_string(),
            ));
        }
        Ok(data.claims)
    }

    /// Authenticate an incoming request
    pub fn authenticate<B>(&self, req: &hyper::Request<B>) -> Result<AuthedUser> {
        if let Some(token) = bearer_token(req) {
            let claims = self.validate_token(&token)?;
            return Ok(AuthedUser {
                user_id: claims.sub,
            });
        }

        if let Some(token) = query_token(req.uri().query()) {
            let claims = self.validate_token(&token)?;
            return Ok(AuthedUser {
                user_id: claims.sub,
            });
        }

        if self.dev_mode {
            if let Some(user_id) = req
                .headers()
                .get("x-user-id")
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
            {
                return Ok(AuthedUser {
                    user_id: user_id.to_string(),
                });
            }
        }

        Err(CaselineError::Unauthorized(
            "missing session token".to_string(),
        ))
    }
}

/// Token from an `Authorization: Bearer ...` header
fn bearer_token<B>(req: &hyper::Request<B>) -> Option<String> {
    req.headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Token from a `?token=` query parameter
fn query_token(query: Option<&str>) -> Option<String> {
    let query = query?;
    for param in query.split('&') {
        if let Some(value) = param.strip_prefix("token=") {
            if !value.is_empty() {
                return urlencoding::decode(value).ok().map(|v| v.into_owned());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::time::{SystemTime, UNIX_EPOCH};

    const SECRET: &str = "test-secret-with-enough-length-0123456789";

    fn token_for(sub: &str, expires_in: i64) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        let claims = Claims {
            sub: sub.to_string(),
            exp: (now + expires_in) as u64,
            iat: now as u64,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn validator() -> SessionValidator {
        SessionValidator::new(SECRET, false).unwrap()
    }

    #[test]
    fn test_valid_bearer_token() {
        let req = hyper::Request::builder()
            .uri("/api/use-cases")
            .header("authorization", format!("Bearer {}", token_for("alice", 60)))
            .body(())
            .unwrap();
        let user = validator().authenticate(&req).unwrap();
        assert_eq!(user.user_id, "alice");
    }

    #[test]
    fn test_expired_token_rejected() {
        let req = hyper::Request::builder()
            .uri("/api/use-cases")
            .header("authorization", format!("Bearer {}", token_for("alice", -120)))
            .body(())
            .unwrap();
        let err = validator().authenticate(&req).unwrap_err();
        assert!(matches!(err, CaselineError::Unauthorized(_)));
    }

    #[test]
    fn test_query_token_for_websocket_upgrade() {
        let req = hyper::Request::builder()
            .uri(format!("/ws?token={}", token_for("bob", 60)))
            .body(())
            .unwrap();
        let user = validator().authenticate(&req).unwrap();
        assert_eq!(user.user_id, "bob");
    }

    #[test]
    fn test_dev_header_only_in_dev_mode() {
        let req = hyper::Request::builder()
            .uri("/api/use-cases")
            .header("x-user-id", "carol")
            .body(())
            .unwrap();

        assert!(validator().authenticate(&req).is_err());

        let dev = SessionValidator::new("short", true).unwrap();
        assert_eq!(dev.authenticate(&req).unwrap().user_id, "carol");
    }

    #[test]
    fn test_short_secret_rejected_outside_dev() {
        assert!(SessionValidator::new("short", false).is_err());
    }

    #[test]
    fn test_tampered_token_rejected() {
        let mut token = token_for("alice", 60);
        token.push('x');
        assert!(validator().validate_token(&token).is_err());
    }
}
