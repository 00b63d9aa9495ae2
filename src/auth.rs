// Shared-password login, session tokens (JWT) and the request guard.

use axum::{
    extract::{Query, Request, State},
    http::{HeaderMap, Uri, header},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::AuthConfig;
use crate::error::ApiError;

/// Cookie set by `/api/login` and accepted as the last token source.
pub const AUTH_COOKIE: &str = "auth";

const DEV_SECRET: &str = "dev-secret-change";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

pub struct Authenticator {
    password: Option<String>,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl_secs: u64,
}

impl Authenticator {
    pub fn new(config: &AuthConfig) -> Self {
        let secret = match config.jwt_secret.as_deref().filter(|s| !s.is_empty()) {
            Some(s) => s.to_string(),
            None => {
                tracing::warn!("JWT_SECRET not set; using the development secret");
                DEV_SECRET.to_string()
            }
        };
        if config.password.as_deref().is_none_or(str::is_empty) {
            tracing::warn!("PASSWORD not set; every protected request will fail");
        }
        // expiry is exact: no grace period past `exp`
        let mut validation = Validation::default();
        validation.leeway = 0;
        Self {
            password: config.password.clone().filter(|p| !p.is_empty()),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl_secs: config.token_ttl_secs,
        }
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Exchange the shared password for a fresh token.
    pub fn login(&self, password: Option<&str>) -> Result<String, ApiError> {
        let expected = self.password.as_deref().ok_or(ApiError::PasswordNotSet)?;
        if password != Some(expected) {
            return Err(ApiError::InvalidPassword);
        }
        self.issue_token()
    }

    pub fn issue_token(&self) -> Result<String, ApiError> {
        let now = chrono::Utc::now().timestamp();
        let exp = i64::try_from(self.ttl_secs)
            .ok()
            .and_then(|ttl| now.checked_add(ttl))
            .ok_or_else(|| {
                tracing::warn!(ttl_secs = self.ttl_secs, "token lifetime out of range");
                ApiError::Internal("Token creation failed".to_string())
            })?;
        let claims = Claims {
            role: "admin".to_string(),
            iat: now,
            exp,
        };
        encode(&Header::default(), &claims, &self.encoding).map_err(|e| {
            tracing::warn!(error = %e, "token signing failed");
            ApiError::Internal("Token creation failed".to_string())
        })
    }

    /// Signature and expiry check.
    pub fn verify(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = ?e, "token rejected");
                ApiError::Unauthorized
            })
    }

    /// Gate for protected requests: password configured, token present and valid.
    pub fn authorize(&self, headers: &HeaderMap, uri: &Uri) -> Result<Claims, ApiError> {
        if self.password.is_none() {
            return Err(ApiError::PasswordNotSet);
        }
        let token = token_from_request(headers, uri).ok_or(ApiError::Unauthorized)?;
        self.verify(&token)
    }
}

/// Bearer header, then `?token=`, then the `auth` cookie. The first present source wins.
pub fn token_from_request(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    if let Some(bearer) = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
    {
        return Some(bearer.to_string());
    }
    if let Some(token) = Query::<TokenQuery>::try_from_uri(uri)
        .ok()
        .and_then(|Query(q)| q.token)
        .filter(|t| !t.is_empty())
    {
        return Some(token);
    }
    CookieJar::from_headers(headers)
        .get(AUTH_COOKIE)
        .map(|c| c.value().to_string())
}

/// Middleware for every protected REST route and WebSocket upgrade.
pub async fn require_auth(
    State(auth): State<Arc<Authenticator>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    auth.authorize(req.headers(), req.uri())?;
    Ok(next.run(req).await)
}
