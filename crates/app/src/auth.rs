use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap, StatusCode},
};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use badger_core::types::{Actor, User};

use crate::problem::ProblemResponse;
use crate::router::AppState;

pub const SESSION_COOKIE: &str = "badger_session";

/// Verifies HS256 session tokens minted by the identity provider.
#[derive(Clone)]
pub struct SessionValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl SessionValidator {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.required_spec_claims.clear();
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, SessionError> {
        let claims = decode::<SessionClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| SessionError::Invalid(format!("{err}")))?
            .claims;

        if claims.sub.trim().is_empty() {
            return Err(SessionError::Invalid("empty_subject".to_string()));
        }
        if let Some(exp) = claims.exp {
            if now.timestamp() >= exp as i64 {
                return Err(SessionError::Invalid("token_expired".to_string()));
            }
        }
        Ok(claims)
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SessionClaims {
    pub sub: String,
    #[serde(default)]
    pub exp: Option<usize>,
    #[serde(default)]
    pub superuser: bool,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("missing session")]
    Missing,
    #[error("invalid session: {0}")]
    Invalid(String),
}

/// Pulls the session token from the bearer header, falling back to the session cookie.
pub fn session_token(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());
    if bearer.is_some() {
        return bearer;
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, token)| token.trim())
        .filter(|token| !token.is_empty())
}

/// Authenticated user behind the request. Rejects with 401 otherwise.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl CurrentUser {
    pub fn actor(&self) -> Actor {
        Actor::User(self.0.clone())
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ProblemResponse;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let claims = session_token(&parts.headers)
            .ok_or(SessionError::Missing)
            .and_then(|token| state.sessions().validate(token, state.now()))
            .map_err(|err| {
                debug!(stage = "auth", error = %err, "session rejected");
                ProblemResponse::new(StatusCode::UNAUTHORIZED, "unauthenticated", err.to_string())
            })?;

        let user = state
            .storage()
            .users()
            .upsert(claims.sub.trim(), claims.superuser)
            .await?;

        Ok(Self(user))
    }
}
