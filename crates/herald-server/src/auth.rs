//! Token-based identity resolution for connection requests.

use std::collections::HashMap;
use std::time::Duration;

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use herald_core::{Credentials, Identity, IdentityResolver, RegistrationError};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Lift credentials from a request.
///
/// An `Authorization: Bearer` header wins; otherwise the `param` query
/// parameter is used, since browsers cannot set headers on `WebSocket` or
/// `EventSource` requests.
pub fn credentials_from_request(
    headers: &HeaderMap,
    query: &HashMap<String, String>,
    param: &str,
) -> Credentials {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            let (scheme, token) = value.split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
        })
        .filter(|token| !token.is_empty());

    let token = bearer
        .or_else(|| query.get(param).map(String::as_str).filter(|t| !t.is_empty()))
        .map(str::to_owned);
    Credentials { token }
}

/// Claims carried by an access token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// Recipient key.
    pub sub: String,
    /// Expiry, seconds since the Unix epoch.
    pub exp: u64,
    /// Login session ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// Account type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_type: Option<String>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Claims {
    /// Claims for `sub` valid for `ttl` from now.
    pub fn new(sub: impl Into<String>, ttl: Duration) -> Self {
        Self {
            sub: sub.into(),
            exp: jsonwebtoken::get_current_timestamp() + ttl.as_secs(),
            jti: None,
            user_type: None,
            name: None,
        }
    }

    /// Set the login session ID.
    #[must_use]
    pub fn with_session(mut self, jti: impl Into<String>) -> Self {
        self.jti = Some(jti.into());
        self
    }
}

/// HS256 JWT resolver.
pub struct JwtIdentityResolver {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtIdentityResolver {
    /// Resolver for tokens signed with `secret`, tolerating `leeway` of clock skew.
    pub fn new(secret: &str, leeway: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = leeway.as_secs();
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Sign `claims` with this resolver's secret.
    pub fn issue(&self, claims: &Claims) -> jsonwebtoken::errors::Result<String> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
    }
}

impl IdentityResolver for JwtIdentityResolver {
    fn resolve(&self, credentials: &Credentials) -> Result<Identity, RegistrationError> {
        let token = credentials
            .token
            .as_deref()
            .ok_or(RegistrationError::MissingCredentials)?;

        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            debug!(error = %e, "token rejected");
            match e.kind() {
                ErrorKind::ExpiredSignature => RegistrationError::Expired,
                _ => RegistrationError::InvalidToken(e.to_string()),
            }
        })?;
        let claims = data.claims;
        if claims.sub.trim().is_empty() {
            return Err(RegistrationError::InvalidToken("empty subject".into()));
        }

        // one login may hold several streams; the session tells its own apart
        let session = claims.jti.unwrap_or_else(|| token_digest(token));
        Ok(Identity {
            key: claims.sub.into(),
            session,
            user_type: claims.user_type,
            display_name: claims.name,
        })
    }
}

fn token_digest(token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes()))
}
