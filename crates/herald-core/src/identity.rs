//! Boundary to the authentication layer.
//!
//! Identity is resolved exactly once per connection, before registration.
//! A connection whose identity cannot be resolved is rejected; this is a hard
//! precondition, not a retryable error.

use serde::Serialize;

use crate::errors::RegistrationError;
use crate::ids::RecipientKey;

/// Raw credentials lifted from a connection request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Bearer token, if one was presented.
    pub token: Option<String>,
}

impl Credentials {
    /// Credentials carrying a bearer token.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }
}

/// An authenticated caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Who pushes for this caller are addressed to.
    pub key: RecipientKey,
    /// Login session of this caller; distinguishes concurrent connections of one key.
    #[serde(skip)]
    pub session: String,
    /// Account type, if the token carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_type: Option<String>,
    /// Display name, if the token carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Identity {
    /// Identity with no auxiliary profile fields.
    pub fn new(key: impl Into<RecipientKey>, session: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            session: session.into(),
            user_type: None,
            display_name: None,
        }
    }
}

/// Resolves credentials to an [`Identity`].
pub trait IdentityResolver: Send + Sync {
    /// Validate the credentials and return the caller's identity.
    fn resolve(&self, credentials: &Credentials) -> Result<Identity, RegistrationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedResolver;

    impl IdentityResolver for FixedResolver {
        fn resolve(&self, credentials: &Credentials) -> Result<Identity, RegistrationError> {
            match credentials.token.as_deref() {
                Some("good") => Ok(Identity::new("u1", "s1")),
                Some(_) => Err(RegistrationError::InvalidToken("unknown".into())),
                None => Err(RegistrationError::MissingCredentials),
            }
        }
    }

    #[test]
    fn resolver_accepts_known_token() {
        let id = FixedResolver.resolve(&Credentials::bearer("good")).unwrap();
        assert_eq!(id.key.as_str(), "u1");
        assert_eq!(id.session, "s1");
    }

    #[test]
    fn resolver_rejects_missing_token() {
        let err = FixedResolver.resolve(&Credentials::default()).unwrap_err();
        assert_eq!(err, RegistrationError::MissingCredentials);
    }

    #[test]
    fn session_is_not_serialized() {
        let id = Identity::new("u1", "secret-session");
        let json = serde_json::to_string(&id).unwrap();
        assert!(!json.contains("secret-session"));
        assert!(json.contains("\"key\":\"u1\""));
    }
}
