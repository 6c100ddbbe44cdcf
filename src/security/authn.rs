//! Request authentication.
//!
//! The proxy core only consumes identities. This module provides the
//! capability the HTTP layer calls to produce one, plus a static bearer-token
//! implementation for standalone deployments.

use axum::http::{header, HeaderMap};
use std::collections::HashMap;

use crate::config::schema::StaticTokenConfig;
use crate::security::identity::UserInfo;

/// Error type for authentication failures.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid bearer token")]
    InvalidToken,
    #[error("malformed authorization header")]
    MalformedHeader,
}

/// Produces a verified identity from request headers.
///
/// `Ok(None)` means no credentials were presented.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, headers: &HeaderMap) -> Result<Option<UserInfo>, AuthError>;
}

impl<F> Authenticator for F
where
    F: Fn(&HeaderMap) -> Option<UserInfo> + Send + Sync,
{
    fn authenticate(&self, headers: &HeaderMap) -> Result<Option<UserInfo>, AuthError> {
        Ok(self(headers))
    }
}

/// Authenticates `Authorization: Bearer <token>` against a fixed table.
#[derive(Debug, Default)]
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, UserInfo>,
}

impl StaticTokenAuthenticator {
    pub fn from_config(tokens: &[StaticTokenConfig]) -> Self {
        let tokens = tokens
            .iter()
            .map(|t| {
                let user = UserInfo {
                    name: t.user.clone(),
                    uid: t.uid.clone(),
                    groups: t.groups.clone(),
                    extra: t.extra.clone(),
                };
                (t.token.clone(), user)
            })
            .collect();
        Self { tokens }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Authenticator for StaticTokenAuthenticator {
    fn authenticate(&self, headers: &HeaderMap) -> Result<Option<UserInfo>, AuthError> {
        let Some(value) = headers.get(header::AUTHORIZATION) else {
            return Ok(None);
        };
        let value = value.to_str().map_err(|_| AuthError::MalformedHeader)?;
        let token = value
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MalformedHeader)?;

        self.tokens
            .get(token)
            .cloned()
            .map(Some)
            .ok_or(AuthError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn authenticator() -> StaticTokenAuthenticator {
        StaticTokenAuthenticator::from_config(&[StaticTokenConfig {
            token: "secret".into(),
            user: "alice".into(),
            uid: "1".into(),
            groups: vec!["one".into(), "two".into()],
            extra: Default::default(),
        }])
    }

    #[test]
    fn no_header_is_anonymous() {
        let auth = authenticator();
        assert!(auth.authenticate(&HeaderMap::new()).unwrap().is_none());
    }

    #[test]
    fn known_token_yields_user() {
        let auth = authenticator();
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
        let user = auth.authenticate(&headers).unwrap().unwrap();
        assert_eq!(user.name, "alice");
        assert_eq!(user.groups, vec!["one", "two"]);
    }

    #[test]
    fn unknown_token_is_rejected() {
        let auth = authenticator();
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer nope"));
        assert!(matches!(auth.authenticate(&headers), Err(AuthError::InvalidToken)));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(matches!(auth.authenticate(&headers), Err(AuthError::MalformedHeader)));
    }
}
