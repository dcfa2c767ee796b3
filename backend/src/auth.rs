//! Session issuance and the authenticated-user extractor.
//!
//! Login upserts the user by their identity-provider id and hands back an
//! opaque bearer token. The token maps to a user id in an in-process
//! session table; every scoped route resolves it through the [`AuthUser`]
//! extractor, and the WebSocket handshake resolves it before the upgrade.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{header::AUTHORIZATION, request::Parts, HeaderMap};
use dashmap::DashMap;

use crate::error::AppError;
use crate::rest::AppState;

/// In-process session table: token -> user id.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<DashMap<String, String>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh opaque token for the user.
    pub fn issue(&self, user_id: &str) -> String {
        let token = uuid::Uuid::new_v4().to_string();
        self.sessions.insert(token.clone(), user_id.to_string());
        token
    }

    pub fn resolve(&self, token: &str) -> Option<String> {
        self.sessions.get(token).map(|entry| entry.value().clone())
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }
}

/// The authenticated caller of a scoped route.
pub struct AuthUser {
    pub user_id: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(AppError::Unauthorized)?;
        let user_id = state
            .sessions
            .resolve(token)
            .ok_or(AppError::Unauthorized)?;
        Ok(AuthUser { user_id })
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_resolves_to_its_user() {
        let store = SessionStore::new();
        let token = store.issue("user-1");
        assert_eq!(store.resolve(&token).as_deref(), Some("user-1"));
    }

    #[test]
    fn unknown_token_does_not_resolve() {
        let store = SessionStore::new();
        assert!(store.resolve("nope").is_none());
    }

    #[test]
    fn revoked_token_stops_resolving() {
        let store = SessionStore::new();
        let token = store.issue("user-1");
        assert!(store.revoke(&token));
        assert!(store.resolve(&token).is_none());
    }

    #[test]
    fn bearer_token_strips_the_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc123"));

        let mut bad = HeaderMap::new();
        bad.insert(AUTHORIZATION, "Basic abc123".parse().unwrap());
        assert_eq!(bearer_token(&bad), None);
    }
}
