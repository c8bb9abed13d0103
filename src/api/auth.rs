//! Connection authentication.
//!
//! The transport resolves a presented token to an identity before any
//! protocol handler exists. Tokens come from an `Authorization: Bearer`
//! header, or from the `token` query parameter since browsers cannot set
//! headers on a WebSocket upgrade.

use std::collections::HashMap;

use axum::extract::{FromRequestParts, Query};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::{HeaderMap, Uri};
use serde::Deserialize;

use super::handlers::AppState;
use super::types::ApiError;
use crate::error::RelayError;
use crate::Result;

/// Identity every connection gets when authentication is disabled.
pub const LOCAL_IDENTITY: &str = "local";

const BEARER_PREFIX: &str = "Bearer ";

/// Resolves identity tokens.
pub trait Authenticator: Send + Sync {
    /// Map a presented token to the identity it belongs to.
    fn verify(&self, token: &str) -> Result<String>;

    /// Whether a token must be presented at all.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Identity for a connection that presented `token`, if any.
    fn identify(&self, token: Option<&str>) -> Result<String> {
        if !self.is_enabled() {
            return Ok(LOCAL_IDENTITY.to_string());
        }
        match token {
            Some(token) if !token.is_empty() => self.verify(token),
            _ => Err(RelayError::AuthRequired),
        }
    }
}

/// Fixed token -> identity table, loaded from configuration.
#[derive(Clone)]
pub struct StaticTokens {
    enabled: bool,
    tokens: HashMap<String, String>,
}

impl StaticTokens {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self {
            enabled: true,
            tokens,
        }
    }

    /// Every connection is [`LOCAL_IDENTITY`].
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            tokens: HashMap::new(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>, identity: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), identity.into());
        self
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Default for StaticTokens {
    /// Enabled, with no tokens: every request is rejected.
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}

impl Authenticator for StaticTokens {
    fn verify(&self, token: &str) -> Result<String> {
        self.tokens
            .iter()
            .find(|(known, _)| constant_time_eq(known.as_bytes(), token.as_bytes()))
            .map(|(_, identity)| identity.clone())
            .ok_or_else(|| RelayError::AuthFailed("unknown token".into()))
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl std::fmt::Debug for StaticTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokens")
            .field("enabled", &self.enabled)
            .field("tokens", &self.tokens.len())
            .finish()
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Token presented with a request. The header wins over the query.
pub fn presented_token(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let from_header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        .map(|token| token.trim().to_string());

    from_header.or_else(|| {
        Query::<TokenQuery>::try_from_uri(uri)
            .ok()
            .and_then(|Query(q)| q.token)
    })
}

/// Verified identity of the caller, extracted before the handler runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity(pub String);

impl FromRequestParts<AppState> for Identity {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let token = presented_token(&parts.headers, &parts.uri);
        match state.authenticator.identify(token.as_deref()) {
            Ok(identity) => Ok(Identity(identity)),
            Err(e) => {
                tracing::debug!(path = %parts.uri.path(), code = e.code(), "rejected request");
                Err(ApiError::from(e))
            }
        }
    }
}
