//! Bearer-token authentication for the registry v2 protocol.
//!
//! A registry may answer any request with a 401 challenge naming a
//! token-issuing realm, a service identifier, and a scope. The client
//! exchanges its credentials at the realm for a short-lived bearer
//! token, caches it keyed by realm+scope, and retries the original
//! request once.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Deserialize;

/// Safety margin subtracted from a token's declared lifetime, in
/// seconds, so a token is refreshed before the registry rejects it.
pub const EXPIRY_MARGIN_SECS: i64 = 30;

/// Default token lifetime when the issuer does not declare one.
pub const DEFAULT_EXPIRY_SECS: i64 = 60;

/// Registry credentials (username + password or token).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Username.
    pub username: String,
    /// Password or personal access token.
    pub password: String,
}

impl Credentials {
    /// Create new credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// A parsed `WWW-Authenticate: Bearer ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerChallenge {
    /// URL of the token-issuing endpoint.
    pub realm: String,
    /// Service identifier to pass to the issuer.
    pub service: Option<String>,
    /// Requested scope.
    pub scope: Option<String>,
}

impl BearerChallenge {
    /// Parse a `WWW-Authenticate` header value.
    ///
    /// Returns `None` when the value is not a bearer challenge or names
    /// no realm.
    pub fn parse(header: &str) -> Option<Self> {
        let rest = header.trim().strip_prefix("Bearer ")?;

        let mut realm = None;
        let mut service = None;
        let mut scope = None;

        for part in split_challenge_params(rest) {
            let (key, value) = part.split_once('=')?;
            let value = value.trim().trim_matches('"').to_string();
            match key.trim() {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                "scope" => scope = Some(value),
                _ => {}
            }
        }

        Some(Self {
            realm: realm?,
            service,
            scope,
        })
    }

    /// Build the token-request URL for this challenge.
    pub fn token_url(&self) -> String {
        let mut params = Vec::new();
        if let Some(service) = &self.service {
            params.push(format!("service={service}"));
        }
        if let Some(scope) = &self.scope {
            params.push(format!("scope={scope}"));
        }
        if params.is_empty() {
            self.realm.clone()
        } else {
            let sep = if self.realm.contains('?') { '&' } else { '?' };
            format!("{}{}{}", self.realm, sep, params.join("&"))
        }
    }

    /// Cache key for tokens issued against this challenge.
    pub fn cache_key(&self) -> String {
        format!("{}|{}", self.realm, self.scope.as_deref().unwrap_or(""))
    }
}

/// Split challenge parameters on commas outside quoted strings.
fn split_challenge_params(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    for (i, c) in input.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(input[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let tail = input[start..].trim();
    if !tail.is_empty() {
        parts.push(tail);
    }
    parts
}

/// Token-issuer response body. Some issuers use `token`, others
/// `access_token`.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl TokenResponse {
    /// The bearer token, whichever field carried it.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().or(self.access_token.as_deref())
    }

    /// Declared lifetime in seconds, defaulted when absent.
    pub fn expires_in(&self) -> i64 {
        self.expires_in.unwrap_or(DEFAULT_EXPIRY_SECS)
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Process-local bearer-token cache, keyed by realm+scope.
///
/// Instance-scoped on the client rather than a module-level singleton:
/// the cache's lifetime is tied to the client that owns it, and fresh
/// client instances start empty. Safe to share read-mostly across
/// concurrent registry calls; entries are refreshed idempotently on
/// expiry.
#[derive(Debug, Default)]
pub struct TokenCache {
    tokens: Mutex<HashMap<String, CachedToken>>,
}

impl TokenCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an unexpired token for a challenge.
    pub fn get(&self, challenge: &BearerChallenge) -> Option<String> {
        let tokens = self.tokens.lock();
        let cached = tokens.get(&challenge.cache_key())?;
        if cached.expires_at > Utc::now() {
            Some(cached.token.clone())
        } else {
            None
        }
    }

    /// Store a token with its declared lifetime, minus the safety
    /// margin.
    pub fn insert(&self, challenge: &BearerChallenge, token: impl Into<String>, expires_in: i64) {
        let lifetime = (expires_in - EXPIRY_MARGIN_SECS).max(1);
        let cached = CachedToken {
            token: token.into(),
            expires_at: Utc::now() + Duration::seconds(lifetime),
        };
        self.tokens.lock().insert(challenge.cache_key(), cached);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_challenge() {
        let challenge = BearerChallenge::parse(
            r#"Bearer realm="https://auth.example.com/token",service="registry.example.com",scope="repository:team/migrations:pull,push""#,
        )
        .unwrap();

        assert_eq!(challenge.realm, "https://auth.example.com/token");
        assert_eq!(challenge.service.as_deref(), Some("registry.example.com"));
        assert_eq!(
            challenge.scope.as_deref(),
            Some("repository:team/migrations:pull,push")
        );
    }

    #[test]
    fn test_parse_requires_realm() {
        assert!(BearerChallenge::parse(r#"Bearer service="x""#).is_none());
        assert!(BearerChallenge::parse("Basic realm=\"x\"").is_none());
    }

    #[test]
    fn test_token_url() {
        let challenge = BearerChallenge {
            realm: "https://auth.example.com/token".into(),
            service: Some("reg".into()),
            scope: Some("repository:a/b:pull".into()),
        };
        assert_eq!(
            challenge.token_url(),
            "https://auth.example.com/token?service=reg&scope=repository:a/b:pull"
        );
    }

    #[test]
    fn test_token_response_either_field() {
        let a: TokenResponse = serde_json::from_str(r#"{"token":"abc"}"#).unwrap();
        assert_eq!(a.token(), Some("abc"));

        let b: TokenResponse = serde_json::from_str(r#"{"access_token":"xyz"}"#).unwrap();
        assert_eq!(b.token(), Some("xyz"));

        let c: TokenResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(c.token(), None);
        assert_eq!(c.expires_in(), DEFAULT_EXPIRY_SECS);
    }

    #[test]
    fn test_cache_round_trip() {
        let cache = TokenCache::new();
        let challenge = BearerChallenge {
            realm: "https://auth/token".into(),
            service: None,
            scope: Some("repository:a/b:pull".into()),
        };

        assert!(cache.get(&challenge).is_none());
        cache.insert(&challenge, "tok", 300);
        assert_eq!(cache.get(&challenge).as_deref(), Some("tok"));
    }

    #[test]
    fn test_cache_expiry_margin() {
        let cache = TokenCache::new();
        let challenge = BearerChallenge {
            realm: "https://auth/token".into(),
            service: None,
            scope: None,
        };

        // Lifetime under the margin still yields a briefly valid token.
        cache.insert(&challenge, "tok", 5);
        assert!(cache.get(&challenge).is_some());
    }

    #[test]
    fn test_cache_keyed_by_scope() {
        let cache = TokenCache::new();
        let pull = BearerChallenge {
            realm: "https://auth/token".into(),
            service: None,
            scope: Some("repository:a/b:pull".into()),
        };
        let push = BearerChallenge {
            scope: Some("repository:a/b:push".into()),
            ..pull.clone()
        };

        cache.insert(&pull, "pull-tok", 300);
        assert!(cache.get(&push).is_none());
    }
}
