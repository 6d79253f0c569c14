//! Credential verification and identity derivation.
//!
//! Token issuing lives with whatever identity provider fronts the service;
//! this module only answers "which user does this bearer token belong to".
//! A request that presents a token which fails verification is rejected; it
//! is never silently downgraded to an anonymous identity.

use crate::error::ExaminerError;
use crate::quota::Identity;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Verifies a bearer token and returns the user id it belongs to.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<String, ExaminerError>;
}

/// Fixed token → uid table, loaded from a JSON object
/// (`{ "<token>": "<uid>" }`).
#[derive(Debug, Default, Clone)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, String>,
}

impl StaticTokenVerifier {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    /// Load the token table from a JSON file.
    pub async fn from_file(path: &Path) -> Result<Self, ExaminerError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            ExaminerError::InvalidConfig(format!("tokens file {}: {}", path.display(), e))
        })?;
        let tokens: HashMap<String, String> = serde_json::from_slice(&bytes).map_err(|e| {
            ExaminerError::InvalidConfig(format!("tokens file {}: {}", path.display(), e))
        })?;
        debug!("Loaded {} tokens from {}", tokens.len(), path.display());
        Ok(Self { tokens })
    }

    pub fn insert(&mut self, token: impl Into<String>, uid: impl Into<String>) {
        self.tokens.insert(token.into(), uid.into());
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<String, ExaminerError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| ExaminerError::Unauthorized("invalid token".into()))
    }
}

/// Strip an optional `Bearer ` scheme from an Authorization-style value.
pub fn bearer_token(value: &str) -> &str {
    let value = value.trim();
    match value.get(..7) {
        Some(scheme) if scheme.eq_ignore_ascii_case("bearer ") => value[7..].trim(),
        _ => value,
    }
}

/// Derive the identity a request is charged to.
///
/// * `credential` present → must verify, else `Unauthorized`.
/// * `credential` absent  → anonymous, keyed by `client`.
pub async fn resolve_identity(
    verifier: Option<&dyn TokenVerifier>,
    credential: Option<&str>,
    client: &str,
) -> Result<Identity, ExaminerError> {
    match credential.map(bearer_token) {
        Some("") => Err(ExaminerError::Unauthorized("empty token".into())),
        Some(token) => {
            let verifier = verifier.ok_or_else(|| {
                ExaminerError::Unauthorized("token given but no token verifier is configured".into())
            })?;
            let uid = verifier.verify(token).await?;
            Ok(Identity::user(uid))
        }
        None => Ok(Identity::anonymous(client)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> StaticTokenVerifier {
        let mut v = StaticTokenVerifier::default();
        v.insert("tok-alice", "alice");
        v
    }

    #[test]
    fn strips_bearer_scheme() {
        assert_eq!(bearer_token("Bearer abc"), "abc");
        assert_eq!(bearer_token("  bearer   abc "), "abc");
        assert_eq!(bearer_token("abc"), "abc");
        assert_eq!(bearer_token("Bear"), "Bear");
    }

    #[tokio::test]
    async fn valid_token_yields_user() {
        let v = verifier();
        let id = resolve_identity(Some(&v), Some("Bearer tok-alice"), "1.2.3.4")
            .await
            .unwrap();
        assert_eq!(id, Identity::user("alice"));
    }

    #[tokio::test]
    async fn invalid_token_is_rejected_not_downgraded() {
        let v = verifier();
        let err = resolve_identity(Some(&v), Some("tok-mallory"), "1.2.3.4")
            .await
            .unwrap_err();
        assert!(matches!(err, ExaminerError::Unauthorized(_)));

        let err = resolve_identity(Some(&v), Some("Bearer "), "1.2.3.4")
            .await
            .unwrap_err();
        assert!(matches!(err, ExaminerError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn token_without_verifier_is_rejected() {
        let err = resolve_identity(None, Some("tok-alice"), "host").await.unwrap_err();
        assert!(matches!(err, ExaminerError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn missing_token_is_anonymous() {
        let id = resolve_identity(None, None, "10.0.0.7").await.unwrap();
        assert_eq!(id, Identity::anonymous("10.0.0.7"));
    }

    #[tokio::test]
    async fn loads_tokens_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, br#"{"t1":"u1","t2":"u2"}"#).unwrap();
        let v = StaticTokenVerifier::from_file(&path).await.unwrap();
        assert_eq!(v.verify("t2").await.unwrap(), "u2");

        std::fs::write(&path, b"[]").unwrap();
        assert!(StaticTokenVerifier::from_file(&path).await.is_err());
    }
}
