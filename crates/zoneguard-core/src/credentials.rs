//! Provider credential resolution
//!
//! Interactive requests arrive with the caller's credential already in hand.
//! The scheduled sweep runs without a caller, so it asks a [`CredentialChain`]
//! for the credential of each queue owner. The chain queries its providers in
//! order and the first one that answers wins:
//!
//! 1. [`StoredCredentialProvider`]: the user's own credential set
//!    (`USER_TOKENS:{username}` document)
//! 2. [`EnvCredentialProvider`]: environment tokens, only for the
//!    administrative identity

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::traits::DocumentStore;
use crate::{Error, Result};

/// Document key prefix for per-user credential sets
pub const USER_TOKENS_PREFIX: &str = "USER_TOKENS:";

/// A provider credential
///
/// The Debug implementation never prints secret material.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Scoped API token, sent as a bearer token
    ApiToken(String),
    /// Legacy account-wide key, sent with the account email
    GlobalKey { email: String, key: String },
}

impl Credential {
    pub fn api_token(token: impl Into<String>) -> Self {
        Self::ApiToken(token.into())
    }

    pub fn global_key(email: impl Into<String>, key: impl Into<String>) -> Self {
        Self::GlobalKey {
            email: email.into(),
            key: key.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::ApiToken(token) => token.is_empty(),
            Self::GlobalKey { email, key } => email.is_empty() || key.is_empty(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiToken(_) => f.debug_tuple("ApiToken").field(&"<REDACTED>").finish(),
            Self::GlobalKey { email, .. } => f
                .debug_struct("GlobalKey")
                .field("email", email)
                .field("key", &"<REDACTED>")
                .finish(),
        }
    }
}

/// A source of credentials for `(username, account_index)`
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Resolve a credential, or `None` if this source has nothing for the pair
    async fn resolve(&self, username: &str, account_index: u32) -> Result<Option<Credential>>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Ordered list of credential providers, first match wins
#[derive(Clone, Default)]
pub struct CredentialChain {
    providers: Vec<Arc<dyn CredentialProvider>>,
}

impl CredentialChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider; it is consulted after every provider added before it
    pub fn with_provider(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Query each provider in order.
    ///
    /// A provider that errors is logged and skipped; the chain only reports
    /// `None` once every provider has been asked.
    pub async fn resolve(&self, username: &str, account_index: u32) -> Option<Credential> {
        for provider in &self.providers {
            match provider.resolve(username, account_index).await {
                Ok(Some(credential)) if !credential.is_empty() => {
                    tracing::debug!(
                        "Credential for {} (account {}) resolved by {}",
                        username,
                        account_index,
                        provider.name()
                    );
                    return Some(credential);
                }
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(
                        "Credential provider {} failed for {}: {}",
                        provider.name(),
                        username,
                        e
                    );
                }
            }
        }
        None
    }
}

impl fmt::Debug for CredentialChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.providers.iter().map(|p| p.name()).collect();
        f.debug_struct("CredentialChain").field("providers", &names).finish()
    }
}

/// Entry of a stored credential set
#[derive(Debug, Deserialize)]
struct StoredTokenEntry {
    id: u32,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    key: Option<String>,
}

impl StoredTokenEntry {
    fn into_credential(self) -> Option<Credential> {
        if self.kind.as_deref() == Some("global_key") {
            let key = self.key.or(self.token)?;
            return Some(Credential::global_key(self.email?, key));
        }
        self.token.map(Credential::ApiToken)
    }
}

/// Reads the user's credential set from the document store
pub struct StoredCredentialProvider {
    store: Arc<dyn DocumentStore>,
}

impl StoredCredentialProvider {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CredentialProvider for StoredCredentialProvider {
    async fn resolve(&self, username: &str, account_index: u32) -> Result<Option<Credential>> {
        let key = format!("{}{}", USER_TOKENS_PREFIX, username);
        let Some(doc) = self.store.get(&key).await? else {
            return Ok(None);
        };

        let entries: Vec<StoredTokenEntry> = serde_json::from_str(&doc.value)
            .map_err(|e| Error::credential(format!("Malformed credential set for {}: {}", username, e)))?;

        Ok(entries
            .into_iter()
            .find(|entry| entry.id == account_index)
            .and_then(StoredTokenEntry::into_credential))
    }

    fn name(&self) -> &'static str {
        "stored"
    }
}

/// Account index named by an environment variable, if it holds a token.
///
/// `CF_API_TOKEN` is account 0; a numbered suffix must be canonical, so
/// `CF_API_TOKEN0` and `CF_API_TOKEN01` are ignored.
fn token_index(name: &str) -> Option<u32> {
    let suffix = name.strip_prefix(ENV_TOKEN_VAR)?;
    if suffix.is_empty() {
        return Some(0);
    }
    if suffix.starts_with('0') || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

const ENV_TOKEN_VAR: &str = "CF_API_TOKEN";

/// Environment-configured tokens for the administrative identity.
///
/// Account 0 maps to `CF_API_TOKEN`, account `n` to `CF_API_TOKEN{n}`.
pub struct EnvCredentialProvider {
    admin_username: String,
    tokens: HashMap<u32, Credential>,
}

impl EnvCredentialProvider {
    pub fn new(admin_username: impl Into<String>, tokens: HashMap<u32, Credential>) -> Self {
        Self {
            admin_username: admin_username.into(),
            tokens,
        }
    }

    /// Collect `CF_API_TOKEN` and every `CF_API_TOKEN{n}` from `vars`.
    ///
    /// Indices need not be contiguous: `CF_API_TOKEN2` serves account 2 even
    /// when `CF_API_TOKEN1` is unset.
    pub fn from_vars<I, K, V>(admin_username: impl Into<String>, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let tokens = vars
            .into_iter()
            .filter_map(|(name, value)| {
                let index = token_index(name.as_ref())?;
                let token: String = value.into();
                (!token.is_empty()).then(|| (index, Credential::ApiToken(token)))
            })
            .collect();
        Self::new(admin_username, tokens)
    }

    /// Read the process environment
    pub fn from_env(admin_username: impl Into<String>) -> Self {
        // Non-UTF-8 variables cannot hold a token and are skipped
        let vars = std::env::vars_os()
            .filter_map(|(name, value)| Some((name.into_string().ok()?, value.into_string().ok()?)));
        Self::from_vars(admin_username, vars)
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn resolve(&self, username: &str, account_index: u32) -> Result<Option<Credential>> {
        if username != self.admin_username {
            return Ok(None);
        }
        Ok(self.tokens.get(&account_index).cloned())
    }

    fn name(&self) -> &'static str {
        "environment"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryDocumentStore;

    #[test]
    fn debug_never_shows_secrets() {
        let token = Credential::api_token("secret_token_12345");
        let key = Credential::global_key("ops@example.com", "secret_key_999");

        assert!(!format!("{:?}", token).contains("secret_token"));
        let debug = format!("{:?}", key);
        assert!(!debug.contains("secret_key"));
        assert!(debug.contains("ops@example.com"));
    }

    #[tokio::test]
    async fn env_provider_only_serves_admin() {
        let provider = EnvCredentialProvider::from_vars(
            "admin",
            [("CF_API_TOKEN", "t0"), ("CF_API_TOKEN1", "t1"), ("HOME", "/root")],
        );
        assert_eq!(provider.token_count(), 2);

        assert_eq!(
            provider.resolve("admin", 1).await.unwrap(),
            Some(Credential::api_token("t1"))
        );
        assert_eq!(provider.resolve("admin", 2).await.unwrap(), None);
        assert_eq!(provider.resolve("alice", 0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn env_tokens_resolve_across_index_gaps() {
        let provider = EnvCredentialProvider::from_vars(
            "admin",
            [("CF_API_TOKEN", "t0"), ("CF_API_TOKEN2", "t2"), ("CF_API_TOKEN7", "t7")],
        );
        assert_eq!(provider.token_count(), 3);

        assert_eq!(
            provider.resolve("admin", 2).await.unwrap(),
            Some(Credential::api_token("t2"))
        );
        assert_eq!(
            provider.resolve("admin", 7).await.unwrap(),
            Some(Credential::api_token("t7"))
        );
        assert_eq!(provider.resolve("admin", 1).await.unwrap(), None);
    }

    #[test]
    fn only_canonical_token_names_are_read() {
        assert_eq!(token_index("CF_API_TOKEN"), Some(0));
        assert_eq!(token_index("CF_API_TOKEN12"), Some(12));
        assert_eq!(token_index("CF_API_TOKEN0"), None);
        assert_eq!(token_index("CF_API_TOKEN01"), None);
        assert_eq!(token_index("CF_API_TOKEN_OLD"), None);
        assert_eq!(token_index("CF_API_TOKENS"), None);
        assert_eq!(token_index("XCF_API_TOKEN1"), None);

        let provider = EnvCredentialProvider::from_vars("admin", [("CF_API_TOKEN3", "")]);
        assert_eq!(provider.token_count(), 0);
    }

    #[tokio::test]
    async fn stored_provider_matches_account_index() {
        let store = Arc::new(MemoryDocumentStore::new());
        store
            .put(
                "USER_TOKENS:alice",
                r#"[{"id":0,"token":"a0"},{"id":2,"type":"global_key","email":"a@example.com","key":"k2"}]"#
                    .into(),
                None,
            )
            .await
            .unwrap();
        let provider = StoredCredentialProvider::new(store);

        assert_eq!(
            provider.resolve("alice", 0).await.unwrap(),
            Some(Credential::api_token("a0"))
        );
        assert_eq!(
            provider.resolve("alice", 2).await.unwrap(),
            Some(Credential::global_key("a@example.com", "k2"))
        );
        assert_eq!(provider.resolve("alice", 1).await.unwrap(), None);
        assert_eq!(provider.resolve("bob", 0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn chain_prefers_stored_then_falls_back() {
        let store = Arc::new(MemoryDocumentStore::new());
        store
            .put("USER_TOKENS:admin", r#"[{"id":0,"token":"stored"}]"#.into(), None)
            .await
            .unwrap();

        let chain = CredentialChain::new()
            .with_provider(Arc::new(StoredCredentialProvider::new(store)))
            .with_provider(Arc::new(EnvCredentialProvider::from_vars(
                "admin",
                [("CF_API_TOKEN", "env0"), ("CF_API_TOKEN1", "env1")],
            )));

        assert_eq!(chain.resolve("admin", 0).await, Some(Credential::api_token("stored")));
        assert_eq!(chain.resolve("admin", 1).await, Some(Credential::api_token("env1")));
        assert_eq!(chain.resolve("alice", 0).await, None);
    }

    #[tokio::test]
    async fn chain_skips_failing_provider() {
        let store = Arc::new(MemoryDocumentStore::new());
        store
            .put("USER_TOKENS:admin", "not json".into(), None)
            .await
            .unwrap();

        let chain = CredentialChain::new()
            .with_provider(Arc::new(StoredCredentialProvider::new(store)))
            .with_provider(Arc::new(EnvCredentialProvider::from_vars(
                "admin",
                [("CF_API_TOKEN", "env0")],
            )));

        assert_eq!(chain.resolve("admin", 0).await, Some(Credential::api_token("env0")));
    }
}
