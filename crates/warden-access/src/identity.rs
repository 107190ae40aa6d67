//! Caller identities and the identity provider contract.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// An authenticated caller, as issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Provider-assigned id, also the key of the user record.
    pub id: String,
    /// Email as reported by the provider.
    pub email: String,
    /// Whether the provider verified the email.
    #[serde(default)]
    pub email_verified: bool,
}

impl Identity {
    /// Create an identity with an unverified email.
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            email_verified: false,
        }
    }

    /// Mark the email as verified.
    pub fn verified(mut self) -> Self {
        self.email_verified = true;
        self
    }
}

/// Opaque credential presented by a caller (session token, ID token, ...).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(String);

impl Credential {
    /// Wrap a raw credential.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Exposes the raw credential.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

/// External authority that turns credentials into identities.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verify a credential. `None` means the caller is unauthenticated.
    async fn verify_identity(&self, credential: &Credential) -> Option<Identity>;
}

/// Provider backed by a fixed token table, for tests and local tooling.
#[derive(Debug, Default)]
pub struct StaticIdentityProvider {
    tokens: RwLock<HashMap<Credential, Identity>>,
}

impl StaticIdentityProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `credential` as `identity`.
    pub fn insert(&self, credential: Credential, identity: Identity) {
        self.tokens.write().insert(credential, identity);
    }

    /// Stop accepting a credential. Returns whether it was known.
    pub fn revoke(&self, credential: &Credential) -> bool {
        self.tokens.write().remove(credential).is_some()
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn verify_identity(&self, credential: &Credential) -> Option<Identity> {
        self.tokens.read().get(credential).cloned()
    }
}
