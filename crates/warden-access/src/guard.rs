//! Access gating at the entry boundary.
//!
//! Every check re-resolves the caller's role, so a demotion applies to the
//! caller's next check instead of lasting for a session.

use crate::error::{AuthError, Result};
use crate::identity::{Credential, Identity, IdentityProvider};
use crate::journal::{JournalEvent, JournalEventKind};
use crate::resolver::RoleResolver;
use crate::role::RoleLevel;
use serde::Serialize;
use std::future::Future;
use warden_store::DocumentStore;

/// Result of an access check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AccessDecision {
    /// The caller may proceed.
    Allowed {
        /// The caller's effective level.
        role: RoleLevel,
    },
    /// The caller is known but under-privileged.
    Denied {
        /// The caller's effective level.
        role: RoleLevel,
        /// The level that was required.
        required: RoleLevel,
        /// Configured fallback path.
        redirect: String,
    },
    /// The caller has no usable identity.
    Unauthenticated {
        /// Configured login path.
        redirect: String,
    },
}

impl AccessDecision {
    /// Whether the caller may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allowed { .. })
    }

    /// Where to send the caller, if anywhere.
    pub fn redirect(&self) -> Option<&str> {
        match self {
            AccessDecision::Allowed { .. } => None,
            AccessDecision::Denied { redirect, .. }
            | AccessDecision::Unauthenticated { redirect } => Some(redirect),
        }
    }

    /// Convert into the caller's level or the matching error.
    pub fn into_result(self) -> Result<RoleLevel> {
        match self {
            AccessDecision::Allowed { role } => Ok(role),
            AccessDecision::Denied { role, required, .. } => Err(AuthError::PermissionDenied(
                format!("'{}' required, caller is '{}'", required, role),
            )),
            AccessDecision::Unauthenticated { redirect } => Err(AuthError::Unauthenticated(
                format!("sign in at {}", redirect),
            )),
        }
    }
}

/// Gates protected operations by minimum role level.
pub struct AccessGuard<S> {
    resolver: RoleResolver<S>,
}

impl<S> Clone for AccessGuard<S> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
        }
    }
}

impl<S: DocumentStore + 'static> AccessGuard<S> {
    /// Create a guard over a resolver.
    pub fn new(resolver: RoleResolver<S>) -> Self {
        Self { resolver }
    }

    /// The underlying resolver.
    pub fn resolver(&self) -> &RoleResolver<S> {
        &self.resolver
    }

    /// Decide whether `identity` may access something requiring `required`.
    pub async fn check_access(
        &self,
        identity: Option<&Identity>,
        required: RoleLevel,
    ) -> AccessDecision {
        let config = self.resolver.config();
        let journal = self.resolver.journal();

        let Some(identity) = identity else {
            journal.record(JournalEvent::new(
                JournalEventKind::Unauthenticated,
                "anonymous",
                "anonymous",
                format!("'{}' required, no identity", required),
            ));
            return AccessDecision::Unauthenticated {
                redirect: config.login_path.clone(),
            };
        };

        let role = match self.resolver.resolve_role(identity).await {
            Ok(role) => role,
            Err(e) => {
                tracing::warn!(user = %identity.id, error = %e, "access check could not resolve role");
                return AccessDecision::Unauthenticated {
                    redirect: config.login_path.clone(),
                };
            }
        };

        if config.role_hierarchy.satisfies(role, required) {
            tracing::trace!(user = %identity.id, %role, %required, "access allowed");
            AccessDecision::Allowed { role }
        } else {
            journal.record(JournalEvent::new(
                JournalEventKind::AccessDenied,
                identity.id.clone(),
                identity.id.clone(),
                format!("'{}' required, caller is '{}'", required, role),
            ));
            AccessDecision::Denied {
                role,
                required,
                redirect: config.denied_path.clone(),
            }
        }
    }

    /// Verify a credential with `provider`, then check access.
    ///
    /// Identity verification is bounded by the total deadline.
    pub async fn check_credential<P>(
        &self,
        provider: &P,
        credential: Option<&Credential>,
        required: RoleLevel,
    ) -> AccessDecision
    where
        P: IdentityProvider + ?Sized,
    {
        let identity = match credential {
            Some(credential) => {
                let total = self.resolver.config().total_timeout();
                match tokio::time::timeout(total, provider.verify_identity(credential)).await {
                    Ok(identity) => identity,
                    Err(_) => {
                        tracing::warn!(timeout = ?total, "identity verification timed out");
                        None
                    }
                }
            }
            None => None,
        };
        self.check_access(identity.as_ref(), required).await
    }

    /// Run `operation` only if the caller holds `required`.
    ///
    /// The operation receives the caller's effective level. Denials surface as
    /// [`AuthError::PermissionDenied`] or [`AuthError::Unauthenticated`].
    pub async fn guarded<F, Fut, T>(
        &self,
        identity: Option<&Identity>,
        required: RoleLevel,
        operation: F,
    ) -> Result<T>
    where
        F: FnOnce(RoleLevel) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let role = self.check_access(identity, required).await.into_result()?;
        operation(role).await
    }
}
