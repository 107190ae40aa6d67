//! Effective role resolution.
//!
//! Resolution order:
//! 1. Allowlisted email: `system_admin`, without touching the store
//! 2. Stored user record (bounded by the per-document deadline)
//! 3. No record: `employee`, and a default record is created in the background
//! 4. Read failure or deadline: `employee` (degraded mode)
//!
//! The whole resolution is bounded by the total deadline; exceeding it means
//! the caller is unauthenticated rather than least-privileged.

use crate::config::{normalize_email, AccessConfig};
use crate::error::{AuthError, Result};
use crate::identity::Identity;
use crate::journal::{Journal, JournalEvent, JournalEventKind};
use crate::model::{UserRecord, USERS};
use crate::role::RoleLevel;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use warden_store::{to_fields, DocumentStore, StoreError};

/// Where a resolved role came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleSource {
    /// Configured allowlist match.
    Allowlist,
    /// Stored user record.
    Record,
    /// Explicit system-admin flag on the user record.
    SystemAdminFlag,
    /// No record yet; least-privilege default.
    NewIdentity,
    /// Store read failed or timed out; least-privilege fallback.
    Degraded,
}

/// Outcome of a role resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedRole {
    /// Effective level.
    pub level: RoleLevel,
    /// How it was derived.
    pub source: RoleSource,
}

impl ResolvedRole {
    fn new(level: RoleLevel, source: RoleSource) -> Self {
        Self { level, source }
    }
}

/// Computes effective privilege levels.
///
/// Holds no per-identity cache: every call reads current state.
pub struct RoleResolver<S> {
    store: Arc<S>,
    config: Arc<AccessConfig>,
    journal: Arc<Journal>,
    provisioning: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl<S> Clone for RoleResolver<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
            journal: Arc::clone(&self.journal),
            provisioning: Arc::clone(&self.provisioning),
        }
    }
}

impl<S: DocumentStore + 'static> RoleResolver<S> {
    /// Create a resolver.
    pub fn new(store: Arc<S>, config: Arc<AccessConfig>, journal: Arc<Journal>) -> Self {
        Self {
            store,
            config,
            journal,
            provisioning: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared configuration.
    pub fn config(&self) -> &Arc<AccessConfig> {
        &self.config
    }

    /// Shared journal.
    pub fn journal(&self) -> &Arc<Journal> {
        &self.journal
    }

    /// Effective level of `identity`.
    ///
    /// Fails only with [`AuthError::Unauthenticated`] when the total deadline
    /// is exceeded.
    pub async fn resolve_role(&self, identity: &Identity) -> Result<RoleLevel> {
        Ok(self.resolve(identity).await?.level)
    }

    /// Effective level of `identity`, with its source.
    pub async fn resolve(&self, identity: &Identity) -> Result<ResolvedRole> {
        let total = self.config.total_timeout();
        match tokio::time::timeout(total, self.resolve_unbounded(identity)).await {
            Ok(resolved) => {
                tracing::debug!(
                    user = %identity.id,
                    level = %resolved.level,
                    source = ?resolved.source,
                    "role resolved"
                );
                Ok(resolved)
            }
            Err(_) => {
                let detail = format!("role resolution exceeded {:?}", total);
                self.journal.record(JournalEvent::new(
                    JournalEventKind::Unauthenticated,
                    "system",
                    identity.id.clone(),
                    detail.clone(),
                ));
                Err(AuthError::Unauthenticated(detail))
            }
        }
    }

    /// Wait for every scheduled default-record creation to finish.
    pub async fn flush_provisioning(&self) {
        let pending = std::mem::take(&mut *self.provisioning.lock());
        for handle in pending {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "provisioning task failed");
            }
        }
    }

    async fn resolve_unbounded(&self, identity: &Identity) -> ResolvedRole {
        if self.config.system_admins.contains(&identity.email) {
            return ResolvedRole::new(RoleLevel::SystemAdmin, RoleSource::Allowlist);
        }

        let read = self
            .store
            .get_within(USERS, &identity.id, self.config.doc_timeout())
            .await;

        match read {
            Ok(Some(doc)) => match doc.decode::<UserRecord>() {
                Ok(record) => self.role_from_record(identity, &record),
                Err(e) => self.degraded(identity, &e),
            },
            Ok(None) => {
                self.schedule_provisioning(identity);
                ResolvedRole::new(RoleLevel::Employee, RoleSource::NewIdentity)
            }
            Err(e) => self.degraded(identity, &e),
        }
    }

    fn role_from_record(&self, identity: &Identity, record: &UserRecord) -> ResolvedRole {
        if record.is_system_admin_flag {
            return ResolvedRole::new(RoleLevel::SystemAdmin, RoleSource::SystemAdminFlag);
        }
        if let Some(email) = &record.email {
            if self.config.system_admins.contains(email) {
                return ResolvedRole::new(RoleLevel::SystemAdmin, RoleSource::Allowlist);
            }
        }
        if record.role == RoleLevel::SystemAdmin {
            // Stored role alone never grants system_admin.
            tracing::warn!(
                user = %identity.id,
                "stored system_admin role without flag or allowlist match, capping to admin"
            );
            return ResolvedRole::new(RoleLevel::Admin, RoleSource::Record);
        }
        ResolvedRole::new(record.role, RoleSource::Record)
    }

    fn degraded(&self, identity: &Identity, cause: &StoreError) -> ResolvedRole {
        let error = match cause {
            StoreError::Timeout(t) => {
                AuthError::TimeoutDegraded(format!("user record read exceeded {:?}", t))
            }
            other => AuthError::from(other.clone()),
        };
        tracing::warn!(
            user = %identity.id,
            error = %error,
            "role lookup degraded, falling back to employee"
        );
        self.journal.record(JournalEvent::new(
            JournalEventKind::DegradedResolution,
            "system",
            identity.id.clone(),
            error.to_string(),
        ));
        ResolvedRole::new(RoleLevel::Employee, RoleSource::Degraded)
    }

    fn schedule_provisioning(&self, identity: &Identity) {
        let fields = match to_fields(&UserRecord::provisioned(identity)) {
            Ok(fields) => fields,
            Err(e) => {
                tracing::error!(user = %identity.id, error = %e, "cannot encode default user record");
                return;
            }
        };

        let store = Arc::clone(&self.store);
        let journal = Arc::clone(&self.journal);
        let user_id = identity.id.clone();
        let handle = tokio::spawn(async move {
            // Create-if-absent so a concurrent promotion is never overwritten.
            match store.create(USERS, &user_id, fields).await {
                Ok(true) => {
                    journal.record(JournalEvent::new(
                        JournalEventKind::RecordProvisioned,
                        "system",
                        user_id,
                        "default employee record created",
                    ));
                }
                Ok(false) => {
                    tracing::debug!(user = %user_id, "user record appeared concurrently");
                }
                Err(e) => {
                    tracing::warn!(user = %user_id, error = %e, "default user record not created");
                }
            }
        });

        let mut pending = self.provisioning.lock();
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }
}
