//! Access control for Warden.
//!
//! This crate provides:
//! - **Role resolution**: effective privilege level of an identity
//! - **Access guarding**: allow/deny/redirect decisions at the entry boundary
//! - **Supervisor assignment**: convergent promotion and demotion across the
//!   user, membership and directory records
//! - **Consistency auditing**: drift detection and repair across those records
//! - **Store heartbeat**: periodic liveness probing for degraded-mode banners
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeSet;
//! use std::sync::Arc;
//! use warden_access::{AccessConfig, AccessControl, Identity, RoleLevel};
//! use warden_store::MemoryDocumentStore;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let config = AccessConfig::default()
//!     .with_system_admins(["admin@x.com"])
//!     .with_departments(["dept-a"]);
//! let access = AccessControl::new(Arc::new(MemoryDocumentStore::new()), config).unwrap();
//!
//! let root = Identity::new("root", " Admin@X.com ");
//! assert_eq!(access.resolver().resolve_role(&root).await.unwrap(), RoleLevel::SystemAdmin);
//!
//! let departments: BTreeSet<String> = ["dept-a".to_string()].into();
//! access.assignments().promote_to_supervisor("root", "u1", &departments).await.unwrap();
//! access.assignments().demote("root", "u1").await.unwrap();
//! assert!(access.auditor().audit_supervisors().await.unwrap().is_empty());
//! # });
//! ```

#![warn(missing_docs)]

mod assignment;
mod auditor;
mod config;
mod error;
mod guard;
mod heartbeat;
mod identity;
mod journal;
mod model;
mod resolver;
mod role;

pub use assignment::{
    AssignmentReport, RecordRef, RecordWrite, SupervisorAssignmentManager, WriteOutcome,
};
pub use auditor::{ConsistencyAuditor, Drift, DriftKind, RepairSummary};
pub use config::{normalize_email, AccessConfig, Allowlist};
pub use error::{AuthError, Result};
pub use guard::{AccessDecision, AccessGuard};
pub use heartbeat::{HealthStatus, StoreHealth, StoreHeartbeat};
pub use identity::{Credential, Identity, IdentityProvider, StaticIdentityProvider};
pub use journal::{Journal, JournalEntry, JournalEvent, JournalEventKind, Severity};
pub use model::{
    department_supervisors, DirectoryEntry, Membership, UserRecord, UserStatus, SUPERVISORS,
    USERS,
};
pub use resolver::{ResolvedRole, RoleResolver, RoleSource};
pub use role::{RoleHierarchy, RoleLevel};

use std::sync::Arc;
use warden_store::DocumentStore;

/// Every access-control component wired to one store, configuration and
/// journal.
pub struct AccessControl<S> {
    store: Arc<S>,
    config: Arc<AccessConfig>,
    journal: Arc<Journal>,
    guard: AccessGuard<S>,
    assignments: SupervisorAssignmentManager<S>,
    auditor: Arc<ConsistencyAuditor<S>>,
}

impl<S: DocumentStore + 'static> AccessControl<S> {
    /// Validate `config` and build every component.
    pub fn new(store: Arc<S>, config: AccessConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let journal = Arc::new(Journal::new());
        let resolver = RoleResolver::new(
            Arc::clone(&store),
            Arc::clone(&config),
            Arc::clone(&journal),
        );
        Ok(Self {
            guard: AccessGuard::new(resolver),
            assignments: SupervisorAssignmentManager::new(
                Arc::clone(&store),
                Arc::clone(&config),
                Arc::clone(&journal),
            ),
            auditor: Arc::new(ConsistencyAuditor::new(
                Arc::clone(&store),
                Arc::clone(&config),
                Arc::clone(&journal),
            )),
            store,
            config,
            journal,
        })
    }

    /// Shared configuration.
    pub fn config(&self) -> &AccessConfig {
        &self.config
    }

    /// Shared event journal.
    pub fn journal(&self) -> &Arc<Journal> {
        &self.journal
    }

    /// Role resolver.
    pub fn resolver(&self) -> &RoleResolver<S> {
        self.guard.resolver()
    }

    /// Access guard.
    pub fn guard(&self) -> &AccessGuard<S> {
        &self.guard
    }

    /// Assignment manager.
    pub fn assignments(&self) -> &SupervisorAssignmentManager<S> {
        &self.assignments
    }

    /// Consistency auditor.
    pub fn auditor(&self) -> &Arc<ConsistencyAuditor<S>> {
        &self.auditor
    }

    /// Store heartbeat probing with the per-document deadline.
    pub fn heartbeat(&self) -> StoreHeartbeat<S> {
        StoreHeartbeat::new(
            Arc::clone(&self.store),
            self.config.doc_timeout(),
            Arc::clone(&self.journal),
        )
    }
}

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use warden_store::MemoryDocumentStore;

    #[test]
    fn test_invalid_config_rejected() {
        let config = AccessConfig {
            denied_path: "/login".into(),
            ..AccessConfig::default()
        };
        let result = AccessControl::new(Arc::new(MemoryDocumentStore::new()), config);
        assert!(matches!(result, Err(AuthError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_components_share_journal() {
        let access = AccessControl::new(
            Arc::new(MemoryDocumentStore::new()),
            AccessConfig::default().with_departments(["d1"]),
        )
        .unwrap();
        let departments: std::collections::BTreeSet<String> = ["d1".to_string()].into();
        access
            .assignments()
            .promote_to_supervisor("admin", "u1", &departments)
            .await
            .unwrap();
        access.guard().check_access(None, RoleLevel::Employee).await;

        assert_eq!(access.journal().len(), 2);
        assert_eq!(access.heartbeat().probe().await.status, HealthStatus::Up);
    }
}
