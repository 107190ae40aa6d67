//! A node serving one snapshot-backed store.
//!
//! The snapshot file is read once on open and written back after every
//! command that may have changed it.

use crate::config::NodeConfig;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use warden_access::{
    AccessControl, AccessDecision, AssignmentReport, AuthError, Drift, Identity, RepairSummary,
    ResolvedRole, RoleLevel,
};
use warden_store::{MemoryDocumentStore, Snapshot};

/// An assignment command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    /// Make a user supervisor of `departments`.
    Promote {
        /// Target user.
        user_id: String,
        /// Departments to supervise.
        departments: BTreeSet<String>,
    },
    /// Return a supervisor to employee.
    Demote {
        /// Target user.
        user_id: String,
    },
    /// Make a user admin.
    PromoteAdmin {
        /// Target user.
        user_id: String,
    },
    /// Return an admin to employee.
    DemoteAdmin {
        /// Target user.
        user_id: String,
    },
}

/// Result of `audit`, with the repair summary when one ran.
#[derive(Debug, Clone, Serialize)]
pub struct AuditOutcome {
    /// Drift found by the audit.
    pub drifts: Vec<Drift>,
    /// What repair did, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repair: Option<RepairSummary>,
}

/// Access control over a JSON snapshot.
pub struct Node {
    config: NodeConfig,
    snapshot_path: PathBuf,
    store: Arc<MemoryDocumentStore>,
    access: AccessControl<MemoryDocumentStore>,
}

/// Read a snapshot file; a missing file is an empty store.
pub fn read_snapshot(path: &Path) -> Result<Snapshot> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "snapshot not found, starting empty");
        return Ok(Snapshot::default());
    }
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read snapshot {}", path.display()))?;
    serde_json::from_str(&json)
        .with_context(|| format!("malformed snapshot {}", path.display()))
}

/// Write a snapshot file, replacing it atomically.
pub fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot)?;
    let staging = path.with_extension("tmp");
    std::fs::write(&staging, json)
        .with_context(|| format!("failed to write {}", staging.display()))?;
    std::fs::rename(&staging, path)
        .with_context(|| format!("failed to replace snapshot {}", path.display()))?;
    Ok(())
}

impl Node {
    /// Load the snapshot at `snapshot_path` and wire access control over it.
    pub fn open(config: NodeConfig, snapshot_path: impl Into<PathBuf>) -> Result<Self> {
        let snapshot_path = snapshot_path.into();
        let snapshot = read_snapshot(&snapshot_path)?;
        let documents: usize = snapshot.collections.values().map(|docs| docs.len()).sum();
        let store = Arc::new(MemoryDocumentStore::from_snapshot(snapshot));
        let access = AccessControl::new(Arc::clone(&store), config.access.clone())
            .context("invalid access configuration")?;

        tracing::info!(
            snapshot = %snapshot_path.display(),
            documents,
            departments = config.access.departments.len(),
            "node opened"
        );
        Ok(Self {
            config,
            snapshot_path,
            store,
            access,
        })
    }

    /// Node configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Access-control components over the snapshot store.
    pub fn access(&self) -> &AccessControl<MemoryDocumentStore> {
        &self.access
    }

    /// Persist the store back to the snapshot file.
    pub fn save(&self) -> Result<()> {
        write_snapshot(&self.snapshot_path, &self.store.snapshot())?;
        tracing::debug!(snapshot = %self.snapshot_path.display(), "snapshot saved");
        Ok(())
    }

    /// Resolve an identity's role, persisting any lazily created record.
    pub async fn resolve(&self, identity: &Identity) -> Result<ResolvedRole> {
        let resolved = self.access.resolver().resolve(identity).await?;
        self.access.resolver().flush_provisioning().await;
        self.save()?;
        Ok(resolved)
    }

    /// Check an identity against `required`, persisting any lazily created
    /// record.
    pub async fn check(&self, identity: &Identity, required: RoleLevel) -> Result<AccessDecision> {
        let decision = self.access.guard().check_access(Some(identity), required).await;
        self.access.resolver().flush_provisioning().await;
        self.save()?;
        Ok(decision)
    }

    /// Run an assignment and save whatever it wrote.
    ///
    /// A partial assignment still yields its report; callers decide how to
    /// surface [`AssignmentReport::is_complete`].
    pub async fn assign(&self, actor: &str, assignment: &Assignment) -> Result<AssignmentReport> {
        let manager = self.access.assignments();
        let result = match assignment {
            Assignment::Promote {
                user_id,
                departments,
            } => manager.promote_to_supervisor(actor, user_id, departments).await,
            Assignment::Demote { user_id } => manager.demote(actor, user_id).await,
            Assignment::PromoteAdmin { user_id } => manager.promote_to_admin(actor, user_id).await,
            Assignment::DemoteAdmin { user_id } => {
                manager.demote_admin_to_employee(actor, user_id).await
            }
        };
        let report = match result {
            Ok(report) | Err(AuthError::PartialAssignment(report)) => report,
            Err(e) => return Err(e.into()),
        };
        self.save()?;
        Ok(report)
    }

    /// Audit supervisor records, repairing when asked.
    pub async fn audit(&self, repair: bool) -> Result<AuditOutcome> {
        let auditor = self.access.auditor();
        let drifts = auditor.audit_supervisors().await?;
        let repair = if repair {
            let summary = auditor.repair(&drifts).await?;
            self.save()?;
            Some(summary)
        } else {
            None
        };
        Ok(AuditOutcome { drifts, repair })
    }

    /// Run the audit schedule and the store heartbeat until `stop`
    /// completes, then save.
    pub async fn watch<F>(&self, stop: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let (shutdown, rx) = watch::channel(false);
        let audits = Arc::clone(self.access.auditor())
            .spawn_schedule(self.config.audit_interval(), rx.clone());
        let heartbeat =
            Arc::new(self.access.heartbeat()).spawn(self.config.heartbeat_interval(), rx);
        tracing::info!(
            audit_every = ?self.config.audit_interval(),
            heartbeat_every = ?self.config.heartbeat_interval(),
            "watching"
        );

        stop.await;
        tracing::info!("shutting down");
        let _ = shutdown.send(true);
        audits.await?;
        heartbeat.await?;
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use warden_access::{DriftKind, JournalEventKind};

    fn config() -> NodeConfig {
        let mut config = NodeConfig::default();
        config.access = config
            .access
            .with_system_admins(["root@x.com"])
            .with_departments(["ops", "finance"]);
        config
    }

    fn departments(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_missing_snapshot_starts_empty() {
        let dir = TempDir::new().unwrap();
        let node = Node::open(config(), dir.path().join("store.json")).unwrap();
        assert!(node.audit(false).await.unwrap().drifts.is_empty());
    }

    #[test]
    fn test_malformed_snapshot_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = Node::open(config(), &path).err().unwrap();
        assert!(err.to_string().contains("malformed snapshot"));
    }

    #[tokio::test]
    async fn test_assignments_persist_across_opens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");

        let node = Node::open(config(), &path).unwrap();
        let report = node
            .assign(
                "root",
                &Assignment::Promote {
                    user_id: "u1".into(),
                    departments: departments(&["ops"]),
                },
            )
            .await
            .unwrap();
        assert!(report.is_complete());
        assert_eq!(report.written(), 3);

        let reopened = Node::open(config(), &path).unwrap();
        let u1 = Identity::new("u1", "u1@x.com");
        assert_eq!(reopened.resolve(&u1).await.unwrap().level, RoleLevel::Supervisor);
        assert!(reopened.check(&u1, RoleLevel::Supervisor).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_resolve_persists_provisioned_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        let node = Node::open(config(), &path).unwrap();

        let newcomer = Identity::new("u9", "u9@x.com").verified();
        assert_eq!(node.resolve(&newcomer).await.unwrap().level, RoleLevel::Employee);

        let snapshot = read_snapshot(&path).unwrap();
        assert!(snapshot.collections["users"].contains_key("u9"));
    }

    #[tokio::test]
    async fn test_invalid_assignment_is_an_error() {
        let dir = TempDir::new().unwrap();
        let node = Node::open(config(), dir.path().join("store.json")).unwrap();
        let err = node
            .assign(
                "root",
                &Assignment::Promote {
                    user_id: "u1".into(),
                    departments: departments(&["unknown"]),
                },
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown department"));
    }

    #[tokio::test]
    async fn test_audit_repair_writes_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        let node = Node::open(config(), &path).unwrap();
        node.assign(
            "root",
            &Assignment::Promote {
                user_id: "u1".into(),
                departments: departments(&["ops", "finance"]),
            },
        )
        .await
        .unwrap();

        // Drop the finance membership behind the node's back.
        let mut snapshot = read_snapshot(&path).unwrap();
        snapshot
            .collections
            .get_mut("departments/finance/supervisors")
            .unwrap()
            .remove("u1");
        write_snapshot(&path, &snapshot).unwrap();

        let node = Node::open(config(), &path).unwrap();
        let outcome = node.audit(true).await.unwrap();
        assert_eq!(outcome.drifts.len(), 1);
        assert_eq!(outcome.drifts[0].kind, DriftKind::StaleDirectory);
        assert_eq!(outcome.repair.unwrap().regenerated, vec!["u1".to_string()]);

        let node = Node::open(config(), &path).unwrap();
        assert!(node.audit(false).await.unwrap().drifts.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_runs_schedules_until_stopped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        let node = Node::open(config(), &path).unwrap();

        node.watch(tokio::time::sleep(Duration::from_secs(601)))
            .await
            .unwrap();

        assert_eq!(node.access().auditor().last_run(), Some(vec![]));
        assert!(path.exists());
        assert!(node
            .access()
            .journal()
            .by_kind(JournalEventKind::StoreDegraded)
            .is_empty());
    }
}
