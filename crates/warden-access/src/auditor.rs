//! Drift detection across role, membership and directory records.
//!
//! Sources of truth:
//! - the membership set decides which departments a user supervises
//! - the role field decides whether the user is a supervisor at all
//! - the directory is a cache, always safe to regenerate from memberships

use crate::config::AccessConfig;
use crate::error::Result;
use crate::journal::{Journal, JournalEvent, JournalEventKind};
use crate::model::{
    department_supervisors, DirectoryEntry, Membership, UserRecord, SUPERVISORS, USERS,
};
use crate::role::RoleLevel;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use warden_store::{to_fields, Document, DocumentStore};

/// Kind of divergence between a user's records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriftKind {
    /// Role is supervisor but no active membership exists.
    OrphanedRole,
    /// An active membership exists but the role is not supervisor.
    OrphanedMembership,
    /// The directory entry disagrees with the active memberships.
    StaleDirectory,
}

impl fmt::Display for DriftKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriftKind::OrphanedRole => f.write_str("orphaned-role"),
            DriftKind::OrphanedMembership => f.write_str("orphaned-membership"),
            DriftKind::StaleDirectory => f.write_str("stale-directory"),
        }
    }
}

/// A detected mismatch for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Drift {
    /// Affected user.
    pub user_id: String,
    /// What diverged.
    pub kind: DriftKind,
    /// Human-readable description.
    pub detail: String,
}

/// What a repair pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairSummary {
    /// Users whose directory entry was regenerated.
    pub regenerated: Vec<String>,
    /// Users whose orphaned memberships were removed.
    pub revoked: Vec<String>,
    /// Drift that needs an operator decision.
    pub unresolved: Vec<Drift>,
}

// Everything the auditor needs from one consistent-enough read pass.
#[derive(Default)]
struct View {
    roles: BTreeMap<String, RoleLevel>,
    memberships: BTreeMap<String, BTreeSet<String>>,
    directory: BTreeMap<String, BTreeSet<String>>,
}

/// Detects and repairs drift among the three permission records.
pub struct ConsistencyAuditor<S> {
    store: Arc<S>,
    config: Arc<AccessConfig>,
    journal: Arc<Journal>,
    last_run: RwLock<Option<Vec<Drift>>>,
}

impl<S: DocumentStore + 'static> ConsistencyAuditor<S> {
    /// Create an auditor.
    pub fn new(store: Arc<S>, config: Arc<AccessConfig>, journal: Arc<Journal>) -> Self {
        Self {
            store,
            config,
            journal,
            last_run: RwLock::new(None),
        }
    }

    /// Drift found by the most recent successful audit.
    pub fn last_run(&self) -> Option<Vec<Drift>> {
        self.last_run.read().clone()
    }

    /// Report every user whose records disagree, sorted by user id.
    ///
    /// At most one drift is reported per user, in precedence order
    /// orphaned-role, orphaned-membership, stale-directory.
    pub async fn audit_supervisors(&self) -> Result<Vec<Drift>> {
        let view = self.load().await?;

        let users: BTreeSet<&String> = view
            .roles
            .iter()
            .filter(|(_, role)| **role == RoleLevel::Supervisor)
            .map(|(id, _)| id)
            .chain(view.memberships.keys())
            .chain(view.directory.keys())
            .collect();

        let empty = BTreeSet::new();
        let mut drifts = Vec::new();
        for user_id in users {
            let role = view.roles.get(user_id).copied();
            let active = view.memberships.get(user_id).unwrap_or(&empty);
            if let Some(drift) = classify(user_id, role, active, view.directory.get(user_id)) {
                drifts.push(drift);
            }
        }

        for drift in &drifts {
            self.journal.record(JournalEvent::new(
                JournalEventKind::DriftDetected,
                "auditor",
                drift.user_id.clone(),
                format!("{}: {}", drift.kind, drift.detail),
            ));
        }
        tracing::info!(
            users = view.roles.len(),
            departments = self.config.departments.len(),
            drift = drifts.len(),
            "supervisor audit complete"
        );

        *self.last_run.write() = Some(drifts.clone());
        Ok(drifts)
    }

    /// Departments in which `user_id` holds an active membership.
    pub async fn supervised_departments(&self, user_id: &str) -> Result<BTreeSet<String>> {
        let mut departments = BTreeSet::new();
        for department_id in &self.config.departments {
            let doc = self
                .store
                .get_within(
                    &department_supervisors(department_id),
                    user_id,
                    self.config.doc_timeout(),
                )
                .await?;
            let membership = doc.and_then(|doc| decode_or_skip::<Membership>(&doc, "membership"));
            if membership.is_some_and(|m| m.active) {
                departments.insert(department_id.clone());
            }
        }
        Ok(departments)
    }

    /// Rewrite the directory entry of `user_id` from its memberships.
    pub async fn regenerate_directory(&self, user_id: &str) -> Result<()> {
        let departments = self.supervised_departments(user_id).await?;
        if departments.is_empty() {
            self.store.delete(SUPERVISORS, user_id).await?;
            return Ok(());
        }

        let home = match self
            .store
            .get_within(USERS, user_id, self.config.doc_timeout())
            .await?
        {
            Some(doc) => doc.decode::<UserRecord>()?.home_department_id,
            None => None,
        };
        let entry = DirectoryEntry::new(departments, home);
        self.store
            .set(SUPERVISORS, user_id, to_fields(&entry)?, false)
            .await?;
        Ok(())
    }

    /// Repair what can be re-derived.
    ///
    /// `drifts` only names the users to look at: each one is re-classified
    /// from current records before anything is written, so a report that
    /// raced a promotion or demotion never undoes it.
    ///
    /// Stale directories are regenerated. Orphaned memberships are removed,
    /// since the role says the user is not a supervisor. Orphaned roles are
    /// left for an operator, since nothing says which departments were
    /// meant, but their directory entry is still regenerated. Users whose
    /// record cannot be decoded are left unresolved.
    pub async fn repair(&self, drifts: &[Drift]) -> Result<RepairSummary> {
        let mut summary = RepairSummary::default();
        let users: BTreeSet<&str> = drifts.iter().map(|d| d.user_id.as_str()).collect();
        for user_id in users {
            let role = match self
                .store
                .get_within(USERS, user_id, self.config.doc_timeout())
                .await?
            {
                Some(doc) => match decode_or_skip::<UserRecord>(&doc, "user record") {
                    Some(record) => Some(record.role),
                    None => {
                        if let Some(drift) = drifts.iter().find(|d| d.user_id == user_id) {
                            summary.unresolved.push(drift.clone());
                        }
                        continue;
                    }
                },
                None => None,
            };
            let active = self.supervised_departments(user_id).await?;
            let listed = self
                .store
                .get_within(SUPERVISORS, user_id, self.config.doc_timeout())
                .await?;
            let listed_departments = listed
                .as_ref()
                .and_then(|doc| decode_or_skip::<DirectoryEntry>(doc, "directory entry"))
                .map(|entry| entry.departments());

            let Some(current) = classify(user_id, role, &active, listed_departments.as_ref()) else {
                tracing::debug!(user = %user_id, "drift resolved since audit");
                continue;
            };

            match current.kind {
                DriftKind::StaleDirectory => {
                    self.regenerate_directory(user_id).await?;
                    self.journal.record(JournalEvent::new(
                        JournalEventKind::DirectoryRepaired,
                        "auditor",
                        user_id,
                        current.detail.clone(),
                    ));
                    summary.regenerated.push(user_id.to_string());
                }
                DriftKind::OrphanedMembership => {
                    for department_id in &active {
                        self.store
                            .delete(&department_supervisors(department_id), user_id)
                            .await?;
                    }
                    self.regenerate_directory(user_id).await?;
                    self.journal.record(JournalEvent::new(
                        JournalEventKind::MembershipsRevoked,
                        "auditor",
                        user_id,
                        current.detail.clone(),
                    ));
                    summary.revoked.push(user_id.to_string());
                }
                DriftKind::OrphanedRole => {
                    if listed.is_some() {
                        self.regenerate_directory(user_id).await?;
                        self.journal.record(JournalEvent::new(
                            JournalEventKind::DirectoryRepaired,
                            "auditor",
                            user_id,
                            "directory entry removed, no active membership",
                        ));
                        summary.regenerated.push(user_id.to_string());
                    }
                    summary.unresolved.push(current);
                }
            }
        }
        Ok(summary)
    }

    /// Run [`Self::audit_supervisors`] every `every` until `shutdown` flips
    /// to true or its sender is dropped.
    pub fn spawn_schedule(
        self: Arc<Self>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.audit_supervisors().await {
                            tracing::warn!(error = %e, "scheduled audit failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::debug!("audit schedule stopped");
                            break;
                        }
                    }
                }
            }
        })
    }

    async fn load(&self) -> Result<View> {
        let mut view = View::default();

        for doc in self.store.list(USERS).await? {
            if let Some(record) = decode_or_skip::<UserRecord>(&doc, "user record") {
                view.roles.insert(doc.id, record.role);
            }
        }

        for department_id in &self.config.departments {
            for doc in self.store.list(&department_supervisors(department_id)).await? {
                let membership = decode_or_skip::<Membership>(&doc, "membership");
                if membership.is_some_and(|m| m.active) {
                    view.memberships
                        .entry(doc.id)
                        .or_default()
                        .insert(department_id.clone());
                }
            }
        }

        for doc in self.store.list(SUPERVISORS).await? {
            // Undecodable entries count as missing.
            if let Some(entry) = decode_or_skip::<DirectoryEntry>(&doc, "directory entry") {
                view.directory.insert(doc.id, entry.departments());
            }
        }

        Ok(view)
    }
}

/// The single drift of one user, in precedence order.
fn classify(
    user_id: &str,
    role: Option<RoleLevel>,
    active: &BTreeSet<String>,
    listed: Option<&BTreeSet<String>>,
) -> Option<Drift> {
    let (kind, detail) = if role == Some(RoleLevel::Supervisor) && active.is_empty() {
        (
            DriftKind::OrphanedRole,
            "role is supervisor but no active membership exists".to_string(),
        )
    } else if role != Some(RoleLevel::Supervisor) && !active.is_empty() {
        let role = role.map_or("missing".to_string(), |r| r.to_string());
        (
            DriftKind::OrphanedMembership,
            format!("role is {} but active memberships in [{}]", role, join(active)),
        )
    } else if listed.map_or(!active.is_empty(), |listed| listed != active) {
        (
            DriftKind::StaleDirectory,
            match listed {
                Some(listed) => format!(
                    "directory lists [{}], memberships are [{}]",
                    join(listed),
                    join(active)
                ),
                None => format!("directory entry missing for [{}]", join(active)),
            },
        )
    } else {
        return None;
    };
    Some(Drift {
        user_id: user_id.to_string(),
        kind,
        detail,
    })
}

fn decode_or_skip<T: DeserializeOwned>(doc: &Document, what: &str) -> Option<T> {
    match doc.decode() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(id = %doc.id, error = %e, "skipping undecodable {}", what);
            None
        }
    }
}

fn join(departments: &BTreeSet<String>) -> String {
    departments.iter().cloned().collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::SupervisorAssignmentManager;
    use warden_store::MemoryDocumentStore;

    struct Fixture {
        store: Arc<MemoryDocumentStore>,
        manager: SupervisorAssignmentManager<MemoryDocumentStore>,
        auditor: Arc<ConsistencyAuditor<MemoryDocumentStore>>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryDocumentStore::new());
        let config = Arc::new(AccessConfig::default().with_departments(["d1", "d2", "d3"]));
        let journal = Arc::new(Journal::new());
        Fixture {
            manager: SupervisorAssignmentManager::new(
                Arc::clone(&store),
                Arc::clone(&config),
                Arc::clone(&journal),
            ),
            auditor: Arc::new(ConsistencyAuditor::new(Arc::clone(&store), config, journal)),
            store,
        }
    }

    fn depts(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_promoted_user_has_no_drift() {
        let f = fixture();
        f.manager
            .promote_to_supervisor("admin", "u1", &depts(&["d1", "d2"]))
            .await
            .unwrap();
        assert!(f.auditor.audit_supervisors().await.unwrap().is_empty());
        assert_eq!(f.auditor.last_run(), Some(vec![]));
    }

    #[tokio::test]
    async fn test_deleted_membership_with_others_left_is_stale_directory() {
        let f = fixture();
        f.manager
            .promote_to_supervisor("admin", "u1", &depts(&["d1", "d2"]))
            .await
            .unwrap();
        f.store.delete(&department_supervisors("d1"), "u1").await.unwrap();

        let drifts = f.auditor.audit_supervisors().await.unwrap();
        assert_eq!(drifts.len(), 1);
        assert_eq!(drifts[0].user_id, "u1");
        assert_eq!(drifts[0].kind, DriftKind::StaleDirectory);
    }

    #[tokio::test]
    async fn test_deleted_last_membership_is_orphaned_role() {
        let f = fixture();
        f.manager
            .promote_to_supervisor("admin", "u1", &depts(&["d1"]))
            .await
            .unwrap();
        f.store.delete(&department_supervisors("d1"), "u1").await.unwrap();

        let drifts = f.auditor.audit_supervisors().await.unwrap();
        assert_eq!(drifts.len(), 1);
        assert_eq!(drifts[0].kind, DriftKind::OrphanedRole);
    }

    #[tokio::test]
    async fn test_admin_demotion_leaves_orphaned_membership() {
        let f = fixture();
        f.manager
            .promote_to_supervisor("admin", "u1", &depts(&["d2"]))
            .await
            .unwrap();
        f.manager.promote_to_admin("admin", "u1").await.unwrap();
        f.manager.demote_admin_to_employee("admin", "u1").await.unwrap();

        let drifts = f.auditor.audit_supervisors().await.unwrap();
        assert_eq!(drifts.len(), 1);
        assert_eq!(drifts[0].kind, DriftKind::OrphanedMembership);
        assert!(drifts[0].detail.contains("d2"));

        let summary = f.auditor.repair(&drifts).await.unwrap();
        assert_eq!(summary.revoked, vec!["u1".to_string()]);
        assert!(f.auditor.audit_supervisors().await.unwrap().is_empty());
        assert!(f.store.get(SUPERVISORS, "u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_repair_regenerates_stale_directory() {
        let f = fixture();
        f.manager
            .promote_to_supervisor("admin", "u1", &depts(&["d1", "d3"]))
            .await
            .unwrap();
        f.store.delete(SUPERVISORS, "u1").await.unwrap();

        let drifts = f.auditor.audit_supervisors().await.unwrap();
        assert_eq!(drifts[0].kind, DriftKind::StaleDirectory);
        assert!(drifts[0].detail.contains("missing"));

        let summary = f.auditor.repair(&drifts).await.unwrap();
        assert_eq!(summary.regenerated, vec!["u1".to_string()]);
        assert!(f.auditor.audit_supervisors().await.unwrap().is_empty());

        let entry: DirectoryEntry = f
            .store
            .get(SUPERVISORS, "u1")
            .await
            .unwrap()
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(entry.departments(), depts(&["d1", "d3"]));
    }

    #[tokio::test]
    async fn test_orphaned_role_is_left_for_operator() {
        let f = fixture();
        f.manager
            .promote_to_supervisor("admin", "u1", &depts(&["d1"]))
            .await
            .unwrap();
        f.store.delete(&department_supervisors("d1"), "u1").await.unwrap();

        let drifts = f.auditor.audit_supervisors().await.unwrap();
        let summary = f.auditor.repair(&drifts).await.unwrap();
        assert_eq!(summary.unresolved, drifts);
        assert!(summary.revoked.is_empty());

        // The directory no longer claims d1; the role still needs a decision.
        assert_eq!(summary.regenerated, vec!["u1".to_string()]);
        assert!(f.store.get(SUPERVISORS, "u1").await.unwrap().is_none());
        let user: UserRecord = f.store.get(USERS, "u1").await.unwrap().unwrap().decode().unwrap();
        assert_eq!(user.role, RoleLevel::Supervisor);
    }

    #[tokio::test]
    async fn test_repair_keeps_promotion_made_after_audit() {
        let f = fixture();
        f.manager
            .promote_to_supervisor("admin", "u1", &depts(&["d1"]))
            .await
            .unwrap();
        f.manager.promote_to_admin("admin", "u1").await.unwrap();
        f.manager.demote_admin_to_employee("admin", "u1").await.unwrap();
        let drifts = f.auditor.audit_supervisors().await.unwrap();
        assert_eq!(drifts[0].kind, DriftKind::OrphanedMembership);

        // An administrator promotes the user again before repair runs.
        f.manager
            .promote_to_supervisor("admin", "u1", &depts(&["d1"]))
            .await
            .unwrap();
        let summary = f.auditor.repair(&drifts).await.unwrap();

        assert_eq!(summary, RepairSummary::default());
        assert!(f.auditor.audit_supervisors().await.unwrap().is_empty());
        assert_eq!(
            f.auditor.supervised_departments("u1").await.unwrap(),
            depts(&["d1"])
        );
    }

    #[tokio::test]
    async fn test_repair_acts_on_current_drift() {
        let f = fixture();
        f.manager
            .promote_to_supervisor("admin", "u1", &depts(&["d1", "d2"]))
            .await
            .unwrap();
        f.store.delete(SUPERVISORS, "u1").await.unwrap();
        let drifts = f.auditor.audit_supervisors().await.unwrap();
        assert_eq!(drifts[0].kind, DriftKind::StaleDirectory);

        // Demoted in the meantime: nothing is left to regenerate.
        f.manager.demote("admin", "u1").await.unwrap();
        let summary = f.auditor.repair(&drifts).await.unwrap();
        assert!(summary.regenerated.is_empty());
        assert!(f.store.get(SUPERVISORS, "u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_undecodable_documents_are_skipped() {
        let f = fixture();
        f.manager
            .promote_to_supervisor("admin", "u1", &depts(&["d1"]))
            .await
            .unwrap();
        let junk = serde_json::json!({ "active": "yes" });
        f.store
            .set(
                &department_supervisors("d2"),
                "junk",
                junk.as_object().cloned().unwrap(),
                false,
            )
            .await
            .unwrap();
        let bad_entry = serde_json::json!({ "assignedDepartments": 7 });
        f.store
            .set(SUPERVISORS, "u2", bad_entry.as_object().cloned().unwrap(), false)
            .await
            .unwrap();

        assert!(f.auditor.audit_supervisors().await.unwrap().is_empty());
        assert_eq!(
            f.auditor.supervised_departments("junk").await.unwrap(),
            BTreeSet::new()
        );
    }

    #[tokio::test]
    async fn test_undecodable_user_record_is_not_repaired() {
        let f = fixture();
        f.manager
            .promote_to_supervisor("admin", "u1", &depts(&["d1"]))
            .await
            .unwrap();
        let bad_user = serde_json::json!({ "role": "overlord" });
        f.store
            .set(USERS, "u1", bad_user.as_object().cloned().unwrap(), false)
            .await
            .unwrap();

        let drifts = f.auditor.audit_supervisors().await.unwrap();
        assert_eq!(drifts[0].kind, DriftKind::OrphanedMembership);

        let summary = f.auditor.repair(&drifts).await.unwrap();
        assert_eq!(summary.unresolved, drifts);
        assert!(summary.revoked.is_empty());
        assert_eq!(
            f.auditor.supervised_departments("u1").await.unwrap(),
            depts(&["d1"])
        );
    }

    #[tokio::test]
    async fn test_inactive_membership_does_not_count() {
        let f = fixture();
        f.manager
            .promote_to_supervisor("admin", "u1", &depts(&["d1", "d2"]))
            .await
            .unwrap();
        let mut inactive = Membership::new("admin");
        inactive.active = false;
        f.store
            .set(&department_supervisors("d2"), "u1", to_fields(&inactive).unwrap(), false)
            .await
            .unwrap();

        let drifts = f.auditor.audit_supervisors().await.unwrap();
        assert_eq!(drifts.len(), 1);
        assert_eq!(drifts[0].kind, DriftKind::StaleDirectory);
        assert_eq!(
            f.auditor.supervised_departments("u1").await.unwrap(),
            depts(&["d1"])
        );
    }

    #[tokio::test]
    async fn test_results_sorted_and_journaled() {
        let f = fixture();
        for user in ["u3", "u1", "u2"] {
            f.manager
                .promote_to_supervisor("admin", user, &depts(&["d1"]))
                .await
                .unwrap();
            f.store.delete(&department_supervisors("d1"), user).await.unwrap();
        }

        let drifts = f.auditor.audit_supervisors().await.unwrap();
        let ids: Vec<&str> = drifts.iter().map(|d| d.user_id.as_str()).collect();
        assert_eq!(ids, vec!["u1", "u2", "u3"]);
        assert_eq!(f.auditor.journal.by_kind(JournalEventKind::DriftDetected).len(), 3);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_audit() {
        let f = fixture();
        f.store.fail_reads(USERS);
        assert!(f.auditor.audit_supervisors().await.is_err());
        assert!(f.auditor.last_run().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_audit_runs_until_shutdown() {
        let f = fixture();
        f.manager
            .promote_to_supervisor("admin", "u1", &depts(&["d1"]))
            .await
            .unwrap();
        f.store.delete(SUPERVISORS, "u1").await.unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = Arc::clone(&f.auditor).spawn_schedule(Duration::from_secs(60), rx);

        tokio::time::sleep(Duration::from_secs(1)).await;
        let last = f.auditor.last_run().unwrap();
        assert_eq!(last.len(), 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn test_drift_kind_names() {
        assert_eq!(DriftKind::OrphanedRole.to_string(), "orphaned-role");
        assert_eq!(
            serde_json::to_value(DriftKind::StaleDirectory).unwrap(),
            "stale-directory"
        );
    }
}
