//! Supervisor and admin assignment.
//!
//! A supervisor assignment touches three independently stored records: the
//! user's role, one membership per department, and the directory entry. The
//! manager never rolls back. Each operation first reads current state, plans
//! only the writes still needed, then applies them (atomically when the store
//! supports transactions). Replaying an operation after a partial failure
//! converges to the same end state.

use crate::config::AccessConfig;
use crate::error::{AuthError, Result};
use crate::identity::Identity;
use crate::journal::{Journal, JournalEvent, JournalEventKind};
use crate::model::{
    department_supervisors, now, DirectoryEntry, Membership, UserRecord, SUPERVISORS, USERS,
};
use crate::resolver::RoleResolver;
use crate::role::RoleLevel;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use warden_store::{to_fields, DocumentStore, Fields, WriteOp};

/// One of the three records an assignment maintains.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum RecordRef {
    /// The user record.
    User,
    /// The membership in one department.
    Membership {
        /// Department id.
        department_id: String,
    },
    /// The directory entry.
    Directory,
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordRef::User => f.write_str("user record"),
            RecordRef::Membership { department_id } => {
                write!(f, "membership in '{}'", department_id)
            }
            RecordRef::Directory => f.write_str("directory entry"),
        }
    }
}

/// What happened to one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "error", rename_all = "snake_case")]
pub enum WriteOutcome {
    /// The record was written.
    Written,
    /// The record was already in the desired state.
    Unchanged,
    /// The read or write failed; retry the operation.
    Failed(String),
}

/// Outcome of one record within an assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordWrite {
    /// Which record.
    pub record: RecordRef,
    /// What happened to it.
    pub outcome: WriteOutcome,
}

/// Per-record account of an assignment operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssignmentReport {
    /// Operation name.
    pub operation: String,
    /// Target user.
    pub user_id: String,
    /// Whether the writes were committed as one transaction.
    pub transactional: bool,
    /// Outcome per record, in write order.
    pub records: Vec<RecordWrite>,
}

impl AssignmentReport {
    /// Whether every record reached its desired state.
    pub fn is_complete(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Records whose read or write failed.
    pub fn failures(&self) -> impl Iterator<Item = &RecordWrite> {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, WriteOutcome::Failed(_)))
    }

    /// Outcome for one record, if the operation touched it.
    pub fn outcome(&self, record: &RecordRef) -> Option<&WriteOutcome> {
        self.records
            .iter()
            .find(|r| &r.record == record)
            .map(|r| &r.outcome)
    }

    /// Number of records actually written.
    pub fn written(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.outcome == WriteOutcome::Written)
            .count()
    }
}

impl fmt::Display for AssignmentReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed: Vec<String> = self
            .failures()
            .map(|r| match &r.outcome {
                WriteOutcome::Failed(e) => format!("{} ({})", r.record, e),
                _ => r.record.to_string(),
            })
            .collect();
        write!(
            f,
            "{} of '{}': {} of {} records failed",
            self.operation,
            self.user_id,
            failed.len(),
            self.records.len()
        )?;
        if !failed.is_empty() {
            write!(f, ": {}", failed.join(", "))?;
        }
        Ok(())
    }
}

// A planned step: a write still needed, a record already converged, or a
// record whose current state could not be read.
enum Step {
    Write(RecordRef, WriteOp),
    Unchanged(RecordRef),
    Failed(RecordRef, String),
}

/// Promotes and demotes users while keeping the permission records convergent.
pub struct SupervisorAssignmentManager<S> {
    store: Arc<S>,
    config: Arc<AccessConfig>,
    journal: Arc<Journal>,
    resolver: RoleResolver<S>,
}

impl<S: DocumentStore + 'static> SupervisorAssignmentManager<S> {
    /// Create a manager.
    pub fn new(store: Arc<S>, config: Arc<AccessConfig>, journal: Arc<Journal>) -> Self {
        let resolver = RoleResolver::new(
            Arc::clone(&store),
            Arc::clone(&config),
            Arc::clone(&journal),
        );
        Self {
            store,
            config,
            journal,
            resolver,
        }
    }

    // ==================== Supervisors ====================

    /// Make `user_id` supervisor of every department in `departments`.
    ///
    /// Departments are added to any the user already supervises.
    pub async fn promote_to_supervisor(
        &self,
        actor: &str,
        user_id: &str,
        departments: &BTreeSet<String>,
    ) -> Result<AssignmentReport> {
        validate_user_id(user_id)?;
        if departments.is_empty() {
            return Err(AuthError::InvalidInput(
                "at least one department is required".into(),
            ));
        }
        if let Some(unknown) = departments.iter().find(|d| !self.config.has_department(d)) {
            return Err(AuthError::InvalidInput(format!(
                "unknown department '{}'",
                unknown
            )));
        }

        let mut steps = Vec::with_capacity(departments.len() + 2);

        let user = self.read::<UserRecord>(USERS, user_id).await;
        let home_department_id = user
            .as_ref()
            .ok()
            .and_then(|u| u.as_ref())
            .and_then(|u| u.home_department_id.clone());
        steps.push(match user {
            Ok(Some(record)) if record.role == RoleLevel::Supervisor => {
                Step::Unchanged(RecordRef::User)
            }
            Ok(Some(record)) => {
                if record.role > RoleLevel::Supervisor {
                    tracing::warn!(
                        user = %user_id,
                        from = %record.role,
                        "promotion to supervisor replaces a higher stored role"
                    );
                }
                Step::Write(RecordRef::User, update_role(user_id, RoleLevel::Supervisor))
            }
            Ok(None) => match to_fields(&UserRecord::new(RoleLevel::Supervisor)) {
                Ok(fields) => Step::Write(RecordRef::User, set(USERS, user_id, fields, true)),
                Err(e) => Step::Failed(RecordRef::User, e.to_string()),
            },
            Err(e) => Step::Failed(RecordRef::User, e),
        });

        for department_id in departments {
            let record = RecordRef::Membership {
                department_id: department_id.clone(),
            };
            let collection = department_supervisors(department_id);
            steps.push(match self.read::<Membership>(&collection, user_id).await {
                Ok(Some(membership)) if membership.active => Step::Unchanged(record),
                Ok(_) => match to_fields(&Membership::new(actor)) {
                    Ok(fields) => Step::Write(record, set(&collection, user_id, fields, false)),
                    Err(e) => Step::Failed(record, e.to_string()),
                },
                Err(e) => Step::Failed(record, e),
            });
        }

        steps.push(match self.read::<DirectoryEntry>(SUPERVISORS, user_id).await {
            Ok(existing) => {
                let current = existing.as_ref().map(DirectoryEntry::departments);
                let merged: BTreeSet<String> = current
                    .iter()
                    .flatten()
                    .chain(departments.iter())
                    .cloned()
                    .collect();
                if current.as_ref() == Some(&merged) {
                    Step::Unchanged(RecordRef::Directory)
                } else {
                    let home = existing
                        .and_then(|e| e.home_department_id)
                        .or(home_department_id);
                    match to_fields(&DirectoryEntry::new(merged, home)) {
                        Ok(fields) => {
                            Step::Write(RecordRef::Directory, set(SUPERVISORS, user_id, fields, false))
                        }
                        Err(e) => Step::Failed(RecordRef::Directory, e.to_string()),
                    }
                }
            }
            Err(e) => Step::Failed(RecordRef::Directory, e),
        });

        let report = self
            .execute("promote_to_supervisor", user_id, steps)
            .await;
        self.conclude(
            report,
            JournalEventKind::PromotedToSupervisor,
            actor,
            format!("departments: {}", join(departments)),
        )
    }

    /// Return `user_id` to employee and remove every supervisor record.
    ///
    /// Memberships have no reverse index, so every catalog department is
    /// checked. Records already absent count as converged.
    pub async fn demote(&self, actor: &str, user_id: &str) -> Result<AssignmentReport> {
        validate_user_id(user_id)?;
        let mut steps = Vec::with_capacity(self.config.departments.len() + 2);

        steps.push(match self.read::<UserRecord>(USERS, user_id).await {
            Ok(Some(record)) if record.role != RoleLevel::Employee => {
                Step::Write(RecordRef::User, update_role(user_id, RoleLevel::Employee))
            }
            Ok(_) => Step::Unchanged(RecordRef::User),
            Err(e) => Step::Failed(RecordRef::User, e),
        });

        for department_id in &self.config.departments {
            let collection = department_supervisors(department_id);
            let record = RecordRef::Membership {
                department_id: department_id.clone(),
            };
            match self.read::<serde_json::Value>(&collection, user_id).await {
                Ok(Some(_)) => steps.push(Step::Write(record, delete(&collection, user_id))),
                Ok(None) => {}
                Err(e) => steps.push(Step::Failed(record, e)),
            }
        }

        steps.push(match self.read::<serde_json::Value>(SUPERVISORS, user_id).await {
            Ok(Some(_)) => Step::Write(RecordRef::Directory, delete(SUPERVISORS, user_id)),
            Ok(None) => Step::Unchanged(RecordRef::Directory),
            Err(e) => Step::Failed(RecordRef::Directory, e),
        });

        let report = self.execute("demote", user_id, steps).await;
        self.conclude(report, JournalEventKind::Demoted, actor, "all departments".into())
    }

    // ==================== Admins ====================

    /// Set the role to admin. Supervisor memberships are left untouched.
    pub async fn promote_to_admin(&self, actor: &str, user_id: &str) -> Result<AssignmentReport> {
        validate_user_id(user_id)?;
        let step = match self.read::<UserRecord>(USERS, user_id).await {
            Ok(Some(record)) if record.role == RoleLevel::Admin => Step::Unchanged(RecordRef::User),
            Ok(Some(_)) => Step::Write(RecordRef::User, update_role(user_id, RoleLevel::Admin)),
            Ok(None) => match to_fields(&UserRecord::new(RoleLevel::Admin)) {
                Ok(fields) => Step::Write(RecordRef::User, set(USERS, user_id, fields, true)),
                Err(e) => Step::Failed(RecordRef::User, e.to_string()),
            },
            Err(e) => Step::Failed(RecordRef::User, e),
        };

        let report = self.execute("promote_to_admin", user_id, vec![step]).await;
        self.conclude(report, JournalEventKind::PromotedToAdmin, actor, String::new())
    }

    /// Set an admin's role back to employee.
    ///
    /// Supervisor memberships are not touched; any left behind
    /// show up as orphaned memberships in the next audit.
    pub async fn demote_admin_to_employee(
        &self,
        actor: &str,
        user_id: &str,
    ) -> Result<AssignmentReport> {
        validate_user_id(user_id)?;
        let step = match self.read::<UserRecord>(USERS, user_id).await {
            Ok(Some(record)) => match record.role {
                RoleLevel::Admin | RoleLevel::SystemAdmin => {
                    Step::Write(RecordRef::User, update_role(user_id, RoleLevel::Employee))
                }
                RoleLevel::Employee => Step::Unchanged(RecordRef::User),
                RoleLevel::Supervisor => {
                    return Err(AuthError::InvalidInput(format!(
                        "'{}' is a supervisor, not an admin; use demote",
                        user_id
                    )))
                }
            },
            Ok(None) => Step::Unchanged(RecordRef::User),
            Err(e) => Step::Failed(RecordRef::User, e),
        };

        let report = self
            .execute("demote_admin_to_employee", user_id, vec![step])
            .await;
        self.conclude(report, JournalEventKind::AdminDemoted, actor, String::new())
    }

    /// Grant or revoke the explicit system-admin flag.
    ///
    /// Only a caller who is currently `system_admin` may change it.
    pub async fn set_system_admin_flag(
        &self,
        actor: &Identity,
        user_id: &str,
        enabled: bool,
    ) -> Result<AssignmentReport> {
        validate_user_id(user_id)?;
        let actor_level = self.resolver.resolve_role(actor).await?;
        if !self
            .config
            .role_hierarchy
            .satisfies(actor_level, RoleLevel::SystemAdmin)
        {
            self.journal.record(JournalEvent::new(
                JournalEventKind::AccessDenied,
                actor.id.clone(),
                user_id,
                "system-admin flag change refused",
            ));
            return Err(AuthError::PermissionDenied(format!(
                "'{}' cannot change the system-admin flag",
                actor.id
            )));
        }

        let step = match self.read::<UserRecord>(USERS, user_id).await {
            Ok(Some(record)) if record.is_system_admin_flag == enabled => {
                Step::Unchanged(RecordRef::User)
            }
            Ok(Some(_)) => {
                let mut fields = Fields::new();
                fields.insert("isSystemAdminFlag".into(), json!(enabled));
                fields.insert("updatedAt".into(), json!(now()));
                Step::Write(RecordRef::User, WriteOp::Update {
                    collection: USERS.into(),
                    id: user_id.into(),
                    fields,
                })
            }
            Ok(None) => {
                let mut record = UserRecord::new(RoleLevel::Employee);
                record.is_system_admin_flag = enabled;
                match to_fields(&record) {
                    Ok(fields) => Step::Write(RecordRef::User, set(USERS, user_id, fields, true)),
                    Err(e) => Step::Failed(RecordRef::User, e.to_string()),
                }
            }
            Err(e) => Step::Failed(RecordRef::User, e),
        };

        let report = self
            .execute("set_system_admin_flag", user_id, vec![step])
            .await;
        self.conclude(
            report,
            JournalEventKind::SystemAdminFlagChanged,
            &actor.id,
            format!("enabled: {}", enabled),
        )
    }

    // ==================== Execution ====================

    async fn read<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
    ) -> std::result::Result<Option<T>, String> {
        let doc = self
            .store
            .get_within(collection, id, self.config.doc_timeout())
            .await
            .map_err(|e| e.to_string())?;
        doc.map(|d| d.decode::<T>())
            .transpose()
            .map_err(|e| e.to_string())
    }

    async fn execute(&self, operation: &str, user_id: &str, steps: Vec<Step>) -> AssignmentReport {
        let transactional = self.store.supports_transactions()
            && steps.iter().any(|s| matches!(s, Step::Write(..)));
        let mut records = Vec::with_capacity(steps.len());

        if transactional {
            let mut batch = Vec::new();
            let mut batched = Vec::new();
            for step in steps {
                match step {
                    Step::Write(record, op) => {
                        batched.push(records.len());
                        records.push(RecordWrite {
                            record,
                            outcome: WriteOutcome::Written,
                        });
                        batch.push(op);
                    }
                    Step::Unchanged(record) => records.push(RecordWrite {
                        record,
                        outcome: WriteOutcome::Unchanged,
                    }),
                    Step::Failed(record, e) => records.push(RecordWrite {
                        record,
                        outcome: WriteOutcome::Failed(e),
                    }),
                }
            }
            if let Err(e) = self.store.commit(batch).await {
                for index in batched {
                    records[index].outcome = WriteOutcome::Failed(e.to_string());
                }
            }
        } else {
            for step in steps {
                let (record, outcome) = match step {
                    Step::Write(record, op) => {
                        let outcome = match self.apply(op).await {
                            Ok(()) => WriteOutcome::Written,
                            Err(e) => WriteOutcome::Failed(e.to_string()),
                        };
                        (record, outcome)
                    }
                    Step::Unchanged(record) => (record, WriteOutcome::Unchanged),
                    Step::Failed(record, e) => (record, WriteOutcome::Failed(e)),
                };
                records.push(RecordWrite { record, outcome });
            }
        }

        AssignmentReport {
            operation: operation.to_string(),
            user_id: user_id.to_string(),
            transactional,
            records,
        }
    }

    async fn apply(&self, op: WriteOp) -> warden_store::Result<()> {
        match op {
            WriteOp::Set {
                collection,
                id,
                fields,
                merge,
            } => self.store.set(&collection, &id, fields, merge).await,
            WriteOp::Update {
                collection,
                id,
                fields,
            } => self.store.update(&collection, &id, fields).await,
            WriteOp::Delete { collection, id } => {
                self.store.delete(&collection, &id).await.map(|_| ())
            }
        }
    }

    fn conclude(
        &self,
        report: AssignmentReport,
        kind: JournalEventKind,
        actor: &str,
        detail: String,
    ) -> Result<AssignmentReport> {
        if report.is_complete() {
            tracing::info!(
                operation = %report.operation,
                user = %report.user_id,
                written = report.written(),
                transactional = report.transactional,
                "assignment converged"
            );
            if report.written() > 0 {
                self.journal
                    .record(JournalEvent::new(kind, actor, report.user_id.clone(), detail));
            }
            Ok(report)
        } else {
            self.journal.record(JournalEvent::new(
                JournalEventKind::PartialAssignment,
                actor,
                report.user_id.clone(),
                report.to_string(),
            ));
            Err(AuthError::PartialAssignment(report))
        }
    }
}

fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() || user_id.contains('/') {
        return Err(AuthError::InvalidInput(format!("invalid user id '{}'", user_id)));
    }
    Ok(())
}

fn update_role(user_id: &str, role: RoleLevel) -> WriteOp {
    let mut fields = Fields::new();
    fields.insert("role".into(), json!(role));
    fields.insert("updatedAt".into(), json!(now()));
    WriteOp::Update {
        collection: USERS.into(),
        id: user_id.into(),
        fields,
    }
}

fn set(collection: &str, id: &str, fields: Fields, merge: bool) -> WriteOp {
    WriteOp::Set {
        collection: collection.into(),
        id: id.into(),
        fields,
        merge,
    }
}

fn delete(collection: &str, id: &str) -> WriteOp {
    WriteOp::Delete {
        collection: collection.into(),
        id: id.into(),
    }
}

fn join(departments: &BTreeSet<String>) -> String {
    departments.iter().cloned().collect::<Vec<_>>().join(", ")
}
