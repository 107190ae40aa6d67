//! Journal of security-relevant access-control events.
//!
//! Every entry is also emitted as a `tracing` event whose level follows the
//! entry's severity.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default number of entries kept in memory.
const DEFAULT_CAPACITY: usize = 10_000;

/// Kinds of journaled events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalEventKind {
    // Access events
    /// Access refused for insufficient level.
    AccessDenied,
    /// Access refused for missing or unresolvable identity.
    Unauthenticated,
    /// Role lookup fell back to least privilege.
    DegradedResolution,
    /// Default user record created for a new identity.
    RecordProvisioned,

    // Assignment events
    /// User promoted to supervisor.
    PromotedToSupervisor,
    /// Supervisor demoted to employee.
    Demoted,
    /// User promoted to admin.
    PromotedToAdmin,
    /// Admin demoted to employee.
    AdminDemoted,
    /// System-admin flag changed.
    SystemAdminFlagChanged,
    /// Some record writes of an assignment failed.
    PartialAssignment,

    // Consistency events
    /// Auditor found diverging records.
    DriftDetected,
    /// Directory entry regenerated from memberships.
    DirectoryRepaired,
    /// Memberships removed because the role says non-supervisor.
    MembershipsRevoked,

    // Store health
    /// Store stopped answering liveness probes.
    StoreDegraded,
    /// Store answers liveness probes again.
    StoreRecovered,
}

impl JournalEventKind {
    /// Returns the severity of this event kind.
    pub fn severity(&self) -> Severity {
        match self {
            JournalEventKind::SystemAdminFlagChanged => Severity::Critical,

            JournalEventKind::PartialAssignment
            | JournalEventKind::DriftDetected
            | JournalEventKind::StoreDegraded
            | JournalEventKind::DegradedResolution => Severity::High,

            JournalEventKind::AccessDenied
            | JournalEventKind::Unauthenticated
            | JournalEventKind::PromotedToSupervisor
            | JournalEventKind::Demoted
            | JournalEventKind::PromotedToAdmin
            | JournalEventKind::AdminDemoted
            | JournalEventKind::DirectoryRepaired
            | JournalEventKind::MembershipsRevoked => Severity::Medium,

            JournalEventKind::RecordProvisioned | JournalEventKind::StoreRecovered => {
                Severity::Low
            }
        }
    }
}

/// Severity levels for journal entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational.
    Low = 0,
    /// Notable.
    Medium = 1,
    /// Needs attention.
    High = 2,
    /// Security-critical.
    Critical = 3,
}

/// An event to journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEvent {
    /// What happened.
    pub kind: JournalEventKind,
    /// Who caused it (user id, or `system`).
    pub actor: String,
    /// Who or what it happened to.
    pub subject: String,
    /// Free-form detail.
    pub detail: String,
}

impl JournalEvent {
    /// Creates a new event.
    pub fn new(
        kind: JournalEventKind,
        actor: impl Into<String>,
        subject: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            actor: actor.into(),
            subject: subject.into(),
            detail: detail.into(),
        }
    }
}

/// A stored journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Sequence number, starting at 1.
    pub id: u64,
    /// Unix timestamp of recording.
    pub timestamp: u64,
    /// The event.
    #[serde(flatten)]
    pub event: JournalEvent,
}

/// Bounded, thread-safe event journal. Oldest entries are evicted first.
#[derive(Debug)]
pub struct Journal {
    entries: RwLock<VecDeque<JournalEntry>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Default for Journal {
    fn default() -> Self {
        Self::new()
    }
}

impl Journal {
    /// Creates a journal with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a journal holding at most `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Records an event.
    pub fn record(&self, event: JournalEvent) -> JournalEntry {
        let entry = JournalEntry {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            timestamp: crate::model::now(),
            event,
        };

        {
            let mut entries = self.entries.write();
            while entries.len() >= self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }

        let e = &entry.event;
        match e.kind.severity() {
            Severity::Critical | Severity::High => tracing::warn!(
                kind = ?e.kind, actor = %e.actor, subject = %e.subject, detail = %e.detail,
                "access event"
            ),
            Severity::Medium => tracing::info!(
                kind = ?e.kind, actor = %e.actor, subject = %e.subject, detail = %e.detail,
                "access event"
            ),
            Severity::Low => tracing::debug!(
                kind = ?e.kind, actor = %e.actor, subject = %e.subject, detail = %e.detail,
                "access event"
            ),
        }

        entry
    }

    /// Every entry, oldest first.
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.read().iter().cloned().collect()
    }

    /// Entries of one kind, oldest first.
    pub fn by_kind(&self, kind: JournalEventKind) -> Vec<JournalEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.event.kind == kind)
            .cloned()
            .collect()
    }

    /// Entries about one subject, oldest first.
    pub fn by_subject(&self, subject: &str) -> Vec<JournalEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.event.subject == subject)
            .cloned()
            .collect()
    }

    /// Entries at or above a severity, oldest first.
    pub fn at_least(&self, severity: Severity) -> Vec<JournalEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.event.kind.severity() >= severity)
            .cloned()
            .collect()
    }

    /// Number of entries held.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the journal is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
