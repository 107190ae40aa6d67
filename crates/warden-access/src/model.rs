//! Stored permission records and their collection paths.

use crate::identity::Identity;
use crate::role::RoleLevel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Collection of [`UserRecord`]s, keyed by identity id.
pub const USERS: &str = "users";

/// Collection of [`DirectoryEntry`]s, keyed by user id.
pub const SUPERVISORS: &str = "supervisors";

/// Collection of [`Membership`]s of one department, keyed by user id.
pub fn department_supervisors(department_id: &str) -> String {
    format!("departments/{}/supervisors", department_id)
}

/// Account status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    /// Account in use.
    #[default]
    Active,
    /// Account disabled by an administrator.
    Inactive,
}

/// Per-user record holding the stored role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    /// Stored role.
    pub role: RoleLevel,
    /// Department the user belongs to.
    #[serde(default)]
    pub home_department_id: Option<String>,
    /// Explicit system-admin grant, set only by a system admin.
    #[serde(default)]
    pub is_system_admin_flag: bool,
    /// Account status.
    #[serde(default)]
    pub status: UserStatus,
    /// Verified email copied from the identity provider at provisioning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Creation time (Unix timestamp).
    #[serde(default)]
    pub created_at: u64,
    /// Last update time (Unix timestamp).
    #[serde(default)]
    pub updated_at: u64,
}

impl UserRecord {
    /// Create a record with the given role and no other grants.
    pub fn new(role: RoleLevel) -> Self {
        let now = now();
        Self {
            role,
            home_department_id: None,
            is_system_admin_flag: false,
            status: UserStatus::Active,
            email: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Default record for an identity seen for the first time.
    pub fn provisioned(identity: &Identity) -> Self {
        let mut record = Self::new(RoleLevel::Employee);
        if identity.email_verified && !identity.email.trim().is_empty() {
            record.email = Some(identity.email.trim().to_string());
        }
        record
    }
}

/// Assertion that a user supervises one department.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    /// When the assignment was made (Unix timestamp).
    pub assigned_at: u64,
    /// Who made the assignment.
    pub assigned_by: String,
    /// Inactive memberships are ignored.
    pub active: bool,
}

impl Membership {
    /// Create an active membership.
    pub fn new(assigned_by: impl Into<String>) -> Self {
        Self {
            assigned_at: now(),
            assigned_by: assigned_by.into(),
            active: true,
        }
    }
}

/// Read-optimized cache of every department a user supervises.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    /// Departments with an active membership.
    #[serde(default)]
    pub assigned_departments: BTreeSet<String>,
    /// Home department of the user.
    #[serde(default)]
    pub home_department_id: Option<String>,
    /// Inactive entries list no departments.
    #[serde(default)]
    pub is_active: bool,
}

impl DirectoryEntry {
    /// Create an active entry.
    pub fn new(departments: BTreeSet<String>, home_department_id: Option<String>) -> Self {
        Self {
            assigned_departments: departments,
            home_department_id,
            is_active: true,
        }
    }

    /// Departments the entry claims, empty when inactive.
    pub fn departments(&self) -> BTreeSet<String> {
        if self.is_active {
            self.assigned_departments.clone()
        } else {
            BTreeSet::new()
        }
    }
}

pub(crate) fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
