//! Process-wide access configuration.
//!
//! Loaded once (usually from YAML) and shared as an immutable
//! `Arc<AccessConfig>` by every component.

use crate::error::{AuthError, Result};
use crate::role::RoleHierarchy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

/// Normalize an email for comparison: trimmed and lowercased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Emails granted `system_admin` regardless of stored data.
///
/// Entries are normalized on construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Allowlist(BTreeSet<String>);

impl Allowlist {
    /// Build an allowlist from raw emails.
    pub fn new<I, E>(emails: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: AsRef<str>,
    {
        Self(
            emails
                .into_iter()
                .map(|e| normalize_email(e.as_ref()))
                .filter(|e| !e.is_empty())
                .collect(),
        )
    }

    /// Whether the email, in any casing or padding, is allowlisted.
    pub fn contains(&self, email: &str) -> bool {
        let email = normalize_email(email);
        !email.is_empty() && self.0.contains(&email)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the allowlist is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<String>> for Allowlist {
    fn from(emails: Vec<String>) -> Self {
        Self::new(emails)
    }
}

impl From<Allowlist> for Vec<String> {
    fn from(list: Allowlist) -> Self {
        list.0.into_iter().collect()
    }
}

/// Access-control configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Emails that always resolve to `system_admin`.
    pub system_admins: Allowlist,
    /// Ranks used for level comparisons.
    pub role_hierarchy: RoleHierarchy,
    /// Deadline for a single document read, in milliseconds.
    pub doc_timeout_ms: u64,
    /// Deadline for a whole role resolution, in milliseconds.
    pub total_timeout_ms: u64,
    /// Where unauthenticated callers are sent.
    pub login_path: String,
    /// Where authenticated but under-privileged callers are sent.
    pub denied_path: String,
    /// Every department id. Demotion clears memberships across all of them.
    pub departments: BTreeSet<String>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            system_admins: Allowlist::default(),
            role_hierarchy: RoleHierarchy::default(),
            doc_timeout_ms: 5_000,
            total_timeout_ms: 15_000,
            login_path: "/login".to_string(),
            denied_path: "/unauthorized".to_string(),
            departments: BTreeSet::new(),
        }
    }
}

impl AccessConfig {
    /// Per-document read deadline.
    pub fn doc_timeout(&self) -> Duration {
        Duration::from_millis(self.doc_timeout_ms)
    }

    /// Whole-resolution deadline.
    pub fn total_timeout(&self) -> Duration {
        Duration::from_millis(self.total_timeout_ms)
    }

    /// Replace the allowlist.
    pub fn with_system_admins<I, E>(mut self, emails: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: AsRef<str>,
    {
        self.system_admins = Allowlist::new(emails);
        self
    }

    /// Replace the department catalog.
    pub fn with_departments<I, D>(mut self, departments: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<String>,
    {
        self.departments = departments.into_iter().map(Into::into).collect();
        self
    }

    /// Replace both deadlines.
    pub fn with_timeouts(mut self, doc: Duration, total: Duration) -> Self {
        self.doc_timeout_ms = doc.as_millis() as u64;
        self.total_timeout_ms = total.as_millis() as u64;
        self
    }

    /// Whether a department is part of the catalog.
    pub fn has_department(&self, department_id: &str) -> bool {
        self.departments.contains(department_id)
    }

    /// Check the configuration for unusable values.
    pub fn validate(&self) -> Result<()> {
        self.role_hierarchy.validate()?;

        if self.doc_timeout_ms == 0 || self.total_timeout_ms == 0 {
            return Err(AuthError::InvalidConfig("timeouts must be non-zero".into()));
        }
        if self.doc_timeout_ms >= self.total_timeout_ms {
            tracing::warn!(
                doc_timeout_ms = self.doc_timeout_ms,
                total_timeout_ms = self.total_timeout_ms,
                "document timeout is not below the total timeout; slow reads will fail authentication"
            );
        }

        if self.login_path.is_empty() || self.denied_path.is_empty() {
            return Err(AuthError::InvalidConfig("redirect paths must be set".into()));
        }
        if self.login_path == self.denied_path {
            return Err(AuthError::InvalidConfig(
                "login and denied paths must differ".into(),
            ));
        }

        if let Some(bad) = self
            .departments
            .iter()
            .find(|d| d.is_empty() || d.contains('/'))
        {
            return Err(AuthError::InvalidConfig(format!(
                "invalid department id '{}'",
                bad
            )));
        }
        Ok(())
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| AuthError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            AuthError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&yaml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::RoleLevel;
    use std::io::Write;

    #[test]
    fn test_allowlist_normalizes() {
        let list = Allowlist::new(["  Admin@X.com", "", "ops@x.com "]);
        assert_eq!(list.len(), 2);
        assert!(list.contains("admin@x.com"));
        assert!(list.contains(" ADMIN@x.COM "));
        assert!(list.contains("OPS@X.COM"));
        assert!(!list.contains("someone@x.com"));
        assert!(!list.contains("   "));
    }

    #[test]
    fn test_defaults() {
        let config = AccessConfig::default();
        assert_eq!(config.doc_timeout(), Duration::from_secs(5));
        assert_eq!(config.total_timeout(), Duration::from_secs(15));
        assert_ne!(config.login_path, config.denied_path);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip_fields() {
        let yaml = r#"
system_admins:
  - " Root@Example.com "
doc_timeout_ms: 2000
total_timeout_ms: 8000
login_path: /signin
denied_path: /forbidden
departments: [dept-a, dept-b]
role_hierarchy:
  employee: 10
  supervisor: 20
  admin: 30
  system_admin: 40
"#;
        let config = AccessConfig::from_yaml_str(yaml).unwrap();
        assert!(config.system_admins.contains("root@example.com"));
        assert_eq!(config.doc_timeout(), Duration::from_secs(2));
        assert_eq!(config.login_path, "/signin");
        assert!(config.has_department("dept-a"));
        assert_eq!(config.role_hierarchy.rank(RoleLevel::Admin), 30);
    }

    #[test]
    fn test_validation_failures() {
        let same_paths = AccessConfig {
            denied_path: "/login".into(),
            ..AccessConfig::default()
        };
        assert!(matches!(
            same_paths.validate(),
            Err(AuthError::InvalidConfig(_))
        ));

        let zero = AccessConfig::default().with_timeouts(Duration::ZERO, Duration::from_secs(1));
        assert!(zero.validate().is_err());

        let bad_dept = AccessConfig::default().with_departments(["a/b"]);
        assert!(bad_dept.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "departments: [hr]").unwrap();
        let config = AccessConfig::load(file.path()).unwrap();
        assert!(config.has_department("hr"));
        assert_eq!(config.doc_timeout_ms, 5_000);

        assert!(AccessConfig::load(Path::new("/nonexistent/warden.yaml")).is_err());
    }
}
