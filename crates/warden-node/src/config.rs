//! Node configuration.

use crate::logging::LogFormat;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use warden_access::AccessConfig;

/// Configuration for a Warden node.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
    /// Seconds between scheduled supervisor audits.
    pub audit_interval_secs: u64,
    /// Seconds between store liveness probes.
    pub heartbeat_interval_secs: u64,
    /// Access-control settings.
    pub access: AccessConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            audit_interval_secs: 300,
            heartbeat_interval_secs: 30,
            access: AccessConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Parse and validate YAML.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).context("malformed node configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_yaml_str(&yaml).with_context(|| format!("in {}", path.display()))
    }

    /// Check intervals and the access settings.
    pub fn validate(&self) -> Result<()> {
        if self.audit_interval_secs == 0 {
            bail!("audit_interval_secs must be non-zero");
        }
        if self.heartbeat_interval_secs == 0 {
            bail!("heartbeat_interval_secs must be non-zero");
        }
        self.access
            .validate()
            .context("invalid access configuration")?;
        Ok(())
    }

    /// Period of the scheduled audit.
    pub fn audit_interval(&self) -> Duration {
        Duration::from_secs(self.audit_interval_secs)
    }

    /// Period of the store heartbeat.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.audit_interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_nested_access_section() {
        let config = NodeConfig::from_yaml_str(
            r#"
log_level: debug
log_format: json
audit_interval_secs: 60
access:
  system_admins: ["Root@Example.com"]
  departments: [ops, finance]
  doc_timeout_ms: 2000
"#,
        )
        .unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.heartbeat_interval_secs, 30);
        assert!(config.access.system_admins.contains("root@example.com"));
        assert!(config.access.has_department("finance"));
        assert_eq!(config.access.doc_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = NodeConfig::from_yaml_str("heartbeat_interval_secs: 0").unwrap_err();
        assert!(err.to_string().contains("heartbeat_interval_secs"));
    }

    #[test]
    fn test_invalid_access_section_rejected() {
        let err = NodeConfig::from_yaml_str("access:\n  login_path: \"\"\n").unwrap_err();
        assert!(format!("{:#}", err).contains("invalid access configuration"));
    }

    #[test]
    fn test_load_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "audit_interval_secs: [").unwrap();
        let err = NodeConfig::load(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains(&file.path().display().to_string()));

        let missing = NodeConfig::load(Path::new("/nonexistent/warden.yaml")).unwrap_err();
        assert!(missing.to_string().contains("failed to read"));
    }
}
