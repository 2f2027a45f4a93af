//! Configuration for the data-motion layer.
//!
//! Loaded from YAML, every field optional:
//!
//! ```yaml
//! command_timeout_secs: 60
//! migrate_wait_secs: 3600
//! auto_convergence: true
//! max_downtime_ms: 500
//! migrate_speed_mbps: 0
//! backend_tag: cs
//! volume_purpose_tag: volume
//! apply_targets_cluster_wide: false
//! remove_targets: dynamic
//! logging:
//!   level: info
//!   format: json
//! ```

use anyhow::{Context, Result};
use limiquantix_common::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::agent::TargetTypeToRemove;
use crate::error::DataMotionError;

/// Migration tuning and timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Timeout for prepare and modify-targets commands
    pub command_timeout_secs: u64,
    /// Timeout for the migrate command; also handed to the agent
    pub migrate_wait_secs: u64,
    /// Let the hypervisor throttle the guest so migration converges
    pub auto_convergence: bool,
    /// Maximum tolerated pause at switch-over
    pub max_downtime_ms: u64,
    /// Bandwidth cap, 0 = unlimited
    pub migrate_speed_mbps: u64,
    /// Tag set on backend objects created for migration
    pub backend_tag: String,
    /// Purpose tag set on backend volume objects
    pub volume_purpose_tag: String,
    /// Attach targets on every host of the cluster instead of one host
    pub apply_targets_cluster_wide: bool,
    /// Which targets a detach may prune
    pub remove_targets: TargetTypeToRemove,
    /// Logging section
    pub logging: LoggingConfig,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 60,
            migrate_wait_secs: 3600,
            auto_convergence: true,
            max_downtime_ms: 500,
            migrate_speed_mbps: 0,
            backend_tag: "cs".to_string(),
            volume_purpose_tag: "volume".to_string(),
            apply_targets_cluster_wide: false,
            remove_targets: TargetTypeToRemove::Dynamic,
            logging: LoggingConfig::default(),
        }
    }
}

impl MigrationConfig {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: MigrationConfig = serde_yaml::from_str(&content)
            .with_context(|| "Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make every command fail immediately.
    pub fn validate(&self) -> std::result::Result<(), DataMotionError> {
        if self.command_timeout_secs == 0 {
            return Err(DataMotionError::InvalidConfig(
                "command_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.migrate_wait_secs == 0 {
            return Err(DataMotionError::InvalidConfig(
                "migrate_wait_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn migrate_timeout(&self) -> Duration {
        Duration::from_secs(self.migrate_wait_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use limiquantix_common::LogFormat;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = MigrationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.command_timeout(), Duration::from_secs(60));
        assert_eq!(config.remove_targets, TargetTypeToRemove::Dynamic);
    }

    #[test]
    fn test_config_yaml_parsing() {
        let yaml = r#"
command_timeout_secs: 15
migrate_wait_secs: 600
auto_convergence: false
remove_targets: both
logging:
  level: debug
  format: json
"#;
        let config: MigrationConfig = serde_yaml::from_str(yaml).expect("Failed to parse YAML");

        assert_eq!(config.command_timeout_secs, 15);
        assert_eq!(config.migrate_timeout(), Duration::from_secs(600));
        assert!(!config.auto_convergence);
        assert_eq!(config.remove_targets, TargetTypeToRemove::Both);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.backend_tag, "cs");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = MigrationConfig {
            migrate_wait_secs: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(DataMotionError::InvalidConfig(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "command_timeout_secs: 0").unwrap();
        assert!(MigrationConfig::load(file.path()).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_downtime_ms: 250").unwrap();
        let config = MigrationConfig::load(file.path()).unwrap();
        assert_eq!(config.max_downtime_ms, 250);

        assert!(MigrationConfig::load("/nonexistent/datamotion.yaml").is_err());
    }
}
