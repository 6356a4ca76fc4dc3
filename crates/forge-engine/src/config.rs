//! Engine configuration
//!
//! Loaded from a TOML file; every field has a default so a partial
//! (or absent) file still yields a runnable configuration.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Daemon configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Base directory relative paths resolve against
    pub workspace_root: PathBuf,
    /// Ticket database path, resolved against `workspace_root`
    pub database_path: PathBuf,
    /// Dispatch tick interval in seconds
    pub tick_interval_secs: u64,
    /// Execution slots shared between ordinary dispatch and review
    pub execution_slots: usize,
    /// Automated reviewer identity tickets are claimed as
    pub reviewer_id: String,
    /// External verifier program
    pub verifier_command: String,
    /// Fixed leading arguments for the verifier program
    pub verifier_args: Vec<String>,
    /// Merge CLI binary name
    pub gh_program: String,
    /// Bound on a single merge call, in seconds
    pub merge_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            database_path: PathBuf::from("forge.db"),
            tick_interval_secs: 5,
            execution_slots: 5,
            reviewer_id: "sentinel-agent".to_string(),
            verifier_command: "forge-verify".to_string(),
            verifier_args: Vec::new(),
            gh_program: "gh".to_string(),
            merge_timeout_secs: 60,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    /// Fails when the file cannot be read or does not parse as a known
    /// configuration shape.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|err| anyhow::anyhow!("reading config {}: {err}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .map_err(|err| anyhow::anyhow!("parsing config {}: {err}", path.display()))?;
        Ok(config)
    }

    /// Database path resolved against the workspace root
    #[must_use]
    pub fn resolved_database_path(&self) -> PathBuf {
        if self.database_path.is_absolute() {
            self.database_path.clone()
        } else {
            self.workspace_root.join(&self.database_path)
        }
    }

    /// Tick interval as a [`Duration`]
    #[inline]
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    /// Merge timeout as a [`Duration`]
    #[inline]
    #[must_use]
    pub fn merge_timeout(&self) -> Duration {
        Duration::from_secs(self.merge_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_runnable() {
        let config = EngineConfig::default();
        assert_eq!(config.reviewer_id, "sentinel-agent");
        assert_eq!(config.tick_interval(), Duration::from_secs(5));
        assert_eq!(config.merge_timeout(), Duration::from_secs(60));
        assert_eq!(config.resolved_database_path(), PathBuf::from("./forge.db"));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            workspace_root = "/srv/forge"
            execution_slots = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.execution_slots, 8);
        assert_eq!(config.reviewer_id, "sentinel-agent");
        assert_eq!(config.resolved_database_path(), PathBuf::from("/srv/forge/forge.db"));
    }

    #[test]
    fn absolute_database_path_wins() {
        let config: EngineConfig = toml::from_str(
            r#"
            workspace_root = "/srv/forge"
            database_path = "/var/lib/forge/tickets.db"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.resolved_database_path(),
            PathBuf::from("/var/lib/forge/tickets.db")
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<EngineConfig>("reviewre_id = \"oops\"").is_err());
    }

    #[test]
    fn load_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "tick_interval_secs = 1\ngh_program = \"/usr/local/bin/gh\"").unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.gh_program, "/usr/local/bin/gh");
    }

    #[test]
    fn load_missing_file_errors() {
        assert!(EngineConfig::load("/nonexistent/forge.toml").is_err());
    }
}
