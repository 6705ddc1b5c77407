//! Merge engine configuration
//!
//! Reads and writes `.ralph-ui/merge.yaml` for project-specific settings,
//! falling back to `~/.ralph-ui/merge.yaml`, then to defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::file_storage::{get_global_ralph_ui_dir, get_ralph_ui_dir};
use crate::merge::ai_resolver::AiResolverConfig;
use crate::utils::ResultExt;

const CONFIG_FILE: &str = "merge.yaml";

/// CLI agent used as the model behind the AI resolver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub command: String,
    pub args: Vec<String>,
    pub model: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec!["-p".to_string()],
            model: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub enable_ai: bool,
    pub max_context_tokens: usize,
    pub max_batch_tokens: usize,
    pub batch_conflicts: bool,
    pub max_change_lines: usize,
    pub ai_timeout_secs: u64,
    pub lock_timeout_secs: u64,
    pub lock_poll_millis: u64,
    /// Persist reports of live runs under `.ralph-ui/merge-reports/`
    pub save_reports: bool,
    pub agent: AgentConfig,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            enable_ai: true,
            max_context_tokens: 4000,
            max_batch_tokens: 8000,
            batch_conflicts: true,
            max_change_lines: 60,
            ai_timeout_secs: 120,
            lock_timeout_secs: 30,
            lock_poll_millis: 200,
            save_reports: true,
            agent: AgentConfig::default(),
        }
    }
}

impl MergeConfig {
    pub fn resolver_config(&self) -> AiResolverConfig {
        AiResolverConfig {
            enable_ai: self.enable_ai,
            max_context_tokens: self.max_context_tokens,
            max_batch_tokens: self.max_batch_tokens,
            batch_conflicts: self.batch_conflicts,
            max_change_lines: self.max_change_lines,
            timeout_secs: self.ai_timeout_secs,
        }
    }
}

/// Configuration file manager
pub struct MergeConfigManager {
    config_path: PathBuf,
    global_path: Option<PathBuf>,
}

impl MergeConfigManager {
    /// Create a new config manager for a project
    pub fn new(project_path: &Path) -> Self {
        Self {
            config_path: get_ralph_ui_dir(project_path).join(CONFIG_FILE),
            global_path: Some(get_global_ralph_ui_dir().join(CONFIG_FILE)),
        }
    }

    /// Manager that ignores the user's global config
    pub fn project_only(project_path: &Path) -> Self {
        Self {
            config_path: get_ralph_ui_dir(project_path).join(CONFIG_FILE),
            global_path: None,
        }
    }

    /// Check if the project config file exists
    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }

    fn read_file(path: &Path) -> Result<MergeConfig, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {:?}: {}", path, e))?;

        serde_yaml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file {:?}: {}", path, e))
    }

    /// Read config, falling back to the global file and then defaults
    pub fn read(&self) -> Result<MergeConfig, String> {
        if self.config_path.exists() {
            return Self::read_file(&self.config_path);
        }
        if let Some(global) = self.global_path.as_deref().filter(|p| p.exists()) {
            log::debug!("[MergeConfig] Using global config {:?}", global);
            return Self::read_file(global);
        }
        Ok(MergeConfig::default())
    }

    /// Write config to the project file
    pub fn write(&self, config: &MergeConfig) -> Result<(), String> {
        // Ensure parent directory exists
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).with_context("Failed to create config directory")?;
        }

        let content = serde_yaml::to_string(config).with_context("Failed to serialize config")?;

        std::fs::write(&self.config_path, content).with_context("Failed to write config file")
    }

    /// Initialize config with defaults if it doesn't exist
    pub fn initialize(&self) -> Result<MergeConfig, String> {
        if self.exists() {
            return self.read();
        }

        let config = MergeConfig::default();
        self.write(&config)?;
        Ok(config)
    }

    /// Update specific fields in the config
    pub fn update<F>(&self, updater: F) -> Result<MergeConfig, String>
    where
        F: FnOnce(&mut MergeConfig),
    {
        let mut config = self.read()?;
        updater(&mut config);
        self.write(&config)?;
        Ok(config)
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_read_defaults_when_missing() {
        let temp_dir = TempDir::new().unwrap();
        let manager = MergeConfigManager::project_only(temp_dir.path());

        let config = manager.read().unwrap();
        assert!(config.enable_ai);
        assert_eq!(config.max_context_tokens, 4000);
        assert_eq!(config.agent.command, "claude");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let manager = MergeConfigManager::project_only(temp_dir.path());
        std::fs::create_dir_all(manager.path().parent().unwrap()).unwrap();
        std::fs::write(
            manager.path(),
            "enable_ai: false\nagent:\n  command: opencode\n",
        )
        .unwrap();

        let config = manager.read().unwrap();
        assert!(!config.enable_ai);
        assert_eq!(config.agent.command, "opencode");
        assert_eq!(config.agent.args, vec!["-p"]);
        assert_eq!(config.lock_timeout_secs, 30);
    }

    #[test]
    fn test_global_fallback() {
        let project = TempDir::new().unwrap();
        let home = TempDir::new().unwrap();
        let global = home.path().join(CONFIG_FILE);
        std::fs::write(&global, "max_context_tokens: 1234\n").unwrap();

        let manager = MergeConfigManager {
            config_path: get_ralph_ui_dir(project.path()).join(CONFIG_FILE),
            global_path: Some(global),
        };
        assert_eq!(manager.read().unwrap().max_context_tokens, 1234);

        manager.write(&MergeConfig::default()).unwrap();
        assert_eq!(manager.read().unwrap().max_context_tokens, 4000);
    }

    #[test]
    fn test_config_update() {
        let temp_dir = TempDir::new().unwrap();
        let manager = MergeConfigManager::project_only(temp_dir.path());

        manager.initialize().unwrap();
        let updated = manager.update(|c| c.batch_conflicts = false).unwrap();
        assert!(!updated.batch_conflicts);
        assert!(!manager.read().unwrap().batch_conflicts);

        let resolver = updated.resolver_config();
        assert!(!resolver.batch_conflicts);
        assert_eq!(resolver.timeout_secs, 120);
    }
}
