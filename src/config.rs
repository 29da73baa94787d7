//! Configuration management for redline
//!
//! Stores settings in ~/.config/redline/config.json. Command-line flags override
//! every field for a single invocation.

use crate::cache::KeyStrategy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DEFAULT_MODEL: &str = "code-llama-7b-instruct";

/// Models tried, in order, when the configured one is missing or fails its smoke test.
pub const DEFAULT_FALLBACK_MODELS: &[&str] = &[
    "qwen3-coder:30b",
    "code-llama-7b-instruct",
    "starcoder",
    "codegen-6b",
    "llama3:latest",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Ollama model name
    pub model: String,
    pub fallback_models: Vec<String>,
    /// Seconds before a generation call is killed
    pub llm_timeout_secs: u64,
    /// Extra generation attempts per file
    pub retries: u32,
    /// Base delay before the first retry, doubled each time
    pub backoff_secs: f64,
    /// Directory names skipped during discovery, on top of the built-in list
    pub excludes: Vec<String>,
    pub key_strategy: KeyStrategy,
    /// Pick an installed fallback when `model` is unavailable
    pub auto_model: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            fallback_models: DEFAULT_FALLBACK_MODELS.iter().map(|m| m.to_string()).collect(),
            llm_timeout_secs: 60,
            retries: 0,
            backoff_secs: 2.0,
            excludes: Vec::new(),
            key_strategy: KeyStrategy::default(),
            auto_model: true,
        }
    }
}

impl Config {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("redline"))
    }

    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk, or return default
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        if let Ok(content) = fs::read_to_string(path) {
            match serde_json::from_str(&content) {
                Ok(config) => return config,
                Err(err) => {
                    preserve_corrupt_config(path, &content);
                    tracing::warn!(
                        "config file {} was corrupted ({}); a backup was saved and defaults were loaded",
                        path.display(),
                        err
                    );
                }
            }
        }
        Self::default()
    }

    /// Save config to disk
    pub fn save(&self) -> Result<(), String> {
        let path = Self::config_path()
            .ok_or_else(|| "Could not determine config directory".to_string())?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Err(e) = fs::set_permissions(dir, fs::Permissions::from_mode(0o700)) {
                    tracing::warn!("failed to set config directory permissions: {}", e);
                }
            }
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;
        write_config_atomic(path, &content).map_err(|e| format!("Failed to write config: {}", e))
    }

    /// Get the config file location for display
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/redline/config.json".to_string())
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

fn write_config_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(&tmp_path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;
    drop(file);

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.llm_timeout_secs, 60);
        assert_eq!(config.key_strategy, KeyStrategy::Content);
        assert!(config.auto_model);
        assert_eq!(config.fallback_models[0], "qwen3-coder:30b");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, r#"{"model": "starcoder", "key_strategy": "stat"}"#).unwrap();

        let config = Config::load_from(&path);
        assert_eq!(config.model, "starcoder");
        assert_eq!(config.key_strategy, KeyStrategy::Stat);
        assert_eq!(config.retries, 0);
        assert_eq!(config.backoff_secs, 2.0);
    }

    #[test]
    fn corrupt_config_is_preserved() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        assert_eq!(Config::load_from(&path), Config::default());
        assert!(!path.exists());
        assert_eq!(
            fs::read_to_string(tmp.path().join("config.json.corrupt")).unwrap(),
            "{ not json"
        );
    }

    #[test]
    fn save_then_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("redline").join("config.json");
        let config = Config {
            retries: 3,
            excludes: vec!["vendor".to_string()],
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path), config);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
