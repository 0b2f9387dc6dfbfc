//! # Configuration
//!
//! Service settings loaded from TOML or JSON. Resolution order:
//! 1) `$READNEXT_CONFIG_PATH`
//! 2) `readnext.toml`
//! 3) `readnext.json`
//! 4) built-in defaults
//!
//! `$READNEXT_DATA_DIR` overrides the snapshot directory regardless of
//! where the rest of the config came from.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

const ENV_CONFIG_PATH: &str = "READNEXT_CONFIG_PATH";
const ENV_DATA_DIR: &str = "READNEXT_DATA_DIR";

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_sync_interval_secs() -> u64 {
    30
}
fn default_page_size() -> usize {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Address the HTTP server binds to.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Directory holding the snapshot files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Seconds between dirty-flag checks of the persistence loops.
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    /// Records per page for the paginated store reads.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            data_dir: default_data_dir(),
            sync_interval_secs: default_sync_interval_secs(),
            page_size: default_page_size(),
        }
    }
}

impl AppConfig {
    /// Load using the resolution order above.
    pub fn load() -> Result<Self> {
        let mut cfg = if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to a non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let toml_p = PathBuf::from("readnext.toml");
            let json_p = PathBuf::from("readnext.json");
            if toml_p.exists() {
                Self::load_from(&toml_p)?
            } else if json_p.exists() {
                Self::load_from(&json_p)?
            } else {
                Self::default()
            }
        };

        if let Ok(dir) = env::var(ENV_DATA_DIR) {
            cfg.data_dir = PathBuf::from(dir);
        }

        // Sanitize: zero would stall pagination or the sync loops.
        if cfg.page_size == 0 {
            cfg.page_size = default_page_size();
        }
        if cfg.sync_interval_secs == 0 {
            cfg.sync_interval_secs = default_sync_interval_secs();
        }

        Ok(cfg)
    }

    /// Load from an explicit path; the extension picks the format.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "toml" => {
                toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
            }
            _ => serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", path.display())),
        }
    }

    pub fn user_snapshot_path(&self) -> PathBuf {
        self.data_dir.join("users.json")
    }

    pub fn source_snapshot_path(&self) -> PathBuf {
        self.data_dir.join("sources.json")
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.page_size, 10);
        assert_eq!(cfg.sync_interval_secs, 30);
        assert!(cfg.source_snapshot_path().ends_with("sources.json"));
    }

    #[test]
    fn parses_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readnext.toml");
        fs::write(&path, "bind = \"127.0.0.1:9999\"\npage_size = 3\n").unwrap();

        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:9999");
        assert_eq!(cfg.page_size, 3);
        assert_eq!(cfg.sync_interval_secs, 30);
    }

    #[test]
    fn parses_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readnext.json");
        fs::write(&path, r#"{"data_dir": "/tmp/rn", "sync_interval_secs": 5}"#).unwrap();

        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/rn"));
        assert_eq!(cfg.sync_interval(), Duration::from_secs(5));
    }
}
