//! Daemon configuration file.
//!
//! ```toml
//! bind = "127.0.0.1:4475"
//!
//! [hub]
//! intent_timeout_ms = 10000
//! user_channels = ["red", "green", "blue"]
//!
//! [[apps]]
//! app_id = "chart"
//! title = "Chart"
//! intents = [{ name = "ViewChart", context_type = "fdc3.instrument" }]
//! ```

use interop_core::{AppMetadata, StaticDirectory};
use interop_hub::HubConfig;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("duplicate directory entry for {0}")]
    DuplicateApp(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub bind: SocketAddr,
    pub hub: HubConfig,
    pub apps: Vec<AppMetadata>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: ([127, 0, 0, 1], 4475).into(),
            hub: HubConfig::default(),
            apps: Vec::new(),
        }
    }
}

impl DaemonConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.check_apps()?;
        Ok(config)
    }

    pub fn directory(&self) -> StaticDirectory {
        StaticDirectory::new(self.apps.iter().cloned())
    }

    fn check_apps(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for app in &self.apps {
            if !seen.insert(app.app_id.as_str()) {
                return Err(ConfigError::DuplicateApp(app.app_id.clone()));
            }
        }
        Ok(())
    }
}
