use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use coffer_core::crypto::Keys;
use coffer_core::error::{CofferError, Result};
use coffer_core::jsonutil::parse_version_json;
use coffer_core::storage::s3::S3Config;

/// Local configuration file: store connection, derived keys, and the path
/// lists to back up. Version 2 is written; version 1 (bare store settings)
/// remains readable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalConfig {
    pub version: u32,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(flatten)]
    pub s3: S3Config,
    #[serde(flatten)]
    pub keys: Keys,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl LocalConfig {
    pub fn new() -> Self {
        Self {
            version: 2,
            ..Default::default()
        }
    }

    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }
}

pub fn load_config_file(path: &Path) -> Result<LocalConfig> {
    let data = std::fs::read(path)?;
    match parse_version_json(&data) {
        Some(1) => {
            // v1 kept the store settings at the top level.
            let mut cfg = LocalConfig::new();
            cfg.store = serde_json::from_slice(&data)?;
            Ok(cfg)
        }
        Some(2) => Ok(serde_json::from_slice(&data)?),
        Some(_) => Err(CofferError::BadVersion),
        None => Err(CofferError::Config("malformed config data".into())),
    }
}

/// Resolve the shortest equivalent path, expanding a `~/` prefix to the
/// user's home directory.
pub fn clean_path(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
