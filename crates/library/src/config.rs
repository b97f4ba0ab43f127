use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::LibraryOptions;

pub const CONFIG_VERSION: u32 = 1;
pub const CONFIG_ENV: &str = "LIBRARY_CONFIG";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    pub version: u32,
    pub library_root: String,
    pub index_path: String,
    /// Prefix for streamed media links. Only the presentation layer reads it.
    pub media_url: String,
    pub zipfile_url: String,
    pub workers: usize,
    pub thumbnail_list_px: u32,
    pub thumbnail_album_px: u32,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            library_root: "".to_string(),
            index_path: "library.redb".to_string(),
            media_url: "".to_string(),
            zipfile_url: "".to_string(),
            workers: 1,
            thumbnail_list_px: 80,
            thumbnail_album_px: 300,
        }
    }
}

impl LibraryConfig {
    pub fn options(&self) -> LibraryOptions {
        let defaults = LibraryOptions::default();
        LibraryOptions {
            workers: self.workers.max(1),
            thumbnail_list_px: self.thumbnail_list_px,
            thumbnail_album_px: self.thumbnail_album_px,
            ..defaults
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var(CONFIG_ENV) {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => PathBuf::from("library.yaml"),
    }
}

/// Reads the config, writing a default one first if the file is missing.
/// The flag is true when the file was just created.
pub fn load_or_create_config(path: &Path) -> Result<(LibraryConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: LibraryConfig = serde_yaml::from_str(&contents)?;
        if config.version < CONFIG_VERSION {
            config.version = CONFIG_VERSION;
        }
        if config.index_path.trim().is_empty() {
            config.index_path = "library.redb".to_string();
        }
        if config.thumbnail_list_px == 0 {
            config.thumbnail_list_px = 80;
        }
        if config.thumbnail_album_px == 0 {
            config.thumbnail_album_px = 300;
        }
        return Ok((config, false));
    }

    let config = LibraryConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &LibraryConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}

pub fn resolve_library_root(config_path: &Path, value: &str) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(resolve_path(config_path, trimmed))
    }
}
