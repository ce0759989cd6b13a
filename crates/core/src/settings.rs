use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::{Mode, ServerInfo, ViewContext};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Settings {
    pub mode: Mode,
    pub server_type: Option<String>,
    pub server_version: Option<u32>,
    pub in_catalog: bool,
    pub keep_cid: bool,
    pub log_json: bool,
}

impl Settings {
    /// The operating context these settings describe. A server is only
    /// known when both its type and version are set.
    #[must_use]
    pub fn view_context(&self) -> ViewContext {
        let server_info = match (&self.server_type, self.server_version) {
            (Some(server_type), Some(version)) => Some(ServerInfo {
                server_type: server_type.clone(),
                version,
            }),
            _ => None,
        };
        ViewContext {
            mode: self.mode,
            server_info,
            in_catalog: self.in_catalog,
            keep_cid: self.keep_cid,
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("config directory is unavailable for this platform")]
    ConfigDirUnavailable,
    #[error("failed to read settings file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to create config directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize settings: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to write settings file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
    settings: Settings,
}

impl FileSettingsStore {
    pub fn load_default() -> Result<Self, SettingsError> {
        let path = default_settings_path()?;
        Self::load_from_path(path)
    }

    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self {
                path,
                settings: Settings::default(),
            });
        }

        let raw = fs::read_to_string(&path).map_err(|source| SettingsError::Read {
            path: path.clone(),
            source,
        })?;

        let settings = if raw.trim().is_empty() {
            Settings::default()
        } else {
            toml::from_str(&raw).map_err(|source| SettingsError::Parse {
                path: path.clone(),
                source,
            })?
        };

        Ok(Self { path, settings })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn persist(&self) -> Result<(), SettingsError> {
        if let Some(parent_dir) = self.path.parent() {
            fs::create_dir_all(parent_dir).map_err(|source| SettingsError::CreateDir {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }

        let rendered = toml::to_string_pretty(&self.settings)
            .map_err(|source| SettingsError::Serialize { source })?;

        fs::write(&self.path, rendered).map_err(|source| SettingsError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

pub fn default_settings_path() -> Result<PathBuf, SettingsError> {
    let base_dir = if let Some(custom) = env::var_os("PGFORM_CONFIG_DIR") {
        PathBuf::from(custom)
    } else if cfg!(target_os = "windows") {
        env::var_os("APPDATA")
            .map(PathBuf::from)
            .ok_or(SettingsError::ConfigDirUnavailable)?
    } else if let Some(xdg_config_home) = env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config_home)
    } else {
        let home = env::var_os("HOME").ok_or(SettingsError::ConfigDirUnavailable)?;
        PathBuf::from(home).join(".config")
    };

    Ok(base_dir.join("pgform").join("settings.toml"))
}
