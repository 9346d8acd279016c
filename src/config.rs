//! Deployment configuration.
//!
//! Loaded from `~/.fieldcam/config.toml` (or `--config`). Describes the
//! hardware and paths of one installation: things the dashboard never edits.
//! Every key has a default, so a missing default-location file is not an error.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::settings::SETTINGS_FILE;

/// Errors that can occur while loading the deployment config.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no config file found at {0}")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Deployment configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    /// Camera name; combined with the CPU serial to name the remote folder.
    pub camera_name: String,

    /// Local state: the settings copy and the diagnostics buffer.
    pub data_dir: PathBuf,

    /// Root of the remote store, as mounted on this device.
    pub store_root: PathBuf,

    /// Keep each camera in its own folder under the store root.
    pub multi_camera: bool,

    /// Serial device of the cellular/GPS modem.
    pub serial_port: String,

    pub serial_baud: u32,

    /// Directory holding the WittyPi utility scripts.
    pub witty_pi_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_name: "fieldcam".to_string(),
            data_dir: PathBuf::from("/home/pi/fieldcam"),
            store_root: PathBuf::from("/mnt/fieldcam"),
            multi_camera: false,
            serial_port: "/dev/ttyUSB2".to_string(),
            serial_baud: 115_200,
            witty_pi_dir: PathBuf::from("/home/pi/wittypi"),
        }
    }
}

impl Config {
    /// Load config from an explicit path, or from the default location.
    ///
    /// An explicit path must exist. A missing default file yields defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path.to_path_buf()));
                }
                Self::load_from(path)
            }
            None => match Self::path() {
                Some(path) if path.exists() => Self::load_from(&path),
                _ => {
                    tracing::info!("no config file, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    /// Load config, degrading to defaults when it is missing or unparseable.
    ///
    /// Returns the failure alongside the defaults so the run can record it.
    pub fn load_or_default(explicit: Option<&Path>) -> (Self, Option<ConfigError>) {
        match Self::load(explicit) {
            Ok(config) => (config, None),
            Err(e) => {
                tracing::warn!(error = %e, "config unusable, using defaults");
                (Self::default(), Some(e))
            }
        }
    }

    /// Load config from a specific file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The default config file path: `~/.fieldcam/config.toml`.
    pub fn path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".fieldcam").join("config.toml"))
    }

    /// Local copy of the run settings.
    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_FILE)
    }
}
