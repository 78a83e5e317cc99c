use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::TeledashError;
use crate::connection::{RECONNECT_INTERVAL_MS, SendPolicy, SupervisorConfig};

const CONFIG_DIR_NAME: &str = "teledash";
const CONFIG_FILE_NAME: &str = "config.json";

pub const DEFAULT_BACKEND_ADDR: &str = "127.0.0.1:5005";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub backend_addr: String,
    pub reconnect_interval_ms: u64,
    pub heartbeat_interval_ms: Option<u64>,
    pub send_policy: SendPolicy,
    /// Where session transcripts are written. No transcript when unset.
    pub transcript_dir: Option<PathBuf>,
    /// Where saved calibration archives are written.
    pub archive_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_addr: DEFAULT_BACKEND_ADDR.to_string(),
            reconnect_interval_ms: RECONNECT_INTERVAL_MS,
            heartbeat_interval_ms: None,
            send_policy: SendPolicy::Drop,
            transcript_dir: None,
            archive_dir: PathBuf::from("."),
        }
    }
}

impl AppConfig {
    pub fn config_path() -> Result<PathBuf, TeledashError> {
        Ok(dirs::config_dir()
            .ok_or(TeledashError::NoConfigDir)?
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME))
    }

    /// Loads the config from the user's config directory. Missing or unreadable files
    /// fall back to the defaults.
    pub fn from_local_file() -> Self {
        let loaded = Self::config_path().and_then(|path| {
            if path.exists() {
                Self::load(&path).map(Some)
            } else {
                Ok(None)
            }
        });
        match loaded {
            Ok(Some(config)) => config,
            Ok(None) => {
                debug!("No config file, using defaults");
                Self::default()
            }
            Err(e) => {
                warn!("Could not load config file, using defaults: {}", e);
                Self::default()
            }
        }
    }

    pub fn load(path: &Path) -> Result<Self, TeledashError> {
        let file =
            std::fs::File::open(path).map_err(|e| TeledashError::ConfigIOError { source: e })?;
        serde_json::from_reader(file).map_err(|e| TeledashError::ConfigSerializeError { source: e })
    }

    pub fn save(&self) -> Result<(), TeledashError> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<(), TeledashError> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TeledashError::ConfigIOError { source: e })?;
        }
        let file = std::fs::File::create(config_path)
            .map_err(|e| TeledashError::ConfigIOError { source: e })?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| TeledashError::ConfigSerializeError { source: e })
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            reconnect_interval: Duration::from_millis(self.reconnect_interval_ms),
            heartbeat_interval: self.heartbeat_interval_ms.map(Duration::from_millis),
            send_policy: self.send_policy,
        }
    }
}
