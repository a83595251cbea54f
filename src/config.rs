use std::{
    env, fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use log::{debug, info};
use serde::Deserialize;

use crate::error::{Error, Result};

pub const CONFIG_ENV_VAR: &str = "PKGRELAY_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "pkgrelay.toml";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub package_manager: String,
    pub source: String,
    pub jobs_dir: PathBuf,
    pub download_dir: PathBuf,
    pub log_level: String,
    pub pty: PtyConfig,
    pub jobs: JobsConfig,
    pub icons: IconsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            package_manager: "winget".to_string(),
            source: "winget".to_string(),
            jobs_dir: PathBuf::from("jobs"),
            download_dir: PathBuf::from("downloads"),
            log_level: "info".to_string(),
            pty: PtyConfig::default(),
            jobs: JobsConfig::default(),
            icons: IconsConfig::default(),
        }
    }
}

/// Size and terminal type presented to the spawned tool.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PtyConfig {
    pub cols: u16,
    pub rows: u16,
    pub term: String,
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            cols: 120,
            rows: 30,
            term: "xterm-color".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobsConfig {
    pub cancel_grace_ms: u64,
    pub drain_timeout_ms: u64,
    pub retention_secs: u64,
    pub max_finished_jobs: usize,
    pub poll_interval_ms: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            cancel_grace_ms: 2_000,
            drain_timeout_ms: 2_000,
            retention_secs: 3_600,
            max_finished_jobs: 200,
            poll_interval_ms: 250,
        }
    }
}

impl JobsConfig {
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct IconsConfig {
    pub capacity: usize,
    pub timeout_ms: u64,
    pub negative_ttl_secs: u64,
    /// Helper argv; the app name and cleaned id are appended per request.
    pub helper: Vec<String>,
}

impl Default for IconsConfig {
    fn default() -> Self {
        Self {
            capacity: 2,
            timeout_ms: 15_000,
            negative_ttl_secs: 86_400,
            helper: Vec::new(),
        }
    }
}

impl IconsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn negative_ttl(&self) -> Duration {
        Duration::from_secs(self.negative_ttl_secs)
    }
}

impl Config {
    /// Resolves the config file from `PKGRELAY_CONFIG`, then `./pkgrelay.toml`,
    /// and falls back to defaults when neither exists.
    pub fn load() -> Result<Self> {
        match env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => match Self::from_file(Path::new(DEFAULT_CONFIG_FILE)) {
                Err(Error::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
                    debug!("No {} found, using defaults.", DEFAULT_CONFIG_FILE);
                    Ok(Self::default())
                }
                other => other,
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config = Self::from_toml(&text).map_err(|source| Error::Config {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded config from {}.", path.display());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}
