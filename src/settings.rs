use crate::error::Result;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_DOWNLOAD_URL: &str = "https://speed.cloudflare.com/__down";
const DEFAULT_UPLOAD_URL: &str = "https://speed.cloudflare.com/__up";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub download_size_mb: u64,
    pub upload_size_mb: u64,
    pub download_url: String,
    pub upload_url: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub phase_timeout_secs: u64,
    pub history_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_size_mb: 100,
            upload_size_mb: 50,
            download_url: DEFAULT_DOWNLOAD_URL.to_string(),
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 120,
            phase_timeout_secs: 180,
            history_path: default_history_path(),
        }
    }
}

impl Settings {
    /// Layers an optional TOML file and `SPEEDOFME_*` environment variables
    /// over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let settings = builder
            .add_source(Environment::with_prefix("SPEEDOFME"))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    pub fn download_size_bytes(&self) -> u64 {
        self.download_size_mb * 1_000_000
    }

    pub fn upload_size_bytes(&self) -> usize {
        (self.upload_size_mb * 1_000_000) as usize
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.phase_timeout_secs)
    }
}

fn default_history_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("speedofme")
        .join("history.db")
}
