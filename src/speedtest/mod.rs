pub mod download;
pub mod upload;

use crate::settings::Settings;
use anyhow::Result;
use async_trait::async_trait;
use download::DownloadTest;
use std::fmt;
use tokio::sync::mpsc;
use upload::UploadTest;

/// Interval between throughput samples reported by the HTTP probes.
pub const SAMPLE_INTERVAL_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Download,
    Upload,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Download => "download",
            Phase::Upload => "upload",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One throughput sample taken while a probe is running.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeProgress {
    pub transferred_bytes: u64,
    pub total_bytes: u64,
    pub current_mbps: f64,
}

impl ProbeProgress {
    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 0;
        }
        let percent = self.transferred_bytes.saturating_mul(100) / self.total_bytes;
        percent.min(100) as u8
    }
}

/// The bandwidth measurement primitive driven by the test controller.
///
/// Each method runs one phase to completion, reporting samples on `progress`,
/// and returns the phase's average speed in Mbps.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn download(&self, progress: mpsc::Sender<ProbeProgress>) -> Result<f64>;
    async fn upload(&self, progress: mpsc::Sender<ProbeProgress>) -> Result<f64>;
}

/// Probe against a `__down` / `__up` style HTTP endpoint pair.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    settings: Settings,
}

impl HttpProbe {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    fn client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .timeout(self.settings.request_timeout())
            .connect_timeout(self.settings.connect_timeout())
            .build()?)
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn download(&self, progress: mpsc::Sender<ProbeProgress>) -> Result<f64> {
        let test = DownloadTest::new(
            self.client()?,
            &self.settings.download_url,
            self.settings.download_size_bytes(),
        );
        let result = test.run(progress).await?;
        Ok(result.avg_speed_mbps)
    }

    async fn upload(&self, progress: mpsc::Sender<ProbeProgress>) -> Result<f64> {
        let test = UploadTest::new(
            self.client()?,
            &self.settings.upload_url,
            self.settings.upload_size_bytes(),
        );
        let result = test.run(progress).await?;
        Ok(result.avg_speed_mbps)
    }
}

pub(crate) fn mbps(bytes: u64, secs: f64) -> f64 {
    if secs <= 0.0 {
        return 0.0;
    }
    (bytes as f64 * 8.0) / secs / 1_000_000.0
}
