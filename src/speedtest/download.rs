use super::{mbps, ProbeProgress, SAMPLE_INTERVAL_MS};
use anyhow::{Context, Result};
use futures::StreamExt;
use log::debug;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

pub struct DownloadTest {
    client: reqwest::Client,
    url: String,
    download_size: u64,
}

impl DownloadTest {
    pub fn new(client: reqwest::Client, base_url: &str, download_size: u64) -> Self {
        Self {
            client,
            url: format!("{}?bytes={}", base_url, download_size),
            download_size,
        }
    }

    pub async fn run(&self, progress_tx: mpsc::Sender<ProbeProgress>) -> Result<DownloadResult> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("download request to {} failed", self.url))?
            .error_for_status()
            .context("download server returned an error")?;
        let total_size = response.content_length().unwrap_or(self.download_size);
        let mut stream = response.bytes_stream();

        let start = Instant::now();
        let mut downloaded: u64 = 0;
        let mut last_update = Instant::now();
        let mut last_downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("download stream interrupted")?;
            downloaded += chunk.len() as u64;

            let now = Instant::now();
            let interval = now.duration_since(last_update);

            if interval >= Duration::from_millis(SAMPLE_INTERVAL_MS) {
                let current = mbps(downloaded - last_downloaded, interval.as_secs_f64());

                // Receiver gone means the run was abandoned; keep draining anyway.
                let _ = progress_tx
                    .send(ProbeProgress {
                        transferred_bytes: downloaded,
                        total_bytes: total_size,
                        current_mbps: current,
                    })
                    .await;

                last_update = now;
                last_downloaded = downloaded;
            }
        }

        let elapsed = start.elapsed();
        let avg_speed = mbps(downloaded, elapsed.as_secs_f64());
        debug!("downloaded {downloaded} bytes in {elapsed:?} ({avg_speed:.2} Mbps)");

        Ok(DownloadResult { avg_speed_mbps: avg_speed })
    }
}

#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub avg_speed_mbps: f64,
}
