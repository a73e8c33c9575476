use super::{mbps, ProbeProgress, SAMPLE_INTERVAL_MS};
use anyhow::{Context, Result};
use log::debug;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const CHUNK_SIZE: usize = 1_000_000; // 1MB chunks

pub struct UploadTest {
    client: reqwest::Client,
    url: String,
    data: Vec<u8>,
}

impl UploadTest {
    pub fn new(client: reqwest::Client, url: &str, upload_size: usize) -> Self {
        let mut rng = rand::rngs::StdRng::from_entropy();
        let data: Vec<u8> = (0..upload_size).map(|_| rng.gen()).collect();
        Self {
            client,
            url: url.to_string(),
            data,
        }
    }

    pub async fn run(&self, progress_tx: mpsc::Sender<ProbeProgress>) -> Result<UploadResult> {
        let total = self.data.len() as u64;
        let start = Instant::now();
        let mut uploaded: u64 = 0;
        let mut last_update = Instant::now();
        let mut last_uploaded: u64 = 0;

        for chunk in self.data.chunks(CHUNK_SIZE) {
            self.client
                .post(&self.url)
                .body(chunk.to_vec())
                .send()
                .await
                .with_context(|| format!("upload request to {} failed", self.url))?
                .error_for_status()
                .context("upload server returned an error")?;
            uploaded += chunk.len() as u64;

            let now = Instant::now();
            let interval = now.duration_since(last_update);

            if interval >= Duration::from_millis(SAMPLE_INTERVAL_MS) {
                let current = mbps(uploaded - last_uploaded, interval.as_secs_f64());

                let _ = progress_tx
                    .send(ProbeProgress {
                        transferred_bytes: uploaded,
                        total_bytes: total,
                        current_mbps: current,
                    })
                    .await;

                last_update = now;
                last_uploaded = uploaded;
            }
        }

        let elapsed = start.elapsed();
        let avg_speed = mbps(uploaded, elapsed.as_secs_f64());
        debug!("uploaded {uploaded} bytes in {elapsed:?} ({avg_speed:.2} Mbps)");

        Ok(UploadResult { avg_speed_mbps: avg_speed })
    }
}

#[derive(Debug, Clone)]
pub struct UploadResult {
    pub avg_speed_mbps: f64,
}
