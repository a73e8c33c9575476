#![allow(dead_code)]

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use speedofme::{Phase, Probe, ProbeProgress, TestEvent};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;

/// What one probe phase does when the scripted probe runs it.
#[derive(Clone)]
pub struct PhaseScript {
    samples: Vec<(u8, f64)>,
    result: Result<f64, String>,
    hold: Option<Arc<Notify>>,
    panics: bool,
}

impl PhaseScript {
    pub fn ok(speed: f64) -> Self {
        Self {
            samples: Vec::new(),
            result: Ok(speed),
            hold: None,
            panics: false,
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            result: Err(reason.to_string()),
            ..Self::ok(0.0)
        }
    }

    pub fn panicking() -> Self {
        Self {
            panics: true,
            ..Self::ok(0.0)
        }
    }

    /// Percent complete and current speed for each sample sent.
    pub fn with_samples(mut self, samples: &[(u8, f64)]) -> Self {
        self.samples = samples.to_vec();
        self
    }

    /// Blocks after sending samples until `gate` is notified.
    pub fn held(mut self, gate: Arc<Notify>) -> Self {
        self.hold = Some(gate);
        self
    }
}

pub struct ScriptedProbe {
    download: Mutex<VecDeque<PhaseScript>>,
    upload: Mutex<VecDeque<PhaseScript>>,
    calls: Mutex<Vec<Phase>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(download: PhaseScript, upload: PhaseScript) -> Arc<Self> {
        Self::sequence(vec![download], vec![upload])
    }

    /// Scripts are consumed one per run; the last one repeats.
    pub fn sequence(download: Vec<PhaseScript>, upload: Vec<PhaseScript>) -> Arc<Self> {
        Arc::new(Self {
            download: Mutex::new(download.into()),
            upload: Mutex::new(upload.into()),
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> Vec<Phase> {
        self.calls.lock().clone()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn next_script(queue: &Mutex<VecDeque<PhaseScript>>) -> PhaseScript {
        let mut queue = queue.lock();
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().expect("no script configured")
        }
    }

    async fn play(
        &self,
        phase: Phase,
        script: PhaseScript,
        progress: mpsc::Sender<ProbeProgress>,
    ) -> anyhow::Result<f64> {
        self.calls.lock().push(phase);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        for (percent, speed) in &script.samples {
            let _ = progress
                .send(ProbeProgress {
                    transferred_bytes: *percent as u64,
                    total_bytes: 100,
                    current_mbps: *speed,
                })
                .await;
        }
        if let Some(gate) = &script.hold {
            gate.notified().await;
        }
        if script.panics {
            panic!("scripted probe panic");
        }
        script.result.map_err(|reason| anyhow!(reason))
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn download(&self, progress: mpsc::Sender<ProbeProgress>) -> anyhow::Result<f64> {
        let script = Self::next_script(&self.download);
        self.play(Phase::Download, script, progress).await
    }

    async fn upload(&self, progress: mpsc::Sender<ProbeProgress>) -> anyhow::Result<f64> {
        let script = Self::next_script(&self.upload);
        self.play(Phase::Upload, script, progress).await
    }
}

pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<TestEvent>) -> TestEvent {
    timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Reads events up to and including the next terminal event.
pub async fn collect_run(rx: &mut mpsc::UnboundedReceiver<TestEvent>) -> Vec<TestEvent> {
    let mut events = Vec::new();
    loop {
        let event = next_event(rx).await;
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            return events;
        }
    }
}

pub fn count_terminal(events: &[TestEvent]) -> usize {
    events.iter().filter(|e| e.is_terminal()).count()
}
