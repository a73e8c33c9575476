//! Drives one speed test run: download probe, then upload probe, with
//! lifecycle and progress events delivered to subscribers.
//!
//! Events are sent from the tokio task executing the run, never from the
//! caller of [`TestController::start`] except for `Started`, which is emitted
//! synchronously with the transition out of idle. Every run emits exactly one
//! `Started`, any number of `Progressed`, then exactly one of `Succeeded` or
//! `Failed`.

use crate::error::{Error, Result};
use crate::speedtest::{Phase, Probe, ProbeProgress};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

const DEFAULT_PHASE_TIMEOUT: Duration = Duration::from_secs(180);

/// Reason carried by `Failed` when a run is cancelled.
pub const CANCELLED: &str = "cancelled";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    RunningDownload,
    RunningUpload,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn is_running(self) -> bool {
        matches!(self, RunState::RunningDownload | RunState::RunningUpload)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TestEvent {
    Started,
    Progressed {
        phase: Phase,
        percent: u8,
        current_speed: f64,
    },
    Succeeded {
        download_speed: f64,
        upload_speed: f64,
    },
    Failed {
        reason: String,
    },
}

impl TestEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TestEvent::Succeeded { .. } | TestEvent::Failed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    pub phase: Phase,
    pub percent: u8,
    pub current_speed: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Succeeded {
        download_speed: f64,
        upload_speed: f64,
    },
    /// Only the reason is kept; a download speed measured before an upload
    /// failure is logged but not reported.
    Failed { reason: String },
}

impl RunOutcome {
    /// Maps a failed run to [`Error::Measurement`] carrying its reason.
    pub fn into_result(self) -> Result<(f64, f64)> {
        match self {
            RunOutcome::Succeeded {
                download_speed,
                upload_speed,
            } => Ok((download_speed, upload_speed)),
            RunOutcome::Failed { reason } => Err(Error::Measurement(reason)),
        }
    }
}

struct Inner {
    state: RunState,
    last_progress: Option<ProgressSample>,
    outcome: Option<RunOutcome>,
    subscribers: Vec<mpsc::UnboundedSender<TestEvent>>,
    cancel_tx: Option<mpsc::Sender<()>>,
}

impl Inner {
    fn emit(&mut self, event: TestEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

pub struct TestController {
    probe: Arc<dyn Probe>,
    phase_timeout: Duration,
    shared: Arc<Mutex<Inner>>,
}

impl TestController {
    pub fn new(probe: Arc<dyn Probe>) -> Self {
        Self {
            probe,
            phase_timeout: DEFAULT_PHASE_TIMEOUT,
            shared: Arc::new(Mutex::new(Inner {
                state: RunState::Idle,
                last_progress: None,
                outcome: None,
                subscribers: Vec::new(),
                cancel_tx: None,
            })),
        }
    }

    /// Upper bound for each of the two probes; exceeding it fails the run.
    pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout = timeout;
        self
    }

    /// Registers a new event subscriber. Subscribe before calling `start` to
    /// receive the run's `Started` event.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TestEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.lock().subscribers.push(tx);
        rx
    }

    pub fn state(&self) -> RunState {
        self.shared.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    pub fn last_progress(&self) -> Option<ProgressSample> {
        self.shared.lock().last_progress
    }

    pub fn last_outcome(&self) -> Option<RunOutcome> {
        self.shared.lock().outcome.clone()
    }

    /// Begins a run in the background.
    ///
    /// Rejected with [`Error::InvalidState`] while a run is active; the active
    /// run is left untouched. A finished run (succeeded or failed) does not
    /// block a new start. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let runtime = Handle::try_current().map_err(|_| {
            Error::InvalidState("speed test must be started inside a tokio runtime".to_string())
        })?;
        let (cancel_tx, cancel_rx) = mpsc::channel(1);

        {
            let mut inner = self.shared.lock();
            if inner.state.is_running() {
                warn!("start ignored: a speed test is already running");
                return Err(Error::InvalidState(
                    "a speed test is already running".to_string(),
                ));
            }
            inner.state = RunState::RunningDownload;
            inner.last_progress = None;
            inner.outcome = None;
            inner.cancel_tx = Some(cancel_tx);
            inner.emit(TestEvent::Started);
        }
        info!("speed test started");

        let run = Run {
            probe: self.probe.clone(),
            phase_timeout: self.phase_timeout,
            shared: self.shared.clone(),
        };
        runtime.spawn(run.execute(cancel_rx));
        Ok(())
    }

    /// Ends the active run early with `Failed { reason: "cancelled" }`.
    ///
    /// A cancel that races the end of the run may be ignored: once the upload
    /// probe has returned, the run still finishes with `Succeeded`.
    pub fn cancel(&self) -> Result<()> {
        let inner = self.shared.lock();
        if !inner.state.is_running() {
            return Err(Error::InvalidState("no speed test is running".to_string()));
        }
        if let Some(tx) = &inner.cancel_tx {
            // Full channel means a cancel is already pending.
            let _ = tx.try_send(());
        }
        info!("speed test cancellation requested");
        Ok(())
    }

    /// Discards a finished run's state, returning the controller to idle.
    pub fn acknowledge(&self) -> Result<()> {
        let mut inner = self.shared.lock();
        match inner.state {
            RunState::RunningDownload | RunState::RunningUpload => Err(Error::InvalidState(
                "cannot acknowledge a running speed test".to_string(),
            )),
            _ => {
                inner.state = RunState::Idle;
                inner.last_progress = None;
                inner.outcome = None;
                Ok(())
            }
        }
    }
}

/// State owned by the background task of a single run.
struct Run {
    probe: Arc<dyn Probe>,
    phase_timeout: Duration,
    shared: Arc<Mutex<Inner>>,
}

impl Run {
    async fn execute(self, mut cancel_rx: mpsc::Receiver<()>) {
        let outcome = match self.measure(&mut cancel_rx).await {
            Ok((download_speed, upload_speed)) => RunOutcome::Succeeded {
                download_speed,
                upload_speed,
            },
            Err(reason) => RunOutcome::Failed { reason },
        };
        self.finish(outcome);
    }

    async fn measure(
        &self,
        cancel_rx: &mut mpsc::Receiver<()>,
    ) -> std::result::Result<(f64, f64), String> {
        let download = self.run_phase(Phase::Download, cancel_rx).await?;
        info!("download complete: {download:.2} Mbps");

        self.shared.lock().state = RunState::RunningUpload;

        let upload = self
            .run_phase(Phase::Upload, cancel_rx)
            .await
            .inspect_err(|_| {
                debug!("discarding download result of {download:.2} Mbps after upload failure")
            })?;
        info!("upload complete: {upload:.2} Mbps");

        Ok((download, upload))
    }

    async fn run_phase(
        &self,
        phase: Phase,
        cancel_rx: &mut mpsc::Receiver<()>,
    ) -> std::result::Result<f64, String> {
        let (progress_tx, mut progress_rx) = mpsc::channel::<ProbeProgress>(32);
        let probe = self.probe.clone();
        let mut handle = tokio::spawn(async move {
            match phase {
                Phase::Download => probe.download(progress_tx).await,
                Phase::Upload => probe.upload(progress_tx).await,
            }
        });

        let deadline = tokio::time::sleep(self.phase_timeout);
        tokio::pin!(deadline);

        let joined = loop {
            tokio::select! {
                biased;
                Some(()) = cancel_rx.recv() => {
                    handle.abort();
                    return Err(CANCELLED.to_string());
                }
                _ = &mut deadline => {
                    handle.abort();
                    return Err(format!("{phase} timed out after {:?}", self.phase_timeout));
                }
                Some(progress) = progress_rx.recv() => self.report_progress(phase, progress),
                joined = &mut handle => break joined,
            }
        };

        while let Ok(progress) = progress_rx.try_recv() {
            self.report_progress(phase, progress);
        }

        match joined {
            Ok(Ok(speed)) if speed.is_finite() && speed >= 0.0 => Ok(speed),
            Ok(Ok(speed)) => Err(format!("{phase} probe reported an invalid speed: {speed}")),
            Ok(Err(e)) => Err(format!("{phase} failed: {e:#}")),
            Err(e) => Err(format!("{phase} probe stopped unexpectedly: {e}")),
        }
    }

    fn report_progress(&self, phase: Phase, progress: ProbeProgress) {
        let sample = ProgressSample {
            phase,
            percent: progress.percent(),
            current_speed: progress.current_mbps,
        };
        debug!(
            "{phase} progress: {}% at {:.2} Mbps",
            sample.percent, sample.current_speed
        );

        let mut inner = self.shared.lock();
        inner.last_progress = Some(sample);
        inner.emit(TestEvent::Progressed {
            phase,
            percent: sample.percent,
            current_speed: sample.current_speed,
        });
    }

    fn finish(&self, outcome: RunOutcome) {
        let mut inner = self.shared.lock();
        inner.cancel_tx = None;
        let event = match &outcome {
            RunOutcome::Succeeded {
                download_speed,
                upload_speed,
            } => {
                info!("speed test succeeded: {download_speed:.2} down / {upload_speed:.2} up Mbps");
                inner.state = RunState::Succeeded;
                TestEvent::Succeeded {
                    download_speed: *download_speed,
                    upload_speed: *upload_speed,
                }
            }
            RunOutcome::Failed { reason } => {
                warn!("speed test failed: {reason}");
                inner.state = RunState::Failed;
                TestEvent::Failed {
                    reason: reason.clone(),
                }
            }
        };
        inner.outcome = Some(outcome);
        inner.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NeverProbe;

    #[async_trait::async_trait]
    impl Probe for NeverProbe {
        async fn download(&self, _: mpsc::Sender<ProbeProgress>) -> anyhow::Result<f64> {
            unreachable!("probe should not run")
        }
        async fn upload(&self, _: mpsc::Sender<ProbeProgress>) -> anyhow::Result<f64> {
            unreachable!("probe should not run")
        }
    }

    #[test]
    fn running_states() {
        assert!(RunState::RunningDownload.is_running());
        assert!(RunState::RunningUpload.is_running());
        assert!(!RunState::Idle.is_running());
        assert!(!RunState::Succeeded.is_running());
        assert!(!RunState::Failed.is_running());
    }

    #[test]
    fn terminal_events() {
        assert!(!TestEvent::Started.is_terminal());
        assert!(TestEvent::Failed {
            reason: "x".to_string()
        }
        .is_terminal());
        assert!(TestEvent::Succeeded {
            download_speed: 1.0,
            upload_speed: 1.0
        }
        .is_terminal());
    }

    #[test]
    fn failed_outcome_is_a_measurement_error() {
        let failed = RunOutcome::Failed {
            reason: "download failed: connection refused".to_string(),
        };
        match failed.into_result() {
            Err(Error::Measurement(reason)) => {
                assert_eq!(reason, "download failed: connection refused")
            }
            other => panic!("expected measurement error, got {other:?}"),
        }

        let succeeded = RunOutcome::Succeeded {
            download_speed: 50.0,
            upload_speed: 10.0,
        };
        assert_eq!(succeeded.into_result().unwrap(), (50.0, 10.0));
    }

    #[test]
    fn start_outside_runtime_is_rejected() {
        let controller = TestController::new(Arc::new(NeverProbe));
        let mut events = controller.subscribe();
        assert!(matches!(controller.start(), Err(Error::InvalidState(_))));
        assert_eq!(controller.state(), RunState::Idle);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn cancel_and_acknowledge_when_idle() {
        let controller = TestController::new(Arc::new(NeverProbe));
        assert!(matches!(controller.cancel(), Err(Error::InvalidState(_))));
        assert!(controller.acknowledge().is_ok());
        assert_eq!(controller.state(), RunState::Idle);
    }
}
