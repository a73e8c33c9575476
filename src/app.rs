use crate::controller::TestEvent;
use crate::results::ResultsStore;
use crate::speedtest::Phase;
use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;

const MAX_SAMPLES: usize = 200;

pub const LABEL_BEGIN: &str = "Begin Test";
pub const LABEL_CANCEL: &str = "Cancel";
pub const LABEL_RETRY: &str = "Try again";

/// Presentation state for the terminal front end. Fed by controller events,
/// it owns no test logic of its own.
pub struct App {
    pub running: bool,
    pub should_quit: bool,
    pub status: String,
    pub action_label: &'static str,

    // None renders as an empty meter
    pub download_speed: Option<f64>,
    pub upload_speed: Option<f64>,
    pub active_phase: Option<Phase>,

    pub download_percent: u8,
    pub upload_percent: u8,
    pub download_samples: Vec<f64>,
    pub upload_samples: Vec<f64>,

    store: Arc<dyn ResultsStore>,
}

impl App {
    /// Seeds the meters from the most recent stored result, if any.
    pub fn new(store: Arc<dyn ResultsStore>) -> Self {
        let mut app = Self {
            running: false,
            should_quit: false,
            status: String::new(),
            action_label: LABEL_BEGIN,
            download_speed: None,
            upload_speed: None,
            active_phase: None,
            download_percent: 0,
            upload_percent: 0,
            download_samples: Vec::new(),
            upload_samples: Vec::new(),
            store,
        };
        app.set_status("Ready");

        match app.store.is_empty().and_then(|empty| {
            if empty {
                Ok(None)
            } else {
                app.store.get_last().map(Some)
            }
        }) {
            Ok(Some(last)) => {
                app.download_speed = Some(last.download_speed);
                app.upload_speed = Some(last.upload_speed);
            }
            Ok(None) => {}
            Err(e) => {
                error!("could not read results history: {e}");
                app.set_status(&format!("Could not read history ({e})"));
            }
        }
        app
    }

    pub fn handle_key_event(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        if key.kind != KeyEventKind::Press {
            return None;
        }

        match key.code {
            KeyCode::Char('q') => {
                self.should_quit = true;
                Some(AppAction::Quit)
            }
            KeyCode::Enter | KeyCode::Char(' ') => {
                if self.running {
                    Some(AppAction::CancelTest)
                } else {
                    Some(AppAction::StartTest)
                }
            }
            KeyCode::Esc if self.running => Some(AppAction::CancelTest),
            _ => None,
        }
    }

    pub fn handle_event(&mut self, event: TestEvent) {
        match event {
            TestEvent::Started => self.test_started(),
            TestEvent::Progressed {
                phase,
                percent,
                current_speed,
            } => self.test_progressed(phase, percent, current_speed),
            TestEvent::Succeeded {
                download_speed,
                upload_speed,
            } => self.test_succeeded(download_speed, upload_speed),
            TestEvent::Failed { reason } => self.test_failed(&reason),
        }
    }

    fn test_started(&mut self) {
        self.running = true;
        self.set_status("Test in progress");
        self.download_speed = None;
        self.upload_speed = None;
        self.active_phase = None;
        self.download_percent = 0;
        self.upload_percent = 0;
        self.download_samples.clear();
        self.upload_samples.clear();
        self.action_label = LABEL_CANCEL;
    }

    fn test_progressed(&mut self, phase: Phase, percent: u8, current_speed: f64) {
        // Late or repeated samples still land on the meter; the bar never moves back.
        let (speed, bar, samples) = match phase {
            Phase::Download => (
                &mut self.download_speed,
                &mut self.download_percent,
                &mut self.download_samples,
            ),
            Phase::Upload => (
                &mut self.upload_speed,
                &mut self.upload_percent,
                &mut self.upload_samples,
            ),
        };
        *speed = Some(current_speed);
        *bar = (*bar).max(percent.min(100));
        samples.push(current_speed);
        if samples.len() > MAX_SAMPLES {
            samples.remove(0);
        }

        self.active_phase = Some(phase);
        let name = match phase {
            Phase::Download => "Download",
            Phase::Upload => "Upload",
        };
        self.set_status(&format!("{name} in progress"));
    }

    fn test_succeeded(&mut self, download_speed: f64, upload_speed: f64) {
        self.running = false;
        self.active_phase = None;
        self.download_speed = Some(download_speed);
        self.upload_speed = Some(upload_speed);
        self.download_percent = 100;
        self.upload_percent = 100;
        self.action_label = LABEL_BEGIN;

        match self.store.add_result(download_speed, upload_speed) {
            Ok(()) => self.set_status("Ready"),
            Err(e) => {
                error!("could not save result: {e}");
                self.set_status(&format!("Result not saved ({e})"));
            }
        }
    }

    fn test_failed(&mut self, reason: &str) {
        self.running = false;
        self.active_phase = None;
        info!("test failed: {reason}");
        self.set_status("Test failed");
        self.action_label = LABEL_RETRY;
    }

    /// Reports an action the controller refused, such as a second start.
    pub fn report_error(&mut self, message: &str) {
        self.set_status(message);
    }

    fn set_status(&mut self, text: &str) {
        self.status = format!("Status: {text}");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppAction {
    Quit,
    StartTest,
    CancelTest,
}

pub fn poll_event(timeout: Duration) -> Result<Option<Event>> {
    if event::poll(timeout)? {
        Ok(Some(event::read()?))
    } else {
        Ok(None)
    }
}
