pub mod app;
pub mod controller;
pub mod error;
pub mod results;
pub mod settings;
pub mod speedtest;
pub mod ui;

pub use controller::{RunOutcome, RunState, TestController, TestEvent};
pub use error::{Error, Result};
pub use results::{MeasurementRecord, MemoryResults, ResultsStore, SqliteResults};
pub use settings::Settings;
pub use speedtest::{HttpProbe, Phase, Probe, ProbeProgress};
