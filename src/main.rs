use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossterm::event::Event;
use log::{info, warn};
use ratatui::DefaultTerminal;
use speedofme::app::{poll_event, App, AppAction};
use speedofme::ui::{draw_ui, format_speed};
use speedofme::{HttpProbe, ResultsStore, Settings, SqliteResults, TestController, TestEvent};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "speedofme", version, about = "Measure download and upload speed")]
struct Cli {
    /// TOML settings file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Results history database (overrides the settings file)
    #[arg(long, global = true)]
    history: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive terminal view (default)
    Tui,
    /// Run a single test without the terminal view
    Run,
    /// Print stored results, newest first
    History {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
        /// One JSON object per line
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    if let Some(path) = cli.history {
        settings.history_path = path;
    }

    let store: Arc<dyn ResultsStore> = Arc::new(
        SqliteResults::open(&settings.history_path).with_context(|| {
            format!("Failed to open results history at {}", settings.history_path.display())
        })?,
    );

    match cli.command.unwrap_or(Commands::Tui) {
        Commands::Tui => {
            let controller = build_controller(&settings);
            let mut terminal = ratatui::init();
            terminal.clear()?;

            let result = run_app(&mut terminal, controller, store).await;

            ratatui::restore();
            result
        }
        Commands::Run => run_headless(build_controller(&settings), store.as_ref()).await,
        Commands::History { limit, json } => print_history(store.as_ref(), limit, json),
    }
}

fn build_controller(settings: &Settings) -> TestController {
    TestController::new(Arc::new(HttpProbe::new(settings.clone())))
        .with_phase_timeout(settings.phase_timeout())
}

async fn run_app(
    terminal: &mut DefaultTerminal,
    controller: TestController,
    store: Arc<dyn ResultsStore>,
) -> Result<()> {
    let mut app = App::new(store);
    let mut events = controller.subscribe();

    loop {
        terminal.draw(|frame| draw_ui(frame, &app))?;

        loop {
            match events.try_recv() {
                Ok(event) => app.handle_event(event),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    anyhow::bail!("controller event channel closed")
                }
            }
        }

        if let Some(Event::Key(key)) = poll_event(Duration::from_millis(30))? {
            if let Some(action) = app.handle_key_event(key) {
                let outcome = match action {
                    AppAction::Quit => break,
                    AppAction::StartTest => controller.start(),
                    AppAction::CancelTest => controller.cancel(),
                };
                if let Err(e) = outcome {
                    warn!("{e}");
                    app.report_error(&e.to_string());
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    if controller.is_running() {
        let _ = controller.cancel();
    }
    Ok(())
}

async fn run_headless(controller: TestController, store: &dyn ResultsStore) -> Result<()> {
    let mut events = controller.subscribe();
    controller.start()?;

    while let Some(event) = events.recv().await {
        match event {
            TestEvent::Started => println!("Test in progress"),
            TestEvent::Progressed {
                phase,
                percent,
                current_speed,
            } => println!("{phase:>8} {percent:>3}%  {}", format_speed(Some(current_speed))),
            TestEvent::Succeeded { .. } | TestEvent::Failed { .. } => break,
        }
    }

    let (download_speed, upload_speed) = controller
        .last_outcome()
        .context("controller event channel closed before the test finished")?
        .into_result()?;
    println!("Download: {}", format_speed(Some(download_speed)));
    println!("Upload:   {}", format_speed(Some(upload_speed)));
    store
        .add_result(download_speed, upload_speed)
        .context("Failed to save result")?;
    info!("result saved");
    Ok(())
}

fn print_history(store: &dyn ResultsStore, limit: usize, json: bool) -> Result<()> {
    let records = store.recent(limit)?;
    if json {
        for record in &records {
            println!("{}", serde_json::to_string(record)?);
        }
        return Ok(());
    }

    if records.is_empty() {
        println!("No results recorded yet.");
        return Ok(());
    }

    println!("Results history ({} total)", store.len()?);
    println!("=================");
    for record in records {
        println!(
            "{}  down {:>12}  up {:>12}",
            record.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            format_speed(Some(record.download_speed)),
            format_speed(Some(record.upload_speed)),
        );
    }
    Ok(())
}
