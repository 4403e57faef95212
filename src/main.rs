use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ollama_chat::{
    app::{App, Settings},
    config::Cli,
    error::AppError,
    logging,
    storage::ChatStorage,
    ui,
};
use ratatui::prelude::*;
use std::{error::Error, io, time::Instant};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let _log_guard = match logging::init(&cli.log_path()) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {}", e);
            None
        }
    };
    tracing::info!(host = %cli.host, "starting");

    let storage = ChatStorage::open(cli.history_path());

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let (tx, rx) = mpsc::channel(100);
    let mut app = App::new(Settings::from(&cli), storage, rx, tx);
    app.spawn_fetch_models();

    let res = run_app(&mut terminal, &mut app).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        tracing::error!("TUI error: {err}");
        eprintln!("TUI Error: {}", err);
    }

    Ok(())
}

// --- Main Event Loop ---
async fn run_app<B: Backend>(terminal: &mut Terminal<B>, app: &mut App) -> Result<(), AppError> {
    loop {
        app.tick(Instant::now());
        terminal.draw(|f| ui::draw(f, app))?;

        // Wait for input, but no longer than the next pending render.
        if event::poll(app.poll_timeout(Instant::now()))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if app.handle_key(key) {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }

        // Drain async events from the Ollama tasks
        loop {
            match app.try_next_event() {
                Ok(Some(app_event)) => app.handle_event(app_event),
                Ok(None) => break,
                Err(_) => {
                    app.status_message =
                        "Critical Error: Async event channel disconnected.".to_string();
                    terminal.draw(|f| ui::draw(f, app))?;
                    return Err(AppError::ChannelReceive);
                }
            }
        }

        // Let spawned tasks run when the poll returned immediately
        tokio::task::yield_now().await;
    }
}
