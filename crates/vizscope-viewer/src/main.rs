mod app;
mod config;
mod driver;
mod logging;
mod ui;

use anyhow::Context as _;
use app::App;
use clap::Parser;
use crossterm::{
    event::{Event, EventStream, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use driver::{retry_elapsed, DriverEvent, EVENT_QUEUE_CAPACITY};
use futures_util::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io::{self, Stdout};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

const RENDER_INTERVAL_MS: u64 = 33;
const SHUTDOWN_DRAIN_MS: u64 = 200;

type ScopeTerminal = Terminal<CrosstermBackend<Stdout>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = config::Args::parse();
    let config = config::load_config(args);
    let log_guard = logging::init_logging(&config);
    info!(
        log_file = log_guard.as_ref().is_some_and(logging::LogGuard::has_file),
        url = config.url.as_deref().unwrap_or("-"),
        discovery = %config.discovery_url,
        history = config.history_capacity,
        auto_reconnect = config.auto_reconnect,
        "viewer_starting"
    );

    let (driver_tx, driver_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let mut app = App::new(&config, driver_tx);
    app.connect();

    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("enter alternate screen")?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let result = run(&mut terminal, &mut app, driver_rx).await;

    app.shutdown();
    app.io.drain(Duration::from_millis(SHUTDOWN_DRAIN_MS)).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    info!("viewer_stopped");
    result
}

async fn run(
    terminal: &mut ScopeTerminal,
    app: &mut App,
    mut driver_rx: mpsc::Receiver<DriverEvent>,
) -> anyhow::Result<()> {
    let mut events = EventStream::new();
    let mut render_ticker = tokio::time::interval(Duration::from_millis(RENDER_INTERVAL_MS));
    render_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Frames can arrive far faster than the terminal can redraw; input
    // redraws immediately, stream traffic waits for the next tick.
    let mut dirty = true;
    let mut redraw_now = true;

    loop {
        if redraw_now {
            terminal.draw(|frame| ui::render_ui(frame, app))?;
            dirty = false;
            redraw_now = false;
        }
        tokio::select! {
            _ = render_ticker.tick() => {
                redraw_now = dirty;
            }
            _ = retry_elapsed(app.io.retry_deadline()) => {
                app.on_retry_timer();
                dirty = true;
            }
            Some(event) = driver_rx.recv() => {
                app.on_driver_event(event);
                dirty = true;
            }
            maybe_event = events.next() => match maybe_event {
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                    if app.handle_key(key) {
                        return Ok(());
                    }
                    redraw_now = true;
                }
                Some(Ok(Event::Resize(_, _))) => redraw_now = true,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!("terminal_event_failed: {err}");
                }
                None => return Ok(()),
            }
        }
    }
}
