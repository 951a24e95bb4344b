//! Assist CLI - terminal chat with the automation assistant.
//!
//! This is the entry point for the `assist` binary.

mod app;
mod ui;

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use assist_stream_core::{ChatClient, ClientConfig, TransportEvent};
use clap::Parser;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers, MouseEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use app::App;

/// Assist CLI - terminal chat with the automation assistant.
#[derive(Parser, Debug)]
#[command(name = "assist")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket endpoint of the assistant.
    #[arg(
        long,
        env = "ASSIST_ENDPOINT",
        default_value = "ws://localhost:8000/ws/chat"
    )]
    endpoint: String,

    /// Access token, sent as the `access_token` cookie.
    #[arg(long, env = "ASSIST_TOKEN")]
    token: Option<String>,

    /// Site id, sent as the `cloud_id` cookie.
    #[arg(long, env = "ASSIST_CLOUD_ID")]
    cloud_id: Option<String>,

    /// Delay before reconnecting after the connection drops, in milliseconds.
    #[arg(long, env = "ASSIST_RECONNECT_MS", default_value_t = 2000)]
    reconnect_ms: u64,

    /// Start conversations without the greeting message.
    #[arg(long, default_value = "false")]
    no_greeting: bool,

    /// Enable debug logging.
    #[arg(long, default_value = "false")]
    debug: bool,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Args {
    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.endpoint.clone());
        config.access_token.clone_from(&self.token);
        config.cloud_id.clone_from(&self.cloud_id);
        config.reconnect_delay_ms = self.reconnect_ms;
        if self.no_greeting {
            config.greeting = None;
        }
        config
    }
}

/// Install the tracing subscriber.
///
/// Stderr shares the terminal with the UI, so it is only used when asked for.
fn init_logging(args: &Args) -> anyhow::Result<()> {
    let filter = if args.debug {
        EnvFilter::new("assist=debug,assist_stream_core=debug,warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    if let Some(path) = &args.log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .init();
    } else if args.debug || std::env::var_os("RUST_LOG").is_some() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse arguments
    let args = Args::parse();

    init_logging(&args)?;

    // Create client; the CLI holds its credentials up front, so it starts authenticated
    let (mut client, mut events) = ChatClient::new(args.client_config())?;
    client.set_authenticated(true)?;
    tracing::info!(endpoint = %args.endpoint, "Starting assist");

    // Setup terminal with mouse capture enabled
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(client);
    app.set_status("Connecting...");

    // Run the event loop
    let result = run_event_loop(&mut terminal, &mut app, &mut events).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    result
}

/// Main event loop.
///
/// Transport events trigger an immediate redraw so streamed text shows up as
/// it arrives.
async fn run_event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    events: &mut mpsc::Receiver<TransportEvent>,
) -> anyhow::Result<()> {
    loop {
        app.tick_animation();
        terminal.draw(|f| ui::render(f, app))?;

        let tick_rate = if app.needs_immediate_redraw() {
            Duration::from_millis(80)
        } else {
            Duration::from_millis(100)
        };

        tokio::select! {
            () = tokio::time::sleep(tick_rate) => {
                while event::poll(Duration::from_millis(0)).unwrap_or(false) {
                    if let Ok(evt) = event::read() {
                        handle_input(app, evt);
                    }
                }
            }

            Some(event) = events.recv() => {
                if app.handle_transport_event(event) {
                    terminal.draw(|f| ui::render(f, app))?;
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    app.shutdown();
    Ok(())
}

/// Handle terminal input events.
fn handle_input(app: &mut App, event: Event) {
    match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => handle_key(app, key),
        Event::Mouse(mouse) => match mouse.kind {
            MouseEventKind::ScrollUp => app.scroll_chat_up(3),
            MouseEventKind::ScrollDown => app.scroll_chat_down(3),
            _ => {}
        },
        _ => {}
    }
}

/// Handle a key press.
fn handle_key(app: &mut App, key: KeyEvent) {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    match key.code {
        KeyCode::Esc => {
            // First Esc dismisses an error
            if app.error_message.is_some() {
                app.clear_error();
            } else {
                app.should_quit = true;
            }
        }
        KeyCode::Char('c') if ctrl => app.should_quit = true,
        KeyCode::Char('n') if ctrl => app.new_conversation(),
        KeyCode::Char('r') if ctrl => app.reconnect(),
        KeyCode::Char('a') if ctrl => app.move_cursor_start(),
        KeyCode::Char('e') if ctrl => app.move_cursor_end(),
        KeyCode::Char('u') if ctrl => app.clear_input(),
        KeyCode::Char('w') if ctrl => app.delete_word(),
        KeyCode::Char(c) => app.insert_char(c),
        KeyCode::Enter => app.submit_input(),
        KeyCode::Backspace => app.delete_char(),
        KeyCode::Delete => app.delete_char_forward(),
        KeyCode::Left => app.move_cursor_left(),
        KeyCode::Right => app.move_cursor_right(),
        KeyCode::Home => app.move_cursor_start(),
        KeyCode::End => app.move_cursor_end(),
        KeyCode::Up => app.scroll_chat_up(1),
        KeyCode::Down => app.scroll_chat_down(1),
        KeyCode::PageUp => app.scroll_chat_up(10),
        KeyCode::PageDown => app.scroll_chat_down(10),
        _ => {}
    }
}
