use anyhow::{Context, Result};
use clap::{Parser, Subcommand, builder::PossibleValuesParser};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use log::info;
use ratatui::prelude::*;
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use medminder::clock::{Clock, SystemClock};
use medminder::config::{self, Config, LOG_FILE, parse_duration};
use medminder::model::TIMESTAMP_FMT;
use medminder::notify::{DesktopSurface, PromptBoard};
use medminder::poller::Poller;
use medminder::ui::{AppState, THEMES, handle_input, render_ui};
use medminder::{JsonLinesStore, RecordStore, ReminderService};

const TICK_RATE: Duration = Duration::from_millis(100);

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser)]
#[command(author, version, about = "💊 medminder - Medicine reminders with spoken alerts")]
struct Args {
    /// Where medicines, the dose log and settings are kept
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Wait before the second alert (e.g. 5m, 120s)
    #[arg(long, value_parser = parse_duration)]
    first_alert: Option<Duration>,
    /// Wait after the second alert before logging "Missed (Auto)"
    #[arg(long, value_parser = parse_duration)]
    grace: Option<Duration>,
    /// How often the schedule is checked
    #[arg(long, value_parser = parse_duration)]
    interval: Option<Duration>,
    #[arg(short = 't', long, value_parser = PossibleValuesParser::new(THEMES))]
    theme: Option<String>,
    #[arg(long)]
    no_sound: bool,
    #[arg(long)]
    no_speech: bool,
    #[arg(long)]
    no_desktop: bool,
    /// Persist the effective settings to config.json
    #[arg(long)]
    save_config: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Watch the schedule and prompt for doses (default)
    Run,
    /// Schedule a medicine at a daily time
    Add { name: String, time: String },
    /// Show the schedule
    List,
    /// Rename a medicine or move it to another time
    Edit {
        name: String,
        #[arg(long = "name")]
        new_name: Option<String>,
        #[arg(long)]
        time: Option<String>,
    },
    /// Remove a medicine from the schedule
    Remove { name: String },
    /// Show recent doses
    History {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<()> {
    let args = Args::parse();
    let dir = config::data_dir(args.data_dir.clone());
    fs::create_dir_all(&dir).with_context(|| format!("creating data directory {}", dir.display()))?;

    let command = args.command.unwrap_or(Command::Run);
    init_logging(&dir, matches!(command, Command::Run))?;

    let mut config = Config::load(&dir);

    // CLI overrides
    if let Some(d) = args.first_alert { config.first_alert_secs = d.as_secs(); }
    if let Some(d) = args.grace { config.final_grace_secs = d.as_secs(); }
    if let Some(d) = args.interval { config.check_interval_secs = d.as_secs(); }
    if let Some(t) = args.theme { config.theme = t; }
    if args.no_sound { config.sound_enabled = false; }
    if args.no_speech { config.speech_enabled = false; }
    if args.no_desktop { config.desktop_notifications = false; }
    if args.save_config {
        config.save(&dir).context("saving config")?;
    }

    let store = Arc::new(JsonLinesStore::open(&dir)?);

    match command {
        Command::Run => run_app(config, store),
        Command::Add { name, time } => {
            let entry = store.add_medicine(&name, &time)?;
            println!("Medicine '{}' added for {}!", entry.name, entry.time);
            Ok(())
        }
        Command::List => {
            let medicines = store.load_medicines()?;
            if medicines.is_empty() {
                println!("No medicines scheduled.");
            }
            for m in medicines {
                println!("{}  {}", m.time, m.name);
            }
            Ok(())
        }
        Command::Edit { name, new_name, time } => {
            if new_name.is_none() && time.is_none() {
                anyhow::bail!("nothing to change: pass --name and/or --time");
            }
            let entry = store.update_medicine(&name, new_name.as_deref(), time.as_deref())?;
            println!("Updated: {}  {}", entry.time, entry.name);
            Ok(())
        }
        Command::Remove { name } => {
            let entry = store.remove_medicine(&name)?;
            println!("Removed {} ({})", entry.name, entry.time);
            Ok(())
        }
        Command::History { limit } => {
            let logs = store.load_logs()?;
            let skip = logs.len().saturating_sub(limit);
            for rec in &logs[skip..] {
                println!("{}  {}  {} {}", rec.timestamp.format(TIMESTAMP_FMT), rec.name, rec.status.icon(), rec.status);
            }
            Ok(())
        }
    }
}

/// The terminal owns stdout while the UI runs, so log lines go to a file
/// in the data directory instead.
fn init_logging(dir: &Path, to_file: bool) -> Result<()> {
    let default_level = if to_file { "info" } else { "warn" };
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level));

    if to_file {
        let path = dir.join(LOG_FILE);
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

fn run_app(config: Config, store: Arc<JsonLinesStore>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;

    let board = PromptBoard::new();
    let surface = Arc::new(DesktopSurface::new(
        board.clone(),
        config.desktop_notifications,
        config.sound_enabled,
        config.speech_enabled,
    ));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let handle = {
        let _guard = runtime.enter();
        let handle = ReminderService::spawn(store.clone(), surface, clock.clone(), config.timeout_policy());
        tokio::spawn(Poller::new(handle.clone(), clock, config.check_interval()).run());
        handle
    };
    info!("medminder {} started", env!("CARGO_PKG_VERSION"));

    let mut app = AppState::new(handle, store, board, &config.theme);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run(&mut terminal, &mut app);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    drop(app);
    runtime.shutdown_timeout(Duration::from_secs(1));
    info!("medminder stopped");
    res
}

fn run(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &mut AppState) -> Result<()> {
    let mut last_tick = Instant::now();

    loop {
        terminal.draw(|f| render_ui(f, app))?;

        let timeout = TICK_RATE.saturating_sub(last_tick.elapsed());
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && handle_input(key, app) {
                    return Ok(());
                }
            }
        }

        if last_tick.elapsed() >= TICK_RATE {
            app.update();
            last_tick = Instant::now();
        }
    }
}
