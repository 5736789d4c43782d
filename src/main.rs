use clap::{error::ErrorKind, CommandFactory, Parser};
use crossterm::{
    event::{DisableFocusChange, DisableMouseCapture, EnableFocusChange, EnableMouseCapture},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    tty::IsTty,
};
use eyecatch::{
    app::App,
    app_dirs::AppDirs,
    calibration::CalibrationController,
    config::{Config, ConfigStore, FileConfigStore},
    controls::{handle_event, Control},
    game::{GameRules, GameSession},
    gaze::{ChannelGaze, GazeFeed, GazeProvider},
    runtime::{CrosstermEventSource, FixedTicker, Runner},
    storage::{export_csv, ScoreDb, ScoreStore},
    ui::surface_px,
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    Terminal,
};
use std::{
    error::Error,
    io::{self, stdin},
    path::PathBuf,
    time::{Duration, Instant},
};
use tracing::{info, level_filters::LevelFilter};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const TICK_RATE_MS: u64 = 50;
const LEADERBOARD_SIZE: usize = 10;

/// gaze-driven reflex minigame for the terminal
#[derive(Parser, Debug, Clone)]
#[clap(
    version,
    about,
    long_about = "Calibrate by clicking nine dots while looking at them, then catch targets by holding your gaze on them. Without a camera estimator attached the mouse pointer stands in for your eyes."
)]
pub struct Cli {
    /// length of a match in seconds
    #[clap(short = 's', long)]
    secs: Option<u32>,

    /// how long a target must be looked at to be caught, in milliseconds
    #[clap(short = 'd', long)]
    dwell_ms: Option<u64>,

    /// seed target placement and calibration jitter for reproducible matches
    #[clap(long)]
    seed: Option<u64>,

    /// settings file to use instead of the default location
    #[clap(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// print the top 10 scores and exit
    #[clap(long)]
    leaderboard: bool,

    /// write the score history as CSV and exit
    #[clap(long, value_name = "PATH")]
    export_csv: Option<PathBuf>,

    /// erase the high score and history, then exit
    #[clap(long)]
    clear_scores: bool,

    /// store the effective settings (file + flags) and exit
    #[clap(long)]
    save_config: bool,
}

impl Cli {
    fn config_store(&self) -> FileConfigStore {
        match &self.config {
            Some(path) => FileConfigStore::with_path(path),
            None => FileConfigStore::new(),
        }
    }

    /// Flags win over the settings file.
    fn apply_overrides(&self, mut cfg: Config) -> Config {
        if let Some(secs) = self.secs {
            cfg.session_secs = secs;
        }
        if let Some(dwell) = self.dwell_ms {
            cfg.dwell_required_ms = dwell;
        }
        cfg
    }

    fn is_maintenance(&self) -> bool {
        self.leaderboard || self.export_csv.is_some() || self.clear_scores || self.save_config
    }
}

fn init_logging() -> Option<WorkerGuard> {
    let dir = AppDirs::log_dir()?;
    std::fs::create_dir_all(&dir).ok()?;
    let appender = tracing_appender::rolling::never(dir, "eyecatch.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_ansi(false)
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .try_init()
        .ok()?;
    Some(guard)
}

fn print_leaderboard<S: ScoreStore>(store: &S) {
    let records = store.top_scores(LEADERBOARD_SIZE);
    if records.is_empty() {
        println!("No scores yet.");
        return;
    }
    println!("{:>3}  {:>6}  {:>5}  {:>7}  date", "#", "score", "level", "targets");
    for (i, r) in records.iter().enumerate() {
        println!(
            "{:>3}  {:>6}  {:>5}  {:>7}  {}",
            i + 1,
            r.score,
            r.level,
            r.targets,
            r.formatted_date()
        );
    }
}

fn run_maintenance(cli: &Cli, cfg: &Config) -> Result<(), Box<dyn Error>> {
    if cli.save_config {
        let store = cli.config_store();
        store.save(cfg)?;
        println!("Saved settings to {}", store.path().display());
    }
    if cli.clear_scores {
        ScoreDb::open_default()?.clear_all()?;
        println!("Scores cleared.");
    }
    if let Some(path) = &cli.export_csv {
        let n = export_csv(&ScoreDb::open_default()?, path)?;
        println!("Exported {} scores to {}", n, path.display());
    }
    if cli.leaderboard {
        print_leaderboard(&ScoreDb::open_default()?);
    }
    Ok(())
}

fn build_app(cli: &Cli, cfg: &Config, store: ScoreDb) -> (App<ChannelGaze, ScoreDb>, GazeFeed) {
    let gaze = ChannelGaze::new();
    let feed = gaze.feed();
    let provider = GazeProvider::with_warmup(gaze, cfg.warmup_ms);
    let rules = GameRules::from(cfg);
    let (calibration, session) = match cli.seed {
        Some(seed) => (
            CalibrationController::with_seed(seed),
            GameSession::with_seed(rules, seed),
        ),
        None => (CalibrationController::new(), GameSession::new(rules)),
    };
    (App::from_parts(provider, calibration, session, store), feed)
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let _guard = init_logging();
    let cfg = cli.apply_overrides(cli.config_store().load());

    if cli.is_maintenance() {
        return run_maintenance(&cli, &cfg);
    }

    if !stdin().is_tty() {
        let mut cmd = Cli::command();
        cmd.error(ErrorKind::Io, "stdin must be a tty").exit();
    }

    let store = ScoreDb::open_default()?;
    let (mut app, feed) = build_app(&cli, &cfg, store);
    info!(?cfg, "starting");

    enable_raw_mode()?;

    let mut stdout = io::stdout();
    execute!(
        stdout,
        EnterAlternateScreen,
        EnableMouseCapture,
        EnableFocusChange
    )?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = start_tui(&mut terminal, &mut app, &feed);

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        DisableFocusChange,
        DisableMouseCapture,
        LeaveAlternateScreen
    )?;
    terminal.show_cursor()?;

    result
}

fn start_tui<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App<ChannelGaze, ScoreDb>,
    feed: &GazeFeed,
) -> Result<(), Box<dyn Error>> {
    let runner = Runner::new(
        CrosstermEventSource::new(),
        FixedTicker::new(Duration::from_millis(TICK_RATE_MS)),
    );
    let started = Instant::now();

    let size = terminal.size()?;
    let (w, h) = surface_px(size.width, size.height);
    app.resize(w, h);

    loop {
        terminal.draw(|f| f.render_widget(&*app, f.area()))?;

        let event = runner.step();
        let now_ms = started.elapsed().as_millis() as u64;
        if handle_event(app, Some(feed), &event, now_ms) == Control::Quit {
            break;
        }
        // a steady stream of pointer events must not starve the clock
        app.advance_to(now_ms);
    }

    Ok(())
}
