use balltoss::backend::{AssistanceLevel, GameBackend, LocalStore};
use balltoss::bot::{simulate_session, BotPlayer};
use balltoss::config::{BackendKind, Config, ConfigStore, FileConfigStore};
use balltoss::difficulty::{DifficultySeed, DifficultyTier};
use balltoss::evaluator::PerfectRange;
use balltoss::gauge::GAUGE_MAX;
use balltoss::history::{assistance_breakdown, export_csv, overall_success_rate};
use balltoss::runtime::{CrosstermEventSource, FixedTicker, GameEvent, Runner};
use balltoss::session::{Session, SessionConfig, SessionExit, SessionReport};
use balltoss::turn::TurnPhase;
use clap::{error::ErrorKind, Args, CommandFactory, Parser, Subcommand};
use crossterm::{
    cursor::MoveToColumn,
    event::{KeyCode, KeyModifiers},
    execute,
    style::Print,
    terminal::{disable_raw_mode, enable_raw_mode, Clear, ClearType},
    tty::IsTty,
};
use std::{
    error::Error,
    io::{self, stdin, Write},
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const TICK_RATE_MS: u64 = 100;
const BAR_WIDTH: usize = 40;

/// ball toss timing game with adaptive difficulty
#[derive(Parser, Debug)]
#[clap(
    version,
    about,
    long_about = "A turn-based ball toss timing game. Stop the power gauge inside the perfect range; the gauge speeds up or slows down after every throw."
)]
pub struct Cli {
    /// log debug detail to stderr
    #[clap(short, long, global = true)]
    verbose: bool,

    /// config file to use instead of the platform default
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    #[clap(flatten)]
    overrides: Overrides,

    #[clap(subcommand)]
    command: Command,
}

/// Per-run overrides of the stored configuration
#[derive(Args, Debug, Clone, Default)]
struct Overrides {
    /// where sessions are reported
    #[clap(long, global = true, value_enum)]
    backend: Option<BackendKind>,

    /// base url of the REST backend
    #[clap(long, global = true)]
    api_url: Option<String>,

    /// SQLite file for the local backend
    #[clap(long, global = true)]
    db: Option<PathBuf>,

    /// player id sent to the backend
    #[clap(long, global = true)]
    user_id: Option<i64>,

    /// number of turns in a session
    #[clap(long, global = true)]
    turns: Option<u32>,

    /// start at this difficulty instead of asking the backend
    #[clap(long, global = true, value_enum)]
    tier: Option<DifficultyTier>,
}

impl Overrides {
    fn apply(&self, cfg: &mut Config) {
        if let Some(backend) = self.backend {
            cfg.backend = backend;
        }
        if let Some(url) = &self.api_url {
            cfg.api_url = url.clone();
        }
        if let Some(db) = &self.db {
            cfg.db_path = Some(db.clone());
        }
        if let Some(user_id) = self.user_id {
            cfg.user_id = user_id;
        }
        if let Some(turns) = self.turns {
            cfg.total_turns = turns;
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// play one session in the terminal (space or enter to charge and throw, esc to stop)
    Play,

    /// let a simulated player run sessions instantly
    Simulate {
        /// 0 throws wildly, 1 always aims inside the perfect range
        #[clap(long, default_value_t = 0.7)]
        skill: f64,

        /// random seed of the first session
        #[clap(long, default_value_t = 1)]
        seed: u64,

        /// number of sessions to play
        #[clap(long, default_value_t = 1)]
        sessions: u32,
    },

    /// list sessions stored by the local backend
    History {
        /// number of sessions to show, most recent first
        #[clap(long, default_value_t = 20)]
        limit: usize,

        /// write the sessions to this csv file instead
        #[clap(long)]
        csv: Option<PathBuf>,
    },

    /// print the effective configuration
    Config {
        /// store it as the default configuration
        #[clap(long)]
        save: bool,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(&cli);

    let store = match &cli.config {
        Some(path) => FileConfigStore::with_path(path),
        None => FileConfigStore::new(),
    };
    let mut cfg = store.load();
    cli.overrides.apply(&mut cfg);

    match &cli.command {
        Command::Play => play(&cfg, cli.overrides.tier),
        Command::Simulate {
            skill,
            seed,
            sessions,
        } => simulate(&cfg, cli.overrides.tier, *skill, *seed, *sessions),
        Command::History { limit, csv } => history(&cfg, *limit, csv.as_ref()),
        Command::Config { save } => {
            println!("{}", serde_json::to_string_pretty(&cfg)?);
            if *save {
                store.save(&cfg)?;
                eprintln!("saved to {}", store.path().display());
            }
            Ok(())
        }
    }
}

fn init_logging(cli: &Cli) {
    // Log lines would tear the gauge line in raw mode
    let level = match (&cli.command, cli.verbose) {
        (_, true) => Level::DEBUG,
        (Command::Play, false) => Level::WARN,
        _ => Level::INFO,
    };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// Session parameters and starting difficulty. A forced tier skips the
/// recommendation request, so no RL update is sent for that session.
fn prepare(
    cfg: &Config,
    backend: &dyn GameBackend,
    tier: Option<DifficultyTier>,
) -> (SessionConfig, DifficultySeed) {
    let mut session_config = cfg.session_config();
    match tier {
        Some(tier) => {
            session_config.initial_speed_ms = session_config.tier_speeds.speed_for(tier);
            info!("Starting at {} difficulty", tier);
            (session_config, DifficultySeed::default())
        }
        None => (session_config, DifficultySeed::request(backend, cfg.user_id)),
    }
}

fn play(cfg: &Config, tier: Option<DifficultyTier>) -> Result<(), Box<dyn Error>> {
    if !stdin().is_tty() {
        let mut cmd = Cli::command();
        cmd.error(ErrorKind::Io, "stdin must be a tty").exit();
    }

    let backend = cfg.connect()?;
    let (session_config, seed) = prepare(cfg, backend.as_ref(), tier);
    let mut session = Session::start(backend, cfg.player(), session_config, seed, Instant::now())?;

    println!("Hold on... the ball is coming. SPACE or ENTER to charge, again to throw, ESC to stop.");
    let finished = match enable_raw_mode() {
        Ok(()) => run_play_loop(&mut session),
        Err(e) => Err(e.into()),
    };
    let finished = abort_on_error(&mut session, finished);
    disable_raw_mode()?;
    println!();

    let report = if finished? {
        let assistance = ask_assistance()?;
        session.complete(assistance)?
    } else {
        session.abort()?
    };
    print_report(&report);
    Ok(())
}

/// Ends the backend session before a terminal error propagates
fn abort_on_error<T>(
    session: &mut Session,
    outcome: Result<T, Box<dyn Error>>,
) -> Result<T, Box<dyn Error>> {
    outcome.map_err(|e| {
        if let Err(abort_err) = session.abort() {
            warn!("Could not abort session after play error: {}", abort_err);
        }
        e
    })
}

/// Returns true when the session ran to completion, false on abort
fn run_play_loop(session: &mut Session) -> Result<bool, Box<dyn Error>> {
    let runner = Runner::new(
        CrosstermEventSource::new(),
        FixedTicker::new(Duration::from_millis(TICK_RATE_MS)),
    );
    let mut stdout = io::stdout();

    loop {
        let now = Instant::now();
        if session.advance(now) == TurnPhase::SessionComplete {
            draw_status(&mut stdout, &status_line(session, now))?;
            return Ok(true);
        }
        draw_status(&mut stdout, &status_line(session, now))?;

        if let GameEvent::Key(key) = runner.step_until(session.next_deadline(now)) {
            match key.code {
                KeyCode::Esc => return Ok(false),
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    return Ok(false)
                }
                KeyCode::Char(' ') | KeyCode::Enter => {
                    let now = Instant::now();
                    if session.phase() == TurnPhase::Charging {
                        session.press_end(now);
                    } else {
                        session.press_start(now);
                    }
                }
                _ => {}
            }
        }
    }
}

fn draw_status(stdout: &mut io::Stdout, line: &str) -> io::Result<()> {
    execute!(
        stdout,
        MoveToColumn(0),
        Clear(ClearType::CurrentLine),
        Print(line)
    )
}

fn status_line(session: &Session, now: Instant) -> String {
    let (played, total) = session.progress();
    let controller = session.controller();
    let turn = (played + 1).min(total);

    match session.phase() {
        TurnPhase::Ready if controller.accepts_input(now) => {
            format!("Turn {}/{}  ready, press to charge", turn, total)
        }
        TurnPhase::Ready => format!("Turn {}/{}  the ball is coming...", turn, total),
        TurnPhase::Charging | TurnPhase::Evaluating => {
            let gauge = session.gauge();
            format!(
                "Turn {}/{}  [{}] {:>3.0}",
                turn,
                total,
                gauge_bar(gauge.value, controller.config().perfect_range),
                gauge.value
            )
        }
        TurnPhase::Resolving => match controller.last_evaluation() {
            Some(eval) => format!(
                "Turn {}/{}  {} ({:.0})",
                played, total, eval.outcome, eval.power
            ),
            None => format!("Turn {}/{}", played, total),
        },
        TurnPhase::Aborted => format!("Stopped after {} of {} turns", played, total),
        TurnPhase::SessionComplete => {
            let result = session.result();
            format!(
                "Done! {} of {} throws were perfect",
                result.successful_throws, result.total_attempts
            )
        }
    }
}

fn gauge_bar(value: f64, range: PerfectRange) -> String {
    let filled = ((value / GAUGE_MAX) * BAR_WIDTH as f64).round() as usize;
    (0..BAR_WIDTH)
        .map(|i| {
            let at = (i as f64 + 0.5) * GAUGE_MAX / BAR_WIDTH as f64;
            if i < filled {
                '#'
            } else if range.contains(at) {
                '-'
            } else {
                '.'
            }
        })
        .collect()
}

fn ask_assistance() -> io::Result<Option<AssistanceLevel>> {
    print!("How much help was needed? [n]one, [v]erbal, [p]hysical (enter to skip): ");
    io::stdout().flush()?;
    let mut line = String::new();
    stdin().read_line(&mut line)?;

    Ok(match line.trim().to_ascii_lowercase().as_str() {
        "n" => Some(AssistanceLevel::None),
        "v" => Some(AssistanceLevel::Verbal),
        "p" => Some(AssistanceLevel::Physical),
        other => AssistanceLevel::from_label(other),
    })
}

fn print_report(report: &SessionReport) {
    let session = report
        .session_id
        .map_or("unreported".to_string(), |id| format!("#{}", id));
    let verb = match report.exit {
        SessionExit::Completed => "completed",
        SessionExit::Aborted => "aborted",
    };
    println!(
        "session {} {}: {}/{} perfect, final speed {:.1}ms/tick",
        session,
        verb,
        report.result.successful_throws,
        report.result.total_attempts,
        report.result.final_speed_ms
    );
    println!("  {}", report.reporting.render());
}

fn simulate(
    cfg: &Config,
    tier: Option<DifficultyTier>,
    skill: f64,
    seed: u64,
    sessions: u32,
) -> Result<(), Box<dyn Error>> {
    let backend = cfg.connect()?;

    for n in 0..sessions {
        let (session_config, difficulty) = prepare(cfg, backend.as_ref(), tier);
        let start = Instant::now();
        let mut session = Session::start(
            Arc::clone(&backend),
            cfg.player(),
            session_config,
            difficulty,
            start,
        )?;
        let mut bot = BotPlayer::new(skill, seed.wrapping_add(n as u64));
        simulate_session(&mut session, &mut bot, start);

        let report = if session.is_complete() {
            session.complete(None)?
        } else {
            session.abort()?
        };
        print_report(&report);
    }
    Ok(())
}

fn history(cfg: &Config, limit: usize, csv: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    let store = LocalStore::open(cfg.db_path())?;
    let summaries = store.recent_sessions(limit)?;

    if let Some(path) = csv {
        export_csv(&summaries, path)?;
        println!("exported {} sessions to {}", summaries.len(), path.display());
        return Ok(());
    }

    if summaries.is_empty() {
        println!("no sessions yet");
        return Ok(());
    }
    for summary in &summaries {
        println!("{}", summary.render());
    }
    if let Some(rate) = overall_success_rate(&summaries) {
        println!("overall success rate {:.0}%", rate * 100.0);
    }
    let breakdown = assistance_breakdown(&summaries);
    if !breakdown.is_empty() {
        let parts: Vec<String> = breakdown
            .iter()
            .map(|(level, count)| format!("{} {}", level, count))
            .collect();
        println!("assistance: {}", parts.join(", "));
    }
    Ok(())
}
