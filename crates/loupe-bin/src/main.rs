//! Loupe entrypoint: terminal setup, startup wiring and the event loop.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::exit;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use core_config::{BufferMode, CliArgs, CliError, ConfigWriter, RcFile};
use core_load::{LoadMode, PipeLoader};
use core_sched::{Priority, Scheduler, TaskId};
use crossterm::event::{Event, KeyEventKind};
use crossterm::{event, execute, terminal};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

mod app;
mod status;
mod view;

use app::{App, SchedCmd, TaskKind};

struct TaskIds {
    filter_scan: TaskId,
    filter_undo: TaskId,
    inc_search: TaskId,
    hall_scan: TaskId,
    high_init: TaskId,
}

impl TaskIds {
    fn register(sched: &mut Scheduler<App>) -> Self {
        Self {
            filter_scan: sched.register(Priority::SearchList),
            filter_undo: sched.register(Priority::SearchList),
            inc_search: sched.register(Priority::SearchInc),
            hall_scan: sched.register(Priority::HighlightSearch),
            high_init: sched.register(Priority::HighlightInit),
        }
    }

    fn of(&self, kind: TaskKind) -> TaskId {
        match kind {
            TaskKind::FilterScan => self.filter_scan,
            TaskKind::FilterUndo => self.filter_undo,
            TaskKind::IncSearch => self.inc_search,
            TaskKind::HallScan => self.hall_scan,
            TaskKind::HighInit => self.high_init,
        }
    }
}

fn apply_sched_cmds(app: &mut App, sched: &mut Scheduler<App>, ids: &TaskIds) {
    let cmds: Vec<SchedCmd> = app.sched_out.drain(..).collect();
    for cmd in cmds {
        match cmd {
            SchedCmd::Start { kind, delay } => {
                sched.start_after(ids.of(kind), delay, move |a: &mut App| a.run_task(kind));
            }
            SchedCmd::Stop(kind) => sched.stop(ids.of(kind)),
        }
    }
}

fn configure_logging() -> Option<WorkerGuard> {
    let appender = tracing_appender::rolling::never(".", "loupe.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    match tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
    {
        Ok(_) => Some(guard),
        Err(_) => None,
    }
}

/// Restores the terminal even on panic or error return.
struct TermGuard;

impl TermGuard {
    fn enter() -> Result<Self> {
        terminal::enable_raw_mode().context("failed to enable raw terminal mode")?;
        execute!(io::stdout(), terminal::EnterAlternateScreen)?;
        Ok(Self)
    }
}

impl Drop for TermGuard {
    fn drop(&mut self) {
        let _ = execute!(io::stdout(), terminal::LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
    }
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = execute!(io::stdout(), terminal::LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
        error!(target: "runtime", ?info, "panic");
        default_hook(info);
    }));
}

fn parse_cli() -> CliArgs {
    match core_config::parse_args(std::env::args()) {
        Ok(args) => args,
        Err(CliError::Help) => {
            eprintln!("{}", core_config::cli::usage_text());
            exit(1);
        }
        Err(CliError::Usage(msg)) => {
            eprintln!("{msg}");
            eprintln!("Use -? or --help for a list of options");
            exit(1);
        }
    }
}

fn load_config(path: &std::path::Path) -> (RcFile, Option<RcFile>) {
    match core_config::load(path) {
        Ok(rc) => {
            let loaded = rc.clone();
            (rc, Some(loaded))
        }
        Err(core_config::ConfigError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
            (RcFile::default(), None)
        }
        Err(e) => {
            warn!(target: "config", error = %e, "starting with default configuration");
            eprintln!("loupe: warning: {e}; starting with default configuration");
            (RcFile::default(), None)
        }
    }
}

fn read_file_lossy(path: &PathBuf) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn main() -> Result<()> {
    let args = parse_cli();
    let _log_guard = configure_logging();
    info!(target: "runtime", "startup");

    let rc_path = core_config::rc_path(args.rcfile.as_deref());
    let (rc, loaded) = load_config(&rc_path);

    let buf_size = args
        .buf_size
        .or(rc.load_buf_size())
        .unwrap_or(core_config::DEFAULT_BUF_SIZE);
    let load_mode = match args.mode {
        Some(BufferMode::Tail) => LoadMode::Tail,
        _ => LoadMode::Head,
    };

    // read the file before touching the terminal so errors stay readable
    let file_text = match &args.file {
        Some(path) => match read_file_lossy(path) {
            Ok(text) => Some(text),
            Err(e) => {
                eprintln!("loupe: {e:#}");
                exit(1);
            }
        },
        None => None,
    };

    let _term = TermGuard::enter()?;
    install_panic_hook();
    let (cols, rows) = terminal::size()?;

    let writer = ConfigWriter::new(rc_path, loaded);
    let mut app = App::new(cols, rows, rc, writer);
    app.load_buf_size = buf_size;

    match (args.file, file_text) {
        (Some(path), Some(text)) => {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            app.load_text(name, Some(path), &text);
        }
        _ => {
            app.loader = Some(PipeLoader::start(io::stdin(), load_mode, buf_size));
        }
    }

    let mut sched: Scheduler<App> = Scheduler::new();
    let ids = TaskIds::register(&mut sched);
    apply_sched_cmds(&mut app, &mut sched, &ids);

    let mut stdout = io::BufWriter::new(io::stdout());
    run_event_loop(&mut app, &mut sched, &ids, &mut stdout)?;

    // flush pending configuration changes on the way out
    let rc = app.collect_rc();
    if let Err(e) = app.rc_writer.write(&rc) {
        warn!(target: "config", error = %e, "final config write failed");
    }
    info!(target: "runtime", "shutdown");
    Ok(())
}

fn run_event_loop<W: Write>(
    app: &mut App,
    sched: &mut Scheduler<App>,
    ids: &TaskIds,
    out: &mut W,
) -> Result<()> {
    loop {
        app.poll_loader();

        if app.dirty {
            view::draw(out, app)?;
            app.dirty = false;
        }

        let now = Instant::now();
        let mut timeout = Duration::from_millis(250);
        if app.loader.is_some() {
            timeout = Duration::from_millis(50);
        }
        for deadline in [sched.next_deadline(), app.next_deadline()]
            .into_iter()
            .flatten()
        {
            timeout = timeout.min(deadline.saturating_duration_since(now));
        }

        if event::poll(timeout)? {
            match event::read()? {
                Event::Key(key) if key.kind != KeyEventKind::Release => app.on_key(key),
                Event::Resize(cols, rows) => {
                    app.view.resize(cols, rows);
                    app.dirty = true;
                }
                _ => {}
            }
            apply_sched_cmds(app, sched, ids);
        }

        app.tick(Instant::now());
        sched.dispatch(app);
        apply_sched_cmds(app, sched, ids);

        if app.quit {
            return Ok(());
        }
    }
}
