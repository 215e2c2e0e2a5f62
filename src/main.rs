//! tieloop: play a score file against CV and MIDI hardware.

use std::error::Error;
use std::ffi::OsStr;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use tieloop::output::MidirDevice;
use tieloop::{Compiler, Config, DeviceRegistry, Scheduler};

/// How often the main loop checks for ctrl-c.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Editors save in several writes; wait this long before reloading.
const SETTLE: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(name = "tieloop")]
#[command(version, about = "Live-codable sequencing for CV and MIDI hardware")]
struct Cli {
    /// Config file (default: ~/.tieloop/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a score until interrupted
    Play {
        file: PathBuf,

        /// Reload the score whenever the file changes
        #[arg(short, long)]
        watch: bool,
    },

    /// Compile a score and print the rendered program
    Check { file: PathBuf },

    /// List MIDI output ports
    Devices,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_path(path)?,
        None => Config::load().unwrap_or_default(),
    };

    match cli.command {
        Commands::Play { file, watch } => {
            init_logging(&config)?;
            play(&config, &file, watch)?;
        }

        Commands::Check { file } => {
            let source = fs::read_to_string(&file)?;
            match Compiler::compile_with(&source, config.defaults()) {
                Ok(program) => print!("{}", serde_yaml::to_string(&program)?),
                Err(e) => {
                    eprintln!("{}: {e}", file.display());
                    std::process::exit(1);
                }
            }
        }

        Commands::Devices => {
            let devices = MidirDevice::list_devices(&config.midi_client_name);
            if devices.is_empty() {
                println!("no MIDI output ports");
            }
            for name in devices {
                println!("{name}");
            }
        }
    }

    Ok(())
}

/// Log to the configured file so the terminal stays free for errors.
fn init_logging(config: &Config) -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_file)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn play(config: &Config, file: &Path, watch: bool) -> Result<(), Box<dyn Error>> {
    let scheduler = Scheduler::new(
        DeviceRegistry::new(config.connector()),
        config.scheduler_settings(),
    );
    scheduler.update(&fs::read_to_string(file)?)?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))?;
    }

    scheduler.play();
    eprintln!(
        "playing {} ({} chains), ctrl-c to stop",
        file.display(),
        scheduler.chain_count()
    );

    let (changes, changed) = mpsc::channel();
    let _watcher = if watch {
        Some(watch_file(file, changes.clone())?)
    } else {
        None
    };

    while running.load(Ordering::SeqCst) && scheduler.is_playing() {
        match changed.recv_timeout(POLL_INTERVAL) {
            Ok(()) => {
                thread::sleep(SETTLE);
                while changed.try_recv().is_ok() {}
                reload(&scheduler, file);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    drop(changes);

    scheduler.stop();
    info!("exiting");
    Ok(())
}

fn reload(scheduler: &Scheduler, file: &Path) {
    match fs::read_to_string(file) {
        Ok(source) => match scheduler.update(&source) {
            Ok(()) => eprintln!("reloaded {}", file.display()),
            Err(e) => eprintln!("{}: {e}", file.display()),
        },
        Err(e) => warn!("cannot read {}: {e}", file.display()),
    }
}

/// Signal `changes` whenever `file` is written or replaced.
///
/// The parent directory is watched because many editors save by renaming a
/// new file over the old one.
fn watch_file(file: &Path, changes: Sender<()>) -> notify::Result<RecommendedWatcher> {
    let name = file.file_name().map(OsStr::to_os_string);
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if name.as_deref().is_some_and(|name| touches(&event, name)) {
                debug!("score changed: {:?}", event.kind);
                let _ = changes.send(());
            }
        }
        Err(e) => warn!("watch error: {e}"),
    })?;
    let dir = match file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

/// Whether `event` writes or creates a file called `name`.
fn touches(event: &Event, name: &OsStr) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
        && event.paths.iter().any(|p| p.file_name() == Some(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, ModifyKind, RemoveKind};

    #[test]
    fn only_writes_to_the_score_count() {
        let name = OsStr::new("song.tl");
        let write = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(PathBuf::from("/scores/song.tl"));
        let create =
            Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("song.tl"));
        let other = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(PathBuf::from("/scores/song.tl.swp"));
        let removed =
            Event::new(EventKind::Remove(RemoveKind::File)).add_path(PathBuf::from("song.tl"));

        assert!(touches(&write, name));
        assert!(touches(&create, name));
        assert!(!touches(&other, name));
        assert!(!touches(&removed, name));
    }

    #[test]
    fn cli_parses_watch() {
        let cli = Cli::try_parse_from(["tieloop", "play", "song.tl", "--watch"]).unwrap();
        assert!(matches!(cli.command, Commands::Play { watch: true, .. }));
    }
}
