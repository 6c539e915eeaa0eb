mod config;
mod game;
mod library;
mod logging;
mod notifier;
mod orchestrator;
mod sync;
mod tags;
mod ytdlp;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use dialoguer::{Confirm, Input};
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio_util::sync::CancellationToken;

use config::{Config, DEFAULT_SOURCE};
use game::ProcessMonitor;
use notifier::ConsoleNotifier;
use orchestrator::DownloadOrchestrator;
use sync::{StopReason, SyncEvent, SyncLoop, SyncOptions, SyncState, SyncTiming};
use tags::Id3Tags;
use ytdlp::{Quality, YtDlp};

// ---------- Command line ----------

#[derive(Debug, Parser)]
#[command(
    name = "otoradio-agent",
    version,
    about = "Keeps the Euro Truck Simulator 2 music folder in sync with a YouTube playlist"
)]
struct Cli {
    /// Config file (default: <data dir>/OtoRadio/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Music folder the game reads (default: Documents/Euro Truck Simulator 2/music)
    #[arg(long, global = true)]
    music_dir: Option<PathBuf>,
    /// Log file (default: <data dir>/OtoRadio/error.log)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Wait for the game and sync the playlist (default)
    Run(RunArgs),
    /// Set the playlist URL
    Setup,
    /// List downloaded tracks with their tags
    Tracks,
    /// Delete one track from the music folder
    Remove {
        /// File name as shown by `tracks`
        file: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Play one track with the system's default player
    Open {
        /// File name as shown by `tracks`
        file: String,
    },
    /// Print the log file
    Logs,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Sync even when the game is not running
    #[arg(long)]
    bypass: bool,
    /// MP3 bitrate: 128, 192 or 320
    #[arg(long, default_value = "192")]
    quality: Quality,
    /// Sync again each time the game is relaunched
    #[arg(long)]
    resync_on_relaunch: bool,
    /// yt-dlp executable
    #[arg(long, default_value = "yt-dlp")]
    yt_dlp: PathBuf,
    /// Game process name to wait for
    #[arg(long)]
    process: Option<String>,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            bypass: false,
            quality: Quality::default(),
            resync_on_relaunch: false,
            yt_dlp: PathBuf::from("yt-dlp"),
            process: None,
        }
    }
}

struct Paths {
    config: PathBuf,
    music: PathBuf,
    log: PathBuf,
}

impl Paths {
    fn resolve(cli: &Cli) -> Result<Self> {
        let config = match &cli.config {
            Some(p) => config::absolute_path(p)?,
            None => config::default_config_path()?,
        };
        let music = match &cli.music_dir {
            Some(p) => config::absolute_path(p)?,
            None => config::default_music_dir()?,
        };
        let log = match &cli.log_file {
            Some(p) => config::absolute_path(p)?,
            None => config::default_log_path()?,
        };
        Ok(Self { config, music, log })
    }
}

// ---------- First-run setup ----------

fn setup_wizard(config_path: &Path) -> Result<Config> {
    println!("Welcome to ETS2 OtoRadio!");
    let current = config::load_config(config_path);

    let playlist: String = Input::new()
        .with_prompt("YouTube playlist URL")
        .with_initial_text(current.youtube_playlist)
        .allow_empty(true)
        .interact_text()?;

    config::save_config(config_path, playlist.trim(), DEFAULT_SOURCE)?;
    log::info!("Configuration saved to {}", config_path.display());
    Ok(config::load_config(config_path))
}

// ---------- Sync ----------

fn progress_bar(percent: u8) -> String {
    let filled = usize::from(percent.min(100)) / 5;
    format!("[{}{}] {:>3}%", "#".repeat(filled), ".".repeat(20 - filled), percent)
}

async fn render_events(mut rx: UnboundedReceiver<SyncEvent>) {
    while let Some(ev) = rx.recv().await {
        match ev {
            SyncEvent::State(SyncState::Waiting) => println!("[wait] Waiting for the game..."),
            SyncEvent::State(SyncState::Syncing) => println!("[sync] Sync started"),
            SyncEvent::State(SyncState::Cooldown) => println!("[sync] Cooling down"),
            SyncEvent::PassStarted { playlist_size, missing } => {
                println!("[sync] {missing} of {playlist_size} track(s) to download")
            }
            SyncEvent::Progress(p) => println!("[sync] {}", progress_bar(p)),
            SyncEvent::EntryFailed { url, reason } => eprintln!("[warn] {url} skipped: {reason}"),
            SyncEvent::PassFinished(r) => println!(
                "[done] {} downloaded, {} failed, {} already present",
                r.downloaded,
                r.failed,
                r.playlist_size - r.missing
            ),
            SyncEvent::PassAborted(reason) => eprintln!("[error] Sync pass aborted: {reason}"),
            SyncEvent::Stopped(_) => {}
        }
    }
}

async fn run_agent(paths: &Paths, args: RunArgs) -> Result<()> {
    fs::create_dir_all(&paths.music)
        .with_context(|| format!("creating {}", paths.music.display()))?;
    let removed = library::cleanup_partial_downloads(&paths.music);
    if removed > 0 {
        log::info!("Removed {removed} leftover partial download(s)");
    }

    let cfg = if !paths.config.exists() && std::io::stdin().is_terminal() {
        setup_wizard(&paths.config)?
    } else {
        config::load_config(&paths.config)
    };

    let process = args
        .process
        .unwrap_or_else(|| config::default_game_process().to_string());
    let source = Arc::new(YtDlp::new(args.yt_dlp, &paths.music));
    let orchestrator = DownloadOrchestrator::new(&paths.music, source, Arc::new(Id3Tags));
    let options = SyncOptions {
        bypass: args.bypass,
        quality: args.quality,
        resync_on_relaunch: args.resync_on_relaunch,
    };

    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::unbounded_channel();
    let sync = SyncLoop::new(
        cfg,
        options,
        SyncTiming::default(),
        orchestrator,
        Arc::new(ProcessMonitor::new(&process)),
        Arc::new(ConsoleNotifier),
        tx,
        cancel.clone(),
    );

    println!("[run] Agent is running. Press Ctrl+C to exit.");
    println!("      Music folder: {}", paths.music.display());
    if options.bypass {
        println!("      Game check: bypassed");
    } else {
        println!("      Game process: {process}");
    }
    println!("      Quality: {} kbps", options.quality);

    let worker = tokio::spawn(sync.run());
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    // Ends once the worker drops its sender
    render_events(rx).await;
    match worker.await? {
        StopReason::EmptyPlaylist => {
            println!("[stop] No playlist configured. Run `otoradio-agent setup`, then start again.")
        }
        StopReason::Cancelled => println!("[stop] Agent stopped."),
    }
    Ok(())
}

// ---------- Library management ----------

fn show_tracks(music: &Path) -> Result<()> {
    let tracks = library::list_tracks(music)?;
    if tracks.is_empty() {
        println!("No tracks in {}", music.display());
        return Ok(());
    }
    for path in tracks {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        match tags::read_tags(&path) {
            Ok((title, artist)) => println!(
                "{name}\n    title: {}  artist: {}",
                title.as_deref().unwrap_or("Unknown"),
                artist.as_deref().unwrap_or("Unknown")
            ),
            Err(e) => {
                log::warn!("ID3 could not be read: {name} - {e:#}");
                println!("{name}\n    (no readable tags)");
            }
        }
    }
    Ok(())
}

fn remove_track(music: &Path, file: &str, yes: bool) -> Result<()> {
    let confirmed = yes
        || Confirm::new()
            .with_prompt(format!("Delete {file}?"))
            .default(false)
            .interact()
            .unwrap_or(false);
    if !confirmed {
        return Ok(());
    }
    match library::remove_track(music, file) {
        Ok(path) => {
            log::info!("Deleted {}", path.display());
            Ok(())
        }
        Err(e) => {
            log::error!("File could not be deleted: {file} - {e:#}");
            Err(e)
        }
    }
}

fn open_command(path: &Path) -> tokio::process::Command {
    let program = if cfg!(target_os = "windows") {
        "explorer"
    } else if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    };
    let mut cmd = tokio::process::Command::new(program);
    cmd.arg(path);
    cmd
}

async fn open_track(music: &Path, file: &str) -> Result<()> {
    let path = library::track_path(music, file)?;
    if !path.is_file() {
        return Err(anyhow!("No such track: {}", path.display()));
    }
    let output = open_command(&path)
        .output()
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    // explorer exits with 1 even after opening the file
    if !output.status.success() && !cfg!(target_os = "windows") {
        let stderr = String::from_utf8_lossy(&output.stderr);
        log::error!("File could not be opened: {file} - {}", stderr.trim());
        return Err(anyhow!("Opening {file} failed: {}", stderr.trim()));
    }
    Ok(())
}

fn show_logs(log_path: &Path) -> Result<()> {
    match fs::read_to_string(log_path) {
        Ok(s) => print!("{s}"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => println!("(log is empty)"),
        Err(e) => return Err(e).with_context(|| format!("reading {}", log_path.display())),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let paths = Paths::resolve(&cli)?;
    logging::init(&paths.log)?;

    match cli.command.unwrap_or(Cmd::Run(RunArgs::default())) {
        Cmd::Run(args) => run_agent(&paths, args).await,
        Cmd::Setup => setup_wizard(&paths.config).map(|_| ()),
        Cmd::Tracks => show_tracks(&paths.music),
        Cmd::Remove { file, yes } => remove_track(&paths.music, &file, yes),
        Cmd::Open { file } => open_track(&paths.music, &file).await,
        Cmd::Logs => show_logs(&paths.log),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_parse() {
        let cli = Cli::parse_from([
            "otoradio-agent",
            "--music-dir",
            "/tmp/music",
            "run",
            "--bypass",
            "--quality",
            "320",
        ]);
        match cli.command {
            Some(Cmd::Run(args)) => {
                assert!(args.bypass);
                assert_eq!(args.quality, Quality::Kbps320);
                assert_eq!(args.yt_dlp, PathBuf::from("yt-dlp"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(cli.music_dir, Some(PathBuf::from("/tmp/music")));
    }

    #[test]
    fn bad_quality_is_rejected() {
        assert!(Cli::try_parse_from(["otoradio-agent", "run", "--quality", "256"]).is_err());
    }

    #[test]
    fn open_takes_a_file_name() {
        let cli = Cli::parse_from(["otoradio-agent", "open", "Song [abc123].mp3"]);
        assert!(matches!(cli.command, Some(Cmd::Open { file }) if file == "Song [abc123].mp3"));
    }

    #[test]
    fn open_command_passes_the_track_path() {
        let path = Path::new("/music/Song [abc123].mp3");
        let cmd = open_command(path);
        let std_cmd = cmd.as_std();
        let args: Vec<_> = std_cmd.get_args().collect();
        assert_eq!(args, vec![path.as_os_str()]);
        assert!(["explorer", "open", "xdg-open"]
            .iter()
            .any(|p| std_cmd.get_program() == *p));
    }

    #[tokio::test]
    async fn open_refuses_missing_and_escaping_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_track(dir.path(), "gone [x1].mp3").await.unwrap_err();
        assert!(err.to_string().starts_with("No such track"));
        assert!(open_track(dir.path(), "../secret.mp3").await.is_err());
    }

    #[test]
    fn bar_tracks_percentage() {
        assert_eq!(progress_bar(0), "[....................]   0%");
        assert_eq!(progress_bar(50), "[##########..........]  50%");
        assert_eq!(progress_bar(100), "[####################] 100%");
    }
}
