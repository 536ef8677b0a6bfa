mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use vigil_integrations::ViolationKind;

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Real-time proctoring violation detection", long_about = None)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default config file
    Init {
        /// Overwrite an existing config file
        #[arg(short, long)]
        force: bool,
    },
    /// Show the effective configuration
    Config,
    /// Run the speech classifier over a 16 kHz mono PCM16 recording
    ScanAudio {
        /// WAV file, or raw little-endian PCM16 with any other extension
        file: PathBuf,
        /// Milliseconds of audio per submitted chunk
        #[arg(long, default_value = "300")]
        chunk_ms: u64,
        /// Print one row per 30ms sub-frame instead of per chunk
        #[arg(long)]
        frames: bool,
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Replay recorded face observations (JSON lines) through presence and gaze
    ReplayGaze {
        /// One observation per line, optionally with a `t` field in seconds
        file: PathBuf,
        /// Frame rate used for lines without a timestamp
        #[arg(long, default_value = "30")]
        fps: f64,
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Send a test violation through the configured notifier
    NotifyTest {
        /// Violation kind: `no_face`, `looking_away` or `speech_detected`
        #[arg(short, long, default_value = "no_face", value_parser = commands::notify::parse_kind)]
        kind: ViolationKind,
        #[arg(long)]
        exam: Option<i64>,
        #[arg(long)]
        student: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .format_timestamp_secs()
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Init { force } => commands::init::init_command(config_path, force),
        Commands::Config => commands::config::show_config(config_path),
        Commands::ScanAudio {
            file,
            chunk_ms,
            frames,
            json,
        } => commands::scan_audio::scan_audio_command(
            config_path,
            &file,
            &commands::scan_audio::ScanOptions {
                chunk_ms,
                per_frame: frames,
                json,
            },
        ),
        Commands::ReplayGaze { file, fps, json } => {
            commands::replay_gaze::replay_gaze_command(config_path, &file, fps, json)
        }
        Commands::NotifyTest {
            kind,
            exam,
            student,
        } => commands::notify::notify_test_command(config_path, kind, exam, student).await,
    }
}
