//! hydrocam CLI - Command-line tool for Geolux HydroCAM cameras.
//!
//! ## Features
//!
//! - Query camera status and configuration
//! - Take snapshots and wait for the camera to become ready
//! - Download JPEG images with progress display
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use env_logger::Env;
use hydrocam::port::CAMERA_BAUD;
use hydrocam::{CameraConfig, HydroCam, NativePort, SerialConfig};
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if progress bars and colors should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Errors with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid invocation (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// Stopped by the user (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

/// hydrocam - Talk to Geolux HydroCAM cameras over a serial line.
///
/// Environment variables:
///   HYDROCAM_PORT        - Serial port of the camera
///   HYDROCAM_BAUD        - Baud rate (default: 115200)
///   HYDROCAM_CHUNK_SIZE  - Bytes per image request (default: 16384)
#[derive(Parser)]
#[command(name = "hydrocam")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  hydrocam -p /dev/ttyUSB0 status\n  hydrocam -p /dev/ttyUSB0 capture -o frame.jpg")]
struct Cli {
    /// Serial port of the camera.
    #[arg(short, long, global = true, env = "HYDROCAM_PORT")]
    port: Option<String>,

    /// Baud rate (the camera ships at 115200).
    #[arg(short, long, global = true, env = "HYDROCAM_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Show the camera status and last image size.
    Status {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Take a snapshot.
    Snapshot {
        /// Wait up to SECS for the camera to finish.
        #[arg(long, value_name = "SECS")]
        wait: Option<u64>,
    },

    /// Download the last snapshot.
    Download {
        /// Output file (default: hydrocam-<timestamp>.jpg).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Image size in bytes (queried from the camera if omitted).
        #[arg(long)]
        size: Option<usize>,

        /// Bytes per image request.
        #[arg(long, env = "HYDROCAM_CHUNK_SIZE")]
        chunk_size: Option<usize>,

        /// Print the transfer report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Take a snapshot, wait for it and download it.
    Capture {
        /// Output file (default: hydrocam-<timestamp>.jpg).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Seconds to wait for the snapshot.
        #[arg(long, value_name = "SECS", default_value = "30")]
        wait: u64,

        /// Bytes per image request.
        #[arg(long, env = "HYDROCAM_CHUNK_SIZE")]
        chunk_size: Option<usize>,
    },

    /// Poll until the camera is ready.
    WaitReady {
        /// Give up after SECS.
        #[arg(long, value_name = "SECS", default_value = "60")]
        timeout: u64,

        /// Sleep MS before the first poll.
        #[arg(long, value_name = "MS", default_value = "0")]
        delay: u64,
    },

    /// Show the camera configuration.
    Info {
        /// Output the decoded fields as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Reboot the camera.
    Restart,

    /// Generate shell completion scripts.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if use_fancy_output() {
                eprintln!("{} {err:#}", console::style("Error:").red().bold());
            } else {
                eprintln!("Error: {err:#}");
            }
            ExitCode::from(exit_code_for(&err))
        },
    }
}

fn run() -> Result<()> {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "hydrocam v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    hydrocam::set_interrupt_checker(was_interrupted);

    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Status { json } => commands::camera::cmd_status(&cli, &config, *json),
        Commands::Snapshot { wait } => commands::camera::cmd_snapshot(&cli, &config, *wait),
        Commands::Download {
            output,
            size,
            chunk_size,
            json,
        } => commands::transfer::cmd_download(
            &cli,
            &config,
            output.as_deref(),
            *size,
            *chunk_size,
            *json,
        ),
        Commands::Capture {
            output,
            wait,
            chunk_size,
        } => commands::transfer::cmd_capture(&cli, &config, output.as_deref(), *wait, *chunk_size),
        Commands::WaitReady { timeout, delay } => {
            commands::camera::cmd_wait_ready(&cli, &config, *timeout, *delay)
        },
        Commands::Info { json } => commands::camera::cmd_info(&cli, &config, *json),
        Commands::Restart => commands::camera::cmd_restart(&cli, &config),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

/// Resolve the serial port from CLI args, environment or config.
fn get_port(cli: &Cli, config: &Config) -> Result<String> {
    cli.port
        .clone()
        .or_else(|| {
            config
                .connection
                .serial
                .clone()
        })
        .ok_or_else(|| {
            CliError::Usage("no serial port given, use --port or set HYDROCAM_PORT".into()).into()
        })
}

/// Open the camera on the resolved port.
pub(crate) fn open_camera(cli: &Cli, config: &Config) -> Result<HydroCam<NativePort>> {
    let port = get_port(cli, config)?;
    let baud = cli
        .baud
        .or(config
            .connection
            .baud)
        .unwrap_or(CAMERA_BAUD);
    debug!("Opening {port} at {baud} baud");

    let serial = SerialConfig::new(&port).with_baud_rate(baud);
    HydroCam::open_with(&serial, CameraConfig::default())
        .with_context(|| format!("Failed to open camera on {port}"))
}

/// Map an error to the process exit code.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Cancelled(_) => 130,
        };
    }
    if err
        .downcast_ref::<hydrocam::Error>()
        .is_some_and(hydrocam::Error::is_interrupted)
    {
        return 130;
    }
    1
}
