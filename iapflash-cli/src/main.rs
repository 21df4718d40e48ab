//! iapflash CLI - Command-line tool for YMODEM bootloader updates.
//!
//! ## Features
//!
//! - Pack raw application binaries behind a versioned firmware header
//! - Inspect and verify packed images
//! - Send images to a bootloader over a serial port
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use iapflash::FirmwareVersion;
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

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Errors that select a specific process exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid or missing input (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// Stopped at the user's request (exit code 130).
    #[error("{0}")]
    Cancelled(String),
    /// The operation ran but its result is unacceptable (exit code 1).
    #[error("{0}")]
    Failed(String),
}

/// Map an error to the process exit code.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<CliError>() {
        Some(CliError::Usage(_)) => 2,
        Some(CliError::Cancelled(_)) => 130,
        Some(CliError::Failed(_)) | None => 1,
    }
}

/// iapflash - Pack firmware images and send them to a YMODEM bootloader.
///
/// Environment variables:
///   IAPFLASH_PORT   - Default serial port for `send`
///   IAPFLASH_BAUD   - Default baud rate for `send` (default: 115200)
///   NO_COLOR        - Disable colored output
#[derive(Parser)]
#[command(name = "iapflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  \
    iapflash pack app.bin 1.2.0 app_v1.2.0.bin\n  \
    iapflash info app_v1.2.0.bin\n  \
    iapflash send app_v1.2.0.bin --port /dev/ttyUSB0")]
pub(crate) struct Cli {
    /// Verbose output level (-v, -vv for increasing detail).
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
    /// Prepend a firmware header to a raw application binary.
    Pack {
        /// Raw application binary.
        input: PathBuf,

        /// Firmware version (major[.minor[.patch]], e.g. 1.2.0).
        #[arg(id = "fw_version", value_name = "VERSION", value_parser = parse_version)]
        version: FirmwareVersion,

        /// Output path for the packed image.
        output: PathBuf,

        /// Do not ask for confirmation when the payload is oversized.
        #[arg(short, long)]
        yes: bool,
    },

    /// Show and verify the header of a packed image.
    Info {
        /// Packed firmware image.
        packed: PathBuf,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Send a file to the bootloader over YMODEM.
    Send {
        /// File to send (usually a packed image).
        file: PathBuf,

        /// Serial port to use.
        #[arg(short, long, env = "IAPFLASH_PORT")]
        port: Option<String>,

        /// Baud rate.
        #[arg(short, long, env = "IAPFLASH_BAUD")]
        baud: Option<u32>,

        /// Filename announced to the receiver (defaults to the file's name).
        #[arg(long)]
        name: Option<String>,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type (detected from $SHELL if not specified).
        #[arg(value_enum)]
        shell: Option<Shell>,
    },
}

/// Parse a firmware version argument.
fn parse_version(s: &str) -> Result<FirmwareVersion, String> {
    s.parse::<FirmwareVersion>()
        .map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    // NO_COLOR and TTY detection
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var_os("NO_COLOR").is_some() || !stderr_is_tty {
        // Disable all color output
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
        "iapflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = exit_code_for(&err);
            if code == 130 {
                eprintln!("{} {err:#}", style("Cancelled:").yellow().bold());
            } else {
                eprintln!("{} {err:#}", style("Error:").red().bold());
            }
            ExitCode::from(code)
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    // Load configuration
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Pack {
            input,
            version,
            output,
            yes,
        } => commands::pack::cmd_pack(cli, &config, input, *version, output, *yes),
        Commands::Info { packed, json } => commands::info::cmd_info(packed, *json),
        Commands::Send {
            file,
            port,
            baud,
            name,
        } => commands::send::cmd_send(
            cli,
            &config,
            file,
            port.as_deref(),
            *baud,
            name.as_deref(),
        ),
        Commands::Completions { shell } => commands::completions::cmd_completions(*shell),
    }
}
