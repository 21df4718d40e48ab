//! Send command: YMODEM transfer to the bootloader.

use {
    crate::{Cli, CliError, config::Config, use_fancy_output},
    anyhow::{Context, Result},
    console::style,
    iapflash::{
        CancelToken, EndAck, NativePort, Outcome, Progress, SerialConfig, TransferSession,
    },
    indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle},
    log::{debug, warn},
    std::{fs::File, path::Path},
};

/// Default baud rate when neither flag, environment nor config set one.
const DEFAULT_BAUD: u32 = 115_200;

/// Pick the port: CLI/env first, then config.
fn resolve_port(cli_port: Option<&str>, config: &Config) -> Result<String> {
    cli_port
        .map(str::to_string)
        .or_else(|| {
            config
                .connection
                .port
                .clone()
        })
        .ok_or_else(|| {
            CliError::Usage(
                "No serial port specified. Use --port, IAPFLASH_PORT, or set \
                 [connection] port in iapflash.toml"
                    .to_string(),
            )
            .into()
        })
}

fn resolve_baud(cli_baud: Option<u32>, config: &Config) -> u32 {
    cli_baud
        .or(config.connection.baud)
        .unwrap_or(DEFAULT_BAUD)
}

fn progress_bar(cli: &Cli, total: u64) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    let template =
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}";
    pb.set_style(ProgressStyle::default_bar().template(template).map_or_else(
        |_| ProgressStyle::default_bar(),
        |style| style.progress_chars("#>-"),
    ));
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb
}

/// Send command implementation.
pub(crate) fn cmd_send(
    cli: &Cli,
    config: &Config,
    file: &Path,
    port: Option<&str>,
    baud: Option<u32>,
    name: Option<&str>,
) -> Result<()> {
    let mut source =
        File::open(file).with_context(|| format!("Failed to open {}", file.display()))?;
    let size = source
        .metadata()
        .with_context(|| format!("Failed to read metadata of {}", file.display()))?
        .len();
    let name = name.map_or_else(
        || {
            file.file_name()
                .map(|n| {
                    n.to_string_lossy()
                        .into_owned()
                })
                .unwrap_or_default()
        },
        str::to_string,
    );

    let port_name = resolve_port(port, config)?;
    let baud = resolve_baud(baud, config);

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel())
        .context("Failed to install Ctrl-C handler")?;

    if !cli.quiet {
        eprintln!(
            "{} Using {} at {} baud",
            style(if use_fancy_output() { "🔌" } else { "*" }).cyan(),
            style(&port_name).yellow(),
            baud
        );
    }
    let mut port = NativePort::open(&SerialConfig::new(&port_name, baud))
        .with_context(|| format!("Failed to open serial port {port_name}"))?;

    if !cli.quiet {
        eprintln!(
            "{} Waiting for the bootloader to request {} ({} bytes)...",
            style(if use_fancy_output() { "⏳" } else { "*" }).yellow(),
            name,
            size
        );
    }

    let pb = progress_bar(cli, size);
    let pb_log = pb.clone();
    let pb_progress = pb.clone();
    let session = TransferSession::new(&mut port)
        .with_config(config.transfer_config())
        .with_cancel_token(cancel)
        .on_progress(move |p: &Progress| {
            pb_progress.set_position(p.bytes_sent);
            pb_progress.set_message(format!("frame {}", p.sequence));
        })
        .on_log(move |line: &str| pb_log.set_message(line.to_string()));

    debug!("Sending {} as {name}", file.display());
    let result = session.run(&name, &mut source, size);
    pb.finish_and_clear();

    let outcome = result.with_context(|| format!("Transfer of {} failed", file.display()))?;
    match outcome {
        Outcome::Completed(EndAck::Confirmed) => {
            if !cli.quiet {
                eprintln!(
                    "{} {}",
                    style(if use_fancy_output() { "🎉" } else { "OK" })
                        .green()
                        .bold(),
                    outcome.reason()
                );
            }
            Ok(())
        },
        Outcome::Completed(EndAck::Unconfirmed) => {
            warn!("{}", outcome.reason());
            Ok(())
        },
        Outcome::Cancelled => Err(CliError::Cancelled(outcome.reason().to_string()).into()),
    }
}
