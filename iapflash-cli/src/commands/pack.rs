//! Pack command: prepend the firmware header to a raw binary.

use {
    crate::{Cli, CliError, config::Config, use_fancy_output},
    anyhow::{Context, Result},
    console::style,
    dialoguer::Confirm,
    iapflash::{FirmwareVersion, image},
    log::debug,
    std::{fs, path::Path},
};

use super::info::format_timestamp;

/// Pack command implementation.
pub(crate) fn cmd_pack(
    cli: &Cli,
    config: &Config,
    input: &Path,
    version: FirmwareVersion,
    output: &Path,
    yes: bool,
) -> Result<()> {
    let payload = fs::read(input)
        .with_context(|| format!("Failed to read input binary {}", input.display()))?;

    let limit = config.size_limit();
    let interactive = console::Term::stdout().is_term() && console::Term::stderr().is_term();
    if payload.len() > limit && !yes && interactive {
        let proceed = Confirm::new()
            .with_prompt(format!(
                "Payload is {} bytes, above the {limit} byte limit. Pack anyway?",
                payload.len()
            ))
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;
        if !proceed {
            return Err(CliError::Cancelled("Packing aborted".to_string()).into());
        }
    }

    debug!("Packing {} ({} bytes) as v{version}", input.display(), payload.len());
    let packed = image::pack(payload, version)?;
    packed
        .write_to(output)
        .with_context(|| format!("Failed to write packed image {}", output.display()))?;

    if !cli.quiet {
        let check = if use_fancy_output() { "✓" } else { "OK" };
        let header = &packed.header;
        eprintln!(
            "{} Packed {} -> {}",
            style(check).green().bold(),
            input.display(),
            style(output.display()).cyan()
        );
        eprintln!("  Version:   {}", header.version);
        eprintln!("  Payload:   {} bytes", header.payload_size);
        eprintln!("  CRC32:     0x{:08X}", header.payload_crc32);
        eprintln!("  Built:     {}", format_timestamp(header.build_timestamp));
        eprintln!("  Total:     {} bytes", packed.len());
    }

    Ok(())
}
