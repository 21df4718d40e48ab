//! Packed image info command implementation.

use {
    crate::CliError,
    anyhow::{Context, Result},
    chrono::DateTime,
    console::style,
    iapflash::{
        Inspection, Verdict,
        image::{self, FIRMWARE_MAGIC, VALID_FLAG},
    },
    std::path::Path,
};

/// Render a header build timestamp as UTC.
pub(crate) fn format_timestamp(timestamp: u32) -> String {
    DateTime::from_timestamp(i64::from(timestamp), 0).map_or_else(
        || timestamp.to_string(),
        |dt| {
            dt.format("%Y-%m-%d %H:%M:%S UTC")
                .to_string()
        },
    )
}

/// One-line description of a verdict.
fn describe_verdict(verdict: &Verdict) -> String {
    match verdict {
        Verdict::Valid => "valid".to_string(),
        Verdict::MagicMismatch { found } => {
            format!("bad magic 0x{found:08X} (expected 0x{FIRMWARE_MAGIC:08X}), not a packed image")
        },
        Verdict::NotMarkedValid { flag } => {
            format!("header not marked valid (flag 0x{flag:02X}, expected 0x{VALID_FLAG:02X})")
        },
        Verdict::PayloadMismatch { reason } => reason.clone(),
        Verdict::PayloadMissing => "payload missing, only the header was checked".to_string(),
    }
}

/// Info command implementation.
pub(crate) fn cmd_info(packed: &Path, json: bool) -> Result<()> {
    let inspection = image::inspect_file(packed)
        .with_context(|| format!("Failed to read firmware image {}", packed.display()))?;

    if json {
        print_json(&inspection)?;
    } else {
        print_human(packed, &inspection);
    }

    if inspection
        .verdict
        .is_valid()
    {
        Ok(())
    } else {
        Err(CliError::Failed(format!(
            "{} is not a valid image: {}",
            packed.display(),
            describe_verdict(&inspection.verdict)
        ))
        .into())
    }
}

fn print_human(packed: &Path, inspection: &Inspection) {
    let header = &inspection.header;

    eprintln!(
        "{}",
        style(format!("Firmware image: {}", packed.display()))
            .bold()
            .underlined()
    );

    let magic = format!("0x{:08X}", header.magic);
    let magic = if header.has_valid_magic() {
        style(magic).green()
    } else {
        style(magic).red()
    };
    eprintln!("  Magic:       {magic}");
    eprintln!("  Version:     {}", header.version);
    eprintln!("  Payload:     {} bytes", header.payload_size);
    eprintln!("  CRC32:       0x{:08X}", header.payload_crc32);
    eprintln!(
        "  Built:       {}",
        format_timestamp(header.build_timestamp)
    );
    eprintln!("  Valid flag:  0x{:02X}", header.valid_flag);
    eprintln!("  Present:     {} payload bytes", inspection.payload_len);

    let verdict = describe_verdict(&inspection.verdict);
    let verdict = if inspection
        .verdict
        .is_valid()
    {
        style(verdict).green().bold()
    } else {
        style(verdict).red().bold()
    };
    eprintln!("  Status:      {verdict}");
}

/// Info command --json output: structured JSON to stdout.
fn print_json(inspection: &Inspection) -> Result<()> {
    let header = &inspection.header;
    let build_time = DateTime::from_timestamp(i64::from(header.build_timestamp), 0)
        .map(|dt| dt.to_rfc3339());

    let output = serde_json::json!({
        "ok": inspection.verdict.is_valid(),
        "data": {
            "magic": format!("0x{:08X}", header.magic),
            "version": header.version.to_string(),
            "payload_size": header.payload_size,
            "payload_crc32": format!("0x{:08X}", header.payload_crc32),
            "build_timestamp": header.build_timestamp,
            "build_time": build_time,
            "valid_flag": format!("0x{:02X}", header.valid_flag),
            "payload_len": inspection.payload_len,
            "verdict": serde_json::to_value(&inspection.verdict)?,
        }
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&output)?
    );
    Ok(())
}
