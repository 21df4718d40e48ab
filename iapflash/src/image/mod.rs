//! Packed firmware images.
//!
//! A packed image is `[24-byte header][payload]`; see [`header`] for the
//! layout. This module builds packed images from raw application binaries and
//! inspects existing ones.

pub mod header;

pub use header::{FIRMWARE_MAGIC, FirmwareHeader, FirmwareVersion, HEADER_SIZE, VALID_FLAG};

use crate::error::{Error, Result};
use log::{debug, warn};
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

/// Advisory payload limit of one application bank (24 KiB).
///
/// Exceeding it is reported as a warning; packing still succeeds.
pub const PAYLOAD_SIZE_ADVISORY: usize = 24 * 1024;

/// Whether a payload is larger than [`PAYLOAD_SIZE_ADVISORY`].
pub fn exceeds_size_advisory(len: usize) -> bool {
    len > PAYLOAD_SIZE_ADVISORY
}

/// Header plus payload, ready to be written out.
#[derive(Debug, Clone)]
pub struct PackedImage {
    /// The generated header.
    pub header: FirmwareHeader,
    payload: Vec<u8>,
}

impl PackedImage {
    /// Payload bytes following the header.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Total packed length (header + payload).
    pub fn len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Always false: a packed image carries at least its header.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Concatenate header and payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(&self.header.encode());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Write the packed image to `path`.
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path.as_ref(), self.to_bytes())?;
        debug!(
            "Wrote packed image {} ({} bytes)",
            path.as_ref()
                .display(),
            self.len()
        );
        Ok(())
    }
}

/// Build a packed image from a payload buffer.
pub fn pack(payload: Vec<u8>, version: FirmwareVersion) -> Result<PackedImage> {
    if exceeds_size_advisory(payload.len()) {
        warn!(
            "Payload is {} bytes, above the {} byte bank advisory",
            payload.len(),
            PAYLOAD_SIZE_ADVISORY
        );
    }

    let header = FirmwareHeader::new(&payload, version)?;
    debug!(
        "Packed v{} payload: {} bytes, CRC32 {:#010X}",
        header.version, header.payload_size, header.payload_crc32
    );
    Ok(PackedImage { header, payload })
}

/// Read `input`, pack it and write the result to `output`.
pub fn pack_file<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    version: FirmwareVersion,
    output: Q,
) -> Result<PackedImage> {
    let payload = fs::read(input.as_ref())?;
    let image = pack(payload, version)?;
    image.write_to(output)?;
    Ok(image)
}

/// Integrity verdict for an inspected image.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(tag = "status", rename_all = "snake_case"))]
pub enum Verdict {
    /// Magic, valid flag, size and CRC32 all check out.
    Valid,
    /// Magic sentinel is wrong; the file is probably not a packed image.
    MagicMismatch {
        /// Magic found in the file.
        found: u32,
    },
    /// Header was written but not flagged as valid.
    NotMarkedValid {
        /// Flag byte found in the file.
        flag: u8,
    },
    /// Payload does not match the header's size or CRC32.
    PayloadMismatch {
        /// Human-readable detail.
        reason: String,
    },
    /// Only the header was available, so the payload was not checked.
    PayloadMissing,
}

impl Verdict {
    /// Whether the image can be trusted.
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Result of inspecting a packed image.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Inspection {
    /// Decoded header (even when the magic is wrong).
    pub header: FirmwareHeader,
    /// Payload bytes present after the header.
    pub payload_len: usize,
    /// Integrity verdict.
    pub verdict: Verdict,
}

/// Inspect a packed image held in memory.
///
/// `bytes` may contain only the header, in which case the verdict is
/// [`Verdict::PayloadMissing`] unless the header itself is already bad.
pub fn inspect(bytes: &[u8]) -> Result<Inspection> {
    let header = FirmwareHeader::read_from(bytes)?;
    let payload = &bytes[HEADER_SIZE..];

    let verdict = if let Err(Error::MagicMismatch { found, .. }) = header.validate() {
        Verdict::MagicMismatch { found }
    } else if !header.is_marked_valid() {
        Verdict::NotMarkedValid {
            flag: header.valid_flag,
        }
    } else if payload.is_empty() && header.payload_size > 0 {
        Verdict::PayloadMissing
    } else {
        match header.verify_payload(payload) {
            Ok(()) => Verdict::Valid,
            Err(Error::PayloadMismatch(reason)) => Verdict::PayloadMismatch { reason },
            Err(e) => return Err(e),
        }
    };

    Ok(Inspection {
        header,
        payload_len: payload.len(),
        verdict,
    })
}

/// Inspect a packed image file, header and payload.
pub fn inspect_file<P: AsRef<Path>>(path: P) -> Result<Inspection> {
    let path = path.as_ref();
    debug!("Inspecting packed image: {}", path.display());
    let data = fs::read(path)?;
    inspect(&data)
}

/// Read only the header of a packed image file.
pub fn read_header_file<P: AsRef<Path>>(path: P) -> Result<FirmwareHeader> {
    let mut file = File::open(path.as_ref())?;
    let mut buf = Vec::with_capacity(HEADER_SIZE);
    file.by_ref()
        .take(HEADER_SIZE as u64)
        .read_to_end(&mut buf)?;
    FirmwareHeader::read_from(&buf)
}
