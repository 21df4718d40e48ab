//! Error types for iapflash.

use std::io;
use thiserror::Error;

/// Result type for iapflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for iapflash operations.
///
/// A cancelled transfer is not an error; see
/// [`Outcome::Cancelled`](crate::protocol::sender::Outcome::Cancelled).
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// A version component does not fit in one byte.
    #[error("Version component {component} = {value} is out of range (0-255)")]
    VersionOutOfRange {
        /// Which component overflowed ("major", "minor" or "patch").
        component: &'static str,
        /// The rejected value.
        value: u32,
    },

    /// Version string is not of the form `major.minor.patch`.
    #[error("Invalid version '{0}': expected major.minor.patch (e.g. 1.0.0)")]
    InvalidVersion(String),

    /// Fewer bytes than a full firmware header.
    #[error("Truncated header: need {expected} bytes, got {actual}")]
    TruncatedHeader {
        /// Required header length.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Header magic does not identify a packed image.
    #[error("Magic mismatch: expected {expected:#010X}, got {found:#010X}")]
    MagicMismatch {
        /// The expected sentinel.
        expected: u32,
        /// The value stored in the header.
        found: u32,
    },

    /// Payload does not match what the header records.
    #[error("Payload mismatch: {0}")]
    PayloadMismatch(String),

    /// CRC checksum mismatch.
    #[error("CRC mismatch: expected {expected:#06x}, got {actual:#06x}")]
    CrcMismatch {
        /// Expected CRC value.
        expected: u16,
        /// Actual CRC value.
        actual: u16,
    },

    /// Malformed wire frame.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Data frames carry either up to 128 or exactly 1024 bytes.
    #[error("Invalid chunk size: {0} bytes (expected 1..=128 or 1024)")]
    InvalidChunkSize(usize),

    /// Filename and size string do not fit in the file-info payload.
    #[error("Filename or size too long for file-info block ({needed} bytes, limit {limit})")]
    FilenameOrSizeTooLong {
        /// Bytes the encoded fields require, terminators included.
        needed: usize,
        /// Payload capacity.
        limit: usize,
    },

    /// Receiver never requested the transfer.
    #[error("Timed out after {0:?} waiting for the receiver to request the transfer")]
    SyncTimeout(std::time::Duration),

    /// Receiver did not accept the file-info block.
    #[error("File info rejected: {0}")]
    FileInfoRejected(String),

    /// A data frame exhausted its retry budget.
    #[error("Packet {seq} rejected after {attempts} attempts")]
    PacketRejected {
        /// Sequence number of the rejected frame.
        seq: u8,
        /// Attempts made.
        attempts: u32,
    },
}

impl Error {
    /// Short, stable identifier for the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "channel_error",
            #[cfg(feature = "native")]
            Self::Serial(_) => "channel_error",
            Self::VersionOutOfRange { .. } => "version_out_of_range",
            Self::InvalidVersion(_) => "invalid_version",
            Self::TruncatedHeader { .. } => "truncated_header",
            Self::MagicMismatch { .. } => "magic_mismatch",
            Self::PayloadMismatch(_) => "payload_mismatch",
            Self::CrcMismatch { .. } => "crc_mismatch",
            Self::InvalidFrame(_) => "invalid_frame",
            Self::InvalidChunkSize(_) => "invalid_chunk_size",
            Self::FilenameOrSizeTooLong { .. } => "filename_or_size_too_long",
            Self::SyncTimeout(_) => "sync_timeout",
            Self::FileInfoRejected(_) => "file_info_rejected",
            Self::PacketRejected { .. } => "packet_rejected",
        }
    }
}
