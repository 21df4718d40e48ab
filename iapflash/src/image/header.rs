//! Firmware image header.
//!
//! Every packed image starts with a fixed 24-byte little-endian header that
//! the bootloader reads before accepting the payload behind it:
//!
//! ```text
//! offset  size  field
//! 0       4     magic            0x5AA5F00F
//! 4       1     version major
//! 5       1     version minor
//! 6       1     version patch
//! 7       1     reserved
//! 8       4     payload size     bytes following the header
//! 12      4     payload CRC32    IEEE CRC32 of the payload only
//! 16      4     build timestamp  Unix seconds at packing time
//! 20      1     valid flag       0xAA
//! 21      3     reserved
//! ```

use crate::error::{Error, Result};
use crate::protocol::crc::crc32;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Header magic identifying a packed image.
pub const FIRMWARE_MAGIC: u32 = 0x5AA5F00F;

/// Flag byte marking a fully populated header.
pub const VALID_FLAG: u8 = 0xAA;

/// Encoded header size in bytes.
pub const HEADER_SIZE: usize = 24;

/// Firmware semantic version.
///
/// Ordering compares major, then minor, then patch, the same way the
/// bootloader decides whether an image is newer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FirmwareVersion {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Patch version.
    pub patch: u8,
}

impl FirmwareVersion {
    /// Create a version from byte-sized components.
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Create a version, rejecting components above 255.
    pub fn try_new(major: u32, minor: u32, patch: u32) -> Result<Self> {
        let narrow = |component: &'static str, value: u32| {
            u8::try_from(value).map_err(|_| Error::VersionOutOfRange { component, value })
        };
        Ok(Self {
            major: narrow("major", major)?,
            minor: narrow("minor", minor)?,
            patch: narrow("patch", patch)?,
        })
    }
}

impl FromStr for FirmwareVersion {
    type Err = Error;

    /// Parse `major[.minor[.patch]]`; missing components are zero.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let s = s
            .strip_prefix('v')
            .or_else(|| s.strip_prefix('V'))
            .unwrap_or(s);
        let parts: Vec<&str> = s.split('.').collect();
        if s.is_empty() || parts.len() > 3 {
            return Err(Error::InvalidVersion(s.to_string()));
        }

        let mut numbers = [0u32; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| Error::InvalidVersion(s.to_string()))?;
        }

        Self::try_new(numbers[0], numbers[1], numbers[2])
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Decoded firmware header.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FirmwareHeader {
    /// Magic sentinel ([`FIRMWARE_MAGIC`] for a genuine image).
    pub magic: u32,
    /// Firmware version.
    pub version: FirmwareVersion,
    /// Reserved byte following the version, preserved as read.
    pub version_reserved: u8,
    /// Payload length in bytes.
    pub payload_size: u32,
    /// CRC32 of the payload.
    pub payload_crc32: u32,
    /// Unix timestamp (seconds) at packing time.
    pub build_timestamp: u32,
    /// Valid flag ([`VALID_FLAG`] for a complete header).
    pub valid_flag: u8,
    /// Reserved bytes following the valid flag, preserved as read.
    pub flag_reserved: [u8; 3],
}

impl FirmwareHeader {
    /// Build the header for `payload`, stamped with the current time.
    pub fn new(payload: &[u8], version: FirmwareVersion) -> Result<Self> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        // Saturate past 2106 rather than wrap.
        let timestamp = u32::try_from(now).unwrap_or(u32::MAX);
        Self::with_timestamp(payload, version, timestamp)
    }

    /// Build the header for `payload` with an explicit timestamp.
    pub fn with_timestamp(
        payload: &[u8],
        version: FirmwareVersion,
        build_timestamp: u32,
    ) -> Result<Self> {
        let payload_size = u32::try_from(payload.len()).map_err(|_| {
            Error::PayloadMismatch(format!(
                "payload of {} bytes does not fit a 32-bit size field",
                payload.len()
            ))
        })?;

        Ok(Self {
            magic: FIRMWARE_MAGIC,
            version,
            version_reserved: 0,
            payload_size,
            payload_crc32: crc32(payload),
            build_timestamp,
            valid_flag: VALID_FLAG,
            flag_reserved: [0; 3],
        })
    }

    /// Serialize to the 24-byte wire layout.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let mut w = Cursor::new(&mut out[..]);
        // Writes into a fixed 24-byte buffer cannot fail.
        let _ = self.write_fields(&mut w);
        out
    }

    fn write_fields<W: WriteBytesExt>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_u32::<LittleEndian>(self.magic)?;
        w.write_u8(self.version.major)?;
        w.write_u8(self.version.minor)?;
        w.write_u8(self.version.patch)?;
        w.write_u8(self.version_reserved)?;
        w.write_u32::<LittleEndian>(self.payload_size)?;
        w.write_u32::<LittleEndian>(self.payload_crc32)?;
        w.write_u32::<LittleEndian>(self.build_timestamp)?;
        w.write_u8(self.valid_flag)?;
        for b in self.flag_reserved {
            w.write_u8(b)?;
        }
        Ok(())
    }

    /// Parse the first 24 bytes of `bytes` without judging the contents.
    ///
    /// Only a short buffer is an error; a wrong magic is still returned so it
    /// can be displayed. Use [`validate`](Self::validate) or
    /// [`decode`](Self::decode) to reject it.
    pub fn read_from(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::TruncatedHeader {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut r = Cursor::new(&bytes[..HEADER_SIZE]);
        let magic = r.read_u32::<LittleEndian>()?;
        let major = r.read_u8()?;
        let minor = r.read_u8()?;
        let patch = r.read_u8()?;
        let version_reserved = r.read_u8()?;
        let payload_size = r.read_u32::<LittleEndian>()?;
        let payload_crc32 = r.read_u32::<LittleEndian>()?;
        let build_timestamp = r.read_u32::<LittleEndian>()?;
        let valid_flag = r.read_u8()?;
        let mut flag_reserved = [0u8; 3];
        std::io::Read::read_exact(&mut r, &mut flag_reserved)?;

        Ok(Self {
            magic,
            version: FirmwareVersion::new(major, minor, patch),
            version_reserved,
            payload_size,
            payload_crc32,
            build_timestamp,
            valid_flag,
            flag_reserved,
        })
    }

    /// Parse and require the magic sentinel.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = Self::read_from(bytes)?;
        header.validate()?;
        Ok(header)
    }

    /// Check the magic sentinel.
    pub fn validate(&self) -> Result<()> {
        if self.has_valid_magic() {
            Ok(())
        } else {
            Err(Error::MagicMismatch {
                expected: FIRMWARE_MAGIC,
                found: self.magic,
            })
        }
    }

    /// Whether the magic equals [`FIRMWARE_MAGIC`].
    pub fn has_valid_magic(&self) -> bool {
        self.magic == FIRMWARE_MAGIC
    }

    /// Whether the valid flag equals [`VALID_FLAG`].
    pub fn is_marked_valid(&self) -> bool {
        self.valid_flag == VALID_FLAG
    }

    /// Check that `payload` is exactly what this header describes.
    pub fn verify_payload(&self, payload: &[u8]) -> Result<()> {
        if payload.len() != self.payload_size as usize {
            return Err(Error::PayloadMismatch(format!(
                "header records {} bytes, found {}",
                self.payload_size,
                payload.len()
            )));
        }

        let actual = crc32(payload);
        if actual != self.payload_crc32 {
            return Err(Error::PayloadMismatch(format!(
                "CRC32 expected {:#010X}, calculated {actual:#010X}",
                self.payload_crc32
            )));
        }

        Ok(())
    }
}
