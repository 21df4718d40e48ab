//! YMODEM frame codec.
//!
//! Three frame kinds travel from sender to receiver, all protected by a
//! big-endian CRC16-XMODEM over the payload:
//!
//! ```text
//! +--------+-----+------+------------------+--------+
//! | marker | SEQ | ~SEQ |     payload      | CRC16  |
//! +--------+-----+------+------------------+--------+
//! | 1      | 1   | 1    | 128 (SOH) or     | 2      |
//! |        |     |      | 1024 (STX)       |        |
//! +--------+-----+------+------------------+--------+
//! ```
//!
//! The file-info frame is an SOH frame with sequence 0 whose payload is
//! `filename\0size\0` zero-padded to 128 bytes. Data frames start at
//! sequence 1; short ones are padded with [`PAD`].

use crate::error::{Error, Result};
use crate::protocol::crc::crc16_xmodem;

/// YMODEM control characters.
pub mod control {
    /// Start of Header (128-byte block).
    pub const SOH: u8 = 0x01;
    /// Start of Text (1024-byte block).
    pub const STX: u8 = 0x02;
    /// End of Transmission.
    pub const EOT: u8 = 0x04;
    /// Acknowledge.
    pub const ACK: u8 = 0x06;
    /// Not Acknowledge.
    pub const NAK: u8 = 0x15;
    /// Cancel.
    pub const CAN: u8 = 0x18;
    /// CRC mode request character.
    pub const C: u8 = b'C';
}

/// Block size for SOH packets.
pub const SOH_BLOCK_SIZE: usize = 128;

/// Block size for STX packets (YMODEM-1K).
pub const STX_BLOCK_SIZE: usize = 1024;

/// Filler for the unused tail of a short data frame.
pub const PAD: u8 = 0x1A;

/// Marker, sequence and complement.
const FRAME_HEAD: usize = 3;
const FRAME_CRC: usize = 2;

/// A byte received from the receiver, classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// Frame accepted.
    Ack,
    /// Frame rejected, resend it.
    Nak,
    /// Receiver aborted.
    Cancel,
    /// Receiver requests a CRC-mode transfer (`'C'`).
    Sync,
    /// Anything else.
    Other(u8),
}

impl Response {
    /// Classify a received byte.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            control::ACK => Self::Ack,
            control::NAK => Self::Nak,
            control::CAN => Self::Cancel,
            control::C => Self::Sync,
            other => Self::Other(other),
        }
    }
}

/// Which of the three wire frames a [`Frame`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Sequence 0 SOH frame announcing filename and size.
    FileInfo,
    /// SOH data frame, 128-byte payload.
    Short,
    /// STX data frame, 1024-byte payload.
    Long,
}

/// An encoded frame, ready to be written to the port as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    kind: FrameKind,
    bytes: Vec<u8>,
}

impl Frame {
    /// Build the file-info frame (sequence 0).
    ///
    /// Non-ASCII characters in `filename` are dropped. Fails with
    /// [`Error::FilenameOrSizeTooLong`] when the name, the decimal size and
    /// both terminators do not fit in 128 bytes.
    pub fn file_info(filename: &str, size: u64) -> Result<Self> {
        let name: Vec<u8> = filename
            .bytes()
            .filter(u8::is_ascii)
            .collect();
        let size = size.to_string();

        let needed = name.len() + 1 + size.len() + 1;
        if needed > SOH_BLOCK_SIZE {
            return Err(Error::FilenameOrSizeTooLong {
                needed,
                limit: SOH_BLOCK_SIZE,
            });
        }

        let mut payload = Vec::with_capacity(SOH_BLOCK_SIZE);
        payload.extend_from_slice(&name);
        payload.push(0x00);
        payload.extend_from_slice(size.as_bytes());
        payload.push(0x00);
        payload.resize(SOH_BLOCK_SIZE, 0x00);

        Ok(Self::assemble(FrameKind::FileInfo, 0, &payload))
    }

    /// Build a data frame.
    ///
    /// Up to 128 bytes produce a short frame padded with [`PAD`]; exactly
    /// 1024 bytes produce a long frame. Any other length, including zero, is
    /// [`Error::InvalidChunkSize`].
    pub fn data(seq: u8, data: &[u8]) -> Result<Self> {
        match data.len() {
            1..=SOH_BLOCK_SIZE => {
                let mut payload = data.to_vec();
                payload.resize(SOH_BLOCK_SIZE, PAD);
                Ok(Self::assemble(FrameKind::Short, seq, &payload))
            },
            STX_BLOCK_SIZE => Ok(Self::assemble(FrameKind::Long, seq, data)),
            n => Err(Error::InvalidChunkSize(n)),
        }
    }

    fn assemble(kind: FrameKind, seq: u8, payload: &[u8]) -> Self {
        let marker = match kind {
            FrameKind::Long => control::STX,
            FrameKind::FileInfo | FrameKind::Short => control::SOH,
        };

        let mut bytes = Vec::with_capacity(FRAME_HEAD + payload.len() + FRAME_CRC);
        bytes.push(marker);
        bytes.push(seq);
        bytes.push(!seq);
        bytes.extend_from_slice(payload);

        let crc = crc16_xmodem(payload);
        bytes.extend_from_slice(&crc.to_be_bytes());

        Self { kind, bytes }
    }

    /// Decode and verify a wire frame.
    ///
    /// An SOH frame with sequence 0 is reported as [`FrameKind::FileInfo`].
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let Some(&marker) = bytes.first() else {
            return Err(Error::InvalidFrame("empty frame".into()));
        };
        let block = match marker {
            control::SOH => SOH_BLOCK_SIZE,
            control::STX => STX_BLOCK_SIZE,
            other => {
                return Err(Error::InvalidFrame(format!(
                    "unknown marker 0x{other:02X}"
                )));
            },
        };

        let expected_len = FRAME_HEAD + block + FRAME_CRC;
        if bytes.len() != expected_len {
            return Err(Error::InvalidFrame(format!(
                "expected {expected_len} bytes, got {}",
                bytes.len()
            )));
        }

        let (seq, complement) = (bytes[1], bytes[2]);
        if complement != !seq {
            return Err(Error::InvalidFrame(format!(
                "sequence {seq} has complement 0x{complement:02X}"
            )));
        }

        let payload = &bytes[FRAME_HEAD..FRAME_HEAD + block];
        let expected = u16::from_be_bytes([bytes[expected_len - 2], bytes[expected_len - 1]]);
        let actual = crc16_xmodem(payload);
        if expected != actual {
            return Err(Error::CrcMismatch { expected, actual });
        }

        let kind = match (marker, seq) {
            (control::STX, _) => FrameKind::Long,
            (_, 0) => FrameKind::FileInfo,
            _ => FrameKind::Short,
        };
        Ok(Self {
            kind,
            bytes: bytes.to_vec(),
        })
    }

    /// The encoded frame.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Frame kind.
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Sequence number.
    pub fn sequence(&self) -> u8 {
        self.bytes[1]
    }

    /// Payload including any padding.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[FRAME_HEAD..self.bytes.len() - FRAME_CRC]
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Never true; every frame carries a header and a CRC.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
