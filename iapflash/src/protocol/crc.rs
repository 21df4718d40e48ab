//! Checksums used by the image header and the transfer protocol.
//!
//! - CRC16-XMODEM (CCITT polynomial `0x1021`, initial value `0x0000`, MSB
//!   first, no final XOR) protects each YMODEM frame payload.
//! - CRC32 (IEEE 802.3, reflected, as computed by zlib) binds a firmware
//!   header to its payload.

/// CRC16-XMODEM polynomial.
pub const CRC16_POLY: u16 = 0x1021;

/// Compute CRC16-XMODEM over `data`.
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0x0000;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ CRC16_POLY;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Compute the IEEE CRC32 of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
