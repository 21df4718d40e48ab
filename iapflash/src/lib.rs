//! # iapflash
//!
//! A library for updating microcontroller firmware through a YMODEM
//! bootloader (in-application programming).
//!
//! This crate provides:
//!
//! - Packed firmware images: a 24-byte header (magic, version, size, CRC32,
//!   build time, valid flag) in front of the application binary
//! - YMODEM frame encoding with CRC16-XMODEM
//! - A sender-side transfer session with bounded retries, cooperative
//!   cancellation and progress reporting
//!
//! ## Features
//!
//! - `native` (default): Native serial port support
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use iapflash::{CancelToken, FirmwareVersion, Outcome, TransferSession, image};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Prepend the firmware header
//!     let version: FirmwareVersion = "1.2.0".parse()?;
//!     image::pack_file("app.bin", version, "app_v1.2.0.bin")?;
//!
//!     // Send it to the bootloader (native only)
//!     #[cfg(feature = "native")]
//!     {
//!         let mut port = iapflash::NativePort::open_simple("/dev/ttyUSB0", 115200)?;
//!         let outcome = TransferSession::new(&mut port)
//!             .with_cancel_token(CancelToken::new())
//!             .on_progress(|p: &iapflash::Progress| println!("{}%", p.percent))
//!             .send_file("app_v1.2.0.bin")?;
//!
//!         if outcome == Outcome::Cancelled {
//!             eprintln!("cancelled");
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod error;
pub mod image;
pub mod port;
pub mod protocol;

// Re-exports for convenience
// Native-specific re-exports
#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    cancel::CancelToken,
    error::{Error, Result},
    image::{
        FirmwareHeader, FirmwareVersion, Inspection, PackedImage, Verdict, inspect, inspect_file,
        pack, pack_file,
    },
    port::{Port, SerialConfig},
    protocol::{
        EndAck, Frame, FrameKind, LogObserver, Outcome, Progress, ProgressObserver, Response,
        SessionState, TransferConfig, TransferSession,
    },
};
