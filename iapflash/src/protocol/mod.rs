//! Protocol implementations.

pub mod crc;
pub mod sender;
pub mod ymodem;

// Re-export common types
pub use sender::{
    EndAck, LogObserver, Outcome, Progress, ProgressObserver, SessionState, TransferConfig,
    TransferSession,
};
pub use ymodem::{Frame, FrameKind, Response};
