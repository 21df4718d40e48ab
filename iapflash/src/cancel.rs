//! Cooperative cancellation shared between a transfer and its supervisor.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cloneable cancellation flag.
///
/// Every clone observes the same flag, so a UI thread or a Ctrl-C handler can
/// keep one clone and hand another to a
/// [`TransferSession`](crate::protocol::sender::TransferSession). The session
/// only looks at the flag between frames and between read slices, never while
/// a frame is being assembled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag
            .store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag
            .load(Ordering::SeqCst)
    }
}
