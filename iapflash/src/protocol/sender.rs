//! Sender side of a single-file YMODEM transfer.
//!
//! A [`TransferSession`] owns the port for one attempt and walks through
//!
//! ```text
//! Idle -> Syncing -> SendingFileInfo -> SendingData -> SendingEot -> Done
//!                                                          |
//!                                          Failed / Cancelled at any stage
//! ```
//!
//! Every wait is bounded by [`TransferConfig`], and a shared [`CancelToken`]
//! is polled before each transmit and during each wait. A session is
//! consumed by [`TransferSession::run`]; retrying means building a new one.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::ymodem::{Frame, Response, SOH_BLOCK_SIZE, STX_BLOCK_SIZE, control};
use log::{Level, debug, log, trace};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::{Duration, Instant};

/// Timeouts and attempt counts for every stage of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// Overall time to wait for the receiver's first `'C'`.
    pub sync_timeout: Duration,
    /// Longest single blocking read; bounds cancellation latency.
    pub poll_interval: Duration,
    /// Grace period for a duplicate `'C'` right after sync.
    pub sync_drain_timeout: Duration,
    /// Per-wait timeout for the file-info ACK.
    pub file_info_ack_timeout: Duration,
    /// Number of file-info ACK waits.
    pub file_info_ack_attempts: u32,
    /// Timeout for the `'C'` that follows the file-info ACK.
    pub file_info_sync_timeout: Duration,
    /// Per-attempt timeout for a data frame ACK.
    pub data_ack_timeout: Duration,
    /// Transmissions per data frame before giving up.
    pub data_attempts: u32,
    /// Per-wait timeout for the NAK answering the first EOT.
    pub eot_nak_timeout: Duration,
    /// Number of NAK waits after the first EOT.
    pub eot_nak_attempts: u32,
    /// Per-wait timeout for the ACK answering the second EOT.
    pub eot_ack_timeout: Duration,
    /// Number of ACK waits after the second EOT.
    pub eot_ack_attempts: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            sync_timeout: Duration::from_secs(15),
            poll_interval: Duration::from_secs(1),
            sync_drain_timeout: Duration::from_millis(100),
            file_info_ack_timeout: Duration::from_secs(3),
            file_info_ack_attempts: 5,
            file_info_sync_timeout: Duration::from_secs(3),
            data_ack_timeout: Duration::from_secs(10),
            data_attempts: 3,
            eot_nak_timeout: Duration::from_secs(3),
            eot_nak_attempts: 5,
            eot_ack_timeout: Duration::from_secs(3),
            eot_ack_attempts: 10,
        }
    }
}

/// Progress snapshot, reported once per chunk before it is transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// `bytes_sent * 100 / total_bytes`, capped at 100.
    pub percent: u8,
    /// Sequence number of the frame carrying this chunk.
    pub sequence: u8,
    /// Payload bytes queued so far, this chunk included.
    pub bytes_sent: u64,
    /// Advertised file size.
    pub total_bytes: u64,
}

impl Progress {
    fn new(sequence: u8, bytes_sent: u64, total_bytes: u64) -> Self {
        let percent = if total_bytes == 0 {
            100
        } else {
            (u128::from(bytes_sent) * 100 / u128::from(total_bytes)).min(100) as u8
        };
        Self {
            percent,
            sequence,
            bytes_sent,
            total_bytes,
        }
    }
}

/// Receives [`Progress`] updates.
pub trait ProgressObserver {
    /// Called once per data chunk.
    fn on_progress(&mut self, progress: &Progress);
}

impl<F: FnMut(&Progress)> ProgressObserver for F {
    fn on_progress(&mut self, progress: &Progress) {
        self(progress);
    }
}

/// Receives human-readable protocol events.
pub trait LogObserver {
    /// Called for every notable event.
    fn on_log(&mut self, message: &str);
}

impl<F: FnMut(&str)> LogObserver for F {
    fn on_log(&mut self, message: &str) {
        self(message);
    }
}

/// Session stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not started.
    Idle,
    /// Waiting for the receiver's `'C'`.
    Syncing,
    /// Sending the file-info frame.
    SendingFileInfo,
    /// Sending data frames.
    SendingData,
    /// End-of-transmission handshake.
    SendingEot,
    /// Transfer finished.
    Done,
    /// Transfer failed.
    Failed,
    /// Transfer cancelled.
    Cancelled,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::SendingFileInfo => "sending file info",
            Self::SendingData => "sending data",
            Self::SendingEot => "sending EOT",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// How the end-of-transmission handshake finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndAck {
    /// Receiver acknowledged the final EOT.
    Confirmed,
    /// Final acknowledge never arrived. Every data frame was acknowledged,
    /// so the payload is considered delivered.
    Unconfirmed,
}

/// Non-error result of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// All data delivered.
    Completed(EndAck),
    /// Stopped through the [`CancelToken`]; two CAN bytes were sent.
    Cancelled,
}

impl Outcome {
    /// Short, stable identifier.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Completed(EndAck::Confirmed) => "completed",
            Self::Completed(EndAck::Unconfirmed) => "completed_unconfirmed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Human-readable description.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Completed(EndAck::Confirmed) => "Transfer complete",
            Self::Completed(EndAck::Unconfirmed) => {
                "Transfer complete, but the receiver never confirmed the end of transmission"
            },
            Self::Cancelled => "Transfer cancelled",
        }
    }

    /// Whether the payload was delivered.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Why a stage stopped early.
enum Interrupt {
    Cancelled,
    Failed(Error),
}

impl From<Error> for Interrupt {
    fn from(e: Error) -> Self {
        Self::Failed(e)
    }
}

type Step<T> = std::result::Result<T, Interrupt>;

/// One sender-side transfer over an exclusively borrowed port.
pub struct TransferSession<'a, P: Port + ?Sized> {
    port: &'a mut P,
    config: TransferConfig,
    cancel: CancelToken,
    state: SessionState,
    progress: Option<Box<dyn ProgressObserver + 'a>>,
    logger: Option<Box<dyn LogObserver + 'a>>,
}

impl<'a, P: Port + ?Sized> TransferSession<'a, P> {
    /// Create a session with default timing.
    pub fn new(port: &'a mut P) -> Self {
        Self {
            port,
            config: TransferConfig::default(),
            cancel: CancelToken::new(),
            state: SessionState::Idle,
            progress: None,
            logger: None,
        }
    }

    /// Use custom timing.
    #[must_use]
    pub fn with_config(mut self, config: TransferConfig) -> Self {
        self.config = config;
        self
    }

    /// Observe this token for cancellation requests.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Register a progress observer.
    #[must_use]
    pub fn on_progress(mut self, observer: impl ProgressObserver + 'a) -> Self {
        self.progress = Some(Box::new(observer));
        self
    }

    /// Register a log observer.
    #[must_use]
    pub fn on_log(mut self, observer: impl LogObserver + 'a) -> Self {
        self.logger = Some(Box::new(observer));
        self
    }

    /// Current stage.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Send a file, advertising its base name and length.
    pub fn send_file<Q: AsRef<Path>>(self, path: Q) -> Result<Outcome> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let size = file
            .metadata()?
            .len();
        let filename = path
            .file_name()
            .map(|n| {
                n.to_string_lossy()
                    .into_owned()
            })
            .unwrap_or_default();
        self.run(&filename, &mut file, size)
    }

    /// Run the whole transfer.
    ///
    /// `source` must yield at least `size` bytes. Cancellation is reported
    /// as [`Outcome::Cancelled`], not as an error.
    pub fn run<R: Read + ?Sized>(
        mut self,
        filename: &str,
        source: &mut R,
        size: u64,
    ) -> Result<Outcome> {
        self.note(
            Level::Info,
            format!("Starting YMODEM transfer: {filename} ({size} bytes)"),
        );

        match self.drive(filename, source, size) {
            Ok(end) => {
                self.enter(SessionState::Done);
                let outcome = Outcome::Completed(end);
                self.note(Level::Info, outcome.reason().to_string());
                Ok(outcome)
            },
            Err(Interrupt::Cancelled) => {
                self.abort();
                self.enter(SessionState::Cancelled);
                Ok(Outcome::Cancelled)
            },
            Err(Interrupt::Failed(e)) => {
                self.enter(SessionState::Failed);
                self.note(Level::Error, format!("Transfer failed: {e}"));
                Err(e)
            },
        }
    }

    fn drive<R: Read + ?Sized>(
        &mut self,
        filename: &str,
        source: &mut R,
        size: u64,
    ) -> Step<EndAck> {
        // Leftovers from an aborted session must not be read as responses.
        self.port
            .clear_buffers()?;

        self.enter(SessionState::Syncing);
        self.sync()?;

        self.enter(SessionState::SendingFileInfo);
        self.send_file_info(filename, size)?;

        self.enter(SessionState::SendingData);
        self.send_data(source, size)?;

        self.enter(SessionState::SendingEot);
        self.finish()
    }

    fn sync(&mut self) -> Step<()> {
        let deadline = Instant::now() + self.config.sync_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::SyncTimeout(self.config.sync_timeout).into());
            }
            match self.wait_byte(remaining)? {
                Some(control::C) => break,
                Some(other) => trace!("Ignoring 0x{other:02X} while syncing"),
                None => return Err(Error::SyncTimeout(self.config.sync_timeout).into()),
            }
        }
        self.note(Level::Debug, "Received sync 'C'".to_string());

        // Some receivers send the request twice.
        match self.wait_byte(self.config.sync_drain_timeout)? {
            Some(control::C) => self.note(Level::Debug, "Drained duplicate 'C'".to_string()),
            Some(other) => trace!("Discarding 0x{other:02X} after sync"),
            None => {},
        }
        Ok(())
    }

    fn send_file_info(&mut self, filename: &str, size: u64) -> Step<()> {
        let frame = Frame::file_info(filename, size)?;
        self.transmit(frame.as_bytes())?;
        self.note(
            Level::Debug,
            format!("Sent file info: {filename} ({size} bytes)"),
        );

        let attempts = self.config.file_info_ack_attempts;
        for attempt in 1..=attempts {
            match self
                .wait_byte(self.config.file_info_ack_timeout)?
                .map(Response::from_byte)
            {
                Some(Response::Ack) => return self.await_data_request(),
                Some(other) => {
                    return Err(
                        Error::FileInfoRejected(format!("unexpected response {other:?}")).into(),
                    );
                },
                None => self.note(
                    Level::Warn,
                    format!("File info ACK timed out ({attempt}/{attempts})"),
                ),
            }
        }

        Err(Error::FileInfoRejected(format!("no acknowledge after {attempts} waits")).into())
    }

    fn await_data_request(&mut self) -> Step<()> {
        match self.wait_byte(self.config.file_info_sync_timeout)? {
            Some(control::C) => {
                self.note(Level::Debug, "Receiver ready for data".to_string());
                Ok(())
            },
            Some(other) => Err(Error::FileInfoRejected(format!(
                "expected 'C' after acknowledge, got 0x{other:02X}"
            ))
            .into()),
            None => Err(Error::FileInfoRejected("no 'C' after acknowledge".to_string()).into()),
        }
    }

    fn send_data<R: Read + ?Sized>(&mut self, source: &mut R, size: u64) -> Step<()> {
        let mut seq: u8 = 1;
        let mut sent: u64 = 0;
        let mut chunk = vec![0u8; STX_BLOCK_SIZE];

        while sent < size {
            let remaining = size - sent;
            let len = if remaining >= STX_BLOCK_SIZE as u64 {
                STX_BLOCK_SIZE
            } else {
                remaining.min(SOH_BLOCK_SIZE as u64) as usize
            };
            source
                .read_exact(&mut chunk[..len])
                .map_err(Error::Io)?;
            let frame = Frame::data(seq, &chunk[..len])?;

            sent += len as u64;
            let progress = Progress::new(seq, sent, size);
            if let Some(observer) = self
                .progress
                .as_mut()
            {
                observer.on_progress(&progress);
            }

            self.send_frame(&frame)?;
            seq = seq.wrapping_add(1);
        }

        self.note(Level::Debug, format!("All {sent} bytes acknowledged"));
        Ok(())
    }

    fn send_frame(&mut self, frame: &Frame) -> Step<()> {
        let seq = frame.sequence();
        let attempts = self.config.data_attempts;

        for attempt in 1..=attempts {
            self.transmit(frame.as_bytes())?;
            trace!("Sent frame {seq} ({} bytes, attempt {attempt})", frame.len());

            match self
                .wait_byte(self.config.data_ack_timeout)?
                .map(Response::from_byte)
            {
                Some(Response::Ack) => return Ok(()),
                Some(Response::Nak) => self.note(
                    Level::Warn,
                    format!("Frame {seq} rejected (NAK), attempt {attempt}/{attempts}"),
                ),
                Some(other) => self.note(
                    Level::Warn,
                    format!("Frame {seq}: unexpected response {other:?}, attempt {attempt}/{attempts}"),
                ),
                None => self.note(
                    Level::Warn,
                    format!("Frame {seq}: ACK timed out, attempt {attempt}/{attempts}"),
                ),
            }
        }

        Err(Error::PacketRejected { seq, attempts }.into())
    }

    fn finish(&mut self) -> Step<EndAck> {
        self.transmit(&[control::EOT])?;

        let attempts = self.config.eot_nak_attempts;
        let mut nak = false;
        for attempt in 1..=attempts {
            match self.wait_byte(self.config.eot_nak_timeout)? {
                Some(control::NAK) => {
                    nak = true;
                    break;
                },
                Some(other) => trace!("Waiting for EOT NAK, got 0x{other:02X}"),
                None => trace!("EOT NAK wait timed out ({attempt}/{attempts})"),
            }
        }
        if !nak {
            self.note(
                Level::Warn,
                "No NAK after first EOT, sending second EOT anyway".to_string(),
            );
        }

        self.transmit(&[control::EOT])?;

        let attempts = self.config.eot_ack_attempts;
        for attempt in 1..=attempts {
            match self.wait_byte(self.config.eot_ack_timeout)? {
                Some(control::ACK) => return Ok(EndAck::Confirmed),
                Some(other) => trace!("Waiting for EOT ACK, got 0x{other:02X}"),
                None => trace!("EOT ACK wait timed out ({attempt}/{attempts})"),
            }
        }

        self.note(
            Level::Warn,
            "End of transmission was not acknowledged".to_string(),
        );
        Ok(EndAck::Unconfirmed)
    }

    /// Wait up to `timeout` for one byte, in slices of at most
    /// `poll_interval`, checking for cancellation before each slice.
    fn wait_byte(&mut self, timeout: Duration) -> Step<Option<u8>> {
        let deadline = Instant::now() + timeout;
        loop {
            self.checkpoint()?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let slice = remaining.min(self.config.poll_interval);
            if let Some(byte) = self
                .port
                .read_byte(slice)?
            {
                return Ok(Some(byte));
            }
        }
    }

    fn transmit(&mut self, bytes: &[u8]) -> Step<()> {
        self.checkpoint()?;
        self.port
            .write_all_bytes(bytes)?;
        Ok(())
    }

    fn checkpoint(&self) -> Step<()> {
        if self
            .cancel
            .is_cancelled()
        {
            Err(Interrupt::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Tell the receiver to give up. Write errors are logged only; the
    /// session is cancelled either way.
    fn abort(&mut self) {
        self.note(Level::Warn, "Cancelling transfer".to_string());
        for _ in 0..2 {
            if let Err(e) = self
                .port
                .write_all_bytes(&[control::CAN])
            {
                self.note(Level::Warn, format!("Failed to send CAN: {e}"));
                break;
            }
        }
    }

    fn enter(&mut self, state: SessionState) {
        debug!("{} -> {}", self.state, state);
        self.state = state;
    }

    fn note(&mut self, level: Level, message: String) {
        log!(level, "{message}");
        if let Some(logger) = self
            .logger
            .as_mut()
        {
            logger.on_log(&message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::{MockPort, cooperative_receiver};
    use crate::protocol::ymodem::{FrameKind, PAD};
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    fn fast_config() -> TransferConfig {
        TransferConfig {
            sync_timeout: Duration::from_millis(60),
            poll_interval: Duration::from_millis(5),
            sync_drain_timeout: Duration::from_millis(2),
            file_info_ack_timeout: Duration::from_millis(5),
            file_info_ack_attempts: 5,
            file_info_sync_timeout: Duration::from_millis(5),
            data_ack_timeout: Duration::from_millis(10),
            data_attempts: 3,
            eot_nak_timeout: Duration::from_millis(2),
            eot_nak_attempts: 5,
            eot_ack_timeout: Duration::from_millis(2),
            eot_ack_attempts: 10,
        }
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    fn send(port: &mut MockPort, data: &[u8]) -> Result<Outcome> {
        TransferSession::new(port)
            .with_config(fast_config())
            .run("app.bin", &mut Cursor::new(data), data.len() as u64)
    }

    /// Expected data chunk lengths for `size` bytes.
    fn chunk_plan(size: usize) -> Vec<usize> {
        let mut plan = Vec::new();
        let mut remaining = size;
        while remaining > 0 {
            let len = if remaining >= STX_BLOCK_SIZE {
                STX_BLOCK_SIZE
            } else {
                remaining.min(SOH_BLOCK_SIZE)
            };
            plan.push(len);
            remaining -= len;
        }
        plan
    }

    #[test]
    fn test_default_config_matches_protocol_table() {
        let config = TransferConfig::default();
        assert_eq!(config.sync_timeout, Duration::from_secs(15));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.file_info_ack_timeout, Duration::from_secs(3));
        assert_eq!(config.file_info_ack_attempts, 5);
        assert_eq!(config.file_info_sync_timeout, Duration::from_secs(3));
        assert_eq!(config.data_ack_timeout, Duration::from_secs(10));
        assert_eq!(config.data_attempts, 3);
        assert_eq!(config.eot_nak_timeout, Duration::from_secs(3));
        assert_eq!(config.eot_nak_attempts, 5);
        assert_eq!(config.eot_ack_timeout, Duration::from_secs(3));
        assert_eq!(config.eot_ack_attempts, 10);
    }

    #[test]
    fn test_end_to_end_2600_bytes() {
        let data = payload(2600);
        let mut port = MockPort::receiver();

        let outcome = send(&mut port, &data).unwrap();
        assert_eq!(outcome, Outcome::Completed(EndAck::Confirmed));
        assert_eq!(port.clear_count(), 1);

        let frames = port.frames();
        let plan = chunk_plan(data.len());
        assert_eq!(plan, vec![1024, 1024, 128, 128, 128, 128, 40]);
        assert_eq!(frames.len(), 1 + plan.len());

        let info = Frame::parse(frames[0]).unwrap();
        assert_eq!(info.kind(), FrameKind::FileInfo);
        assert!(info.payload().starts_with(b"app.bin\x002600\x00"));

        let mut offset = 0;
        for (i, (raw, &len)) in frames[1..].iter().zip(&plan).enumerate() {
            let frame = Frame::parse(raw).unwrap();
            assert_eq!(frame.sequence() as usize, i + 1);
            let expected_kind = if len == STX_BLOCK_SIZE {
                FrameKind::Long
            } else {
                FrameKind::Short
            };
            assert_eq!(frame.kind(), expected_kind);
            assert_eq!(&frame.payload()[..len], &data[offset..offset + len]);
            assert!(frame.payload()[len..].iter().all(|&b| b == PAD));
            offset += len;
        }
        assert_eq!(offset, data.len());

        // Two EOTs close the session, no CAN.
        assert_eq!(port.count_control(control::EOT), 2);
        assert_eq!(port.count_control(control::CAN), 0);
        let written = port.written();
        assert_eq!(written[written.len() - 1], vec![control::EOT]);
        assert_eq!(written[written.len() - 2], vec![control::EOT]);
    }

    #[test]
    fn test_progress_reported_per_chunk() {
        let data = payload(2600);
        let mut port = MockPort::receiver();
        let mut seen = Vec::new();

        let outcome = TransferSession::new(&mut port)
            .with_config(fast_config())
            .on_progress(|p: &Progress| seen.push(*p))
            .run("app.bin", &mut Cursor::new(&data), 2600)
            .unwrap();
        assert!(outcome.is_completed());

        let sent: Vec<u64> = seen.iter().map(|p| p.bytes_sent).collect();
        assert_eq!(sent, vec![1024, 2048, 2176, 2304, 2432, 2560, 2600]);
        let percent: Vec<u8> = seen.iter().map(|p| p.percent).collect();
        assert_eq!(percent, vec![39, 78, 83, 88, 93, 98, 100]);
        let seqs: Vec<u8> = seen.iter().map(|p| p.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5, 6, 7]);
        assert!(seen.iter().all(|p| p.total_bytes == 2600));
    }

    #[test]
    fn test_exact_block_size() {
        let data = payload(STX_BLOCK_SIZE);
        let mut port = MockPort::receiver();
        assert!(send(&mut port, &data).unwrap().is_completed());

        let frames = port.frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(Frame::parse(frames[1]).unwrap().kind(), FrameKind::Long);
    }

    #[test]
    fn test_empty_file_sends_no_data_frames() {
        let mut port = MockPort::receiver();
        let mut calls = 0;
        let outcome = TransferSession::new(&mut port)
            .with_config(fast_config())
            .on_progress(|_: &Progress| calls += 1)
            .run("empty.bin", &mut std::io::empty(), 0)
            .unwrap();

        assert_eq!(outcome, Outcome::Completed(EndAck::Confirmed));
        assert_eq!(calls, 0);
        assert_eq!(port.frames().len(), 1);
    }

    #[test]
    fn test_nak_retransmits_same_frame() {
        let mut rejected = false;
        let mut inner = cooperative_receiver();
        let mut port = MockPort::with_responder(move |w: &[u8]| {
            if w.len() > 1 && w[1] == 2 && !rejected {
                rejected = true;
                return vec![control::NAK];
            }
            inner(w)
        })
        .greeting(&[control::C]);

        let data = payload(3 * STX_BLOCK_SIZE);
        assert!(send(&mut port, &data).unwrap().is_completed());

        let seqs: Vec<u8> = port.frames()[1..].iter().map(|f| f[1]).collect();
        assert_eq!(seqs, vec![1, 2, 2, 3]);
        assert_eq!(port.frames()[2], port.frames()[3]);
    }

    #[test]
    fn test_retry_exhaustion_after_three_attempts() {
        let mut port = MockPort::with_responder(|w: &[u8]| match w {
            [control::SOH, 0x00, 0xFF, ..] => vec![control::ACK, control::C],
            _ => vec![control::NAK],
        })
        .greeting(&[control::C]);

        let data = payload(2 * STX_BLOCK_SIZE);
        let err = send(&mut port, &data).unwrap_err();
        assert!(matches!(
            err,
            Error::PacketRejected {
                seq: 1,
                attempts: 3
            }
        ));
        assert_eq!(err.kind(), "packet_rejected");

        let frames = port.frames();
        // File info plus three copies of frame 1; frame 2 is never sent.
        assert_eq!(frames.len(), 4);
        assert!(frames[1..].iter().all(|f| f[1] == 1));
        assert_eq!(port.count_control(control::EOT), 0);
    }

    #[test]
    fn test_silence_and_garbage_count_as_attempts() {
        let mut data_writes = 0;
        let mut port = MockPort::with_responder(move |w: &[u8]| match w {
            [control::SOH, 0x00, 0xFF, ..] => vec![control::ACK, control::C],
            _ => {
                data_writes += 1;
                match data_writes {
                    1 => Vec::new(),
                    2 => vec![control::CAN],
                    _ => vec![0x7E],
                }
            },
        })
        .greeting(&[control::C]);

        let err = send(&mut port, &payload(100)).unwrap_err();
        assert!(matches!(err, Error::PacketRejected { seq: 1, .. }));
        assert_eq!(port.frames().len(), 4);
    }

    #[test]
    fn test_sync_timeout() {
        let mut port = MockPort::silent();
        let err = send(&mut port, &payload(10)).unwrap_err();
        assert!(matches!(err, Error::SyncTimeout(_)));
        assert_eq!(err.kind(), "sync_timeout");
        assert!(port.written().is_empty());
    }

    #[test]
    fn test_sync_ignores_noise_and_stale_input() {
        let mut port = MockPort::with_responder(cooperative_receiver()).greeting(&[0x00, 0x7F, control::C]);
        // Stale bytes from a previous session are discarded before syncing.
        port.push_incoming(&[control::NAK, control::NAK]);

        assert!(send(&mut port, &payload(10)).unwrap().is_completed());
    }

    #[test]
    fn test_duplicate_sync_is_drained() {
        let mut port =
            MockPort::with_responder(cooperative_receiver()).greeting(&[control::C, control::C]);
        assert!(send(&mut port, &payload(10)).unwrap().is_completed());
    }

    #[test]
    fn test_file_info_rejected_on_unexpected_byte() {
        let mut port = MockPort::with_responder(|_: &[u8]| vec![control::NAK]).greeting(&[control::C]);
        let err = send(&mut port, &payload(10)).unwrap_err();
        assert!(matches!(err, Error::FileInfoRejected(_)));
        assert_eq!(port.frames().len(), 1);
    }

    #[test]
    fn test_file_info_rejected_without_second_sync() {
        let mut port = MockPort::with_responder(|_: &[u8]| vec![control::ACK]).greeting(&[control::C]);
        let err = send(&mut port, &payload(10)).unwrap_err();
        assert!(matches!(err, Error::FileInfoRejected(_)));
    }

    #[test]
    fn test_file_info_rejected_after_silence() {
        let mut port = MockPort::silent().greeting(&[control::C]);
        let mut lines = Vec::new();
        let err = TransferSession::new(&mut port)
            .with_config(fast_config())
            .on_log(|line: &str| lines.push(line.to_string()))
            .run("app.bin", &mut Cursor::new(payload(10)), 10)
            .unwrap_err();

        assert!(matches!(err, Error::FileInfoRejected(_)));
        // One transmission, five waits.
        assert_eq!(port.frames().len(), 1);
        let timeouts = lines
            .iter()
            .filter(|l| l.contains("File info ACK timed out"))
            .count();
        assert_eq!(timeouts, 5);
    }

    #[test]
    fn test_unconfirmed_end_is_soft_success() {
        let mut inner = cooperative_receiver();
        let mut port = MockPort::with_responder(move |w: &[u8]| match w {
            [control::EOT] => Vec::new(),
            _ => inner(w),
        })
        .greeting(&[control::C]);

        let outcome = send(&mut port, &payload(200)).unwrap();
        assert_eq!(outcome, Outcome::Completed(EndAck::Unconfirmed));
        assert_eq!(outcome.kind(), "completed_unconfirmed");
        // Second EOT goes out even without the NAK.
        assert_eq!(port.count_control(control::EOT), 2);
    }

    #[test]
    fn test_cancel_mid_transfer_sends_two_can() {
        let token = CancelToken::new();
        let trigger = token.clone();
        let mut inner = cooperative_receiver();
        let mut port = MockPort::with_responder(move |w: &[u8]| {
            if w.len() > 1 && w[1] == 2 {
                trigger.cancel();
            }
            inner(w)
        })
        .greeting(&[control::C]);

        let data = payload(4 * STX_BLOCK_SIZE);
        let outcome = TransferSession::new(&mut port)
            .with_config(fast_config())
            .with_cancel_token(token)
            .run("app.bin", &mut Cursor::new(&data), data.len() as u64)
            .unwrap();

        assert_eq!(outcome, Outcome::Cancelled);
        assert_eq!(outcome.kind(), "cancelled");

        let seqs: Vec<u8> = port.frames()[1..].iter().map(|f| f[1]).collect();
        assert_eq!(seqs, vec![1, 2]);

        let written = port.written();
        let tail = &written[written.len() - 2..];
        assert_eq!(tail, &[vec![control::CAN], vec![control::CAN]]);
        assert_eq!(port.count_control(control::CAN), 2);
        assert_eq!(port.count_control(control::EOT), 0);
    }

    #[test]
    fn test_cancel_before_start() {
        let token = CancelToken::new();
        token.cancel();
        let mut port = MockPort::receiver();

        let outcome = TransferSession::new(&mut port)
            .with_config(fast_config())
            .with_cancel_token(token)
            .run("app.bin", &mut Cursor::new(payload(10)), 10)
            .unwrap();

        assert_eq!(outcome, Outcome::Cancelled);
        assert_eq!(port.written(), &[vec![control::CAN], vec![control::CAN]]);
    }

    #[test]
    fn test_cancel_observed_during_long_wait() {
        let token = CancelToken::new();
        let trigger = token.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            trigger.cancel();
        });

        let mut port = MockPort::silent();
        let config = TransferConfig {
            sync_timeout: Duration::from_secs(30),
            ..fast_config()
        };
        let started = Instant::now();
        let outcome = TransferSession::new(&mut port)
            .with_config(config)
            .with_cancel_token(token)
            .run("app.bin", &mut Cursor::new(payload(10)), 10)
            .unwrap();
        canceller.join().unwrap();

        assert_eq!(outcome, Outcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_sequence_wraps_after_255() {
        let frames_wanted = 300;
        let data = payload(frames_wanted * STX_BLOCK_SIZE);
        let mut port = MockPort::receiver();
        assert!(send(&mut port, &data).unwrap().is_completed());

        let frames = port.frames();
        assert_eq!(frames.len(), 1 + frames_wanted);
        for (i, raw) in frames[1..].iter().enumerate() {
            let expected = ((i + 1) % 256) as u8;
            assert_eq!(raw[1], expected);
            assert_eq!(raw[2], !expected);
        }
        assert_eq!(frames[256][1], 0);
    }

    #[test]
    fn test_short_source_is_channel_error() {
        let mut port = MockPort::receiver();
        let err = TransferSession::new(&mut port)
            .with_config(fast_config())
            .run("app.bin", &mut Cursor::new(payload(100)), 500)
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_log_observer_receives_events() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let mut port = MockPort::receiver();

        TransferSession::new(&mut port)
            .with_config(fast_config())
            .on_log(move |line: &str| sink.lock().unwrap().push(line.to_string()))
            .run("app.bin", &mut Cursor::new(payload(10)), 10)
            .unwrap();

        let lines = lines.lock().unwrap();
        assert!(lines[0].starts_with("Starting YMODEM transfer: app.bin"));
        assert_eq!(lines.last().map(String::as_str), Some("Transfer complete"));
    }

    #[test]
    fn test_send_file_uses_basename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fw_v1.0.0.bin");
        std::fs::write(&path, payload(300)).unwrap();

        let mut port = MockPort::receiver();
        let outcome = TransferSession::new(&mut port)
            .with_config(fast_config())
            .send_file(&path)
            .unwrap();

        assert!(outcome.is_completed());
        let info = Frame::parse(port.frames()[0]).unwrap();
        assert!(info.payload().starts_with(b"fw_v1.0.0.bin\x00300\x00"));
    }

    #[test]
    fn test_progress_percent_caps_at_100() {
        assert_eq!(Progress::new(1, 10, 10).percent, 100);
        assert_eq!(Progress::new(1, 1, 3).percent, 33);
        assert_eq!(Progress::new(1, 0, 0).percent, 100);
    }
}
