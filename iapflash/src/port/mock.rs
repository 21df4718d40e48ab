//! In-memory port for protocol tests.
//!
//! Unlike `Cursor<Vec<u8>>`, reads and writes are independent, and an optional
//! responder can queue bytes in reaction to each write, which is how the
//! scripted receivers below behave like a real bootloader.

use crate::error::Result;
use crate::port::Port;
use crate::protocol::ymodem::control;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::Duration;

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

pub(crate) struct MockPort {
    incoming: VecDeque<u8>,
    written: Vec<Vec<u8>>,
    responder: Option<Responder>,
    greeting: Vec<u8>,
    timeout: Duration,
    cleared: usize,
}

impl MockPort {
    /// A port that never answers.
    pub(crate) fn silent() -> Self {
        Self {
            incoming: VecDeque::new(),
            written: Vec::new(),
            responder: None,
            greeting: Vec::new(),
            timeout: Duration::from_millis(1000),
            cleared: 0,
        }
    }

    /// A port that answers every write with whatever `responder` returns.
    pub(crate) fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::silent()
        }
    }

    /// A well-behaved receiver: requests the transfer, ACKs every frame,
    /// NAKs the first EOT and ACKs the second.
    pub(crate) fn receiver() -> Self {
        Self::with_responder(cooperative_receiver()).greeting(&[control::C])
    }

    /// Bytes the receiver sends right after the line is reset.
    pub(crate) fn greeting(mut self, bytes: &[u8]) -> Self {
        self.greeting = bytes.to_vec();
        self
    }

    pub(crate) fn push_incoming(&mut self, bytes: &[u8]) {
        self.incoming
            .extend(bytes);
    }

    /// Every write, in order.
    pub(crate) fn written(&self) -> &[Vec<u8>] {
        &self.written
    }

    /// Writes that carry a frame (anything longer than one control byte).
    pub(crate) fn frames(&self) -> Vec<&[u8]> {
        self.written
            .iter()
            .filter(|w| w.len() > 1)
            .map(Vec::as_slice)
            .collect()
    }

    /// Number of times the given single control byte was written.
    pub(crate) fn count_control(&self, byte: u8) -> usize {
        self.written
            .iter()
            .filter(|w| w.as_slice() == [byte])
            .count()
    }

    pub(crate) fn clear_count(&self) -> usize {
        self.cleared
    }
}

/// Responder for a receiver that accepts everything.
pub(crate) fn cooperative_receiver() -> impl FnMut(&[u8]) -> Vec<u8> + Send + 'static {
    let mut eots = 0;
    move |written: &[u8]| match written {
        [control::EOT] => {
            eots += 1;
            if eots == 1 {
                vec![control::NAK]
            } else {
                vec![control::ACK]
            }
        },
        [control::SOH, 0x00, 0xFF, ..] => vec![control::ACK, control::C],
        [control::SOH | control::STX, ..] => vec![control::ACK],
        _ => Vec::new(),
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self
            .incoming
            .is_empty()
        {
            // Behave like a serial port: block for the read timeout.
            std::thread::sleep(self.timeout);
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf
            .len()
            .min(
                self.incoming
                    .len(),
            );
        for (slot, byte) in buf
            .iter_mut()
            .zip(
                self.incoming
                    .drain(..n),
            )
        {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written
            .push(buf.to_vec());
        if let Some(responder) = self
            .responder
            .as_mut()
        {
            let reply = responder(buf);
            self.incoming
                .extend(reply);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.incoming
            .clear();
        self.incoming
            .extend(&self.greeting);
        self.cleared += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
