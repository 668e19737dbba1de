#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Line-oriented operator console carried over the board UART.
//!
//! The UART task turns received bytes into [`ConsoleLine`]s with a
//! [`LineAssembler`] and queues them for the control loop, which answers with
//! [`ConsoleFrame`]s on the opposite channel. The control loop only ever polls
//! the inbound queue, so a silent console never delays a wake.

use embassy_sync::channel::{Channel, Receiver, Sender};
use heapless::{String, Vec};
use portable_atomic::{AtomicBool, Ordering};

#[cfg(not(target_os = "none"))]
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
#[cfg(target_os = "none")]
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;

#[cfg(target_os = "none")]
type ConsoleMutex = ThreadModeRawMutex;
#[cfg(not(target_os = "none"))]
type ConsoleMutex = NoopRawMutex;

/// Maximum number of bytes accepted on a single console line (excluding terminator).
pub const MAX_LINE_LEN: usize = 96;

/// Capacity of a single reply, including the trailing CRLF.
pub const MAX_REPLY_LEN: usize = 256;

/// Depth for each console channel.
pub const CONSOLE_QUEUE_DEPTH: usize = 4;

/// Completed operator input line.
pub type ConsoleLine = String<MAX_LINE_LEN>;

/// Text queued for transmission to the operator.
pub type ConsoleFrame = String<MAX_REPLY_LEN>;

pub type LineChannel = Channel<ConsoleMutex, ConsoleLine, CONSOLE_QUEUE_DEPTH>;
pub type LineSender<'a> = Sender<'a, ConsoleMutex, ConsoleLine, CONSOLE_QUEUE_DEPTH>;
pub type LineReceiver<'a> = Receiver<'a, ConsoleMutex, ConsoleLine, CONSOLE_QUEUE_DEPTH>;

pub type FrameChannel = Channel<ConsoleMutex, ConsoleFrame, CONSOLE_QUEUE_DEPTH>;
pub type FrameSender<'a> = Sender<'a, ConsoleMutex, ConsoleFrame, CONSOLE_QUEUE_DEPTH>;
pub type FrameReceiver<'a> = Receiver<'a, ConsoleMutex, ConsoleFrame, CONSOLE_QUEUE_DEPTH>;

/// Cleared while the UART task holds bytes that have not left the wire yet.
static TX_IDLE: AtomicBool = AtomicBool::new(true);

pub fn mark_tx_busy() {
    TX_IDLE.store(false, Ordering::Release);
}

pub fn mark_tx_idle() {
    TX_IDLE.store(true, Ordering::Release);
}

/// Returns `true` once every queued reply has been written and flushed.
#[must_use]
pub fn tx_idle() -> bool {
    TX_IDLE.load(Ordering::Acquire)
}

/// Problems detected while assembling a line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum LineError {
    /// The line exceeded [`MAX_LINE_LEN`] and was discarded.
    Overflow,
    /// The line was not valid UTF-8 and was discarded.
    InvalidUtf8,
}

/// Accumulates bytes until CR or LF.
///
/// Backspace and DEL erase the previous byte. After an overflow the rest of
/// the line is dropped up to the next terminator.
#[derive(Default)]
pub struct LineAssembler {
    buffer: Vec<u8, MAX_LINE_LEN>,
    overflowed: bool,
}

impl LineAssembler {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            overflowed: false,
        }
    }

    /// Feeds a single byte, returning a line once a terminator arrives.
    ///
    /// Empty lines (for example the LF of a CRLF pair) produce nothing.
    pub fn push(&mut self, byte: u8) -> Result<Option<ConsoleLine>, LineError> {
        match byte {
            b'\r' | b'\n' => self.finish(),
            0x08 | 0x7f => {
                if !self.overflowed {
                    self.buffer.pop();
                }
                Ok(None)
            }
            value => {
                if self.overflowed {
                    return Ok(None);
                }
                if self.buffer.push(value).is_err() {
                    self.overflowed = true;
                    self.buffer.clear();
                    return Err(LineError::Overflow);
                }
                Ok(None)
            }
        }
    }

    fn finish(&mut self) -> Result<Option<ConsoleLine>, LineError> {
        if self.overflowed {
            self.overflowed = false;
            return Ok(None);
        }
        if self.buffer.is_empty() {
            return Ok(None);
        }

        String::from_utf8(core::mem::take(&mut self.buffer))
            .map(Some)
            .map_err(|_| LineError::InvalidUtf8)
    }
}
