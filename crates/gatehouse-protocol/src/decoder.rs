//! Per-channel pulse decoder.
//!
//! The decoder is fed one [`Bit`] per data-line pulse together with the
//! hardware's monotonic microsecond tick. Ticks are `u32` and wrap roughly
//! every 71 minutes, so gaps are computed with wrapping subtraction.
//!
//! If the gap since the previous bit exceeds the timeout the partial frame
//! is dropped before the new bit is accumulated. This is how a reader that
//! lost sync (or a noise pulse) recovers: the next full pulse train decodes
//! cleanly.

use std::time::Duration;

use crate::frame::Frame;

/// One data bit, as signalled on D0 (`Zero`) or D1 (`One`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bit {
    Zero,
    One,
}

impl From<bool> for Bit {
    fn from(one: bool) -> Self {
        if one { Self::One } else { Self::Zero }
    }
}

impl Bit {
    fn as_u64(self) -> u64 {
        match self {
            Self::Zero => 0,
            Self::One => 1,
        }
    }
}

/// Bit accumulator for a single reader channel.
///
/// `push` is O(1) and never allocates, so it can run directly on the edge
/// callback path.
#[derive(Debug, Clone)]
pub struct PulseDecoder {
    width: u8,
    timeout_ticks: u32,
    value: u64,
    bit_count: u8,
    last_tick: Option<u32>,
}

impl PulseDecoder {
    /// Create a decoder emitting `width`-bit frames.
    ///
    /// `timeout` is converted to microsecond ticks and saturates at `u32::MAX`.
    pub fn new(width: u8, timeout: Duration) -> Self {
        let timeout_ticks = u32::try_from(timeout.as_micros()).unwrap_or(u32::MAX);
        Self {
            width: width.max(1),
            timeout_ticks,
            value: 0,
            bit_count: 0,
            last_tick: None,
        }
    }

    /// Accumulate one bit observed at `tick`; returns a frame when `width`
    /// bits have been collected.
    pub fn push(&mut self, bit: Bit, tick: u32) -> Option<Frame> {
        if let Some(last) = self.last_tick
            && tick.wrapping_sub(last) > self.timeout_ticks
        {
            self.value = 0;
            self.bit_count = 0;
        }

        self.value = (self.value << 1) | bit.as_u64();
        self.bit_count += 1;
        self.last_tick = Some(tick);

        if self.bit_count >= self.width {
            let frame = Frame::new(self.width, self.value);
            self.value = 0;
            self.bit_count = 0;
            return Some(frame);
        }
        None
    }

    /// Drop any partial frame and forget the last tick.
    pub fn reset(&mut self) {
        self.value = 0;
        self.bit_count = 0;
        self.last_tick = None;
    }

    /// Bits accumulated toward the current frame.
    pub fn bit_count(&self) -> u8 {
        self.bit_count
    }

    pub fn width(&self) -> u8 {
        self.width
    }
}
