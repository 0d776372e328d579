//! Mock edge source for testing and development.
//!
//! This module provides a simulated reader data-line subscription that can
//! be driven programmatically, one edge at a time or as complete Wiegand
//! pulse trains.

use crate::{
    HardwareError, Result,
    traits::EdgeSource,
    types::{ChannelPins, Edge, PinLevel},
};
use gatehouse_core::CardId;
use gatehouse_protocol::{Frame, FrameLayout};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::mpsc;

/// Spacing between consecutive bits of a simulated frame (µs).
pub const BIT_SPACING_US: u32 = 2_000;

/// Width of a simulated data-line pulse (µs).
pub const PULSE_WIDTH_US: u32 = 50;

/// Quiet time inserted after a simulated frame (µs).
pub const FRAME_GAP_US: u32 = 250_000;

/// Mock edge source for testing and development.
///
/// # Examples
///
/// ```
/// use gatehouse_hardware::mock::MockEdgeSource;
/// use gatehouse_hardware::traits::EdgeSource;
/// use gatehouse_hardware::types::{ChannelPins, PinLevel};
///
/// #[tokio::main]
/// async fn main() -> gatehouse_hardware::Result<()> {
///     let (mut source, handle) = MockEdgeSource::new();
///     let pins = ChannelPins::new(18, 19);
///
///     handle.pulse(pins.d1).await?;
///
///     let edge = source.next_edge().await?;
///     assert_eq!(edge.pin, 19);
///     assert_eq!(edge.level, PinLevel::Low);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct MockEdgeSource {
    /// Channel receiver for simulated edges
    edge_rx: mpsc::Receiver<Edge>,

    /// Device name
    name: String,

    /// Whether `release` has been called
    released: bool,
}

impl MockEdgeSource {
    /// Create a new mock edge source with the default name.
    ///
    /// Returns a tuple of (MockEdgeSource, MockEdgeHandle) where the handle
    /// injects edges.
    pub fn new() -> (Self, MockEdgeHandle) {
        Self::with_name("Mock Edge Source")
    }

    /// Create a new mock edge source with a custom name.
    pub fn with_name(name: impl Into<String>) -> (Self, MockEdgeHandle) {
        let (edge_tx, edge_rx) = mpsc::channel(256);

        let source = Self {
            edge_rx,
            name: name.into(),
            released: false,
        };

        let handle = MockEdgeHandle {
            edge_tx,
            clock: Arc::new(AtomicU32::new(0)),
        };

        (source, handle)
    }

    /// Whether the subscription has been released.
    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl EdgeSource for MockEdgeSource {
    async fn next_edge(&mut self) -> Result<Edge> {
        self.edge_rx
            .recv()
            .await
            .ok_or_else(|| HardwareError::disconnected(format!("{} edge channel closed", self.name)))
    }

    async fn release(&mut self) -> Result<()> {
        self.edge_rx.close();
        self.released = true;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Handle for driving a mock edge source.
///
/// The handle keeps its own microsecond clock so generated pulse trains have
/// realistic, monotonically increasing ticks. Clones share the clock.
#[derive(Debug, Clone)]
pub struct MockEdgeHandle {
    /// Channel sender for simulated edges
    edge_tx: mpsc::Sender<Edge>,

    /// Simulated driver tick
    clock: Arc<AtomicU32>,
}

impl MockEdgeHandle {
    /// Inject a raw edge.
    ///
    /// # Errors
    ///
    /// Returns an error if the source has been dropped or released.
    pub async fn send_edge(&self, edge: Edge) -> Result<()> {
        self.edge_tx
            .send(edge)
            .await
            .map_err(|_| HardwareError::disconnected("Mock edge channel closed"))
    }

    /// Emit one data-line pulse (falling then rising edge) at the current
    /// tick, then advance the clock by one bit spacing.
    pub async fn pulse(&self, pin: u8) -> Result<()> {
        let tick = self.now();
        self.send_edge(Edge::new(pin, PinLevel::Low, tick)).await?;
        self.send_edge(Edge::new(pin, PinLevel::High, tick.wrapping_add(PULSE_WIDTH_US)))
            .await?;
        self.advance(BIT_SPACING_US);
        Ok(())
    }

    /// Emit every bit of `frame` on the channel's data lines, followed by an
    /// inter-frame gap.
    pub async fn send_frame(&self, pins: ChannelPins, frame: &Frame) -> Result<()> {
        for bit in frame.bits() {
            self.pulse(pins.pin_for(bit)).await?;
        }
        self.advance(FRAME_GAP_US);
        Ok(())
    }

    /// Encode `card` with `layout` and emit it as a pulse train.
    ///
    /// # Errors
    ///
    /// Returns `HardwareError::ConfigurationError` if the card does not fit
    /// the layout.
    pub async fn send_card(&self, pins: ChannelPins, layout: &FrameLayout, card: CardId) -> Result<()> {
        let frame = layout
            .encode(card)
            .map_err(|e| HardwareError::configuration(e.to_string()))?;
        self.send_frame(pins, &frame).await
    }

    /// Move the simulated clock forward.
    pub fn advance(&self, micros: u32) {
        let _ = self
            .clock
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| {
                Some(t.wrapping_add(micros))
            });
    }

    /// Current simulated tick.
    pub fn now(&self) -> u32 {
        self.clock.load(Ordering::SeqCst)
    }

    /// Whether the source side is gone.
    pub fn is_closed(&self) -> bool {
        self.edge_tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_protocol::{Bit, PulseDecoder};
    use std::time::Duration;

    #[tokio::test]
    async fn test_mock_edge_pulse_and_read() {
        let (mut source, handle) = MockEdgeSource::new();

        handle.pulse(18).await.unwrap();

        let down = source.next_edge().await.unwrap();
        let up = source.next_edge().await.unwrap();
        assert_eq!(down, Edge::new(18, PinLevel::Low, 0));
        assert_eq!(up, Edge::new(18, PinLevel::High, PULSE_WIDTH_US));
        assert_eq!(handle.now(), BIT_SPACING_US);
    }

    #[tokio::test]
    async fn test_mock_edge_card_decodes() {
        let (mut source, handle) = MockEdgeSource::new();
        let pins = ChannelPins::new(18, 19);
        let layout = FrameLayout::default();

        tokio::spawn(async move {
            handle
                .send_card(pins, &layout, CardId::new(111111))
                .await
                .unwrap();
        });

        let mut decoder = PulseDecoder::new(26, Duration::from_millis(25));
        let mut frame = None;
        while frame.is_none() {
            let edge = source.next_edge().await.unwrap();
            if !edge.is_falling() {
                continue;
            }
            let bit: Bit = pins.bit_for(edge.pin).unwrap();
            frame = decoder.push(bit, edge.tick);
        }

        let card = layout.extract_card_id(&frame.unwrap()).unwrap();
        assert_eq!(card, CardId::new(111111));
    }

    #[tokio::test]
    async fn test_mock_edge_release_closes_channel() {
        let (mut source, handle) = MockEdgeSource::with_name("reader 2");

        source.release().await.unwrap();
        assert!(source.is_released());
        assert!(handle.pulse(23).await.is_err());
        assert!(source.next_edge().await.is_err());
        assert_eq!(source.name(), "reader 2");
    }

    #[tokio::test]
    async fn test_mock_edge_handle_clone_shares_clock() {
        let (_source, handle) = MockEdgeSource::new();
        let other = handle.clone();

        handle.advance(1_000);
        other.advance(500);
        assert_eq!(handle.now(), 1_500);
    }

    #[test]
    fn test_clock_wraps() {
        let (_source, handle) = MockEdgeSource::new();
        handle.advance(u32::MAX);
        handle.advance(2);
        assert_eq!(handle.now(), 1);
    }
}
