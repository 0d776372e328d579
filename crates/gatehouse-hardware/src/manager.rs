//! Reader channel manager.
//!
//! This module provides the `ReaderManager`, which runs one task per reader
//! channel. Each task owns that channel's edge source and [`PulseDecoder`],
//! so bits of one channel are decoded strictly in arrival order. Complete
//! frames from every channel are merged into a single event stream.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────┐  edges  ┌──────────────┐
//! │ Channel 1 │────────►│ PulseDecoder │──┐
//! │ source    │         └──────────────┘  │   ┌───────────────┐
//! └───────────┘                           ├──►│ Event Channel │──► Scan loop
//! ┌───────────┐  edges  ┌──────────────┐  │   │ (mpsc)        │
//! │ Channel 2 │────────►│ PulseDecoder │──┘   └───────────────┘
//! │ source    │         └──────────────┘
//! └───────────┘
//! ```
//!
//! Frames are handed off with `try_send`: a full event channel drops the
//! frame with a warning rather than stalling the decode path.
//!
//! # Examples
//!
//! ```no_run
//! use gatehouse_core::ReaderChannel;
//! use gatehouse_hardware::devices::AnyEdgeSource;
//! use gatehouse_hardware::manager::{ReaderConfig, ReaderManager};
//! use gatehouse_hardware::mock::MockEdgeSource;
//! use gatehouse_hardware::types::ChannelPins;
//!
//! #[tokio::main]
//! async fn main() -> gatehouse_hardware::Result<()> {
//!     let mut manager = ReaderManager::new(ReaderConfig::default());
//!
//!     let (source, _handle) = MockEdgeSource::new();
//!     let channel = ReaderChannel::new(1).unwrap();
//!     manager.register(channel, ChannelPins::new(18, 19), AnyEdgeSource::Mock(source))?;
//!
//!     let mut handle = manager.start();
//!     while let Some(event) = handle.recv().await {
//!         println!("Event: {:?}", event);
//!     }
//!
//!     handle.shutdown().await?;
//!     Ok(())
//! }
//! ```

use crate::devices::AnyEdgeSource;
use crate::traits::EdgeSource;
use crate::types::ChannelPins;
use crate::{HardwareError, Result};
use gatehouse_core::ReaderChannel;
use gatehouse_core::constants::{DEFAULT_DECODER_TIMEOUT_MS, DEFAULT_FRAME_WIDTH};
use gatehouse_protocol::{Frame, PulseDecoder};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Unified event from any reader channel.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReaderEvent {
    /// A complete frame was decoded.
    Frame {
        channel: ReaderChannel,
        frame: Frame,
    },

    /// The channel's edge source failed. The channel task terminates after
    /// sending this event.
    DeviceError {
        channel: ReaderChannel,
        error: String,
    },
}

/// Decoder settings shared by every channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Bits per frame.
    pub frame_width: u8,

    /// Inter-bit gap after which a partial frame is discarded.
    pub decoder_timeout: Duration,

    /// Capacity of the merged event channel.
    pub event_capacity: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            frame_width: DEFAULT_FRAME_WIDTH,
            decoder_timeout: Duration::from_millis(DEFAULT_DECODER_TIMEOUT_MS),
            event_capacity: 64,
        }
    }
}

/// Statistics about registered reader channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderStats {
    /// Channels with a registered edge source, in registration order.
    pub channels: Vec<ReaderChannel>,
}

/// Handle for receiving decoded frames from all channels.
pub struct ReaderHandle {
    /// Event receiver for consuming events from channel tasks.
    event_rx: mpsc::Receiver<ReaderEvent>,

    /// Running channel tasks.
    tasks: JoinSet<Result<()>>,

    /// Signals channel tasks to release their sources and exit.
    cancel: CancellationToken,
}

impl ReaderHandle {
    /// Receive the next event from any channel.
    ///
    /// Returns `None` when all channel tasks have terminated.
    pub async fn recv(&mut self) -> Option<ReaderEvent> {
        self.event_rx.recv().await
    }

    /// Stop every channel task, releasing its edge subscriptions.
    ///
    /// Individual task failures are logged, not returned.
    pub async fn shutdown(mut self) -> Result<()> {
        self.cancel.cancel();
        self.event_rx.close();

        let mut error_count = 0;
        let mut panic_count = 0;

        while let Some(result) = self.tasks.join_next().await {
            match Self::classify_task_result(result) {
                TaskTermination::Success | TaskTermination::Cancelled => {}
                TaskTermination::Error => error_count += 1,
                TaskTermination::Panic => panic_count += 1,
            }
        }

        if error_count + panic_count > 0 {
            warn!(
                errors = error_count,
                panics = panic_count,
                "Reader channels stopped with failures"
            );
        } else {
            debug!("Reader channels stopped");
        }
        Ok(())
    }

    /// Classify the termination status of a task.
    fn classify_task_result(
        result: std::result::Result<Result<()>, tokio::task::JoinError>,
    ) -> TaskTermination {
        match result {
            Ok(Ok(())) => TaskTermination::Success,
            Ok(Err(_)) => TaskTermination::Error,
            Err(e) if e.is_cancelled() => TaskTermination::Cancelled,
            Err(_) => TaskTermination::Panic,
        }
    }
}

/// Task termination classification for shutdown handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskTermination {
    /// Task completed successfully.
    Success,
    /// Task returned an error.
    Error,
    /// Task was cancelled (expected during shutdown).
    Cancelled,
    /// Task panicked.
    Panic,
}

struct RegisteredReader {
    channel: ReaderChannel,
    pins: ChannelPins,
    source: AnyEdgeSource,
}

/// Manages all reader channels.
///
/// # Lifecycle
///
/// 1. Create manager with configuration
/// 2. Register one edge source per channel with `register`
/// 3. Call `start()` to spawn channel tasks and get the event handle
/// 4. Receive frames from the handle
/// 5. Call `shutdown()` on the handle to release hardware
pub struct ReaderManager {
    readers: Vec<RegisteredReader>,
    config: ReaderConfig,
}

impl ReaderManager {
    /// Create new reader manager with configuration.
    pub fn new(config: ReaderConfig) -> Self {
        Self {
            readers: Vec::new(),
            config,
        }
    }

    /// Register the edge source of one channel.
    ///
    /// # Errors
    ///
    /// Returns `HardwareError::ConfigurationError` if the channel is already
    /// registered, if its data lines share a pin, or if a pin is already
    /// used by another channel.
    pub fn register(
        &mut self,
        channel: ReaderChannel,
        pins: ChannelPins,
        source: AnyEdgeSource,
    ) -> Result<()> {
        if pins.d0 == pins.d1 {
            return Err(HardwareError::configuration(format!(
                "Channel {channel}: D0 and D1 both on pin {}",
                pins.d0
            )));
        }
        for existing in &self.readers {
            if existing.channel == channel {
                return Err(HardwareError::configuration(format!(
                    "Channel {channel} registered twice"
                )));
            }
            let used = [existing.pins.d0, existing.pins.d1];
            if used.contains(&pins.d0) || used.contains(&pins.d1) {
                return Err(HardwareError::configuration(format!(
                    "Channel {channel} pins overlap channel {}",
                    existing.channel
                )));
            }
        }

        debug!(%channel, d0 = pins.d0, d1 = pins.d1, source = source.name(), "Registered reader");
        self.readers.push(RegisteredReader {
            channel,
            pins,
            source,
        });
        Ok(())
    }

    /// Get reader statistics.
    pub fn get_stats(&self) -> ReaderStats {
        ReaderStats {
            channels: self.readers.iter().map(|r| r.channel).collect(),
        }
    }

    /// Spawn one task per registered channel and return the event handle.
    pub fn start(self) -> ReaderHandle {
        let (event_tx, event_rx) = mpsc::channel(self.config.event_capacity.max(1));
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        for reader in self.readers {
            let decoder = PulseDecoder::new(self.config.frame_width, self.config.decoder_timeout);
            info!(channel = %reader.channel, "Starting reader channel");
            tasks.spawn(Self::channel_task(
                reader,
                decoder,
                event_tx.clone(),
                cancel.clone(),
            ));
        }

        ReaderHandle {
            event_rx,
            tasks,
            cancel,
        }
    }

    async fn channel_task(
        mut reader: RegisteredReader,
        mut decoder: PulseDecoder,
        tx: mpsc::Sender<ReaderEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let channel = reader.channel;

        loop {
            let edge = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                edge = reader.source.next_edge() => edge,
            };

            let edge = match edge {
                Ok(edge) => edge,
                Err(e) => {
                    error!(%channel, error = %e, "Edge source failed");
                    if let Err(send_err) = tx.try_send(ReaderEvent::DeviceError {
                        channel,
                        error: e.to_string(),
                    }) {
                        warn!(%channel, error = %send_err, "Failed to report edge source failure");
                    }
                    if let Err(release_err) = reader.source.release().await {
                        warn!(%channel, error = %release_err, "Failed to release edge source");
                    }
                    return Err(e);
                }
            };

            if !edge.is_falling() {
                continue;
            }
            let Some(bit) = reader.pins.bit_for(edge.pin) else {
                trace!(%channel, pin = edge.pin, "Ignoring edge on foreign pin");
                continue;
            };

            if let Some(frame) = decoder.push(bit, edge.tick) {
                trace!(%channel, %frame, "Frame decoded");
                match tx.try_send(ReaderEvent::Frame { channel, frame }) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(%channel, "Scan consumer is behind, dropping frame");
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
            }
        }

        reader.source.release().await?;
        debug!(%channel, "Reader channel released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEdgeSource;
    use gatehouse_core::CardId;
    use gatehouse_protocol::FrameLayout;

    fn channel(n: u8) -> ReaderChannel {
        ReaderChannel::new(n).unwrap()
    }

    #[test]
    fn test_reader_config_default() {
        let config = ReaderConfig::default();
        assert_eq!(config.frame_width, 26);
        assert_eq!(config.decoder_timeout, Duration::from_millis(25));
    }

    #[test]
    fn test_register_rejects_duplicate_channel() {
        let mut manager = ReaderManager::new(ReaderConfig::default());
        let (a, _) = MockEdgeSource::new();
        let (b, _) = MockEdgeSource::new();

        manager
            .register(channel(1), ChannelPins::new(18, 19), AnyEdgeSource::Mock(a))
            .unwrap();
        let result = manager.register(channel(1), ChannelPins::new(23, 24), AnyEdgeSource::Mock(b));
        assert!(matches!(result, Err(HardwareError::ConfigurationError { .. })));
    }

    #[test]
    fn test_register_rejects_overlapping_pins() {
        let mut manager = ReaderManager::new(ReaderConfig::default());
        let (a, _) = MockEdgeSource::new();
        let (b, _) = MockEdgeSource::new();
        let (c, _) = MockEdgeSource::new();

        manager
            .register(channel(1), ChannelPins::new(18, 19), AnyEdgeSource::Mock(a))
            .unwrap();
        assert!(
            manager
                .register(channel(2), ChannelPins::new(19, 24), AnyEdgeSource::Mock(b))
                .is_err()
        );
        assert!(
            manager
                .register(channel(2), ChannelPins::new(24, 24), AnyEdgeSource::Mock(c))
                .is_err()
        );
        assert_eq!(manager.get_stats().channels, vec![channel(1)]);
    }

    #[tokio::test]
    async fn test_manager_decodes_frames_per_channel() {
        let mut manager = ReaderManager::new(ReaderConfig::default());
        let layout = FrameLayout::default();

        let (s1, h1) = MockEdgeSource::with_name("reader 1");
        let (s2, h2) = MockEdgeSource::with_name("reader 2");
        let pins1 = ChannelPins::new(18, 19);
        let pins2 = ChannelPins::new(23, 24);
        manager.register(channel(1), pins1, AnyEdgeSource::Mock(s1)).unwrap();
        manager.register(channel(2), pins2, AnyEdgeSource::Mock(s2)).unwrap();

        let mut handle = manager.start();

        h1.send_card(pins1, &layout, CardId::new(111111)).await.unwrap();
        h2.send_card(pins2, &layout, CardId::new(222222)).await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..2 {
            match handle.recv().await.unwrap() {
                ReaderEvent::Frame { channel, frame } => {
                    seen.push((channel.as_u8(), layout.extract_card_id(&frame).unwrap()));
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        seen.sort();
        assert_eq!(
            seen,
            vec![(1, CardId::new(111111)), (2, CardId::new(222222))]
        );

        handle.shutdown().await.unwrap();
        assert!(h1.is_closed());
        assert!(h2.is_closed());
    }

    #[tokio::test]
    async fn test_manager_ignores_foreign_pins() {
        let mut manager = ReaderManager::new(ReaderConfig {
            frame_width: 2,
            ..ReaderConfig::default()
        });
        let (source, handle) = MockEdgeSource::new();
        manager
            .register(channel(1), ChannelPins::new(18, 19), AnyEdgeSource::Mock(source))
            .unwrap();
        let mut events = manager.start();

        handle.pulse(40).await.unwrap();
        handle.pulse(19).await.unwrap();
        handle.pulse(18).await.unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            ReaderEvent::Frame {
                channel: channel(1),
                frame: Frame::new(2, 0b10)
            }
        );
        events.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_manager_reports_device_error() {
        let mut manager = ReaderManager::new(ReaderConfig::default());
        let (source, handle) = MockEdgeSource::new();
        manager
            .register(channel(2), ChannelPins::new(23, 24), AnyEdgeSource::Mock(source))
            .unwrap();
        let mut events = manager.start();

        drop(handle);

        let event = events.recv().await.unwrap();
        assert!(matches!(event, ReaderEvent::DeviceError { channel, .. } if channel.as_u8() == 2));
        events.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_channel_does_not_stop_others() {
        let mut manager = ReaderManager::new(ReaderConfig::default());
        let layout = FrameLayout::default();
        let (s1, h1) = MockEdgeSource::with_name("reader 1");
        let (s2, h2) = MockEdgeSource::with_name("reader 2");
        let pins1 = ChannelPins::new(18, 19);
        manager.register(channel(1), pins1, AnyEdgeSource::Mock(s1)).unwrap();
        manager
            .register(channel(2), ChannelPins::new(23, 24), AnyEdgeSource::Mock(s2))
            .unwrap();
        let mut events = manager.start();

        drop(h2);
        let event = events.recv().await.unwrap();
        assert!(matches!(event, ReaderEvent::DeviceError { channel, .. } if channel.as_u8() == 2));

        h1.send_card(pins1, &layout, CardId::new(111111)).await.unwrap();
        match events.recv().await.unwrap() {
            ReaderEvent::Frame { channel, frame } => {
                assert_eq!(channel.as_u8(), 1);
                assert_eq!(layout.extract_card_id(&frame).unwrap(), CardId::new(111111));
            }
            other => panic!("unexpected event {other:?}"),
        }

        events.shutdown().await.unwrap();
        assert!(h1.is_closed());
    }

    #[tokio::test]
    async fn test_manager_graceful_shutdown() {
        let manager = ReaderManager::new(ReaderConfig::default());
        let handle = manager.start();
        handle.shutdown().await.unwrap();
    }
}
