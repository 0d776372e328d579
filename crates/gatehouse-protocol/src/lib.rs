//! Wiegand pulse-train decoding for gatehouse readers.
//!
//! A reader signals each bit as a short low pulse on one of two data lines
//! (D0 for `0`, D1 for `1`). The hardware layer turns those pulses into
//! timestamped [`Bit`] events; this crate turns the events into fixed-width
//! [`Frame`]s and frames into card ids.
//!
//! # Components
//!
//! - [`PulseDecoder`]: per-channel bit accumulator with inter-bit timeout
//! - [`FrameLayout`]: configurable width and guard-bit stripping, optional
//!   26-bit parity check, and the inverse encoding used by simulated readers
//!
//! # Example
//!
//! ```
//! use gatehouse_core::CardId;
//! use gatehouse_protocol::{FrameLayout, PulseDecoder};
//! use std::time::Duration;
//!
//! let layout = FrameLayout::default();
//! let mut decoder = PulseDecoder::new(layout.width, Duration::from_millis(25));
//!
//! let frame = layout.encode(CardId::new(111111)).unwrap();
//! let mut decoded = None;
//! for (i, bit) in frame.bits().enumerate() {
//!     decoded = decoder.push(bit, i as u32 * 2_000);
//! }
//!
//! let card = layout.extract_card_id(&decoded.unwrap()).unwrap();
//! assert_eq!(card, CardId::new(111111));
//! ```

pub mod decoder;
pub mod frame;

pub use decoder::{Bit, PulseDecoder};
pub use frame::{Frame, FrameLayout};
