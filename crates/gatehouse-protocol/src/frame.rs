//! Credential frames and their bit layout.
//!
//! A frame is `width` bits, most significant bit first on the wire. The
//! standard 26-bit layout is:
//!
//! ```text
//! ┌───┬──────────────────────────┬───┐
//! │ E │   24-bit card payload    │ O │
//! └───┴──────────────────────────┴───┘
//!  25                            0
//! ```
//!
//! `E` is even parity over the upper half of the payload and `O` is odd
//! parity over the lower half. Other widths are supported by configuring
//! the number of guard bits to strip on each side.

use gatehouse_core::constants::{
    DEFAULT_FRAME_WIDTH, DEFAULT_LEADING_GUARD_BITS, DEFAULT_TRAILING_GUARD_BITS, MAX_FRAME_WIDTH,
};
use gatehouse_core::{CardId, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::decoder::Bit;

/// A complete frame as emitted by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frame {
    width: u8,
    value: u64,
}

impl Frame {
    /// Build a frame from raw bits. Bits above `width` are masked off.
    pub fn new(width: u8, value: u64) -> Self {
        Self {
            width,
            value: value & mask(width),
        }
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    /// Bits in wire order (most significant first).
    pub fn bits(&self) -> impl Iterator<Item = Bit> + '_ {
        (0..self.width)
            .rev()
            .map(|i| Bit::from((self.value >> i) & 1 == 1))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:0width$b}", self.value, width = self.width as usize)
    }
}

/// How card ids are laid out inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameLayout {
    /// Expected frame width; frames of any other width are discarded.
    pub width: u8,

    /// Bits stripped from the most significant end.
    pub leading_guard_bits: u8,

    /// Bits stripped from the least significant end.
    pub trailing_guard_bits: u8,

    /// Reject frames whose guard bits are not valid Wiegand parity.
    /// Only meaningful with exactly one guard bit on each side.
    pub check_parity: bool,
}

impl Default for FrameLayout {
    fn default() -> Self {
        Self {
            width: DEFAULT_FRAME_WIDTH,
            leading_guard_bits: DEFAULT_LEADING_GUARD_BITS,
            trailing_guard_bits: DEFAULT_TRAILING_GUARD_BITS,
            check_parity: false,
        }
    }
}

impl FrameLayout {
    pub fn new(width: u8, leading_guard_bits: u8, trailing_guard_bits: u8) -> Result<Self> {
        let layout = Self {
            width,
            leading_guard_bits,
            trailing_guard_bits,
            check_parity: false,
        };
        layout.validate()?;
        Ok(layout)
    }

    #[must_use]
    pub fn with_parity_check(mut self, enabled: bool) -> Self {
        self.check_parity = enabled;
        self
    }

    /// # Errors
    /// Returns `Error::Configuration` when the width is zero or above 64, or
    /// when the guard bits leave no payload.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.width > MAX_FRAME_WIDTH {
            return Err(Error::configuration(format!(
                "Frame width must be 1-{MAX_FRAME_WIDTH}, got {}",
                self.width
            )));
        }
        let guards = u16::from(self.leading_guard_bits) + u16::from(self.trailing_guard_bits);
        if guards >= u16::from(self.width) {
            return Err(Error::configuration(format!(
                "Guard bits ({guards}) leave no payload in a {}-bit frame",
                self.width
            )));
        }
        Ok(())
    }

    /// Number of bits carrying the card id.
    pub fn payload_bits(&self) -> u8 {
        self.width
            .saturating_sub(self.leading_guard_bits)
            .saturating_sub(self.trailing_guard_bits)
    }

    /// Strip guard bits and read the payload as an unsigned integer.
    ///
    /// # Errors
    /// Returns `Error::MalformedInput` if the frame width differs from the
    /// layout width, or if parity checking is enabled and fails.
    pub fn extract_card_id(&self, frame: &Frame) -> Result<CardId> {
        if frame.width != self.width {
            return Err(Error::malformed(format!(
                "Expected {}-bit frame, got {} bits",
                self.width, frame.width
            )));
        }
        if self.check_parity && !self.parity_ok(frame) {
            return Err(Error::malformed(format!("Parity mismatch in frame {frame}")));
        }

        let payload = (frame.value >> self.trailing_guard_bits) & mask(self.payload_bits());
        Ok(CardId::new(payload))
    }

    /// Whether the guard bits hold valid even/odd parity.
    ///
    /// Layouts without exactly one guard bit per side carry no parity and
    /// always pass.
    pub fn parity_ok(&self, frame: &Frame) -> bool {
        if !self.has_parity() || frame.width != self.width {
            return true;
        }
        let payload = (frame.value >> 1) & mask(self.payload_bits());
        let (leading, trailing) = self.parity_bits(payload);
        let actual_leading = (frame.value >> (self.width - 1)) & 1;
        let actual_trailing = frame.value & 1;
        actual_leading == leading && actual_trailing == trailing
    }

    /// Build the frame a reader would send for `card`.
    ///
    /// Parity bits are filled in when the layout has one guard bit on each
    /// side; other guard bits are zero.
    ///
    /// # Errors
    /// Returns `Error::MalformedInput` if the id does not fit the payload.
    pub fn encode(&self, card: CardId) -> Result<Frame> {
        let payload = card.as_u64();
        if payload > mask(self.payload_bits()) {
            return Err(Error::malformed(format!(
                "Card {card} does not fit in {} payload bits",
                self.payload_bits()
            )));
        }

        let mut value = payload << self.trailing_guard_bits;
        if self.has_parity() {
            let (leading, trailing) = self.parity_bits(payload);
            value |= leading << (self.width - 1);
            value |= trailing;
        }
        Ok(Frame::new(self.width, value))
    }

    fn has_parity(&self) -> bool {
        self.leading_guard_bits == 1 && self.trailing_guard_bits == 1
    }

    /// (even parity over the upper half, odd parity over the lower half)
    fn parity_bits(&self, payload: u64) -> (u64, u64) {
        let bits = self.payload_bits();
        let lower_len = bits / 2;
        let upper = payload >> lower_len;
        let lower = payload & mask(lower_len);
        let even = u64::from(upper.count_ones() % 2);
        let odd = 1 - u64::from(lower.count_ones() % 2);
        (even, odd)
    }
}

fn mask(bits: u8) -> u64 {
    if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_default_layout_strips_one_bit_each_side() {
        let layout = FrameLayout::default();
        // 1 | 0000 0001 1011 0010 0000 0111 | 1  ->  111111
        let frame = Frame::new(26, (1 << 25) | (111111 << 1) | 1);
        assert_eq!(layout.extract_card_id(&frame).unwrap(), CardId::new(111111));
    }

    #[test]
    fn test_wrong_width_is_malformed() {
        let layout = FrameLayout::default();
        let frame = Frame::new(34, 0);
        assert!(matches!(
            layout.extract_card_id(&frame),
            Err(Error::MalformedInput(_))
        ));
    }

    #[rstest]
    #[case(26, 1, 1, 24)]
    #[case(34, 1, 1, 32)]
    #[case(37, 1, 1, 35)]
    #[case(32, 0, 0, 32)]
    #[case(64, 0, 0, 64)]
    fn test_payload_bits(
        #[case] width: u8,
        #[case] leading: u8,
        #[case] trailing: u8,
        #[case] expected: u8,
    ) {
        let layout = FrameLayout::new(width, leading, trailing).unwrap();
        assert_eq!(layout.payload_bits(), expected);
    }

    #[rstest]
    #[case(0, 0, 0)]
    #[case(65, 1, 1)]
    #[case(2, 1, 1)]
    #[case(8, 4, 4)]
    fn test_invalid_layouts(#[case] width: u8, #[case] leading: u8, #[case] trailing: u8) {
        assert!(FrameLayout::new(width, leading, trailing).is_err());
    }

    #[test]
    fn test_encode_sets_valid_parity() {
        let layout = FrameLayout::default().with_parity_check(true);
        for id in [0u64, 1, 111111, 0xFFFFFF, 0x800001] {
            let frame = layout.encode(CardId::new(id)).unwrap();
            assert!(layout.parity_ok(&frame), "parity for {id}");
            assert_eq!(layout.extract_card_id(&frame).unwrap().as_u64(), id);
        }
    }

    #[test]
    fn test_parity_check_rejects_flipped_bit() {
        let layout = FrameLayout::default().with_parity_check(true);
        let frame = layout.encode(CardId::new(111111)).unwrap();
        let corrupted = Frame::new(26, frame.value() ^ (1 << 5));
        assert!(!layout.parity_ok(&corrupted));
        assert!(layout.extract_card_id(&corrupted).is_err());
    }

    #[test]
    fn test_parity_ignored_when_disabled() {
        let layout = FrameLayout::default();
        let frame = Frame::new(26, 111111 << 1);
        assert_eq!(layout.extract_card_id(&frame).unwrap(), CardId::new(111111));
    }

    #[test]
    fn test_encode_rejects_oversized_card() {
        let layout = FrameLayout::default();
        assert!(layout.encode(CardId::new(1 << 24)).is_err());
    }

    #[test]
    fn test_bits_are_msb_first() {
        let frame = Frame::new(4, 0b1001);
        let bits: Vec<Bit> = frame.bits().collect();
        assert_eq!(bits, vec![Bit::One, Bit::Zero, Bit::Zero, Bit::One]);
        assert_eq!(frame.to_string(), "1001");
    }

    #[test]
    fn test_layout_deserializes_with_defaults() {
        let layout: FrameLayout = serde_json::from_str(r#"{"width": 34}"#).unwrap();
        assert_eq!(layout.width, 34);
        assert_eq!(layout.leading_guard_bits, 1);
        assert!(!layout.check_parity);
    }
}
