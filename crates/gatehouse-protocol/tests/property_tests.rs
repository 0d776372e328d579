//! Property-based tests for the pulse decoder and frame layout.
//!
//! These tests use proptest to generate arbitrary pulse trains and verify that
//! framing invariants hold regardless of content, width and timing.

use gatehouse_core::CardId;
use gatehouse_protocol::{Bit, Frame, FrameLayout, PulseDecoder};
use proptest::prelude::*;
use std::time::Duration;

const TIMEOUT_MS: u64 = 25;
const TIMEOUT_TICKS: u32 = 25_000;

/// Strategy for frame widths the decoder supports.
fn valid_width() -> impl Strategy<Value = u8> {
    1u8..=64u8
}

/// Strategy for inter-bit spacing that stays within the timeout.
fn in_sync_spacing() -> impl Strategy<Value = u32> {
    1u32..=TIMEOUT_TICKS
}

fn chunk_value(bits: &[bool]) -> u64 {
    bits.iter().fold(0u64, |acc, b| (acc << 1) | u64::from(*b))
}

proptest! {
    /// Property: with no gap above the timeout, exactly one frame is emitted
    /// per `width` bits and each frame carries its chunk of the train.
    #[test]
    fn prop_one_frame_per_width_bits(
        width in valid_width(),
        frames in 1usize..6,
        seed in prop::collection::vec(any::<bool>(), 64 * 6),
        spacings in prop::collection::vec(in_sync_spacing(), 64 * 6),
    ) {
        let total = width as usize * frames;
        let bits = &seed[..total];
        let mut decoder = PulseDecoder::new(width, Duration::from_millis(TIMEOUT_MS));

        let mut tick = 0u32;
        let mut emitted = Vec::new();
        for (i, bit) in bits.iter().enumerate() {
            tick = tick.wrapping_add(spacings[i]);
            if let Some(frame) = decoder.push(Bit::from(*bit), tick) {
                emitted.push(frame);
            }
        }

        prop_assert_eq!(emitted.len(), frames);
        for (i, frame) in emitted.iter().enumerate() {
            let chunk = &bits[i * width as usize..(i + 1) * width as usize];
            prop_assert_eq!(*frame, Frame::new(width, chunk_value(chunk)));
        }
        prop_assert_eq!(decoder.bit_count(), 0);
    }

    /// Property: a gap above the timeout in the middle of a frame discards
    /// the bits before it; only the bits after the gap can form a frame.
    #[test]
    fn prop_gap_discards_partial_frame(
        width in 2u8..=64u8,
        split_seed in any::<u8>(),
        before in prop::collection::vec(any::<bool>(), 63),
        after in prop::collection::vec(any::<bool>(), 64),
        gap in (TIMEOUT_TICKS + 1)..=(TIMEOUT_TICKS * 100),
    ) {
        let split = 1 + (split_seed as usize % (width as usize - 1));
        let mut decoder = PulseDecoder::new(width, Duration::from_millis(TIMEOUT_MS));

        let mut tick = 0u32;
        for bit in &before[..split] {
            tick += 1_000;
            prop_assert!(decoder.push(Bit::from(*bit), tick).is_none());
        }

        tick += gap;
        let mut emitted = Vec::new();
        for bit in &after[..width as usize] {
            if let Some(frame) = decoder.push(Bit::from(*bit), tick) {
                emitted.push(frame);
            }
            tick += 1_000;
        }

        prop_assert_eq!(emitted, vec![Frame::new(width, chunk_value(&after[..width as usize]))]);
    }

    /// Property: any id that fits the 24-bit payload survives the trip
    /// through a simulated pulse train with parity checking enabled.
    #[test]
    fn prop_encoded_card_decodes_to_same_id(id in 0u64..(1 << 24)) {
        let layout = FrameLayout::default().with_parity_check(true);
        let frame = layout.encode(CardId::new(id)).unwrap();

        let mut decoder = PulseDecoder::new(layout.width, Duration::from_millis(TIMEOUT_MS));
        let mut decoded = None;
        for (i, bit) in frame.bits().enumerate() {
            decoded = decoder.push(bit, 1_000 + i as u32 * 2_000);
        }

        let decoded = decoded.unwrap();
        prop_assert_eq!(layout.extract_card_id(&decoded).unwrap(), CardId::new(id));
    }
}
