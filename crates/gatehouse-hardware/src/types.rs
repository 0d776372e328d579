//! Common types shared across hardware device implementations.

use gatehouse_protocol::Bit;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Digital pin level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinLevel {
    Low,
    High,
}

impl fmt::Display for PinLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::High => write!(f, "high"),
        }
    }
}

/// A level change observed on an input pin.
///
/// `tick` is the driver's monotonic microsecond counter; it wraps at
/// `u32::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub pin: u8,
    pub level: PinLevel,
    pub tick: u32,
}

impl Edge {
    pub fn new(pin: u8, level: PinLevel, tick: u32) -> Self {
        Self { pin, level, tick }
    }

    /// Wiegand data lines idle high; a bit is a falling edge.
    pub fn is_falling(&self) -> bool {
        self.level == PinLevel::Low
    }
}

/// Data-line wiring of one reader channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelPins {
    /// Pin pulsed for a `0` bit.
    pub d0: u8,

    /// Pin pulsed for a `1` bit.
    pub d1: u8,
}

impl ChannelPins {
    pub fn new(d0: u8, d1: u8) -> Self {
        Self { d0, d1 }
    }

    /// Bit signalled by a pulse on `pin`, if it belongs to this channel.
    pub fn bit_for(&self, pin: u8) -> Option<Bit> {
        if pin == self.d0 {
            Some(Bit::Zero)
        } else if pin == self.d1 {
            Some(Bit::One)
        } else {
            None
        }
    }

    /// Pin that carries `bit`.
    pub fn pin_for(&self, bit: Bit) -> u8 {
        match bit {
            Bit::Zero => self.d0,
            Bit::One => self.d1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_mapping() {
        let pins = ChannelPins::new(18, 19);
        assert_eq!(pins.bit_for(18), Some(Bit::Zero));
        assert_eq!(pins.bit_for(19), Some(Bit::One));
        assert_eq!(pins.bit_for(23), None);
        assert_eq!(pins.pin_for(Bit::One), 19);
    }

    #[test]
    fn test_edge_direction() {
        assert!(Edge::new(18, PinLevel::Low, 0).is_falling());
        assert!(!Edge::new(18, PinLevel::High, 0).is_falling());
    }

    #[test]
    fn test_pins_deserialize() {
        let pins: ChannelPins = serde_json::from_str(r#"{"d0": 23, "d1": 24}"#).unwrap();
        assert_eq!(pins, ChannelPins::new(23, 24));
    }
}
