// Channel layout
//
// Fixed channel numbering of the instrument plus the administrative mask that
// decides which channels reach callbacks and trial caches.

use crate::error::{Result, SdkError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

pub const NUM_FE_CHANS: u16 = 256;
pub const NUM_ANALOG_IN: u16 = 16;
pub const NUM_ANALOG_CHANS: u16 = NUM_FE_CHANS + NUM_ANALOG_IN;
pub const NUM_ANALOG_OUT: u16 = 4;
pub const NUM_AUDIO_OUT: u16 = 2;
pub const DIGITAL_IN_CHAN: u16 = NUM_ANALOG_CHANS + NUM_ANALOG_OUT + NUM_AUDIO_OUT + 1;
pub const SERIAL_CHAN: u16 = DIGITAL_IN_CHAN + 1;
pub const NUM_DIGITAL_OUT: u16 = 4;
pub const FIRST_DIGITAL_OUT: u16 = SERIAL_CHAN + 1;
pub const MAX_CHANS: u16 = SERIAL_CHAN + NUM_DIGITAL_OUT;

/// Packets with this channel id carry configuration rather than channel data
pub const CONFIG_CHID: u16 = 0x8000;

/// Sorted units per electrode (unit 0 is unclassified)
pub const MAX_UNITS: usize = 5;
/// Unit slots reported per event channel, unclassified included
pub const UNIT_SLOTS: usize = MAX_UNITS + 1;
pub const MAX_TRACK_OBJECTS: usize = 20;
pub const MAX_COMMENT_LEN: usize = 128;
pub const MAX_TRACK_COORDS: usize = 128;
pub const LABEL_LEN: usize = 16;
pub const MAX_GROUPS: u8 = 8;
/// Highest sample group that is cached; the raw stream group is dispatched only
pub const MAX_CACHED_GROUP: u8 = 5;
pub const TICKS_PER_SECOND: f64 = 30000.0;

/// Event cache lanes: every analog channel, then digital input and serial
pub(crate) const NUM_EVENT_LANES: usize = NUM_ANALOG_CHANS as usize + 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelClass {
    /// Front-end electrode, spike capable
    Electrode,
    /// Analog input, spike capable
    AnalogIn,
    AnalogOut,
    AudioOut,
    DigitalIn,
    Serial,
    DigitalOut,
}

impl ChannelClass {
    /// Standard classification of a 1-based channel id
    pub fn of(channel: u16) -> Option<Self> {
        match channel {
            0 => None,
            c if c <= NUM_FE_CHANS => Some(Self::Electrode),
            c if c <= NUM_ANALOG_CHANS => Some(Self::AnalogIn),
            c if c <= NUM_ANALOG_CHANS + NUM_ANALOG_OUT => Some(Self::AnalogOut),
            c if c < DIGITAL_IN_CHAN => Some(Self::AudioOut),
            DIGITAL_IN_CHAN => Some(Self::DigitalIn),
            SERIAL_CHAN => Some(Self::Serial),
            c if c <= MAX_CHANS => Some(Self::DigitalOut),
            _ => None,
        }
    }

    pub fn is_spike_capable(self) -> bool {
        matches!(self, Self::Electrode | Self::AnalogIn)
    }

    pub fn is_event_input(self) -> bool {
        matches!(self, Self::DigitalIn | Self::Serial)
    }
}

/// Reject channel ids outside `1..=MAX_CHANS`
pub fn validate(channel: u16) -> Result<u16> {
    if channel == 0 || channel > MAX_CHANS {
        return Err(SdkError::InvalidChannel(channel));
    }
    Ok(channel)
}

pub(crate) fn analog_lane(channel: u16) -> Option<usize> {
    (1..=NUM_ANALOG_CHANS)
        .contains(&channel)
        .then(|| usize::from(channel - 1))
}

pub(crate) fn event_lane(channel: u16) -> Option<usize> {
    match channel {
        DIGITAL_IN_CHAN => Some(NUM_EVENT_LANES - 2),
        SERIAL_CHAN => Some(NUM_EVENT_LANES - 1),
        c => analog_lane(c),
    }
}

pub(crate) fn event_lane_channel(lane: usize) -> u16 {
    if lane == NUM_EVENT_LANES - 2 {
        DIGITAL_IN_CHAN
    } else if lane == NUM_EVENT_LANES - 1 {
        SERIAL_CHAN
    } else {
        lane as u16 + 1
    }
}

/// Per-channel on/off switch consulted by the packet router on every packet
pub struct ChannelMask {
    enabled: Box<[AtomicBool]>,
}

impl ChannelMask {
    pub fn new() -> Self {
        Self {
            enabled: (0..MAX_CHANS).map(|_| AtomicBool::new(true)).collect(),
        }
    }

    pub fn is_enabled(&self, channel: u16) -> bool {
        match channel {
            0 => false,
            c => self
                .enabled
                .get(usize::from(c - 1))
                .map(|flag| flag.load(Ordering::Relaxed))
                .unwrap_or(false),
        }
    }

    /// Channel 0 applies to every channel
    pub fn set(&self, channel: u16, enabled: bool) -> Result<()> {
        if channel == 0 {
            for flag in self.enabled.iter() {
                flag.store(enabled, Ordering::Relaxed);
            }
            return Ok(());
        }
        validate(channel)?;
        self.enabled[usize::from(channel - 1)].store(enabled, Ordering::Relaxed);
        Ok(())
    }
}

impl Default for ChannelMask {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_constants() {
        assert_eq!(NUM_ANALOG_CHANS, 272);
        assert_eq!(DIGITAL_IN_CHAN, 279);
        assert_eq!(SERIAL_CHAN, 280);
        assert_eq!(FIRST_DIGITAL_OUT, 281);
        assert_eq!(MAX_CHANS, 284);
    }

    #[test]
    fn test_classification() {
        assert_eq!(ChannelClass::of(0), None);
        assert_eq!(ChannelClass::of(1), Some(ChannelClass::Electrode));
        assert_eq!(ChannelClass::of(256), Some(ChannelClass::Electrode));
        assert_eq!(ChannelClass::of(257), Some(ChannelClass::AnalogIn));
        assert_eq!(ChannelClass::of(273), Some(ChannelClass::AnalogOut));
        assert_eq!(ChannelClass::of(277), Some(ChannelClass::AudioOut));
        assert_eq!(ChannelClass::of(279), Some(ChannelClass::DigitalIn));
        assert_eq!(ChannelClass::of(280), Some(ChannelClass::Serial));
        assert_eq!(ChannelClass::of(284), Some(ChannelClass::DigitalOut));
        assert_eq!(ChannelClass::of(285), None);
    }

    #[test]
    fn test_event_lanes() {
        assert_eq!(event_lane(1), Some(0));
        assert_eq!(event_lane(272), Some(271));
        assert_eq!(event_lane(273), None);
        assert_eq!(event_lane_channel(event_lane(DIGITAL_IN_CHAN).unwrap()), DIGITAL_IN_CHAN);
        assert_eq!(event_lane_channel(event_lane(SERIAL_CHAN).unwrap()), SERIAL_CHAN);
        assert_eq!(event_lane_channel(9), 10);
    }

    #[test]
    fn test_mask() {
        let mask = ChannelMask::new();
        assert!(mask.is_enabled(5));
        mask.set(5, false).unwrap();
        assert!(!mask.is_enabled(5));
        assert!(mask.is_enabled(6));

        mask.set(0, false).unwrap();
        assert!(!mask.is_enabled(6));
        mask.set(0, true).unwrap();
        assert!(mask.is_enabled(5));

        assert!(matches!(mask.set(300, true), Err(SdkError::InvalidChannel(300))));
    }
}
