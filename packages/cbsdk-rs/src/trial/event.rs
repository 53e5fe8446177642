// Event cache
//
// One lane per analog channel plus the digital and serial inputs. Spike
// records carry the sorted unit; digital/serial records carry the 16-bit
// input word.

use super::ring::{CacheMetrics, RingSet};
use super::{ReadFormat, Timestamps};
use crate::channel::{self, ChannelMask, MAX_UNITS, NUM_ANALOG_CHANS, NUM_EVENT_LANES, UNIT_SLOTS};
use crate::error::{Result, SdkError};
use serde::{Deserialize, Serialize};
use std::collections::TryReserveError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct EventRecord {
    timestamp: u64,
    value: u16,
}

/// Pending events on one channel, split by unit. Digital and serial
/// channels report everything under unit 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventChannelInit {
    pub channel: u16,
    pub units: [usize; UNIT_SLOTS],
}

impl EventChannelInit {
    pub fn pending(&self) -> usize {
        self.units.iter().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventChannel {
    pub channel: u16,
    /// Most timestamps copied per unit per read
    pub limits: [usize; UNIT_SLOTS],
    pub timestamps: [Timestamps; UNIT_SLOTS],
    /// Input words, for digital and serial channels only
    pub values: Vec<u16>,
}

impl EventChannel {
    pub fn new(channel: u16, limits: [usize; UNIT_SLOTS]) -> Self {
        Self {
            channel,
            limits,
            timestamps: Default::default(),
            values: Vec::new(),
        }
    }

    /// Timestamps copied across all units
    pub fn total(&self) -> usize {
        self.timestamps.iter().map(Timestamps::len).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventTrial {
    pub channels: Vec<EventChannel>,
}

impl EventTrial {
    pub fn from_init(init: &[EventChannelInit]) -> Self {
        Self {
            channels: init
                .iter()
                .map(|chan| EventChannel::new(chan.channel, chan.units))
                .collect(),
        }
    }
}

fn is_input_lane(lane: usize) -> bool {
    lane >= usize::from(NUM_ANALOG_CHANS)
}

/// Unit slot a record is reported under; noise and other out-of-range units
/// count as unclassified
fn unit_slot(lane: usize, record: &EventRecord) -> usize {
    let unit = usize::from(record.value);
    if is_input_lane(lane) || unit > MAX_UNITS {
        0
    } else {
        unit
    }
}

pub struct EventCache {
    ring: RingSet<EventRecord>,
}

impl EventCache {
    pub(crate) fn try_new(capacity: usize) -> std::result::Result<Self, TryReserveError> {
        Ok(Self {
            ring: RingSet::try_new(capacity, NUM_EVENT_LANES, ())?,
        })
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub(crate) fn write(&self, chan: u16, timestamp: u64, value: u16) -> bool {
        match channel::event_lane(chan) {
            Some(lane) => self.ring.writer().push(lane, EventRecord { timestamp, value }),
            None => false,
        }
    }

    pub(crate) fn init(&self, mask: &ChannelMask) -> Vec<EventChannelInit> {
        let snapshot = self.ring.snapshot();
        (0..self.ring.lane_count())
            .filter_map(|lane| {
                let channel = channel::event_lane_channel(lane);
                let pending = snapshot.pending(lane);
                if pending == 0 || !mask.is_enabled(channel) {
                    return None;
                }
                let mut units = [0; UNIT_SLOTS];
                for record in self.ring.read(&snapshot, lane, pending) {
                    units[unit_slot(lane, &record)] += 1;
                }
                Some(EventChannelInit { channel, units })
            })
            .collect()
    }

    /// Copy events in arrival order. A channel stops at the first record
    /// whose unit is already at its limit, so nothing is skipped.
    pub(crate) fn drain(
        &self,
        dest: &mut EventTrial,
        format: &ReadFormat,
        mask: &ChannelMask,
        advance: bool,
    ) -> Result<usize> {
        let lanes = dest
            .channels
            .iter()
            .map(|chan| {
                channel::event_lane(chan.channel).ok_or(SdkError::InvalidChannel(chan.channel))
            })
            .collect::<Result<Vec<_>>>()?;

        let snapshot = self.ring.snapshot();
        let mut consumed = Vec::with_capacity(lanes.len());
        for (chan, lane) in dest.channels.iter_mut().zip(lanes) {
            for (stamps, &limit) in chan.timestamps.iter_mut().zip(chan.limits.iter()) {
                stamps.prepare(format, limit);
            }
            chan.values.clear();

            let mut count = 0;
            if mask.is_enabled(chan.channel) {
                for record in self.ring.read(&snapshot, lane, snapshot.pending(lane)) {
                    let slot = unit_slot(lane, &record);
                    if chan.timestamps[slot].len() >= chan.limits[slot] {
                        break;
                    }
                    chan.timestamps[slot].push(format, record.timestamp);
                    if is_input_lane(lane) {
                        chan.values.push(record.value);
                    }
                    count += 1;
                }
            }
            consumed.push((lane, count));
        }

        if advance {
            self.ring.commit(&snapshot, &consumed);
        }
        Ok(consumed.iter().map(|(_, count)| count).sum())
    }

    pub(crate) fn reset(&self) {
        self.ring.reset();
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.ring.metrics(channel::event_lane_channel)
    }
}
