// Continuous sample cache
//
// One lane per analog channel. Each lane remembers the sample rate it was
// filled at; a rate change rewinds the lane so rates are never mixed.

use super::ring::{CacheMetrics, RingSet};
use super::{ReadFormat, Samples};
use crate::channel::{self, ChannelMask, NUM_ANALOG_CHANS};
use crate::error::{Result, SdkError};
use serde::{Deserialize, Serialize};
use std::collections::TryReserveError;

/// Pending samples on one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuousChannelInit {
    pub channel: u16,
    pub sample_rate: u32,
    pub pending: usize,
}

/// Destination for one channel's samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuousChannel {
    pub channel: u16,
    /// Most samples copied per read
    pub limit: usize,
    pub sample_rate: u32,
    pub samples: Samples,
}

impl ContinuousChannel {
    pub fn new(channel: u16, limit: usize) -> Self {
        Self {
            channel,
            limit,
            sample_rate: 0,
            samples: Samples::Raw(Vec::with_capacity(limit)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContinuousTrial {
    /// Start of the trial the samples belong to, in ticks
    pub start_time: u64,
    pub channels: Vec<ContinuousChannel>,
}

impl ContinuousTrial {
    pub fn from_init(init: &[ContinuousChannelInit]) -> Self {
        Self {
            start_time: 0,
            channels: init
                .iter()
                .map(|chan| ContinuousChannel::new(chan.channel, chan.pending))
                .collect(),
        }
    }
}

pub struct ContinuousCache {
    ring: RingSet<i16, u32>,
}

impl ContinuousCache {
    pub(crate) fn try_new(capacity: usize) -> std::result::Result<Self, TryReserveError> {
        Ok(Self {
            ring: RingSet::try_new(capacity, usize::from(NUM_ANALOG_CHANS), 0)?,
        })
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Store one sample group. `channels` and `samples` are matched
    /// positionally; masked and non-analog channels are skipped.
    pub(crate) fn write_group(
        &self,
        sample_rate: u32,
        channels: &[u16],
        samples: &[i16],
        mask: &ChannelMask,
    ) -> usize {
        let mut writer = self.ring.writer();
        let mut stored = 0;
        for (&chan, &sample) in channels.iter().zip(samples) {
            if !mask.is_enabled(chan) {
                continue;
            }
            let Some(lane) = channel::analog_lane(chan) else {
                continue;
            };
            if writer.is_empty(lane) {
                *writer.meta(lane) = sample_rate;
            } else if *writer.meta(lane) != sample_rate {
                let previous = *writer.meta(lane);
                log::debug!(
                    "Channel {} rate changed {} -> {} Hz, discarding buffered samples",
                    chan,
                    previous,
                    sample_rate
                );
                writer.rewind(lane);
                *writer.meta(lane) = sample_rate;
            }
            if writer.push(lane, sample) {
                stored += 1;
            }
        }
        stored
    }

    pub(crate) fn init(&self, mask: &ChannelMask) -> Vec<ContinuousChannelInit> {
        let snapshot = self.ring.snapshot();
        (0..self.ring.lane_count())
            .filter_map(|lane| {
                let channel = lane as u16 + 1;
                let pending = snapshot.pending(lane);
                (pending > 0 && mask.is_enabled(channel)).then(|| ContinuousChannelInit {
                    channel,
                    sample_rate: *snapshot.meta(lane),
                    pending,
                })
            })
            .collect()
    }

    pub(crate) fn drain(
        &self,
        dest: &mut ContinuousTrial,
        format: &ReadFormat,
        mask: &ChannelMask,
        advance: bool,
    ) -> Result<usize> {
        let lanes = dest
            .channels
            .iter()
            .map(|chan| {
                channel::analog_lane(chan.channel).ok_or(SdkError::InvalidChannel(chan.channel))
            })
            .collect::<Result<Vec<_>>>()?;

        let snapshot = self.ring.snapshot();
        let mut consumed = Vec::with_capacity(lanes.len());
        for (chan, lane) in dest.channels.iter_mut().zip(lanes) {
            let count = if mask.is_enabled(chan.channel) {
                snapshot.pending(lane).min(chan.limit)
            } else {
                0
            };
            chan.samples.prepare(format, count);
            chan.sample_rate = *snapshot.meta(lane);
            let samples = self.ring.read(&snapshot, lane, count);
            consumed.push((lane, samples.len()));
            for sample in samples {
                chan.samples.push(sample);
            }
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
        self.ring.metrics(|lane| lane as u16 + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> ReadFormat {
        ReadFormat {
            double: false,
            rebase: None,
        }
    }

    #[test]
    fn test_write_and_drain() {
        let cache = ContinuousCache::try_new(8).unwrap();
        let mask = ChannelMask::new();
        cache.write_group(1000, &[1, 2], &[10, 20], &mask);
        cache.write_group(1000, &[1, 2], &[11, 21], &mask);

        let init = cache.init(&mask);
        assert_eq!(init.len(), 2);
        assert_eq!(init[0].pending, 2);
        assert_eq!(init[0].sample_rate, 1000);

        let mut trial = ContinuousTrial::from_init(&init);
        let copied = cache.drain(&mut trial, &raw(), &mask, true).unwrap();
        assert_eq!(copied, 4);
        assert_eq!(trial.channels[0].samples.raw(), Some(&[10, 11][..]));
        assert_eq!(trial.channels[1].samples.raw(), Some(&[20, 21][..]));
        assert!(cache.init(&mask).is_empty());
    }

    #[test]
    fn test_rate_change_rewinds_lane() {
        let cache = ContinuousCache::try_new(8).unwrap();
        let mask = ChannelMask::new();
        cache.write_group(1000, &[3], &[1], &mask);
        cache.write_group(1000, &[3], &[2], &mask);
        cache.write_group(2000, &[3], &[3], &mask);

        let init = cache.init(&mask);
        assert_eq!(init.len(), 1);
        assert_eq!(init[0].pending, 1);
        assert_eq!(init[0].sample_rate, 2000);
    }

    #[test]
    fn test_masked_channel_is_skipped() {
        let cache = ContinuousCache::try_new(8).unwrap();
        let mask = ChannelMask::new();
        mask.set(2, false).unwrap();
        assert_eq!(cache.write_group(500, &[1, 2, 300], &[1, 2, 3], &mask), 1);
        let init = cache.init(&mask);
        assert_eq!(init.len(), 1);
        assert_eq!(init[0].channel, 1);
    }

    #[test]
    fn test_drain_respects_limit_and_rejects_bad_channel() {
        let cache = ContinuousCache::try_new(8).unwrap();
        let mask = ChannelMask::new();
        for value in 0..5 {
            cache.write_group(1000, &[1], &[value], &mask);
        }
        let mut trial = ContinuousTrial {
            start_time: 0,
            channels: vec![ContinuousChannel::new(1, 3)],
        };
        cache.drain(&mut trial, &raw(), &mask, true).unwrap();
        assert_eq!(trial.channels[0].samples.raw(), Some(&[0, 1, 2][..]));
        cache.drain(&mut trial, &raw(), &mask, true).unwrap();
        assert_eq!(trial.channels[0].samples.raw(), Some(&[3, 4][..]));

        let mut bad = ContinuousTrial {
            start_time: 0,
            channels: vec![ContinuousChannel::new(279, 3)],
        };
        assert!(matches!(
            cache.drain(&mut bad, &raw(), &mask, false),
            Err(SdkError::InvalidChannel(279))
        ));
    }
}
