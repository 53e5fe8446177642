// Video tracking cache
//
// One lane per trackable object. Records are tagged with the most recent
// video synch so points can be related to camera frames. The coordinate
// layout of a lane follows the trackable's declared kind.

use super::ring::{Arrival, CacheMetrics, RingSet};
use super::{ReadFormat, Timestamps};
use crate::channel::{MAX_TRACK_COORDS, MAX_TRACK_OBJECTS};
use crate::error::{Result, SdkError};
use crate::packet::VideoSynch;
use serde::{Deserialize, Serialize};
use std::collections::TryReserveError;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackableKind {
    Markers2d,
    Blob2d,
    Markers3d,
    Boundary2d,
    Size1d,
}

impl TrackableKind {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(Self::Markers2d),
            2 => Some(Self::Blob2d),
            3 => Some(Self::Markers3d),
            4 => Some(Self::Boundary2d),
            5 => Some(Self::Size1d),
            _ => None,
        }
    }

    pub fn code(self) -> u16 {
        match self {
            Self::Markers2d => 1,
            Self::Blob2d => 2,
            Self::Markers3d => 3,
            Self::Boundary2d => 4,
            Self::Size1d => 5,
        }
    }

    /// Values per point
    pub fn dims(self) -> usize {
        match self {
            Self::Size1d => 1,
            Self::Markers3d => 3,
            Self::Markers2d | Self::Blob2d | Self::Boundary2d => 2,
        }
    }

    /// Values are 32-bit, stored as two little-endian words
    pub fn is_wide(self) -> bool {
        matches!(self, Self::Size1d)
    }

    fn values(self, points: usize) -> usize {
        let cap = if self.is_wide() {
            MAX_TRACK_COORDS / 2
        } else {
            MAX_TRACK_COORDS
        };
        (points * self.dims()).min(cap)
    }

    fn words(self, points: usize) -> usize {
        self.values(points) * if self.is_wide() { 2 } else { 1 }
    }
}

/// A trackable object as described by the instrument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trackable {
    pub name: String,
    pub kind: TrackableKind,
    pub max_points: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TrackRecord {
    timestamp: u64,
    synch_timestamp: u32,
    synch_frame: u32,
    point_count: u16,
    coords: [u16; MAX_TRACK_COORDS],
}

impl Default for TrackRecord {
    fn default() -> Self {
        Self {
            timestamp: 0,
            synch_timestamp: 0,
            synch_frame: 0,
            point_count: 0,
            coords: [0; MAX_TRACK_COORDS],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrackCoords {
    Narrow(Vec<u16>),
    Wide(Vec<u32>),
}

impl TrackCoords {
    fn decode(kind: TrackableKind, points: usize, words: &[u16]) -> Self {
        let values = kind.values(points);
        if kind.is_wide() {
            Self::Wide(
                words
                    .chunks_exact(2)
                    .take(values)
                    .map(|pair| u32::from(pair[0]) | (u32::from(pair[1]) << 16))
                    .collect(),
            )
        } else {
            Self::Narrow(words[..values].to_vec())
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Narrow(values) => values.len(),
            Self::Wide(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackableInit {
    /// 1-based trackable id
    pub id: u16,
    pub name: String,
    pub kind: TrackableKind,
    pub max_points: u16,
    pub pending: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingInit {
    pub trackables: Vec<TrackableInit>,
    /// Set when the init call waited for tracking data and none arrived
    pub timed_out: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackableData {
    pub id: u16,
    /// Most records copied per read
    pub limit: usize,
    pub kind: Option<TrackableKind>,
    pub timestamps: Timestamps,
    pub synch_timestamps: Vec<u32>,
    pub synch_frames: Vec<u32>,
    pub point_counts: Vec<u16>,
    pub coords: Vec<TrackCoords>,
}

impl TrackableData {
    pub fn new(id: u16, limit: usize) -> Self {
        Self {
            id,
            limit,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingTrial {
    pub trackables: Vec<TrackableData>,
}

impl TrackingTrial {
    pub fn from_init(init: &TrackingInit) -> Self {
        Self {
            trackables: init
                .trackables
                .iter()
                .map(|t| TrackableData::new(t.id, t.pending))
                .collect(),
        }
    }
}

pub struct TrackingCache {
    ring: RingSet<TrackRecord, Option<Trackable>>,
    arrival: Arrival,
}

impl TrackingCache {
    pub(crate) fn try_new(capacity: usize) -> std::result::Result<Self, TryReserveError> {
        Ok(Self {
            ring: RingSet::try_new(capacity, MAX_TRACK_OBJECTS, None)?,
            arrival: Arrival::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Store one tracking sample for the 0-based `node`. A missing
    /// description discards the lane along with its metadata and drops the
    /// sample. A change of kind discards the lane's older records.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn write(
        &self,
        node: usize,
        trackable: Option<&Trackable>,
        timestamp: u64,
        synch: &VideoSynch,
        point_count: u16,
        coords: &[u16],
        trial_start: u64,
    ) -> bool {
        if node >= self.ring.lane_count() {
            return false;
        }
        let stored = {
            let mut writer = self.ring.writer();
            let Some(trackable) = trackable else {
                writer.rewind(node);
                *writer.meta(node) = None;
                return false;
            };
            if writer.meta(node).as_ref() != Some(trackable) {
                let previous = writer.meta(node).as_ref().map(|t| t.kind);
                if previous.is_some_and(|kind| kind != trackable.kind) {
                    writer.rewind(node);
                }
                *writer.meta(node) = Some(trackable.clone());
            }

            let mut record = TrackRecord {
                timestamp,
                synch_timestamp: synch.etime,
                synch_frame: synch.frame,
                point_count,
                ..TrackRecord::default()
            };
            let words = trackable
                .kind
                .words(usize::from(point_count))
                .min(coords.len());
            record.coords[..words].copy_from_slice(&coords[..words]);
            writer.push(node, record)
        };
        if stored && timestamp > trial_start {
            self.arrival.notify();
        }
        stored
    }

    fn pending(&self) -> usize {
        self.ring.snapshot().total_pending()
    }

    pub(crate) fn init(&self, wait: Option<Duration>) -> TrackingInit {
        let timed_out = match wait {
            Some(timeout) if self.pending() == 0 => !self.arrival.wait(timeout, || self.pending() > 0),
            _ => false,
        };

        let snapshot = self.ring.snapshot();
        let trackables = (0..self.ring.lane_count())
            .filter_map(|lane| {
                let pending = snapshot.pending(lane);
                let trackable = snapshot.meta(lane).as_ref()?;
                (pending > 0).then(|| TrackableInit {
                    id: lane as u16 + 1,
                    name: trackable.name.clone(),
                    kind: trackable.kind,
                    max_points: trackable.max_points,
                    pending,
                })
            })
            .collect();

        TrackingInit {
            trackables,
            timed_out,
        }
    }

    pub(crate) fn drain(
        &self,
        dest: &mut TrackingTrial,
        format: &ReadFormat,
        advance: bool,
    ) -> Result<usize> {
        let lanes = dest
            .trackables
            .iter()
            .map(|t| match t.id {
                id if id >= 1 && usize::from(id) <= MAX_TRACK_OBJECTS => Ok(usize::from(id - 1)),
                id => Err(SdkError::InvalidTrackable(id)),
            })
            .collect::<Result<Vec<_>>>()?;

        let snapshot = self.ring.snapshot();
        let mut consumed = Vec::with_capacity(lanes.len());
        for (data, lane) in dest.trackables.iter_mut().zip(lanes) {
            let trackable = snapshot.meta(lane).as_ref();
            let records = match trackable {
                Some(_) => self
                    .ring
                    .read(&snapshot, lane, snapshot.pending(lane).min(data.limit)),
                None => Vec::new(),
            };
            let count = records.len();

            data.kind = trackable.map(|t| t.kind);
            data.timestamps.prepare(format, count);
            data.synch_timestamps.clear();
            data.synch_frames.clear();
            data.point_counts.clear();
            data.coords.clear();

            if let Some(trackable) = trackable {
                for record in records {
                    let points = record.point_count.min(trackable.max_points);
                    data.timestamps.push(format, record.timestamp);
                    data.synch_timestamps.push(record.synch_timestamp);
                    data.synch_frames.push(record.synch_frame);
                    data.point_counts.push(points);
                    data.coords.push(TrackCoords::decode(
                        trackable.kind,
                        usize::from(points),
                        &record.coords,
                    ));
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
        self.ring.metrics(|lane| lane as u16 + 1)
    }
}
