// Trial data caching
//
// Four modality caches (continuous, event, comment, tracking) fed by the
// packet router while the trial gate is open, plus the controller owning the
// gate and the output containers consumers drain into.

pub mod comment;
pub mod continuous;
pub mod controller;
pub mod event;
pub mod ring;
pub mod tracking;

pub use comment::{CommentCache, CommentInit, CommentTrial};
pub use continuous::{ContinuousCache, ContinuousChannel, ContinuousChannelInit, ContinuousTrial};
pub use controller::{TrialController, TrialState, Watch};
pub use event::{EventCache, EventChannel, EventChannelInit, EventTrial};
pub use ring::{CacheMetrics, MAX_CAPACITY};
pub use tracking::{
    TrackCoords, Trackable, TrackableData, TrackableInit, TrackableKind, TrackingCache,
    TrackingInit, TrackingTrial,
};

use crate::channel::TICKS_PER_SECOND;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modality {
    Continuous,
    Event,
    Comment,
    Tracking,
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Continuous => "continuous",
            Self::Event => "event",
            Self::Comment => "comment",
            Self::Tracking => "tracking",
        };
        f.write_str(name)
    }
}

/// How drained records are presented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReadFormat {
    pub double: bool,
    /// Subtracted from timestamps at or after it; None for absolute timing
    pub rebase: Option<u64>,
}

impl ReadFormat {
    pub fn timestamp(&self, ticks: u64) -> u64 {
        match self.rebase {
            Some(origin) if ticks >= origin => ticks - origin,
            _ => ticks,
        }
    }
}

/// Timestamps in instrument ticks, or in seconds when double output is on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Timestamps {
    Ticks(Vec<u64>),
    Seconds(Vec<f64>),
}

impl Timestamps {
    pub fn len(&self) -> usize {
        match self {
            Self::Ticks(ticks) => ticks.len(),
            Self::Seconds(seconds) => seconds.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ticks(&self) -> Option<&[u64]> {
        match self {
            Self::Ticks(ticks) => Some(ticks),
            Self::Seconds(_) => None,
        }
    }

    pub fn seconds(&self) -> Option<&[f64]> {
        match self {
            Self::Seconds(seconds) => Some(seconds),
            Self::Ticks(_) => None,
        }
    }

    /// Empty the container and switch it to the requested representation
    pub(crate) fn prepare(&mut self, format: &ReadFormat, capacity: usize) {
        match (self, format.double) {
            (Self::Ticks(ticks), false) => ticks.clear(),
            (Self::Seconds(seconds), true) => seconds.clear(),
            (this, false) => *this = Self::Ticks(Vec::with_capacity(capacity)),
            (this, true) => *this = Self::Seconds(Vec::with_capacity(capacity)),
        }
    }

    pub(crate) fn push(&mut self, format: &ReadFormat, ticks: u64) {
        let ticks = format.timestamp(ticks);
        match self {
            Self::Ticks(values) => values.push(ticks),
            Self::Seconds(values) => values.push(ticks as f64 / TICKS_PER_SECOND),
        }
    }
}

impl Default for Timestamps {
    fn default() -> Self {
        Self::Ticks(Vec::new())
    }
}

/// Continuous samples, raw or widened to f64 when double output is on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Samples {
    Raw(Vec<i16>),
    Double(Vec<f64>),
}

impl Samples {
    pub fn len(&self) -> usize {
        match self {
            Self::Raw(values) => values.len(),
            Self::Double(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn raw(&self) -> Option<&[i16]> {
        match self {
            Self::Raw(values) => Some(values),
            Self::Double(_) => None,
        }
    }

    pub fn double(&self) -> Option<&[f64]> {
        match self {
            Self::Double(values) => Some(values),
            Self::Raw(_) => None,
        }
    }

    pub(crate) fn prepare(&mut self, format: &ReadFormat, capacity: usize) {
        match (self, format.double) {
            (Self::Raw(values), false) => values.clear(),
            (Self::Double(values), true) => values.clear(),
            (this, false) => *this = Self::Raw(Vec::with_capacity(capacity)),
            (this, true) => *this = Self::Double(Vec::with_capacity(capacity)),
        }
    }

    pub(crate) fn push(&mut self, sample: i16) {
        match self {
            Self::Raw(values) => values.push(sample),
            Self::Double(values) => values.push(f64::from(sample)),
        }
    }
}

impl Default for Samples {
    fn default() -> Self {
        Self::Raw(Vec::new())
    }
}

/// Slots holding each modality's cache while it is configured.
/// Readers clone the Arc and release the slot lock before touching data.
#[derive(Default)]
pub(crate) struct TrialCaches {
    pub continuous: RwLock<Option<Arc<ContinuousCache>>>,
    pub events: RwLock<Option<Arc<EventCache>>>,
    pub comments: RwLock<Option<Arc<CommentCache>>>,
    pub tracking: RwLock<Option<Arc<TrackingCache>>>,
}

impl TrialCaches {
    pub fn continuous(&self) -> Option<Arc<ContinuousCache>> {
        self.continuous.read().clone()
    }

    pub fn events(&self) -> Option<Arc<EventCache>> {
        self.events.read().clone()
    }

    pub fn comments(&self) -> Option<Arc<CommentCache>> {
        self.comments.read().clone()
    }

    pub fn tracking(&self) -> Option<Arc<TrackingCache>> {
        self.tracking.read().clone()
    }

    pub fn is_configured(&self, modality: Modality) -> bool {
        match modality {
            Modality::Continuous => self.continuous.read().is_some(),
            Modality::Event => self.events.read().is_some(),
            Modality::Comment => self.comments.read().is_some(),
            Modality::Tracking => self.tracking.read().is_some(),
        }
    }

    /// Capacity of a configured modality, 0 when absent
    pub fn capacity(&self, modality: Modality) -> usize {
        match modality {
            Modality::Continuous => self.continuous().map_or(0, |c| c.capacity()),
            Modality::Event => self.events().map_or(0, |c| c.capacity()),
            Modality::Comment => self.comments().map_or(0, |c| c.capacity()),
            Modality::Tracking => self.tracking().map_or(0, |c| c.capacity()),
        }
    }

    /// Empty every configured cache, used when a trial (re)opens
    pub fn reset(&self) {
        if let Some(cache) = self.continuous() {
            cache.reset();
        }
        if let Some(cache) = self.events() {
            cache.reset();
        }
        if let Some(cache) = self.comments() {
            cache.reset();
        }
        if let Some(cache) = self.tracking() {
            cache.reset();
        }
    }

    /// Release one modality's storage; false if it was not configured
    pub fn release(&self, modality: Modality) -> bool {
        match modality {
            Modality::Continuous => self.continuous.write().take().is_some(),
            Modality::Event => self.events.write().take().is_some(),
            Modality::Comment => self.comments.write().take().is_some(),
            Modality::Tracking => self.tracking.write().take().is_some(),
        }
    }

    pub fn release_all(&self) {
        for modality in [
            Modality::Continuous,
            Modality::Event,
            Modality::Comment,
            Modality::Tracking,
        ] {
            self.release(modality);
        }
    }
}
