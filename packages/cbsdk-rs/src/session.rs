// Trial session
//
// Consumer-facing view of one instance's trial caches: configure buffers and
// the gate, take a snapshot of what is pending, then drain into caller-owned
// containers.

use crate::channel::{self, MAX_CHANS, MAX_TRACK_OBJECTS};
use crate::config::SdkConfig;
use crate::error::{Result, SdkError};
use crate::instrument::Shared;
use crate::trial::{
    CacheMetrics, CommentCache, CommentInit, CommentTrial, ContinuousCache,
    ContinuousChannelInit, ContinuousTrial, EventCache, EventChannelInit, EventTrial, Modality,
    TrackingCache, TrackingInit, TrackingTrial, TrialCaches, TrialState, Watch, MAX_CAPACITY,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::TryReserveError;
use std::sync::Arc;
use std::time::Duration;

/// Trial gate and buffer sizes. A capacity of 0 leaves that modality as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialConfig {
    pub active: bool,
    pub begin: Watch,
    pub end: Watch,
    /// Report timestamps in seconds and continuous samples as f64
    pub double: bool,
    /// Report timestamps on the instrument clock instead of trial-relative
    pub absolute: bool,
    pub continuous: usize,
    pub events: usize,
    pub comments: usize,
    pub tracking: usize,
}

impl TrialConfig {
    /// Active trial with every buffer sized from `config`
    pub fn from_defaults(config: &SdkConfig) -> Self {
        Self {
            active: true,
            continuous: config.continuous_samples,
            events: config.event_samples,
            comments: config.comment_samples,
            tracking: config.tracking_samples,
            ..Self::default()
        }
    }

    pub fn capacity(&self, modality: Modality) -> usize {
        match modality {
            Modality::Continuous => self.continuous,
            Modality::Event => self.events,
            Modality::Comment => self.comments,
            Modality::Tracking => self.tracking,
        }
    }

    fn validate(&self) -> Result<()> {
        for watch in [self.begin, self.end] {
            if watch.channel > MAX_CHANS {
                return Err(SdkError::InvalidChannel(watch.channel));
            }
        }
        for modality in MODALITIES {
            let capacity = self.capacity(modality);
            if capacity > MAX_CAPACITY {
                return Err(SdkError::InvalidParam(format!(
                    "{} buffer of {} records exceeds {}",
                    modality, capacity, MAX_CAPACITY
                )));
            }
        }
        Ok(())
    }
}

const MODALITIES: [Modality; 4] = [
    Modality::Continuous,
    Modality::Event,
    Modality::Comment,
    Modality::Tracking,
];

/// Which modalities a snapshot or drain covers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialRequest {
    pub continuous: bool,
    pub events: bool,
    pub comments: bool,
    pub tracking: bool,
    /// Restart the trial clock at the snapshot
    pub reset: bool,
    /// Overrides the configured wait for comment and tracking data
    pub wait: Option<Duration>,
}

impl TrialRequest {
    pub fn all() -> Self {
        Self {
            continuous: true,
            events: true,
            comments: true,
            tracking: true,
            ..Self::default()
        }
    }

    pub fn only(modality: Modality) -> Self {
        let mut request = Self::default();
        match modality {
            Modality::Continuous => request.continuous = true,
            Modality::Event => request.events = true,
            Modality::Comment => request.comments = true,
            Modality::Tracking => request.tracking = true,
        }
        request
    }

    pub fn with_reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = Some(wait);
        self
    }

    fn modalities(&self) -> impl Iterator<Item = Modality> + '_ {
        MODALITIES.into_iter().filter(|&modality| match modality {
            Modality::Continuous => self.continuous,
            Modality::Event => self.events,
            Modality::Comment => self.comments,
            Modality::Tracking => self.tracking,
        })
    }
}

/// Pending counts captured by `TrialSession::init`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialInit {
    pub continuous: Option<Vec<ContinuousChannelInit>>,
    pub events: Option<Vec<EventChannelInit>>,
    pub comments: Option<CommentInit>,
    pub tracking: Option<TrackingInit>,
}

/// Caller-owned destination for `TrialSession::get`. Modalities left as
/// `None` are not read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialData {
    pub continuous: Option<ContinuousTrial>,
    pub events: Option<EventTrial>,
    pub comments: Option<CommentTrial>,
    pub tracking: Option<TrackingTrial>,
}

impl TrialData {
    /// Containers sized to hold everything the snapshot reported
    pub fn from_init(init: &TrialInit) -> Self {
        Self {
            continuous: init.continuous.as_deref().map(ContinuousTrial::from_init),
            events: init.events.as_deref().map(EventTrial::from_init),
            comments: init.comments.as_ref().map(|c| CommentTrial::new(c.pending)),
            tracking: init.tracking.as_ref().map(TrackingTrial::from_init),
        }
    }

    fn modalities(&self) -> impl Iterator<Item = Modality> + '_ {
        MODALITIES.into_iter().filter(|&modality| match modality {
            Modality::Continuous => self.continuous.is_some(),
            Modality::Event => self.events.is_some(),
            Modality::Comment => self.comments.is_some(),
            Modality::Tracking => self.tracking.is_some(),
        })
    }

    fn check_channels(&self) -> Result<()> {
        if let Some(trial) = &self.continuous {
            for chan in &trial.channels {
                channel::analog_lane(chan.channel).ok_or(SdkError::InvalidChannel(chan.channel))?;
            }
        }
        if let Some(trial) = &self.events {
            for chan in &trial.channels {
                channel::event_lane(chan.channel).ok_or(SdkError::InvalidChannel(chan.channel))?;
            }
        }
        if let Some(trial) = &self.tracking {
            for data in &trial.trackables {
                if data.id == 0 || usize::from(data.id) > MAX_TRACK_OBJECTS {
                    return Err(SdkError::InvalidTrackable(data.id));
                }
            }
        }
        Ok(())
    }
}

/// Buffers built for a configuration before any of them is installed.
/// Dropping it on an error releases everything it holds.
struct Allocation {
    continuous: Option<ContinuousCache>,
    events: Option<EventCache>,
    comments: Option<CommentCache>,
    tracking: Option<TrackingCache>,
}

impl Allocation {
    fn build(config: &TrialConfig, caches: &TrialCaches) -> Result<Self> {
        Ok(Self {
            continuous: allocate(config, caches, Modality::Continuous, ContinuousCache::try_new)?,
            events: allocate(config, caches, Modality::Event, EventCache::try_new)?,
            comments: allocate(config, caches, Modality::Comment, CommentCache::try_new)?,
            tracking: allocate(config, caches, Modality::Tracking, TrackingCache::try_new)?,
        })
    }

    fn install(self, caches: &TrialCaches) {
        install(&caches.continuous, self.continuous);
        install(&caches.events, self.events);
        install(&caches.comments, self.comments);
        install(&caches.tracking, self.tracking);
    }
}

fn allocate<C>(
    config: &TrialConfig,
    caches: &TrialCaches,
    modality: Modality,
    build: impl FnOnce(usize) -> std::result::Result<C, TryReserveError>,
) -> Result<Option<C>> {
    let capacity = config.capacity(modality);
    if capacity == 0 || caches.is_configured(modality) {
        return Ok(None);
    }
    build(capacity).map(Some).map_err(|e| {
        log::warn!(
            "Could not allocate {} buffer of {} records: {}",
            modality,
            capacity,
            e
        );
        SdkError::ErrMemoryTrial(modality)
    })
}

fn install<C>(slot: &RwLock<Option<Arc<C>>>, cache: Option<C>) {
    if let Some(cache) = cache {
        let mut slot = slot.write();
        if slot.is_none() {
            *slot = Some(Arc::new(cache));
        }
    }
}

/// Borrowed handle on an open instance's trial state
pub struct TrialSession<'a> {
    shared: &'a Shared,
}

impl<'a> TrialSession<'a> {
    pub(crate) fn new(shared: &'a Shared) -> Self {
        Self { shared }
    }

    /// Allocate missing buffers, then apply the gate settings. Either every
    /// requested buffer is installed or none is.
    pub fn set_config(&self, config: &TrialConfig) -> Result<()> {
        self.shared.ensure_open()?;
        config.validate()?;

        let caches = &self.shared.caches;
        Allocation::build(config, caches)?.install(caches);

        let controller = &self.shared.controller;
        controller.set_watches(config.begin, config.end, config.double, config.absolute);
        if config.active {
            if controller.open(self.shared.now(), || caches.reset()) {
                log::info!("Trial opened on instance {}", self.shared.instance);
            }
        } else if controller.close() {
            log::info!("Trial closed on instance {}", self.shared.instance);
        }
        Ok(())
    }

    pub fn config(&self) -> Result<TrialConfig> {
        self.shared.ensure_open()?;
        let controller = &self.shared.controller;
        let caches = &self.shared.caches;
        let (begin, end) = controller.watches();
        let (double, absolute) = controller.output_flags();
        Ok(TrialConfig {
            active: controller.is_open(),
            begin,
            end,
            double,
            absolute,
            continuous: caches.capacity(Modality::Continuous),
            events: caches.capacity(Modality::Event),
            comments: caches.capacity(Modality::Comment),
            tracking: caches.capacity(Modality::Tracking),
        })
    }

    /// Release one modality's buffer
    pub fn unset_config(&self, modality: Modality) -> Result<()> {
        self.shared.ensure_open()?;
        if !self.shared.caches.release(modality) {
            return Err(SdkError::ErrConfig(modality));
        }
        log::debug!("Released {} buffer on instance {}", modality, self.shared.instance);
        Ok(())
    }

    pub fn state(&self) -> TrialState {
        self.shared.controller.state()
    }

    /// Report what is pending per channel. With `reset` the trial clock
    /// restarts here, and an empty comment or tracking buffer is given a
    /// short wait for its first record.
    pub fn init(&self, request: &TrialRequest) -> Result<TrialInit> {
        self.shared.ensure_open()?;
        let caches = &self.shared.caches;
        if let Some(missing) = request.modalities().find(|&m| !caches.is_configured(m)) {
            return Err(SdkError::ErrConfig(missing));
        }

        self.shared
            .controller
            .mark_snapshot(request.reset, self.shared.now());
        let wait = request
            .reset
            .then(|| request.wait.unwrap_or_else(|| self.shared.config.init_wait()));

        let mask = &self.shared.mask;
        let mut init = TrialInit::default();
        if request.continuous {
            init.continuous = Some(required(caches.continuous(), Modality::Continuous)?.init(mask));
        }
        if request.events {
            init.events = Some(required(caches.events(), Modality::Event)?.init(mask));
        }
        if request.comments {
            init.comments = Some(required(caches.comments(), Modality::Comment)?.init(wait));
        }
        if request.tracking {
            init.tracking = Some(required(caches.tracking(), Modality::Tracking)?.init(wait));
        }
        Ok(init)
    }

    /// Copy pending records into `data`, consuming them when `advance` is
    /// set. Returns the number of records copied.
    pub fn get(&self, data: &mut TrialData, advance: bool) -> Result<usize> {
        self.shared.ensure_open()?;
        let caches = &self.shared.caches;
        if let Some(missing) = data.modalities().find(|&m| !caches.is_configured(m)) {
            return Err(SdkError::ErrConfig(missing));
        }
        data.check_channels()?;

        let controller = &self.shared.controller;
        let format = controller.read_format();
        let mask = &self.shared.mask;
        let mut copied = 0;

        if let Some(dest) = data.continuous.as_mut() {
            let cache = required(caches.continuous(), Modality::Continuous)?;
            dest.start_time = controller.prev_start_time();
            copied += cache.drain(dest, &format, mask, advance)?;
        }
        if let Some(dest) = data.events.as_mut() {
            let cache = required(caches.events(), Modality::Event)?;
            copied += cache.drain(dest, &format, mask, advance)?;
        }
        if let Some(dest) = data.comments.as_mut() {
            let cache = required(caches.comments(), Modality::Comment)?;
            copied += cache.drain(dest, &format, advance);
        }
        if let Some(dest) = data.tracking.as_mut() {
            let cache = required(caches.tracking(), Modality::Tracking)?;
            copied += cache.drain(dest, &format, advance)?;
        }
        Ok(copied)
    }

    pub fn metrics(&self, modality: Modality) -> Result<CacheMetrics> {
        let caches = &self.shared.caches;
        let metrics = match modality {
            Modality::Continuous => caches.continuous().map(|c| c.metrics()),
            Modality::Event => caches.events().map(|c| c.metrics()),
            Modality::Comment => caches.comments().map(|c| c.metrics()),
            Modality::Tracking => caches.tracking().map(|c| c.metrics()),
        };
        metrics.ok_or(SdkError::ErrConfig(modality))
    }
}

/// A buffer can be released between the configured check and the read
fn required<C>(cache: Option<Arc<C>>, modality: Modality) -> Result<Arc<C>> {
    cache.ok_or(SdkError::ErrConfig(modality))
}
