// Instrument collaborators
//
// The engine never talks to hardware itself. It asks an InstrumentInfo for
// descriptive state (sample groups, trackables, channel configuration) and
// hands outbound commands to a Transport.

use crate::channel::{self, ChannelClass, TICKS_PER_SECOND};
use crate::command::OutboundCommand;
use crate::error::{Result, SdkError};
use crate::packet::ChannelConfig;
use crate::trial::tracking::Trackable;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Channels sampled together at one rate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleGroup {
    /// Sample period in instrument ticks
    pub period: u32,
    pub channels: Vec<u16>,
}

impl SampleGroup {
    pub fn new(period: u32, channels: Vec<u16>) -> Self {
        Self { period, channels }
    }

    pub fn sample_rate(&self) -> u32 {
        match self.period {
            0 => 0,
            period => (TICKS_PER_SECOND as u32) / period,
        }
    }
}

pub trait InstrumentInfo: Send + Sync {
    fn channel_class(&self, channel: u16) -> Option<ChannelClass> {
        ChannelClass::of(channel)
    }

    /// Group list for sample group 1..=8
    fn sample_group(&self, group: u8) -> Option<Arc<SampleGroup>>;

    /// Description of a 1-based trackable id
    fn trackable(&self, id: u16) -> Option<Trackable>;

    fn channel_config(&self, channel: u16) -> Result<ChannelConfig>;

    fn set_channel_config(&self, config: &ChannelConfig) -> Result<()>;

    fn protocol_version(&self) -> String {
        "unknown".to_string()
    }
}

pub trait Transport: Send + Sync {
    fn send(&self, command: &OutboundCommand) -> Result<()>;
}

/// In-memory instrument description, usable for replay or tests
#[derive(Default)]
pub struct StaticInstrumentInfo {
    groups: RwLock<HashMap<u8, Arc<SampleGroup>>>,
    trackables: RwLock<HashMap<u16, Trackable>>,
    channels: RwLock<HashMap<u16, ChannelConfig>>,
    version: String,
}

impl StaticInstrumentInfo {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..Self::default()
        }
    }

    pub fn with_group(self, group: u8, period: u32, channels: Vec<u16>) -> Self {
        self.set_group(group, SampleGroup::new(period, channels));
        self
    }

    pub fn with_trackable(self, id: u16, trackable: Trackable) -> Self {
        self.trackables.write().insert(id, trackable);
        self
    }

    pub fn set_group(&self, group: u8, description: SampleGroup) {
        self.groups.write().insert(group, Arc::new(description));
    }

    pub fn remove_trackable(&self, id: u16) {
        self.trackables.write().remove(&id);
    }
}

impl InstrumentInfo for StaticInstrumentInfo {
    fn sample_group(&self, group: u8) -> Option<Arc<SampleGroup>> {
        self.groups.read().get(&group).cloned()
    }

    fn trackable(&self, id: u16) -> Option<Trackable> {
        self.trackables.read().get(&id).cloned()
    }

    fn channel_config(&self, channel: u16) -> Result<ChannelConfig> {
        channel::validate(channel)?;
        let config = self.channels.read().get(&channel).cloned();
        Ok(config.unwrap_or_else(|| ChannelConfig {
            channel,
            label: format!("chan{}", channel),
            ..ChannelConfig::default()
        }))
    }

    fn set_channel_config(&self, config: &ChannelConfig) -> Result<()> {
        channel::validate(config.channel)?;
        if config.label.len() > channel::LABEL_LEN {
            return Err(SdkError::InvalidParam(format!(
                "label longer than {} bytes",
                channel::LABEL_LEN
            )));
        }
        self.channels.write().insert(config.channel, config.clone());
        Ok(())
    }

    fn protocol_version(&self) -> String {
        self.version.clone()
    }
}
