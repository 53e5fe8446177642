// Instrument instances
//
// An Instrument ties one instance's collaborators (instrument description,
// command transport, configuration codec) to its trial caches and callback
// table. The transport thread feeds packets through a PacketRouter; consumer
// threads use the Instrument handle and its TrialSession.

use crate::callback::{Callback, CallbackRegistry, CallbackType};
use crate::ccf::{CcfCodec, CcfData, CcfJob, CcfRunner, JsonCcfCodec};
use crate::channel::{self, ChannelMask, LABEL_LEN};
use crate::command::{AnalogSource, OutboundCommand, RunLevel, SystemCommand};
use crate::config::SdkConfig;
use crate::error::{Result, SdkError};
use crate::info::{InstrumentInfo, Transport};
use crate::packet::ChannelConfig;
use crate::router::PacketRouter;
use crate::session::TrialSession;
use crate::trial::{TrialCaches, TrialController};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Number of instances that can be open at once
pub const MAX_OPEN: u32 = 4;

/// What an instance needs from the outside world
#[derive(Clone)]
pub struct Collaborators {
    pub info: Arc<dyn InstrumentInfo>,
    pub transport: Arc<dyn Transport>,
    pub ccf: Arc<dyn CcfCodec>,
}

impl Collaborators {
    /// Uses the JSON configuration codec backed by `info`
    pub fn new(info: Arc<dyn InstrumentInfo>, transport: Arc<dyn Transport>) -> Self {
        let ccf = Arc::new(JsonCcfCodec::new(info.clone()));
        Self {
            info,
            transport,
            ccf,
        }
    }

    pub fn with_ccf(mut self, ccf: Arc<dyn CcfCodec>) -> Self {
        self.ccf = ccf;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub sdk: String,
    pub protocol: String,
}

/// State shared between the router and consumer handles
pub(crate) struct Shared {
    pub instance: u32,
    open: AtomicBool,
    clock: AtomicU64,
    pub mask: ChannelMask,
    pub controller: TrialController,
    pub caches: TrialCaches,
    pub callbacks: Arc<CallbackRegistry>,
    pub info: Arc<dyn InstrumentInfo>,
    pub transport: Arc<dyn Transport>,
    pub ccf: CcfRunner,
    pub config: SdkConfig,
}

impl Shared {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(SdkError::Closed)
        }
    }

    /// Latest instrument time seen by the router
    pub fn now(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    pub fn set_clock(&self, time: u64) {
        self.clock.store(time, Ordering::Release);
    }

    /// Stop routing and release trial storage; returns false if already closed
    pub fn shutdown(&self) -> bool {
        if !self.open.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.controller.close();
        self.caches.release_all();
        log::info!("Instance {} closed", self.instance);
        true
    }
}

pub struct Instrument {
    shared: Arc<Shared>,
}

impl Instrument {
    pub fn open(instance: u32, collaborators: Collaborators, config: SdkConfig) -> Result<Self> {
        if instance >= MAX_OPEN {
            return Err(SdkError::InvalidInstance(instance));
        }
        config
            .validate()
            .map_err(|e| SdkError::InvalidParam(e.to_string()))?;

        let callbacks = Arc::new(CallbackRegistry::new());
        let shared = Shared {
            instance,
            open: AtomicBool::new(true),
            clock: AtomicU64::new(0),
            mask: ChannelMask::new(),
            controller: TrialController::new(),
            caches: TrialCaches::default(),
            callbacks: callbacks.clone(),
            info: collaborators.info,
            transport: collaborators.transport,
            ccf: CcfRunner {
                instance,
                codec: collaborators.ccf,
                callbacks,
            },
            config,
        };
        log::info!(
            "Instance {} opened, protocol {}",
            instance,
            shared.info.protocol_version()
        );
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    pub fn instance(&self) -> u32 {
        self.shared.instance
    }

    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    /// Close the instance. Callbacks are unregistered and trial buffers
    /// released; routers created earlier drop everything they receive.
    pub fn close(&self) -> Result<()> {
        if !self.shared.shutdown() {
            return Err(SdkError::Closed);
        }
        self.shared.callbacks.clear();
        Ok(())
    }

    /// Router for the transport's receive thread
    pub fn router(&self) -> PacketRouter {
        PacketRouter::new(self.shared.clone())
    }

    pub fn trial(&self) -> TrialSession<'_> {
        TrialSession::new(&self.shared)
    }

    pub fn config(&self) -> &SdkConfig {
        &self.shared.config
    }

    pub fn time(&self) -> Result<u64> {
        self.shared.ensure_open()?;
        Ok(self.shared.now())
    }

    pub fn version(&self) -> Result<Version> {
        self.shared.ensure_open()?;
        Ok(Version {
            sdk: env!("CARGO_PKG_VERSION").to_string(),
            protocol: self.shared.info.protocol_version(),
        })
    }

    pub fn register_callback(&self, kind: CallbackType, callback: Callback) -> Result<()> {
        self.shared.ensure_open()?;
        self.shared.callbacks.register(kind, callback)
    }

    pub fn unregister_callback(&self, kind: CallbackType) -> Result<()> {
        self.shared.ensure_open()?;
        self.shared.callbacks.unregister(kind)
    }

    pub fn callback_status(&self, kind: CallbackType) -> Result<bool> {
        self.shared.ensure_open()?;
        Ok(self.shared.callbacks.is_registered(kind))
    }

    pub fn channel_mask(&self, channel: u16) -> Result<bool> {
        self.shared.ensure_open()?;
        Ok(self.shared.mask.is_enabled(channel::validate(channel)?))
    }

    /// Channel 0 applies to every channel
    pub fn set_channel_mask(&self, channel: u16, enabled: bool) -> Result<()> {
        self.shared.ensure_open()?;
        self.shared.mask.set(channel, enabled)
    }

    pub fn channel_label(&self, channel: u16) -> Result<String> {
        Ok(self.channel_config(channel)?.label)
    }

    pub fn set_channel_label(&self, channel: u16, label: &str) -> Result<()> {
        if label.len() > LABEL_LEN {
            return Err(SdkError::InvalidParam(format!(
                "label '{}' is longer than {} bytes",
                label, LABEL_LEN
            )));
        }
        let mut config = self.channel_config(channel)?;
        config.label = label.to_string();
        self.set_channel_config(&config)
    }

    pub fn channel_config(&self, channel: u16) -> Result<ChannelConfig> {
        self.shared.ensure_open()?;
        let channel = channel::validate(channel)?;
        self.shared.info.channel_config(channel)
    }

    pub fn set_channel_config(&self, config: &ChannelConfig) -> Result<()> {
        self.shared.ensure_open()?;
        channel::validate(config.channel)?;
        self.shared.info.set_channel_config(config)
    }

    /// Validate a command against the instrument and hand it to the transport
    pub fn send_command(&self, command: &OutboundCommand) -> Result<()> {
        self.shared.ensure_open()?;
        command.validate(self.shared.info.as_ref())?;
        log::debug!("Instance {} sending {:?}", self.shared.instance, command);
        self.shared.transport.send(command)
    }

    pub fn set_digital_output(&self, channel: u16, value: u16) -> Result<()> {
        self.send_command(&OutboundCommand::DigitalOutput { channel, value })
    }

    pub fn set_analog_output(&self, channel: u16, source: Option<AnalogSource>) -> Result<()> {
        self.send_command(&OutboundCommand::AnalogOutput { channel, source })
    }

    pub fn send_comment(&self, rgba: u32, charset: u8, text: &str) -> Result<()> {
        self.send_command(&OutboundCommand::Comment {
            rgba,
            charset,
            text: text.to_string(),
        })
    }

    pub fn set_run_level(&self, level: RunLevel, locked: bool, reset_queue: bool) -> Result<()> {
        self.send_command(&OutboundCommand::RunLevel {
            level,
            locked,
            reset_queue,
        })
    }

    pub fn system(&self, command: SystemCommand) -> Result<()> {
        self.send_command(&OutboundCommand::system(command))
    }

    pub fn set_file_config(
        &self,
        filename: &str,
        comment: &str,
        start: bool,
        options: u32,
    ) -> Result<()> {
        self.send_command(&OutboundCommand::FileRecording {
            filename: filename.to_string(),
            comment: comment.to_string(),
            start,
            options,
        })
    }

    /// Read a configuration file, or the instrument's current settings
    /// when `source` is None
    pub fn read_ccf(&self, source: Option<PathBuf>) -> Result<CcfData> {
        self.shared.ensure_open()?;
        self.shared.ccf.read(source)
    }

    pub fn write_ccf(&self, data: &CcfData, destination: Option<PathBuf>) -> Result<()> {
        self.shared.ensure_open()?;
        self.shared.ccf.write(data, destination)
    }

    pub fn read_ccf_async(&self, source: Option<PathBuf>) -> Result<CcfJob<CcfData>> {
        self.shared.ensure_open()?;
        self.shared.ccf.read_async(source)
    }

    pub fn write_ccf_async(
        &self,
        data: CcfData,
        destination: Option<PathBuf>,
    ) -> Result<CcfJob<()>> {
        self.shared.ensure_open()?;
        self.shared.ccf.write_async(data, destination)
    }
}

/// Process-wide table of open instances, keyed by instance id
#[derive(Default)]
pub struct InstrumentRegistry {
    instances: RwLock<HashMap<u32, Arc<Instrument>>>,
}

impl InstrumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the instance named by `config.instance`
    pub fn open(&self, collaborators: Collaborators, config: SdkConfig) -> Result<Arc<Instrument>> {
        let instance = config.instance;
        let mut instances = self.instances.write();
        if instances.contains_key(&instance) {
            return Err(SdkError::InvalidParam(format!(
                "instance {} is already open",
                instance
            )));
        }
        let instrument = Arc::new(Instrument::open(instance, collaborators, config)?);
        instances.insert(instance, instrument.clone());
        Ok(instrument)
    }

    pub fn get(&self, instance: u32) -> Result<Arc<Instrument>> {
        if instance >= MAX_OPEN {
            return Err(SdkError::InvalidInstance(instance));
        }
        self.instances
            .read()
            .get(&instance)
            .cloned()
            .ok_or(SdkError::Closed)
    }

    pub fn close(&self, instance: u32) -> Result<()> {
        if instance >= MAX_OPEN {
            return Err(SdkError::InvalidInstance(instance));
        }
        let instrument = self
            .instances
            .write()
            .remove(&instance)
            .ok_or(SdkError::Closed)?;
        instrument.close()
    }

    /// Ids of open instances, ascending
    pub fn open_instances(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.instances.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
