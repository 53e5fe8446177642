// Channel configuration files
//
// The codec turns a configuration source (a file, or the instrument itself
// when no path is given) into an in-memory CcfData and back. Reads and
// writes can run inline or on a worker thread; either way progress is
// reported through the Ccf callback slot.

use crate::callback::{CallbackRegistry, CallbackType, LateBound, SdkEvent};
use crate::channel::MAX_CHANS;
use crate::error::{Result, SdkError};
use crate::info::InstrumentInfo;
use crate::packet::ChannelConfig;
use chrono::{DateTime, Utc};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use uuid::Uuid;

/// In-memory instrument configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CcfData {
    pub version: String,
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub settings: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CcfKind {
    Read,
    Write,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CcfState {
    Started,
    Progress,
    Complete,
    Failed(String),
}

/// Progress notification delivered to the Ccf callback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CcfEvent {
    pub id: Uuid,
    pub kind: CcfKind,
    /// None when the instrument itself is the source or destination
    pub file: Option<PathBuf>,
    /// Percent complete
    pub progress: u32,
    pub state: CcfState,
    pub at: DateTime<Utc>,
}

pub trait CcfCodec: Send + Sync {
    fn read(&self, source: Option<&Path>, progress: &mut dyn FnMut(u32)) -> Result<CcfData>;

    fn write(
        &self,
        data: &CcfData,
        destination: Option<&Path>,
        progress: &mut dyn FnMut(u32),
    ) -> Result<()>;
}

/// Stores configurations as JSON; without a path it reads from or writes
/// to the instrument's channel configuration
pub struct JsonCcfCodec {
    info: Arc<dyn InstrumentInfo>,
}

impl JsonCcfCodec {
    pub fn new(info: Arc<dyn InstrumentInfo>) -> Self {
        Self { info }
    }
}

impl CcfCodec for JsonCcfCodec {
    fn read(&self, source: Option<&Path>, progress: &mut dyn FnMut(u32)) -> Result<CcfData> {
        let data = match source {
            Some(path) => {
                let contents = std::fs::read_to_string(path)?;
                serde_json::from_str(&contents)?
            }
            None => {
                let mut channels = Vec::with_capacity(usize::from(MAX_CHANS));
                for channel in 1..=MAX_CHANS {
                    channels.push(self.info.channel_config(channel)?);
                    progress(u32::from(channel) * 100 / u32::from(MAX_CHANS));
                }
                CcfData {
                    version: self.info.protocol_version(),
                    channels,
                    settings: BTreeMap::new(),
                }
            }
        };
        progress(100);
        Ok(data)
    }

    fn write(
        &self,
        data: &CcfData,
        destination: Option<&Path>,
        progress: &mut dyn FnMut(u32),
    ) -> Result<()> {
        match destination {
            Some(path) => std::fs::write(path, serde_json::to_string_pretty(data)?)?,
            None => {
                let total = data.channels.len().max(1);
                for (done, config) in data.channels.iter().enumerate() {
                    self.info.set_channel_config(config)?;
                    progress(((done + 1) * 100 / total) as u32);
                }
            }
        }
        progress(100);
        Ok(())
    }
}

/// Handle on a configuration read or write running on a worker thread
pub struct CcfJob<T> {
    pub id: Uuid,
    result: Receiver<Result<T>>,
}

impl<T> CcfJob<T> {
    pub fn wait(&self, timeout: Duration) -> Result<T> {
        match self.result.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(SdkError::Timeout(format!(
                "CCF job {} still running after {:?}",
                self.id, timeout
            ))),
            Err(RecvTimeoutError::Disconnected) => {
                Err(SdkError::Ccf(format!("CCF job {} worker exited", self.id)))
            }
        }
    }
}

/// Runs codec operations and reports their progress
pub(crate) struct CcfRunner {
    pub instance: u32,
    pub codec: Arc<dyn CcfCodec>,
    pub callbacks: Arc<CallbackRegistry>,
}

struct Reporter {
    instance: u32,
    id: Uuid,
    kind: CcfKind,
    file: Option<PathBuf>,
    callbacks: LateBound,
}

impl Reporter {
    fn emit(&mut self, progress: u32, state: CcfState) {
        let event = CcfEvent {
            id: self.id,
            kind: self.kind,
            file: self.file.clone(),
            progress,
            state,
            at: Utc::now(),
        };
        self.callbacks
            .dispatch(CallbackType::Ccf, self.instance, &SdkEvent::Ccf(&event));
    }

    fn finish<T>(&mut self, result: &Result<T>) {
        match result {
            Ok(_) => self.emit(100, CcfState::Complete),
            Err(e) => {
                log::warn!("CCF {:?} {} failed: {}", self.kind, self.id, e);
                self.emit(0, CcfState::Failed(e.to_string()))
            }
        }
    }
}

impl CcfRunner {
    fn reporter(&self, kind: CcfKind, file: Option<PathBuf>) -> Reporter {
        Reporter {
            instance: self.instance,
            id: Uuid::new_v4(),
            kind,
            file,
            callbacks: LateBound::new(self.callbacks.clone()),
        }
    }

    pub fn read(&self, source: Option<PathBuf>) -> Result<CcfData> {
        let mut reporter = self.reporter(CcfKind::Read, source.clone());
        run_read(self.codec.as_ref(), source.as_deref(), &mut reporter)
    }

    pub fn write(&self, data: &CcfData, destination: Option<PathBuf>) -> Result<()> {
        let mut reporter = self.reporter(CcfKind::Write, destination.clone());
        run_write(self.codec.as_ref(), data, destination.as_deref(), &mut reporter)
    }

    pub fn read_async(&self, source: Option<PathBuf>) -> Result<CcfJob<CcfData>> {
        let mut reporter = self.reporter(CcfKind::Read, source.clone());
        let codec = self.codec.clone();
        self.spawn(reporter.id, move |tx| {
            let result = run_read(codec.as_ref(), source.as_deref(), &mut reporter);
            tx(result);
        })
    }

    pub fn write_async(&self, data: CcfData, destination: Option<PathBuf>) -> Result<CcfJob<()>> {
        let mut reporter = self.reporter(CcfKind::Write, destination.clone());
        let codec = self.codec.clone();
        self.spawn(reporter.id, move |tx| {
            let result = run_write(codec.as_ref(), &data, destination.as_deref(), &mut reporter);
            tx(result);
        })
    }

    fn spawn<T: Send + 'static>(
        &self,
        id: Uuid,
        work: impl FnOnce(&dyn Fn(Result<T>)) + Send + 'static,
    ) -> Result<CcfJob<T>> {
        let (tx, rx) = bounded(1);
        thread::Builder::new()
            .name(format!("cbsdk-ccf-{}", self.instance))
            .spawn(move || {
                work(&|result| {
                    // The job handle may already be gone
                    let _ = tx.send(result);
                })
            })?;
        log::info!("Started CCF job {} on instance {}", id, self.instance);
        Ok(CcfJob { id, result: rx })
    }
}

fn run_read(
    codec: &dyn CcfCodec,
    source: Option<&Path>,
    reporter: &mut Reporter,
) -> Result<CcfData> {
    reporter.emit(0, CcfState::Started);
    let result = codec.read(source, &mut |percent| {
        reporter.emit(percent, CcfState::Progress)
    });
    reporter.finish(&result);
    result
}

fn run_write(
    codec: &dyn CcfCodec,
    data: &CcfData,
    destination: Option<&Path>,
    reporter: &mut Reporter,
) -> Result<()> {
    reporter.emit(0, CcfState::Started);
    let result = codec.write(data, destination, &mut |percent| {
        reporter.emit(percent, CcfState::Progress)
    });
    reporter.finish(&result);
    result
}
