// Callback registry
//
// One slot per event type, plus an ALL wildcard invoked ahead of the typed
// slot. Dispatchers never call through the live table. Each dispatcher keeps
// a LateBound shadow that is refreshed under a short lock whenever the slot's
// generation moved, and user code is always invoked with no lock held.

use crate::ccf::CcfEvent;
use crate::error::{Result, SdkError};
use crate::packet::Packet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// User callback; receives the instance id and the event.
/// Any user context is captured by the closure.
pub type Callback = Arc<dyn Fn(u32, &SdkEvent<'_>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallbackType {
    All,
    InstInfo,
    Spike,
    Digital,
    Serial,
    Continuous,
    Tracking,
    Comment,
    GroupInfo,
    ChanInfo,
    FileCfg,
    Poll,
    Synch,
    Nm,
    Ccf,
    Impedance,
    SysHeartbeat,
    Log,
}

impl CallbackType {
    pub const COUNT: usize = 18;

    pub const TYPES: [CallbackType; Self::COUNT] = [
        Self::All,
        Self::InstInfo,
        Self::Spike,
        Self::Digital,
        Self::Serial,
        Self::Continuous,
        Self::Tracking,
        Self::Comment,
        Self::GroupInfo,
        Self::ChanInfo,
        Self::FileCfg,
        Self::Poll,
        Self::Synch,
        Self::Nm,
        Self::Ccf,
        Self::Impedance,
        Self::SysHeartbeat,
        Self::Log,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::InstInfo => "instinfo",
            Self::Spike => "spike",
            Self::Digital => "digital",
            Self::Serial => "serial",
            Self::Continuous => "continuous",
            Self::Tracking => "tracking",
            Self::Comment => "comment",
            Self::GroupInfo => "groupinfo",
            Self::ChanInfo => "chaninfo",
            Self::FileCfg => "filecfg",
            Self::Poll => "poll",
            Self::Synch => "synch",
            Self::Nm => "nm",
            Self::Ccf => "ccf",
            Self::Impedance => "impedance",
            Self::SysHeartbeat => "sysheartbeat",
            Self::Log => "log",
        }
    }
}

impl fmt::Display for CallbackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection-level notifications raised by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetEvent {
    /// Instrument information changed; carries the instrument flags
    InstInfo(u32),
    Close,
    LinkFailure,
    PcToNspLost,
    NetOpenError,
}

/// What a callback is invoked with
#[derive(Debug)]
pub enum SdkEvent<'a> {
    Packet(&'a Packet),
    PacketLost(NetEvent),
    InstInfo(u32),
    Ccf(&'a CcfEvent),
}

struct Slots {
    callbacks: Vec<Option<Callback>>,
}

/// Per-instance table of registered callbacks
pub struct CallbackRegistry {
    slots: Mutex<Slots>,
    generations: Vec<AtomicU64>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Slots {
                callbacks: vec![None; CallbackType::COUNT],
            }),
            generations: (0..CallbackType::COUNT).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn register(&self, kind: CallbackType, callback: Callback) -> Result<()> {
        let mut slots = self.slots.lock();
        let slot = &mut slots.callbacks[kind.index()];
        if slot.is_some() {
            return Err(SdkError::AlreadyRegistered(kind));
        }
        *slot = Some(callback);
        self.generations[kind.index()].fetch_add(1, Ordering::Release);
        log::debug!("Registered {} callback", kind);
        Ok(())
    }

    /// Safe to call from inside the callback being removed
    pub fn unregister(&self, kind: CallbackType) -> Result<()> {
        let mut slots = self.slots.lock();
        let slot = &mut slots.callbacks[kind.index()];
        if slot.take().is_none() {
            return Err(SdkError::NotRegistered(kind));
        }
        self.generations[kind.index()].fetch_add(1, Ordering::Release);
        log::debug!("Unregistered {} callback", kind);
        Ok(())
    }

    pub fn is_registered(&self, kind: CallbackType) -> bool {
        self.slots.lock().callbacks[kind.index()].is_some()
    }

    /// Drop every registration, used when the instance closes
    pub fn clear(&self) {
        let mut slots = self.slots.lock();
        for kind in CallbackType::TYPES {
            if slots.callbacks[kind.index()].take().is_some() {
                self.generations[kind.index()].fetch_add(1, Ordering::Release);
            }
        }
    }

    fn generation(&self, kind: CallbackType) -> u64 {
        self.generations[kind.index()].load(Ordering::Acquire)
    }

    fn load(&self, kind: CallbackType) -> (u64, Option<Callback>) {
        let slots = self.slots.lock();
        (
            self.generation(kind),
            slots.callbacks[kind.index()].clone(),
        )
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Dispatcher-private copy of the callback table
pub struct LateBound {
    registry: Arc<CallbackRegistry>,
    shadow: Vec<(u64, Option<Callback>)>,
}

impl LateBound {
    pub fn new(registry: Arc<CallbackRegistry>) -> Self {
        Self {
            registry,
            shadow: vec![(0, None); CallbackType::COUNT],
        }
    }

    /// Refresh the shadow slot if the registry changed since it was last read
    fn bind(&mut self, kind: CallbackType) -> Option<Callback> {
        let entry = &mut self.shadow[kind.index()];
        if entry.0 != self.registry.generation(kind) {
            *entry = self.registry.load(kind);
        }
        entry.1.clone()
    }

    /// Invoke the ALL slot, then the slot for `kind`. Returns the number of calls made.
    pub fn dispatch(&mut self, kind: CallbackType, instance: u32, event: &SdkEvent<'_>) -> usize {
        let mut calls = 0;
        if let Some(callback) = self.bind(CallbackType::All) {
            callback(instance, event);
            calls += 1;
        }
        if kind != CallbackType::All {
            if let Some(callback) = self.bind(kind) {
                callback(instance, event);
                calls += 1;
            }
        }
        calls
    }

    /// Invoke only the first occupied slot in type order
    pub fn dispatch_first(&mut self, instance: u32, event: &SdkEvent<'_>) -> bool {
        for kind in CallbackType::TYPES {
            if let Some(callback) = self.bind(kind) {
                callback(instance, event);
                return true;
            }
        }
        false
    }
}
