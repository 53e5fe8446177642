// Trial gate
//
// Holds the begin/end watches and the "within trial" flag that decides
// whether routed packets reach the caches.

use super::ReadFormat;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Channel/mask/value triple matched against event packets.
/// Channel 0 disables the watch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watch {
    pub channel: u16,
    pub mask: u32,
    pub value: u32,
}

impl Watch {
    pub fn new(channel: u16, mask: u32, value: u32) -> Self {
        Self {
            channel,
            mask,
            value,
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.channel != 0
    }

    pub fn matches(&self, channel: u16, value: u32) -> bool {
        self.is_set() && channel == self.channel && (value & self.mask) == self.value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialState {
    /// No watch configured, gate closed
    Idle,
    /// Watch configured, gate closed
    Armed,
    /// Gate open, caches accept writes
    Open,
}

#[derive(Debug, Clone, Copy, Default)]
struct GateConfig {
    begin: Watch,
    end: Watch,
    double: bool,
    absolute: bool,
}

pub struct TrialController {
    config: Mutex<GateConfig>,
    open: AtomicBool,
    start_time: AtomicU64,
    prev_start_time: AtomicU64,
}

impl TrialController {
    pub fn new() -> Self {
        Self {
            config: Mutex::new(GateConfig::default()),
            open: AtomicBool::new(false),
            start_time: AtomicU64::new(0),
            prev_start_time: AtomicU64::new(0),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn state(&self) -> TrialState {
        if self.is_open() {
            return TrialState::Open;
        }
        let config = self.config.lock();
        if config.begin.is_set() || config.end.is_set() {
            TrialState::Armed
        } else {
            TrialState::Idle
        }
    }

    pub fn start_time(&self) -> u64 {
        self.start_time.load(Ordering::Acquire)
    }

    pub fn prev_start_time(&self) -> u64 {
        self.prev_start_time.load(Ordering::Acquire)
    }

    pub fn watches(&self) -> (Watch, Watch) {
        let config = self.config.lock();
        (config.begin, config.end)
    }

    /// (double, absolute)
    pub fn output_flags(&self) -> (bool, bool) {
        let config = self.config.lock();
        (config.double, config.absolute)
    }

    pub fn set_watches(&self, begin: Watch, end: Watch, double: bool, absolute: bool) {
        *self.config.lock() = GateConfig {
            begin,
            end,
            double,
            absolute,
        };
    }

    /// Open the gate at `now` unless it already is. `reset` runs before the
    /// gate opens so no write lands in a half-reset cache set.
    pub fn open(&self, now: u64, reset: impl FnOnce()) -> bool {
        let _transition = self.config.lock();
        self.open_locked(now, reset)
    }

    pub fn close(&self) -> bool {
        let _transition = self.config.lock();
        self.close_locked()
    }

    /// Open the gate if an event packet satisfies the begin watch
    pub fn observe_begin(&self, channel: u16, value: u32, time: u64, reset: impl FnOnce()) -> bool {
        if self.is_open() {
            return false;
        }
        let config = self.config.lock();
        config.begin.matches(channel, value) && self.open_locked(time, reset)
    }

    /// Close the gate if an event packet satisfies the end watch
    pub fn observe_end(&self, channel: u16, value: u32) -> bool {
        if !self.is_open() {
            return false;
        }
        let config = self.config.lock();
        config.end.matches(channel, value) && self.close_locked()
    }

    // Gate transitions run with the config lock held, so the open check and
    // the reset happen once per transition.
    fn open_locked(&self, now: u64, reset: impl FnOnce()) -> bool {
        if self.is_open() {
            return false;
        }
        self.start_time.store(now, Ordering::Release);
        reset();
        self.open.store(true, Ordering::Release);
        log::debug!("Trial gate opened at {}", now);
        true
    }

    fn close_locked(&self) -> bool {
        let was_open = self.open.swap(false, Ordering::AcqRel);
        if was_open {
            log::debug!("Trial gate closed");
        }
        was_open
    }

    /// Roll the rebase origin forward for the next read. With `reset` the
    /// current trial start moves to `now`.
    pub fn mark_snapshot(&self, reset: bool, now: u64) {
        self.prev_start_time
            .store(self.start_time(), Ordering::Release);
        if reset {
            self.start_time.store(now, Ordering::Release);
        }
    }

    pub(crate) fn read_format(&self) -> ReadFormat {
        let (double, absolute) = self.output_flags();
        ReadFormat {
            double,
            rebase: (!absolute).then(|| self.prev_start_time()),
        }
    }
}

impl Default for TrialController {
    fn default() -> Self {
        Self::new()
    }
}
