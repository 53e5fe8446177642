// Packet router
//
// Runs on the transport's producer thread. Every decoded packet updates the
// instrument clock, feeds the trial caches when the gate allows it, and is
// then handed to the registered callbacks through the router's late-bound
// shadow table.

use crate::callback::{CallbackType, LateBound, NetEvent, SdkEvent};
use crate::channel::{ChannelClass, MAX_CACHED_GROUP, MAX_TRACK_OBJECTS};
use crate::instrument::Shared;
use crate::packet::{CommentPacket, CommentTag, LogPacket, Packet, Payload, VideoSynch, VideoTrack};
use std::sync::Arc;

const LOG_RGBA: u32 = 0xFFFF_FFFF;

pub struct PacketRouter {
    shared: Arc<Shared>,
    callbacks: LateBound,
    last_synch: Option<VideoSynch>,
}

impl PacketRouter {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        let callbacks = LateBound::new(shared.callbacks.clone());
        Self {
            shared,
            callbacks,
            last_synch: None,
        }
    }

    pub fn route(&mut self, packet: &Packet) {
        if !self.shared.is_open() {
            log::trace!("Dropping packet on closed instance {}", self.shared.instance);
            return;
        }
        self.shared.set_clock(packet.time);

        match &packet.payload {
            Payload::Group { group, samples } => self.cache_group(*group, samples),
            Payload::Spike { .. } | Payload::Digital { .. } | Payload::Serial { .. } => {
                if !self.is_valid_event(packet) {
                    log::warn!(
                        "Dropping {:?} packet on channel {}",
                        packet.payload,
                        packet.chid
                    );
                    return;
                }
                self.cache_event(packet);
            }
            Payload::Comment(comment) => self.cache_comment(packet.time, comment),
            Payload::Log(entry) => self.cache_log(packet.time, entry),
            Payload::VideoSynch(synch) => self.last_synch = Some(*synch),
            Payload::VideoTrack(track) => self.cache_track(packet.time, track),
            _ => {}
        }

        self.dispatch(packet);
    }

    pub fn on_network_event(&mut self, event: NetEvent) {
        let instance = self.shared.instance;
        match event {
            NetEvent::InstInfo(flags) => {
                self.callbacks
                    .dispatch(CallbackType::InstInfo, instance, &SdkEvent::InstInfo(flags));
            }
            lost => {
                log::warn!("Instance {} connection event: {:?}", instance, lost);
                self.callbacks
                    .dispatch_first(instance, &SdkEvent::PacketLost(lost));
                if lost == NetEvent::Close {
                    self.shared.shutdown();
                }
            }
        }
    }

    fn dispatch(&mut self, packet: &Packet) {
        let Some(kind) = packet.callback_type() else {
            return;
        };
        let masked = matches!(
            kind,
            CallbackType::Spike | CallbackType::Digital | CallbackType::Serial
        ) && !self.shared.mask.is_enabled(packet.chid);
        if !masked {
            self.callbacks
                .dispatch(kind, self.shared.instance, &SdkEvent::Packet(packet));
        }
    }

    fn is_valid_event(&self, packet: &Packet) -> bool {
        let class = self.shared.info.channel_class(packet.chid);
        match packet.payload {
            Payload::Spike { .. } => class.is_some_and(ChannelClass::is_spike_capable),
            Payload::Digital { .. } => class == Some(ChannelClass::DigitalIn),
            Payload::Serial { .. } => class == Some(ChannelClass::Serial),
            _ => false,
        }
    }

    fn cache_event(&self, packet: &Packet) {
        let Some(value) = packet.watch_value() else {
            return;
        };
        let shared = &*self.shared;
        let controller = &shared.controller;

        if controller.observe_begin(packet.chid, value, packet.time, || shared.caches.reset()) {
            log::info!("Trial started by channel {} at {}", packet.chid, packet.time);
        }

        if controller.is_open() && shared.mask.is_enabled(packet.chid) {
            if let Some(events) = shared.caches.events() {
                let stored = match packet.payload {
                    Payload::Spike { unit } => u16::from(unit),
                    _ => (value & 0xffff) as u16,
                };
                events.write(packet.chid, packet.time, stored);
            }
        }

        if controller.observe_end(packet.chid, value) {
            log::info!("Trial ended by channel {} at {}", packet.chid, packet.time);
        }
    }

    fn cache_group(&self, group: u8, samples: &[i16]) {
        if group == 0 || group > MAX_CACHED_GROUP || !self.shared.controller.is_open() {
            return;
        }
        let Some(cache) = self.shared.caches.continuous() else {
            return;
        };
        let Some(description) = self.shared.info.sample_group(group) else {
            log::trace!("No channel list for sample group {}", group);
            return;
        };
        cache.write_group(
            description.sample_rate(),
            &description.channels,
            samples,
            &self.shared.mask,
        );
    }

    fn cache_comment(&self, time: u64, comment: &CommentPacket) {
        if !self.shared.controller.is_open() {
            return;
        }
        let Some(cache) = self.shared.caches.comments() else {
            return;
        };
        let (timestamp, rgba) = match comment.tag {
            CommentTag::Rgba(rgba) => (time, rgba),
            CommentTag::Started(started) => (started, 0),
        };
        cache.write(
            timestamp,
            rgba,
            comment.charset,
            &comment.text,
            time,
            self.shared.controller.start_time(),
        );
    }

    fn cache_log(&self, time: u64, entry: &LogPacket) {
        if !self.shared.controller.is_open() {
            return;
        }
        let Some(cache) = self.shared.caches.comments() else {
            return;
        };
        let text = format!("{}:{}", entry.name, entry.text);
        cache.write(
            time,
            LOG_RGBA,
            0,
            &text,
            time,
            self.shared.controller.start_time(),
        );
    }

    fn cache_track(&self, time: u64, track: &VideoTrack) {
        let Some(synch) = self.last_synch else {
            return;
        };
        let node = usize::from(track.node_id);
        if !self.shared.controller.is_open() || node >= MAX_TRACK_OBJECTS {
            return;
        }
        let Some(cache) = self.shared.caches.tracking() else {
            return;
        };
        let trackable = self.shared.info.trackable(track.node_id + 1);
        cache.write(
            node,
            trackable.as_ref(),
            time,
            &synch,
            track.point_count,
            &track.coords,
            self.shared.controller.start_time(),
        );
    }
}
