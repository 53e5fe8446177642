// Decoded instrument packets
//
// The transport decodes wire bytes once and hands the router one of these
// tagged variants. Nothing downstream looks at raw packet type codes.

use crate::callback::CallbackType;
use crate::channel::{CONFIG_CHID, MAX_GROUPS};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// Instrument clock in ticks
    pub time: u64,
    /// 1-based channel id, 0 for sample groups, `CONFIG_CHID` for configuration
    pub chid: u16,
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// One sample per channel of the group, in group channel order
    Group { group: u8, samples: Vec<i16> },
    Spike { unit: u8 },
    Digital { value: u32 },
    Serial { value: u32 },
    SysHeartbeat,
    Impedance { channel: u16, ohms: f32 },
    ChanInfo(ChannelConfig),
    NeuroMotive { mode: u32, flags: u32, value: u32, name: String },
    GroupInfo { group: u8, period: u32, channels: Vec<u16> },
    Comment(CommentPacket),
    Log(LogPacket),
    FileCfg { recording: bool, filename: String, comment: String },
    Poll { app: String, mode: u32, flags: u32 },
    VideoTrack(VideoTrack),
    VideoSynch(VideoSynch),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommentTag {
    /// Color or custom event value
    Rgba(u32),
    /// Time at which the comment was started
    Started(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentPacket {
    pub charset: u8,
    pub tag: CommentTag,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPacket {
    pub mode: u16,
    pub name: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoTrack {
    /// 0-based trackable id
    pub node_id: u16,
    pub node_count: u16,
    pub point_count: u16,
    /// Raw coordinate words; wide trackables pack each value into two words
    pub coords: Vec<u16>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSynch {
    pub split: u16,
    pub frame: u32,
    /// Elapsed time in milliseconds
    pub etime: u32,
    pub id: u16,
}

/// Full configuration of one channel, as exchanged with the instrument
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub channel: u16,
    pub label: String,
    pub user_flags: u32,
    pub position: [i32; 4],
    pub sample_group: u8,
    pub spike_processing: bool,
    pub digital_options: u32,
}

impl Packet {
    pub fn new(time: u64, chid: u16, payload: Payload) -> Self {
        Self {
            time,
            chid,
            payload,
        }
    }

    pub fn config(time: u64, payload: Payload) -> Self {
        Self::new(time, CONFIG_CHID, payload)
    }

    pub fn group(time: u64, group: u8, samples: Vec<i16>) -> Self {
        Self::new(time, 0, Payload::Group { group, samples })
    }

    pub fn spike(time: u64, chid: u16, unit: u8) -> Self {
        Self::new(time, chid, Payload::Spike { unit })
    }

    pub fn is_config(&self) -> bool {
        self.chid & CONFIG_CHID != 0
    }

    /// Value compared against trial begin/end watches
    pub fn watch_value(&self) -> Option<u32> {
        match self.payload {
            Payload::Spike { unit } => Some(u32::from(unit)),
            Payload::Digital { value } | Payload::Serial { value } => Some(value),
            _ => None,
        }
    }

    /// Callback slot this packet is dispatched to, before channel masking
    pub fn callback_type(&self) -> Option<CallbackType> {
        let kind = match &self.payload {
            Payload::Group { group, .. } if (1..=MAX_GROUPS).contains(group) => {
                CallbackType::Continuous
            }
            Payload::Group { .. } => return None,
            Payload::Spike { .. } => CallbackType::Spike,
            Payload::Digital { .. } => CallbackType::Digital,
            Payload::Serial { .. } => CallbackType::Serial,
            Payload::SysHeartbeat => CallbackType::SysHeartbeat,
            Payload::Impedance { .. } => CallbackType::Impedance,
            Payload::ChanInfo(_) => CallbackType::ChanInfo,
            Payload::NeuroMotive { .. } => CallbackType::Nm,
            Payload::GroupInfo { .. } => CallbackType::GroupInfo,
            Payload::Comment(_) => CallbackType::Comment,
            Payload::Log(_) => CallbackType::Log,
            Payload::FileCfg { .. } => CallbackType::FileCfg,
            Payload::Poll { .. } => CallbackType::Poll,
            Payload::VideoTrack(_) => CallbackType::Tracking,
            Payload::VideoSynch(_) => CallbackType::Synch,
        };
        Some(kind)
    }
}
