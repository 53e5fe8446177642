pub mod callback;
pub mod ccf;
pub mod channel;
pub mod command;
pub mod config;
pub mod error;
pub mod info;
pub mod instrument;
pub mod packet;
pub mod router;
pub mod session;
pub mod trial;

pub use callback::{Callback, CallbackRegistry, CallbackType, NetEvent, SdkEvent};
pub use ccf::{CcfCodec, CcfData, CcfEvent, CcfJob, CcfKind, CcfState, JsonCcfCodec};
pub use channel::ChannelClass;
pub use command::{
    AnalogSource, OutboundCommand, RunLevel, SystemCommand, Waveform, WaveformPhase,
    WaveformShape, WaveformTrigger,
};
pub use config::{ConfigError, SdkConfig};
pub use error::{Result, SdkError};
pub use info::{InstrumentInfo, SampleGroup, StaticInstrumentInfo, Transport};
pub use instrument::{Collaborators, Instrument, InstrumentRegistry, Version, MAX_OPEN};
pub use packet::{
    ChannelConfig, CommentPacket, CommentTag, LogPacket, Packet, Payload, VideoSynch, VideoTrack,
};
pub use router::PacketRouter;
pub use session::{TrialConfig, TrialData, TrialInit, TrialRequest, TrialSession};
pub use trial::{Modality, Samples, Timestamps, TrialState, Watch};
