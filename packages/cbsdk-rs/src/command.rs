// One-shot outbound commands
//
// Each command is checked against the channel layout and then handed to the
// transport as is. Nothing here keeps state between sends.

use crate::channel::{ChannelClass, MAX_COMMENT_LEN, MAX_UNITS};
use crate::error::{Result, SdkError};
use crate::info::InstrumentInfo;
use serde::{Deserialize, Serialize};

pub const MAX_WAVEFORM_PHASES: usize = 246;
pub const MAX_FILENAME_LEN: usize = 256;
pub const MAX_FILE_COMMENT_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunLevel {
    Startup,
    HardReset,
    Standby,
    Reset,
    Running,
    Stressed,
    Error,
    Shutdown,
}

impl RunLevel {
    /// Wire value of the run level
    pub fn code(self) -> u32 {
        match self {
            Self::Startup => 10,
            Self::HardReset => 20,
            Self::Standby => 30,
            Self::Reset => 40,
            Self::Running => 50,
            Self::Stressed => 60,
            Self::Error => 70,
            Self::Shutdown => 80,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemCommand {
    Reset,
    Shutdown,
    Standby,
}

impl SystemCommand {
    pub fn run_level(self) -> RunLevel {
        match self {
            Self::Reset => RunLevel::Reset,
            Self::Shutdown => RunLevel::Shutdown,
            Self::Standby => RunLevel::HardReset,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveformPhase {
    pub duration: u16,
    pub amplitude: i16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaveformShape {
    Phases(Vec<WaveformPhase>),
    Sine { frequency: u16, amplitude: i16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaveformTrigger {
    Instant,
    DigitalRising { bit: u16 },
    DigitalFalling { bit: u16 },
    SpikeUnit { channel: u16, unit: u8 },
    SoftReset,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Waveform {
    pub shape: WaveformShape,
    /// 0 repeats forever
    pub repeats: u32,
    pub trigger: WaveformTrigger,
    pub offset: i16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalogSource {
    Waveform(Waveform),
    Monitor {
        channel: u16,
        spikes: bool,
        /// Follow the last tracked channel instead of `channel`
        track_last: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboundCommand {
    DigitalOutput {
        channel: u16,
        value: u16,
    },
    /// `None` disables the output
    AnalogOutput {
        channel: u16,
        source: Option<AnalogSource>,
    },
    Comment {
        rgba: u32,
        charset: u8,
        text: String,
    },
    RunLevel {
        level: RunLevel,
        locked: bool,
        reset_queue: bool,
    },
    FileRecording {
        filename: String,
        comment: String,
        start: bool,
        options: u32,
    },
}

impl OutboundCommand {
    pub fn system(command: SystemCommand) -> Self {
        Self::RunLevel {
            level: command.run_level(),
            locked: false,
            reset_queue: false,
        }
    }

    pub fn validate(&self, info: &dyn InstrumentInfo) -> Result<()> {
        match self {
            Self::DigitalOutput { channel, .. } => {
                expect_class(info, *channel, |class| class == ChannelClass::DigitalOut)
            }
            Self::AnalogOutput { channel, source } => {
                expect_class(info, *channel, |class| {
                    matches!(class, ChannelClass::AnalogOut | ChannelClass::AudioOut)
                })?;
                match source {
                    Some(AnalogSource::Waveform(waveform)) => validate_waveform(info, waveform),
                    Some(AnalogSource::Monitor {
                        channel,
                        track_last: false,
                        ..
                    }) => expect_class(info, *channel, ChannelClass::is_spike_capable),
                    _ => Ok(()),
                }
            }
            Self::Comment { text, .. } => {
                if text.len() >= MAX_COMMENT_LEN {
                    return Err(SdkError::InvalidComment(format!(
                        "comment is {} bytes, limit is {}",
                        text.len(),
                        MAX_COMMENT_LEN - 1
                    )));
                }
                Ok(())
            }
            Self::RunLevel { .. } => Ok(()),
            Self::FileRecording {
                filename,
                comment,
                start,
                ..
            } => {
                if *start && filename.is_empty() {
                    return Err(SdkError::InvalidParam(
                        "recording needs a file name".to_string(),
                    ));
                }
                if filename.len() > MAX_FILENAME_LEN {
                    return Err(SdkError::InvalidParam(format!(
                        "file name longer than {} bytes",
                        MAX_FILENAME_LEN
                    )));
                }
                if comment.len() > MAX_FILE_COMMENT_LEN {
                    return Err(SdkError::InvalidParam(format!(
                        "file comment longer than {} bytes",
                        MAX_FILE_COMMENT_LEN
                    )));
                }
                Ok(())
            }
        }
    }
}

fn expect_class(
    info: &dyn InstrumentInfo,
    channel: u16,
    accept: impl Fn(ChannelClass) -> bool,
) -> Result<()> {
    match info.channel_class(channel) {
        Some(class) if accept(class) => Ok(()),
        _ => Err(SdkError::InvalidChannel(channel)),
    }
}

fn validate_waveform(info: &dyn InstrumentInfo, waveform: &Waveform) -> Result<()> {
    match &waveform.shape {
        WaveformShape::Phases(phases) if phases.is_empty() => {
            return Err(SdkError::InvalidParam("waveform has no phases".to_string()))
        }
        WaveformShape::Phases(phases) if phases.len() > MAX_WAVEFORM_PHASES => {
            return Err(SdkError::InvalidParam(format!(
                "waveform has {} phases, limit is {}",
                phases.len(),
                MAX_WAVEFORM_PHASES
            )))
        }
        WaveformShape::Sine { frequency: 0, .. } => {
            return Err(SdkError::InvalidParam("sine frequency is zero".to_string()))
        }
        _ => {}
    }

    match waveform.trigger {
        WaveformTrigger::DigitalRising { bit } | WaveformTrigger::DigitalFalling { bit }
            if bit >= 16 =>
        {
            Err(SdkError::InvalidParam(format!("digital trigger bit {}", bit)))
        }
        WaveformTrigger::SpikeUnit { channel, unit } => {
            expect_class(info, channel, ChannelClass::is_spike_capable)?;
            if usize::from(unit) > MAX_UNITS {
                return Err(SdkError::InvalidParam(format!("spike unit {}", unit)));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
