use crate::callback::CallbackType;
use crate::trial::Modality;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SdkError {
    #[error("Instrument is not open")]
    Closed,

    #[error("Trial {0} buffer is not configured")]
    ErrConfig(Modality),

    #[error("Failed to allocate trial {0} buffer")]
    ErrMemoryTrial(Modality),

    #[error("Invalid channel: {0}")]
    InvalidChannel(u16),

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Invalid comment: {0}")]
    InvalidComment(String),

    #[error("Invalid trackable object: {0}")]
    InvalidTrackable(u16),

    #[error("Callback already registered for {0}")]
    AlreadyRegistered(CallbackType),

    #[error("No callback registered for {0}")]
    NotRegistered(CallbackType),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Invalid instance: {0}")]
    InvalidInstance(u32),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("CCF error: {0}")]
    Ccf(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SdkError>;
