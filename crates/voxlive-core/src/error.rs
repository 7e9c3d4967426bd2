use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("failed to enumerate devices: {0}")]
    DeviceEnumeration(String),

    #[error("failed to build stream: {0}")]
    StreamBuild(String),

    #[error("capture unavailable: {0}")]
    CaptureUnavailable(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed audio: {bytes} bytes is not a multiple of {frame_bytes}-byte frames")]
    MalformedAudio { bytes: usize, frame_bytes: usize },

    #[error("malformed audio: unusable format ({sample_rate} Hz, {channels} channels)")]
    InvalidFormat { sample_rate: u32, channels: u16 },

    #[error("invalid wire encoding: {0}")]
    InvalidEncoding(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session already in progress (state: {0})")]
    AlreadyActive(String),

    #[error("session is not active")]
    NotActive,

    #[error("capture unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("transport not found: {0}")]
    TransportNotFound(String),
}

impl From<AudioError> for SessionError {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::CaptureUnavailable(reason) => SessionError::CaptureUnavailable(reason),
            other => SessionError::CaptureUnavailable(other.to_string()),
        }
    }
}
