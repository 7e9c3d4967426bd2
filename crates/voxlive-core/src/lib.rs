pub mod config;
pub mod error;
pub mod status;
pub mod types;

pub use config::{AppConfig, AudioConfig, GeneralConfig, SessionConfig};
pub use error::{AudioError, CodecError, ConfigError, SessionError};
pub use status::{AssistantState, SessionState, StatsSnapshot, UiCommand};
pub use types::{AudioFormat, AudioFrame, DecodedAudioBuffer, EncodedChunk, Turn};
