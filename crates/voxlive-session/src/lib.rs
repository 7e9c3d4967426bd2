pub mod gemini;
pub mod interruption;
pub mod null_transport;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod stats;
pub mod transcript;
pub mod transport;

pub use gemini::GeminiTransport;
pub use interruption::InterruptionController;
pub use null_transport::NullTransport;
pub use protocol::{ClientMessage, ServerEvent, ServerMessage, SetupParams};
pub use registry::TransportRegistry;
pub use session::StreamSession;
pub use stats::SessionStats;
pub use transcript::TranscriptAggregator;
pub use transport::{Transport, TransportEvent, TransportLink};
