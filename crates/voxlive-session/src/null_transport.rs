use crate::protocol::{ClientMessage, ServerEvent};
use crate::transport::{Transport, TransportEvent, TransportLink};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use voxlive_core::{SessionConfig, SessionError};

/// Offline transport: swallows audio and answers text prompts with a stub turn.
#[derive(Debug, Default)]
pub struct NullTransport {
    audio_chunks: Arc<AtomicUsize>,
}

impl NullTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn audio_chunks(&self) -> usize {
        self.audio_chunks.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for NullTransport {
    fn name(&self) -> &str {
        "null"
    }

    async fn connect(&self, _config: &SessionConfig) -> Result<TransportLink, SessionError> {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let audio_chunks = Arc::clone(&self.audio_chunks);

        let task = tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                match message {
                    ClientMessage::Audio(chunk) => {
                        let count = audio_chunks.fetch_add(1, Ordering::Relaxed) + 1;
                        tracing::trace!("NullTransport took chunk #{count}, {} bytes", chunk.data.len());
                    }
                    ClientMessage::Text(text) => {
                        let reply = vec![
                            ServerEvent::ModelTranscript(format!("[null] {} chars", text.chars().count())),
                            ServerEvent::TurnComplete,
                        ];
                        if in_tx.send(TransportEvent::Message(reply)).is_err() {
                            break;
                        }
                    }
                    ClientMessage::Setup(_) => {}
                }
            }
            let _ = in_tx.send(TransportEvent::Closed {
                reason: "null transport closed".into(),
            });
        });

        Ok(TransportLink::new(out_tx, in_rx).with_task(task))
    }
}
