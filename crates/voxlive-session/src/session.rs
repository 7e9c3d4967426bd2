//! Live session state machine.
//!
//! `StreamSession` owns one transport link at a time. While Active, a single
//! task multiplexes capture frames (outbound) and server events (inbound);
//! leaving Active always releases the capture device and flushes playback.

use crate::interruption::InterruptionController;
use crate::protocol::{ClientMessage, ServerEvent};
use crate::stats::SessionStats;
use crate::transcript::TranscriptAggregator;
use crate::transport::{Transport, TransportEvent, TransportLink};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use voxlive_audio::{codec, FrameSource, PlaybackScheduler};
use voxlive_core::{
    AppConfig, AssistantState, AudioFormat, AudioFrame, EncodedChunk, SessionConfig,
    SessionError, SessionState, StatsSnapshot, Turn,
};

enum Outcome {
    Closed(String),
    Failed(String),
}

struct Runner {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

// ── Shared ────────────────────────────────────────────────────

struct Shared {
    state: watch::Sender<SessionState>,
    source: Mutex<Box<dyn FrameSource>>,
    scheduler: Arc<PlaybackScheduler>,
    interruption: InterruptionController,
    transcripts: Mutex<TranscriptAggregator>,
    stats: SessionStats,
    output_format: AudioFormat,
    outbound: Mutex<Option<mpsc::UnboundedSender<ClientMessage>>>,
}

impl Shared {
    fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    fn is_active(&self) -> bool {
        self.state.borrow().is_active()
    }

    fn transition(&self, next: SessionState) -> bool {
        let mut refused_from = None;
        let changed = self.state.send_if_modified(|current| {
            if current.can_transition_to(&next) {
                *current = next.clone();
                true
            } else {
                refused_from = Some(current.label());
                false
            }
        });
        match refused_from {
            Some(from) => tracing::warn!(
                "{}",
                SessionError::ProtocolViolation(format!(
                    "refused transition {from} -> {}",
                    next.label()
                ))
            ),
            None => tracing::info!(state = %next.label(), "session state changed"),
        }
        changed
    }

    fn lock_source(&self) -> MutexGuard<'_, Box<dyn FrameSource>> {
        self.source.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_transcripts(&self) -> MutexGuard<'_, TranscriptAggregator> {
        self.transcripts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_outbound(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<ClientMessage>>> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send_frame(&self, frame: AudioFrame) {
        let chunk = codec::encode_frame(&frame);
        let bytes = chunk.data.len();
        let outbound = self.lock_outbound();
        match outbound.as_ref() {
            Some(tx) if tx.send(ClientMessage::Audio(chunk)).is_ok() => {
                self.stats.record_chunk_sent(bytes);
            }
            _ => tracing::debug!("outbound closed, dropping capture frame"),
        }
    }

    /// Handle one server message. Stops at the first fatal event.
    fn dispatch_all(&self, events: Vec<ServerEvent>) -> Option<Outcome> {
        events.into_iter().find_map(|event| self.dispatch(event))
    }

    fn dispatch(&self, event: ServerEvent) -> Option<Outcome> {
        if !self.is_active() {
            tracing::debug!(
                "{}",
                SessionError::ProtocolViolation(format!(
                    "{} while {}",
                    event.kind(),
                    self.state().label()
                ))
            );
            return None;
        }

        match event {
            ServerEvent::SetupComplete => tracing::debug!("duplicate setup complete ignored"),
            ServerEvent::UserTranscript(text) => self.lock_transcripts().append_user(&text),
            ServerEvent::ModelTranscript(text) => self.lock_transcripts().append_model(&text),
            ServerEvent::Interrupted => {
                self.interruption.interrupt();
                self.stats.record_interruption();
            }
            ServerEvent::Audio { mime_type, data } => self.play(&mime_type, &data),
            ServerEvent::TurnComplete => {
                let finished = self.lock_transcripts().complete_turn();
                if let Some(turn) = finished {
                    self.stats.record_turn();
                    tracing::info!(user = %turn.user, model = %turn.model, "turn complete");
                }
            }
            ServerEvent::GoAway { time_left } => tracing::warn!(
                time_left = time_left.as_deref().unwrap_or("unknown"),
                "server is going away"
            ),
            ServerEvent::Fatal(reason) => return Some(Outcome::Failed(reason)),
        }
        None
    }

    fn play(&self, mime_type: &str, data: &str) {
        self.stats.record_audio_received();
        let format = if mime_type.is_empty() {
            Some(self.output_format)
        } else {
            AudioFormat::from_mime(mime_type, self.output_format)
        };
        let Some(format) = format else {
            self.stats.record_malformed();
            tracing::warn!(mime_type, "dropping non-PCM audio part");
            return;
        };

        let decoded = codec::from_wire(data)
            .and_then(|bytes| codec::decode_chunk(&EncodedChunk { data: bytes, format }));
        match decoded {
            Ok(buffer) => {
                let scheduled = self.scheduler.enqueue(buffer);
                tracing::trace!(
                    id = scheduled.id,
                    start = scheduled.start,
                    duration = scheduled.duration,
                    "model audio queued"
                );
            }
            Err(e) => {
                self.stats.record_malformed();
                tracing::warn!("dropping audio chunk: {e}");
            }
        }
    }

    /// Stop sending, release the microphone and silence playback.
    fn release(&self) {
        self.lock_outbound().take();
        self.lock_source().stop();
        let cancelled = self.scheduler.flush();
        tracing::debug!(cancelled, "session resources released");
    }

    async fn finish(&self, outcome: Outcome, link: TransportLink) {
        match outcome {
            Outcome::Closed(reason) => {
                self.transition(SessionState::Closing);
                self.release();
                link.shutdown().await;
                self.transition(SessionState::Closed);
                tracing::info!(%reason, "session closed");
            }
            Outcome::Failed(reason) => {
                tracing::error!(%reason, "session failed");
                self.release();
                self.transition(SessionState::Failed(reason));
                link.shutdown().await;
            }
        }
    }
}

async fn drive(
    shared: Arc<Shared>,
    mut link: TransportLink,
    mut frames: mpsc::UnboundedReceiver<AudioFrame>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let outcome = loop {
        // Capture is paced by the device, so polling it ahead of inbound
        // events cannot starve the server side.
        tokio::select! {
            biased;
            _ = &mut shutdown => break Outcome::Closed("closed locally".into()),
            frame = frames.recv() => match frame {
                Some(frame) => shared.send_frame(frame),
                None => break Outcome::Failed("capture stopped unexpectedly".into()),
            },
            event = link.recv() => match event {
                Some(TransportEvent::Message(events)) => {
                    if let Some(outcome) = shared.dispatch_all(events) {
                        break outcome;
                    }
                }
                Some(TransportEvent::Closed { reason }) => break Outcome::Closed(reason),
                Some(TransportEvent::Error(reason)) => break Outcome::Failed(reason),
                None => break Outcome::Closed("transport ended".into()),
            },
        }
    };
    drop(frames);
    shared.finish(outcome, link).await;
}

// ── StreamSession ─────────────────────────────────────────────

pub struct StreamSession {
    shared: Arc<Shared>,
    transport: Box<dyn Transport>,
    config: SessionConfig,
    runner: tokio::sync::Mutex<Option<Runner>>,
}

impl StreamSession {
    pub fn new(
        config: &AppConfig,
        transport: Box<dyn Transport>,
        source: Box<dyn FrameSource>,
        scheduler: Arc<PlaybackScheduler>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let shared = Shared {
            state,
            source: Mutex::new(source),
            interruption: InterruptionController::new(Arc::clone(&scheduler)),
            scheduler,
            transcripts: Mutex::new(TranscriptAggregator::new()),
            stats: SessionStats::default(),
            output_format: config.audio.output_format(),
            outbound: Mutex::new(None),
        };
        Self {
            shared: Arc::new(shared),
            transport,
            config: config.session.clone(),
            runner: tokio::sync::Mutex::new(None),
        }
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    /// Connect, start capture and go Active.
    ///
    /// Rejected with `AlreadyActive` unless the session is Idle, Closed or
    /// Failed; the running session is left untouched in that case.
    pub async fn open(&self) -> Result<(), SessionError> {
        let mut rejected = None;
        self.shared.state.send_if_modified(|current| {
            if current.accepts_open() {
                *current = SessionState::Connecting;
                true
            } else {
                rejected = Some(current.label());
                false
            }
        });
        if let Some(state) = rejected {
            tracing::warn!(%state, "open rejected, session in progress");
            return Err(SessionError::AlreadyActive(state));
        }
        tracing::info!(transport = self.transport.name(), "session connecting");

        let mut runner = self.runner.lock().await;
        if let Some(previous) = runner.take() {
            let _ = previous.task.await;
        }
        self.shared.stats.reset();
        self.shared.lock_transcripts().discard_pending();

        let link = match self.connect().await {
            Ok(link) => link,
            Err(e) => {
                tracing::error!("{e}");
                self.shared.transition(SessionState::Failed(e.to_string()));
                return Err(e);
            }
        };

        let started = self.shared.lock_source().start();
        let frames = match started {
            Ok(frames) => frames,
            Err(e) => {
                let err = SessionError::from(e);
                tracing::error!("{err}");
                link.shutdown().await;
                self.shared.transition(SessionState::Failed(err.to_string()));
                return Err(err);
            }
        };

        *self.shared.lock_outbound() = Some(link.sender());
        self.shared.transition(SessionState::Active);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(drive(
            Arc::clone(&self.shared),
            link,
            frames,
            shutdown_rx,
        ));
        *runner = Some(Runner {
            shutdown: shutdown_tx,
            task,
        });
        Ok(())
    }

    async fn connect(&self) -> Result<TransportLink, SessionError> {
        let ms = self.config.connect_timeout_ms;
        match tokio::time::timeout(
            Duration::from_millis(ms),
            self.transport.connect(&self.config),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SessionError::Transport(format!(
                "connect timed out after {ms} ms"
            ))),
        }
    }

    /// End the session and wait until its resources are released.
    pub async fn close(&self) -> Result<(), SessionError> {
        let mut runner = self.runner.lock().await;
        let Some(running) = runner.take() else {
            return Err(SessionError::NotActive);
        };
        let _ = running.shutdown.send(());
        if let Err(e) = running.task.await {
            tracing::error!("session task failed: {e}");
        }
        Ok(())
    }

    /// Send a typed prompt as a complete user turn.
    pub fn send_text(&self, text: &str) -> Result<(), SessionError> {
        if !self.shared.is_active() {
            return Err(SessionError::NotActive);
        }
        // Hold the transcript lock so a fast reply cannot overtake the prompt.
        let mut transcripts = self.shared.lock_transcripts();
        {
            let outbound = self.shared.lock_outbound();
            let tx = outbound.as_ref().ok_or(SessionError::NotActive)?;
            tx.send(ClientMessage::Text(text.to_string()))
                .map_err(|_| SessionError::Transport("link closed".into()))?;
        }
        transcripts.append_user(text);
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn is_active(&self) -> bool {
        self.shared.is_active()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    pub fn turn_log(&self) -> Vec<Turn> {
        self.shared.lock_transcripts().turns().to_vec()
    }

    pub fn pending(&self) -> Turn {
        self.shared.lock_transcripts().pending()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn scheduler(&self) -> &Arc<PlaybackScheduler> {
        &self.shared.scheduler
    }

    pub fn snapshot(&self) -> AssistantState {
        let (turns, pending) = {
            let transcripts = self.shared.lock_transcripts();
            (transcripts.turns().to_vec(), transcripts.pending())
        };
        AssistantState {
            session: self.state(),
            turns,
            pending,
            stats: self.stats(),
            live_buffers: self.shared.scheduler.live_count(),
            warnings: Vec::new(),
        }
    }
}
