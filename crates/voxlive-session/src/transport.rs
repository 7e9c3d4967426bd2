use crate::protocol::{ClientMessage, ServerEvent};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use voxlive_core::{SessionConfig, SessionError};

const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// A bidirectional connection to a remote speech model.
///
/// `connect` resolves once the remote side is ready to take audio.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self, config: &SessionConfig) -> Result<TransportLink, SessionError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Events decoded from one server message.
    Message(Vec<ServerEvent>),
    Closed { reason: String },
    Error(String),
}

/// Open link: an unbounded outbound queue and the inbound event stream.
/// Sending never waits on the receive side.
pub struct TransportLink {
    outbound: mpsc::UnboundedSender<ClientMessage>,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl TransportLink {
    pub fn new(
        outbound: mpsc::UnboundedSender<ClientMessage>,
        inbound: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            tasks: Vec::new(),
        }
    }

    /// Attach a background task owned by this link.
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<ClientMessage> {
        self.outbound.clone()
    }

    pub fn send(&self, message: ClientMessage) -> Result<(), SessionError> {
        self.outbound
            .send(message)
            .map_err(|_| SessionError::Transport("link closed".into()))
    }

    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.inbound.recv().await
    }

    /// Close the outbound queue and wait briefly for the link tasks.
    pub async fn shutdown(self) {
        let Self {
            outbound,
            inbound,
            tasks,
        } = self;
        drop(outbound);
        drop(inbound);
        for mut task in tasks {
            if tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, &mut task)
                .await
                .is_err()
            {
                tracing::debug!("transport task did not finish in time, aborting");
                task.abort();
            }
        }
    }
}
