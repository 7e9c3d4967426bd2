use crate::protocol::{ClientMessage, ServerMessage, SetupParams};
use crate::transport::{Transport, TransportEvent, TransportLink};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use voxlive_core::{SessionConfig, SessionError};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SocketSink = SplitSink<Socket, Message>;
type SocketStream = SplitStream<Socket>;

/// Live API transport over a WebSocket carrying JSON text frames.
#[derive(Debug, Default)]
pub struct GeminiTransport;

impl GeminiTransport {
    pub fn new() -> Self {
        Self
    }
}

pub(crate) fn endpoint_url(config: &SessionConfig) -> String {
    let separator = if config.endpoint.contains('?') { '&' } else { '?' };
    format!("{}{}key={}", config.endpoint, separator, config.api_key)
}

#[async_trait]
impl Transport for GeminiTransport {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn connect(&self, config: &SessionConfig) -> Result<TransportLink, SessionError> {
        if config.api_key.trim().is_empty() {
            return Err(SessionError::Transport("no API key configured".into()));
        }

        tracing::info!(endpoint = %config.endpoint, model = %config.model, "connecting");
        let (socket, _response) = connect_async(endpoint_url(config).as_str())
            .await
            .map_err(|e| SessionError::Transport(format!("connect failed: {e}")))?;
        let (mut sink, mut stream) = socket.split();

        let setup = ClientMessage::Setup(SetupParams::from_config(config));
        sink.send(Message::Text(setup.to_text()))
            .await
            .map_err(|e| SessionError::Transport(format!("setup send failed: {e}")))?;
        wait_for_setup(&mut stream).await?;
        tracing::info!(voice = %config.voice, "setup complete");

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(sink, out_rx, in_tx.clone()));
        let reader = tokio::spawn(read_loop(stream, in_tx));

        Ok(TransportLink::new(out_tx, in_rx)
            .with_task(writer)
            .with_task(reader))
    }
}

enum Frame {
    Text(String),
    Closed(String),
    Skip,
}

fn classify(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Text(text),
        // The server sends JSON in binary frames as well.
        Message::Binary(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Frame::Text(text),
            Err(_) => {
                tracing::warn!("dropping non-UTF-8 binary frame");
                Frame::Skip
            }
        },
        Message::Close(frame) => Frame::Closed(
            frame
                .map(|f| format!("{} {}", u16::from(f.code), f.reason))
                .unwrap_or_else(|| "closed by server".to_string()),
        ),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Frame::Skip,
    }
}

async fn wait_for_setup<S>(stream: &mut S) -> Result<(), SessionError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(item) = stream.next().await {
        let message = item.map_err(|e| SessionError::Transport(format!("receive failed: {e}")))?;
        match classify(message) {
            Frame::Text(text) => {
                let parsed = match ServerMessage::parse(&text) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        tracing::warn!("{e}");
                        continue;
                    }
                };
                if let Some(error) = parsed.error {
                    return Err(SessionError::Transport(format!(
                        "setup rejected: {}",
                        error.message
                    )));
                }
                if parsed.setup_complete.is_some() {
                    return Ok(());
                }
                tracing::debug!("ignoring message before setup completed");
            }
            Frame::Closed(reason) => {
                return Err(SessionError::Transport(format!(
                    "closed during setup: {reason}"
                )))
            }
            Frame::Skip => {}
        }
    }
    Err(SessionError::Transport("connection ended during setup".into()))
}

async fn write_loop(
    mut sink: SocketSink,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    while let Some(message) = outbound.recv().await {
        if let Err(e) = sink.send(Message::Text(message.to_text())).await {
            tracing::error!(kind = message.kind(), "send failed: {e}");
            let _ = events.send(TransportEvent::Error(format!("send failed: {e}")));
            return;
        }
    }
    tracing::debug!("outbound queue closed, closing socket");
    let _ = sink.close().await;
}

async fn read_loop(mut stream: SocketStream, events: mpsc::UnboundedSender<TransportEvent>) {
    while let Some(item) = stream.next().await {
        let message = match item {
            Ok(message) => message,
            Err(e) => {
                let _ = events.send(TransportEvent::Error(format!("receive failed: {e}")));
                return;
            }
        };
        match classify(message) {
            Frame::Text(text) => match ServerMessage::parse(&text) {
                Ok(parsed) => {
                    let batch = parsed.events();
                    if batch.is_empty() {
                        continue;
                    }
                    if events.send(TransportEvent::Message(batch)).is_err() {
                        return;
                    }
                }
                Err(e) => tracing::warn!("{e}"),
            },
            Frame::Closed(reason) => {
                tracing::info!(%reason, "server closed the connection");
                let _ = events.send(TransportEvent::Closed { reason });
                return;
            }
            Frame::Skip => {}
        }
    }
    let _ = events.send(TransportEvent::Closed {
        reason: "connection ended".into(),
    });
}
