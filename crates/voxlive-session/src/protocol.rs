//! JSON messages exchanged with a Live-style speech endpoint.

use serde::Deserialize;
use serde_json::{json, Value};
use voxlive_core::{EncodedChunk, SessionConfig, SessionError};

// ── Client → server ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupParams {
    pub model: String,
    pub voice: String,
    pub system_instruction: Option<String>,
}

impl SetupParams {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            model: config.model.clone(),
            voice: config.voice.clone(),
            system_instruction: config
                .system_instruction
                .clone()
                .filter(|s| !s.trim().is_empty()),
        }
    }

    fn model_path(&self) -> String {
        if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Setup(SetupParams),
    Audio(EncodedChunk),
    Text(String),
}

impl ClientMessage {
    pub fn to_json(&self) -> Value {
        match self {
            ClientMessage::Setup(params) => {
                let mut setup = json!({
                    "model": params.model_path(),
                    "generationConfig": {
                        "responseModalities": ["AUDIO"],
                        "speechConfig": {
                            "voiceConfig": {
                                "prebuiltVoiceConfig": { "voiceName": params.voice }
                            }
                        }
                    },
                    "inputAudioTranscription": {},
                    "outputAudioTranscription": {}
                });
                if let Some(instruction) = &params.system_instruction {
                    setup["systemInstruction"] = json!({ "parts": [{ "text": instruction }] });
                }
                json!({ "setup": setup })
            }
            ClientMessage::Audio(chunk) => json!({
                "realtimeInput": {
                    "mediaChunks": [{
                        "mimeType": chunk.format.mime_type(),
                        "data": voxlive_audio::to_wire(&chunk.data),
                    }]
                }
            }),
            ClientMessage::Text(text) => json!({
                "clientContent": {
                    "turns": [{ "role": "user", "parts": [{ "text": text }] }],
                    "turnComplete": true
                }
            }),
        }
    }

    pub fn to_text(&self) -> String {
        self.to_json().to_string()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Setup(_) => "setup",
            ClientMessage::Audio(_) => "audio",
            ClientMessage::Text(_) => "text",
        }
    }
}

// ── Server → client ───────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<Value>,
    pub server_content: Option<ServerContent>,
    pub go_away: Option<GoAway>,
    pub error: Option<ServerError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub inline_data: Option<InlineData>,
    pub text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    pub time_left: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerError {
    #[serde(default)]
    pub message: String,
    pub status: Option<String>,
}

/// One independently handled piece of a server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    SetupComplete,
    UserTranscript(String),
    ModelTranscript(String),
    Interrupted,
    Audio { mime_type: String, data: String },
    TurnComplete,
    GoAway { time_left: Option<String> },
    Fatal(String),
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::SetupComplete => "setup_complete",
            ServerEvent::UserTranscript(_) => "user_transcript",
            ServerEvent::ModelTranscript(_) => "model_transcript",
            ServerEvent::Interrupted => "interrupted",
            ServerEvent::Audio { .. } => "audio",
            ServerEvent::TurnComplete => "turn_complete",
            ServerEvent::GoAway { .. } => "go_away",
            ServerEvent::Fatal(_) => "fatal",
        }
    }
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, SessionError> {
        serde_json::from_str(text)
            .map_err(|e| SessionError::ProtocolViolation(format!("unparsable server message: {e}")))
    }

    /// Flatten into events, in handling order.
    ///
    /// Interruption comes before any audio of the same message so the
    /// timeline is flushed first; transcripts come before turn-complete so
    /// their text lands in the turn being closed.
    pub fn events(&self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        if self.setup_complete.is_some() {
            events.push(ServerEvent::SetupComplete);
        }

        if let Some(content) = &self.server_content {
            if let Some(t) = content.input_transcription.as_ref().filter(|t| !t.text.is_empty()) {
                events.push(ServerEvent::UserTranscript(t.text.clone()));
            }
            if let Some(t) = content.output_transcription.as_ref().filter(|t| !t.text.is_empty()) {
                events.push(ServerEvent::ModelTranscript(t.text.clone()));
            }
            if content.interrupted {
                events.push(ServerEvent::Interrupted);
            }
            if let Some(turn) = &content.model_turn {
                for part in &turn.parts {
                    if let Some(inline) = &part.inline_data {
                        events.push(ServerEvent::Audio {
                            mime_type: inline.mime_type.clone(),
                            data: inline.data.clone(),
                        });
                    }
                }
            }
            if content.turn_complete {
                events.push(ServerEvent::TurnComplete);
            }
        }

        if let Some(go_away) = &self.go_away {
            events.push(ServerEvent::GoAway {
                time_left: go_away.time_left.clone(),
            });
        }
        if let Some(error) = &self.error {
            let reason = match &error.status {
                Some(status) => format!("{status}: {}", error.message),
                None => error.message.clone(),
            };
            events.push(ServerEvent::Fatal(reason));
        }
        events
    }
}
