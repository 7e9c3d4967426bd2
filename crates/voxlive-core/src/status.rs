use crate::types::Turn;

/// Lifecycle of a live voice session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Active,
    Closing,
    Closed,
    Failed(String),
}

impl SessionState {
    /// `open()` is only accepted from a state with no live transport.
    pub fn accepts_open(&self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Closed | SessionState::Failed(_)
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed(_))
    }

    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle | Closed | Failed(_), Connecting)
                | (Connecting, Active)
                | (Connecting, Failed(_))
                | (Active, Closing)
                | (Active, Failed(_))
                | (Closing, Closed)
                | (Closing, Failed(_))
        )
    }

    pub fn label(&self) -> String {
        match self {
            SessionState::Idle => "idle".to_string(),
            SessionState::Connecting => "connecting".to_string(),
            SessionState::Active => "active".to_string(),
            SessionState::Closing => "closing".to_string(),
            SessionState::Closed => "closed".to_string(),
            SessionState::Failed(reason) => format!("failed: {reason}"),
        }
    }
}

/// Point-in-time copy of the session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub chunks_sent: u64,
    pub bytes_sent: u64,
    pub audio_chunks_received: u64,
    pub malformed_dropped: u64,
    pub interruptions: u64,
    pub turns_completed: u64,
}

/// Aggregate assistant state broadcast to the TUI via watch channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantState {
    pub session: SessionState,
    pub turns: Vec<Turn>,
    pub pending: Turn,
    pub stats: StatsSnapshot,
    pub live_buffers: usize,
    pub warnings: Vec<String>,
}

/// Commands sent from TUI → main via mpsc channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiCommand {
    StartSession,
    EndSession,
    Quit,
}
