use voxlive_core::Turn;

/// Accumulates partial transcripts into the open turn and keeps the log of
/// finished turns.
#[derive(Debug, Default)]
pub struct TranscriptAggregator {
    user: String,
    model: String,
    turns: Vec<Turn>,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_user(&mut self, text: &str) {
        self.user.push_str(text);
    }

    pub fn append_model(&mut self, text: &str) {
        self.model.push_str(text);
    }

    /// Close the open turn. A turn with no text on either side is not logged.
    pub fn complete_turn(&mut self) -> Option<Turn> {
        if self.user.is_empty() && self.model.is_empty() {
            return None;
        }
        let turn = Turn {
            user: std::mem::take(&mut self.user),
            model: std::mem::take(&mut self.model),
        };
        self.turns.push(turn.clone());
        Some(turn)
    }

    /// Drop any partial text without logging it.
    pub fn discard_pending(&mut self) {
        self.user.clear();
        self.model.clear();
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn pending(&self) -> Turn {
        Turn {
            user: self.user.clone(),
            model: self.model.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_turn_logs_both_sides() {
        let mut agg = TranscriptAggregator::new();
        agg.append_user("hi");
        agg.append_model("hello");
        let turn = agg.complete_turn().unwrap();
        assert_eq!(
            turn,
            Turn {
                user: "hi".into(),
                model: "hello".into()
            }
        );
        assert_eq!(agg.turns(), &[turn]);
        assert!(agg.pending().is_empty());
    }

    #[test]
    fn test_partials_concatenate() {
        let mut agg = TranscriptAggregator::new();
        agg.append_user("what is ");
        agg.append_user("the time");
        agg.append_model("It is ");
        agg.append_model("noon.");
        assert_eq!(agg.pending().user, "what is the time");
        agg.complete_turn();
        assert_eq!(agg.turns()[0].model, "It is noon.");
    }

    #[test]
    fn test_complete_turn_without_text_is_noop() {
        let mut agg = TranscriptAggregator::new();
        assert!(agg.complete_turn().is_none());
        assert!(agg.is_empty());
    }

    #[test]
    fn test_double_complete_logs_once() {
        let mut agg = TranscriptAggregator::new();
        agg.append_model("only the model spoke");
        assert!(agg.complete_turn().is_some());
        assert!(agg.complete_turn().is_none());
        assert_eq!(agg.len(), 1);
        assert_eq!(agg.turns()[0].user, "");
    }

    #[test]
    fn test_discard_pending_keeps_log() {
        let mut agg = TranscriptAggregator::new();
        agg.append_user("first");
        agg.complete_turn();
        agg.append_user("half a sen");
        agg.discard_pending();
        assert!(agg.pending().is_empty());
        assert_eq!(agg.len(), 1);
    }
}
