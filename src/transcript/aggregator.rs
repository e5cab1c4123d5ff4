use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Model,
}

/// One contiguous utterance by one speaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Sequence-assigned, starting at 0
    pub id: u64,
    pub speaker: Speaker,
    pub text: String,
}

#[derive(Debug, Default)]
pub struct TranscriptAggregator {
    turns: Vec<Turn>,
    next_id: u64,
    /// Per-speaker text since the last turn-complete marker
    current_input: String,
    current_output: String,
    completed_turns: u64,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `fragment` to the last turn if it belongs to `speaker`,
    /// otherwise open a new turn. Empty fragments are ignored.
    pub fn apply_delta(&mut self, speaker: Speaker, fragment: &str) {
        if fragment.is_empty() {
            return;
        }

        match speaker {
            Speaker::User => self.current_input.push_str(fragment),
            Speaker::Model => self.current_output.push_str(fragment),
        }

        match self.turns.last_mut() {
            Some(last) if last.speaker == speaker => last.text.push_str(fragment),
            _ => {
                self.turns.push(Turn {
                    id: self.next_id,
                    speaker,
                    text: fragment.to_string(),
                });
                self.next_id += 1;
            }
        }
    }

    /// Reset the per-speaker accumulation.
    ///
    /// Does not split turns: a same-speaker delta after this still extends
    /// the last turn.
    pub fn complete_turn(&mut self) {
        self.current_input.clear();
        self.current_output.clear();
        self.completed_turns += 1;
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Text heard from `speaker` since the last turn-complete marker.
    pub fn pending(&self, speaker: Speaker) -> &str {
        match speaker {
            Speaker::User => &self.current_input,
            Speaker::Model => &self.current_output,
        }
    }

    pub fn completed_turns(&self) -> u64 {
        self.completed_turns
    }
}
