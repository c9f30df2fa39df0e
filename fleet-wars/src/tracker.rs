use std::collections::BTreeSet;
use std::sync::Arc;

/// Turns for which a reveal of one instance kind has been confirmed by the server.
///
/// Grows by one turn per confirmed reveal; a turn is only taken back out when the server
/// reports the turn moved on before the reveal landed. Same copy-on-write discipline as the
/// commit cache.
#[derive(Clone, Debug, Default)]
pub struct SubmissionTracker {
    turns: Arc<BTreeSet<u32>>,
}

impl SubmissionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, turn: u32) -> bool {
        self.turns.contains(&turn)
    }

    /// Returns `false` when the turn was already recorded.
    pub fn insert(&mut self, turn: u32) -> bool {
        if self.contains(turn) {
            return false;
        }
        Arc::make_mut(&mut self.turns).insert(turn)
    }

    pub fn remove(&mut self, turn: u32) -> bool {
        if !self.contains(turn) {
            return false;
        }
        Arc::make_mut(&mut self.turns).remove(&turn)
    }

    pub fn turns(&self) -> Arc<BTreeSet<u32>> {
        Arc::clone(&self.turns)
    }

    pub fn latest(&self) -> Option<u32> {
        self.turns.iter().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
