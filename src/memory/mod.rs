//! Conversation history shared across requests.
//!
//! History is the only mutable state that crosses requests. Readers take an
//! immutable snapshot at request start and never observe a partial append.
//! The top-level request handler is the single writer.

use crate::types::Turn;
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Default number of recent turns handed to the reasoning service.
pub const DEFAULT_HISTORY_WINDOW: usize = 5;

/// Turns kept in memory before the oldest are dropped.
pub const MAX_STORED_TURNS: usize = 200;

/// Returns the most recent `window_size` turns.
pub fn window(history: &[Turn], window_size: usize) -> &[Turn] {
    &history[history.len().saturating_sub(window_size)..]
}

#[derive(Debug)]
pub struct ConversationHistory {
    turns: ArcSwap<Vec<Turn>>,
    max_turns: usize,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::with_max_turns(MAX_STORED_TURNS)
    }

    pub fn with_max_turns(max_turns: usize) -> Self {
        Self {
            turns: ArcSwap::from_pointee(Vec::new()),
            max_turns: max_turns.max(1),
        }
    }

    /// Consistent view of every stored turn.
    pub fn snapshot(&self) -> Arc<Vec<Turn>> {
        self.turns.load_full()
    }

    /// Appends a completed turn. Existing snapshots are unaffected.
    pub fn append(&self, turn: Turn) {
        self.turns.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            let skip = (current.len() + 1).saturating_sub(self.max_turns);
            next.extend(current.iter().skip(skip).cloned());
            next.push(turn.clone());
            next
        });
    }

    pub fn clear(&self) {
        self.turns.store(Arc::new(Vec::new()));
    }

    pub fn len(&self) -> usize {
        self.turns.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.load().is_empty()
    }
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new()
    }
}
