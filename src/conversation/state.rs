//! Conversation state as an explicit value.
//!
//! Every operation borrows the current state and returns a new one, so two
//! independent chains never share history. Trimming drops the oldest
//! complete user/assistant pairs until the history plus the reserved output
//! budget fits the context window.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::usage::tokens::estimate_tokens;
use crate::usage::Usage;

use super::turn::{Role, Turn};

/// Inserted ahead of an assistant turn appended to an empty conversation.
pub const CONTINUATION_PLACEHOLDER: &str = "(Continuing conversation)";

/// Ordered history plus system instruction and running token counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    turns: Vec<Turn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    system_instruction: Option<String>,
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    exchanges: u64,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of this state with a different system instruction.
    pub fn with_system_instruction(&self, instruction: impl Into<String>) -> Self {
        let instruction = instruction.into();
        let mut next = self.clone();
        next.system_instruction = (!instruction.trim().is_empty()).then_some(instruction);
        next
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn system_instruction(&self) -> Option<&str> {
        self.system_instruction.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Append a turn, merging it into the tail when the roles match.
    pub fn append(&self, turn: Turn) -> Self {
        let mut next = self.clone();
        if next.turns.is_empty() && turn.role == Role::Assistant {
            next.turns.push(Turn::user(CONTINUATION_PLACEHOLDER));
        }
        match next.turns.last_mut() {
            Some(tail) if tail.role == turn.role => tail.merge(turn),
            _ => next.turns.push(turn),
        }
        next
    }

    /// Add one call's usage to the conversation counters.
    pub fn record_usage(&self, usage: &Usage) -> Self {
        let mut next = self.clone();
        next.input_tokens += usage.input_tokens;
        next.output_tokens += usage.output_tokens;
        next.exchanges += 1;
        next
    }

    /// Estimated tokens for every turn plus the system instruction.
    pub fn token_total(&self) -> usize {
        let system = self
            .system_instruction
            .as_deref()
            .map(estimate_tokens)
            .unwrap_or(0);
        system + self.turns.iter().map(|t| t.token_estimate).sum::<usize>()
    }

    /// Whether the history plus `reserved` output tokens fits `window`.
    pub fn fits(&self, reserved: usize, window: usize) -> bool {
        self.token_total() + reserved <= window
    }

    /// Number of trailing turns that form the most recent exchange.
    fn protected_tail(&self) -> usize {
        match self.turns.last().map(|t| t.role) {
            Some(Role::Assistant) if self.turns.len() >= 2 => 2,
            Some(_) => 1,
            None => 0,
        }
    }

    /// Drop the oldest complete pairs until the state fits.
    ///
    /// Never removes the system instruction or the most recent exchange, and
    /// never leaves an assistant turn at the head. A state that already fits
    /// comes back unchanged.
    pub fn trim(&self, reserved: usize, window: usize) -> Self {
        if self.fits(reserved, window) {
            return self.clone();
        }

        let mut next = self.clone();
        let mut dropped = 0usize;
        while !next.fits(reserved, window) {
            let protected = next.protected_tail();
            let droppable = next.turns.len().saturating_sub(protected);
            let head = next.turns.first().map(|t| t.role);

            let count = match head {
                // A stray assistant at the head has no partner to keep it with
                Some(Role::Assistant) if droppable >= 1 => 1,
                Some(Role::User)
                    if droppable >= 2 && next.turns[1].role == Role::Assistant =>
                {
                    2
                }
                _ => break,
            };
            next.turns.drain(..count);
            dropped += count;
        }

        if dropped > 0 {
            debug!(
                dropped,
                remaining = next.turns.len(),
                tokens = next.token_total(),
                window,
                reserved,
                "Trimmed conversation"
            );
        }
        if !next.fits(reserved, window) {
            warn!(
                tokens = next.token_total(),
                reserved,
                window,
                "Conversation still exceeds window after trimming"
            );
        }
        next
    }

    /// Trim, failing when even the smallest keepable history does not fit.
    pub fn trim_to_fit(&self, reserved: usize, window: usize) -> Result<Self> {
        let trimmed = self.trim(reserved, window);
        if trimmed.fits(reserved, window) {
            Ok(trimmed)
        } else {
            Err(Error::ContextOverflow {
                tokens: trimmed.token_total(),
                reserved,
                window,
            })
        }
    }

    /// Empty state with no history, instruction or counters.
    pub fn reset(&self) -> Self {
        Self::default()
    }

    /// Summary figures for display.
    pub fn info(&self, window: usize) -> ConversationInfo {
        let user_turns = self.turns.iter().filter(|t| t.role == Role::User).count();
        let tokens = self.token_total();
        ConversationInfo {
            turns: self.turns.len(),
            user_turns,
            assistant_turns: self.turns.len() - user_turns,
            estimated_tokens: tokens,
            context_window: window,
            context_usage: if window == 0 {
                0.0
            } else {
                tokens as f64 / window as f64 * 100.0
            },
            has_system_instruction: self.system_instruction.is_some(),
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            exchanges: self.exchanges,
        }
    }
}

/// Snapshot of a conversation's size.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationInfo {
    pub turns: usize,
    pub user_turns: usize,
    pub assistant_turns: usize,
    pub estimated_tokens: usize,
    pub context_window: usize,
    pub context_usage: f64,
    pub has_system_instruction: bool,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub exchanges: u64,
}

impl ConversationInfo {
    pub fn summary(&self) -> String {
        format!(
            "Conversation Info:\n\
             Total Turns:        {} ({} user, {} assistant)\n\
             Estimated Tokens:   {}\n\
             Context Usage:      {:.1}% of {}\n\
             System Instruction: {}\n\
             Exchanges:          {} ({} in / {} out)",
            self.turns,
            self.user_turns,
            self.assistant_turns,
            self.estimated_tokens,
            self.context_usage,
            self.context_window,
            if self.has_system_instruction { "yes" } else { "no" },
            self.exchanges,
            self.input_tokens,
            self.output_tokens,
        )
    }
}
