//! Conversation turn types

use serde::{Deserialize, Serialize};

use crate::usage::tokens::{estimate_tokens, IMAGE_TOKENS};

/// Smallest turn worth marking for provider-side prompt caching.
pub const MIN_CACHEABLE_TOKENS: usize = 1024;

/// Separator used when two consecutive turns of the same role are merged.
const MERGE_SEPARATOR: &str = "\n\n";

/// Turn role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Estimated tokens, including any attached images
    pub token_estimate: usize,
    /// Large enough to be marked for prompt caching
    pub cache_eligible: bool,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        let content = content.into();
        let token_estimate = estimate_tokens(&content);
        Self {
            role,
            content,
            token_estimate,
            cache_eligible: token_estimate >= MIN_CACHEABLE_TOKENS,
        }
    }

    /// Create a user turn
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant turn
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Account for images sent alongside this turn.
    pub fn with_images(mut self, count: usize) -> Self {
        self.token_estimate += count * IMAGE_TOKENS;
        self.cache_eligible = self.token_estimate >= MIN_CACHEABLE_TOKENS;
        self
    }

    /// Fold a following turn of the same role into this one.
    pub(crate) fn merge(&mut self, next: Turn) {
        debug_assert_eq!(self.role, next.role);
        self.content.push_str(MERGE_SEPARATOR);
        self.content.push_str(&next.content);
        self.token_estimate += next.token_estimate;
        self.cache_eligible = self.token_estimate >= MIN_CACHEABLE_TOKENS;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_creation() {
        let turn = Turn::user("Hello");
        assert_eq!(turn.role, Role::User);
        assert_eq!(turn.content, "Hello");
        assert_eq!(turn.token_estimate, 2);
        assert!(!turn.cache_eligible);
    }

    #[test]
    fn test_cache_eligibility() {
        let turn = Turn::assistant("x".repeat(MIN_CACHEABLE_TOKENS * 4));
        assert!(turn.cache_eligible);

        let turn = Turn::user("describe").with_images(1);
        assert_eq!(turn.token_estimate, 2 + IMAGE_TOKENS);
        assert!(turn.cache_eligible);
    }

    #[test]
    fn test_merge() {
        let mut turn = Turn::user("first");
        turn.merge(Turn::user("second"));
        assert_eq!(turn.content, "first\n\nsecond");
        assert_eq!(turn.token_estimate, 4);
    }

    #[test]
    fn test_role_serde() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
    }
}
