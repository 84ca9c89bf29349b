//! Conversation state management
//!
//! [`ConversationState`] is a plain value: callers thread it through each
//! call and get a new one back.

mod state;
mod turn;

pub use state::{ConversationInfo, ConversationState, CONTINUATION_PLACEHOLDER};
pub use turn::{Role, Turn, MIN_CACHEABLE_TOKENS};
