//! genbridge - resilient multi-turn client layer for generative-AI HTTP APIs
//!
//! This library lets workflow nodes call Claude, Gemini and WaveSpeed
//! through one normalised interface, with credential resolution, retries,
//! usage accounting and explicit conversation state.
//!
//! ```no_run
//! use genbridge::{Client, ConversationState, GenerationParams};
//!
//! # async fn demo() -> genbridge::Result<()> {
//! let client = Client::build("claude-sonnet-4-5-20250929", None, false, true)?
//!     .with_system_instruction("You are terse.");
//! let (reply, state) = client
//!     .converse(&ConversationState::new(), "Say hi", GenerationParams::new())
//!     .await?;
//! println!("{} ({} turns)", reply.text, state.len());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod conversation;
pub mod error;
pub mod logging;
pub mod provider;
pub mod transport;
pub mod usage;

pub use auth::{ApiKey, CredentialResolver};
pub use client::{Client, ClientBuilder, ClientConfig};
pub use conversation::{ConversationState, Role, Turn};
pub use error::{Error, Result};
pub use provider::{
    Capability, GenerationParams, GenerationRequest, GenerationResult, ImageInput, ImageOptions,
    ImageOutput, Provider, SafetyPreset, SafetySettings, Threshold,
};
pub use tokio_util::sync::CancellationToken;
pub use transport::RetryPolicy;
pub use usage::{count_tokens, Usage, UsageStats};
