//! Anthropic Messages API adapter.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{
    validate_request, AdapterLimits, Capability, GenerationRequest, GenerationResult, ImageInput,
    Parsed, ProviderAdapter,
};
use crate::client::ClientConfig;
use crate::conversation::{ConversationState, Role};
use crate::error::{Error, Result};
use crate::transport::{WireBody, WireRequest, WireResponse};
use crate::usage::{context_window, Usage};

pub(crate) const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";

const ANTHROPIC_VERSION: &str = "2023-06-01";
const PROMPT_CACHING_BETA: &str = "prompt-caching-2024-07-31";

const MAX_IMAGES: usize = 20;
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Adapter for `POST /v1/messages`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClaudeAdapter;

fn max_output_tokens(model: &str) -> u32 {
    if model.starts_with("claude-opus-4") {
        32_000
    } else if model.starts_with("claude-sonnet-4") || model.starts_with("claude-haiku-4") {
        64_000
    } else {
        8192
    }
}

fn ephemeral() -> Value {
    json!({"type": "ephemeral"})
}

fn image_block(image: &ImageInput) -> Value {
    match image {
        ImageInput::Inline { mime_type, .. } => json!({
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": mime_type,
                "data": image.to_base64().unwrap_or_default(),
            }
        }),
        ImageInput::Url(url) => json!({
            "type": "image",
            "source": {"type": "url", "url": url}
        }),
    }
}

/// Convert the conversation to Messages API format.
///
/// Images attach to the final user turn. With caching on, the newest
/// cache-eligible turn before it gets a `cache_control` breakpoint.
fn convert_messages(context: &ConversationState, images: &[ImageInput], caching: bool) -> Vec<Value> {
    let turns = context.turns();
    let last = turns.len().saturating_sub(1);
    let cache_index = if caching {
        turns[..last].iter().rposition(|t| t.cache_eligible)
    } else {
        None
    };

    turns
        .iter()
        .enumerate()
        .map(|(i, turn)| {
            let role = turn.role.as_str();
            if i == last && turn.role == Role::User && !images.is_empty() {
                let mut blocks: Vec<Value> = images.iter().map(image_block).collect();
                blocks.push(json!({"type": "text", "text": turn.content}));
                json!({"role": role, "content": blocks})
            } else if Some(i) == cache_index {
                json!({
                    "role": role,
                    "content": [{
                        "type": "text",
                        "text": turn.content,
                        "cache_control": ephemeral(),
                    }]
                })
            } else {
                json!({"role": role, "content": turn.content})
            }
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    model: Option<String>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: ClaudeUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ClaudeUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
}

impl From<ClaudeUsage> for Usage {
    fn from(u: ClaudeUsage) -> Self {
        Usage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            cache_read_tokens: u.cache_read_input_tokens,
            cache_creation_tokens: u.cache_creation_input_tokens,
        }
    }
}

fn finish(text: String, usage: Usage, stop_reason: Option<String>, model: String) -> Result<Parsed> {
    if stop_reason.as_deref() == Some("refusal") {
        let detail = if text.is_empty() {
            "Claude declined to respond".to_string()
        } else {
            text
        };
        return Err(Error::blocked("refusal", detail));
    }

    Ok(Parsed::Done(GenerationResult {
        text,
        usage,
        stop_reason,
        model,
        ..GenerationResult::default()
    }))
}

fn parse_message(value: Value, config: &ClientConfig) -> Result<Parsed> {
    let response: MessagesResponse = serde_json::from_value(value)
        .map_err(|e| Error::malformed(format!("unexpected Messages API response: {}", e)))?;

    let text: String = response
        .content
        .iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text.as_deref())
        .collect::<Vec<_>>()
        .join("");

    finish(
        text,
        response.usage.into(),
        response.stop_reason,
        response.model.unwrap_or_else(|| config.model().to_string()),
    )
}

fn u64_at(value: &Value, pointer: &str) -> Option<u64> {
    value.pointer(pointer).and_then(Value::as_u64)
}

/// Fold a streamed response into one completion.
fn parse_events(events: Vec<Value>, config: &ClientConfig) -> Result<Parsed> {
    let mut text = String::new();
    let mut usage = Usage::default();
    let mut stop_reason = None;
    let mut model = config.model().to_string();

    for event in &events {
        match event.get("type").and_then(Value::as_str).unwrap_or("") {
            "message_start" => {
                if let Some(m) = event.pointer("/message/model").and_then(Value::as_str) {
                    model = m.to_string();
                }
                usage.input_tokens = u64_at(event, "/message/usage/input_tokens").unwrap_or(0);
                usage.output_tokens = u64_at(event, "/message/usage/output_tokens").unwrap_or(0);
                usage.cache_read_tokens =
                    u64_at(event, "/message/usage/cache_read_input_tokens").unwrap_or(0);
                usage.cache_creation_tokens =
                    u64_at(event, "/message/usage/cache_creation_input_tokens").unwrap_or(0);
            }
            "content_block_delta" => {
                if event.pointer("/delta/type").and_then(Value::as_str) == Some("text_delta") {
                    if let Some(delta) = event.pointer("/delta/text").and_then(Value::as_str) {
                        text.push_str(delta);
                    }
                }
            }
            "message_delta" => {
                if let Some(reason) = event.pointer("/delta/stop_reason").and_then(Value::as_str) {
                    stop_reason = Some(reason.to_string());
                }
                if let Some(output) = u64_at(event, "/usage/output_tokens") {
                    usage.output_tokens = output;
                }
            }
            "error" => {
                let message = event
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("stream error")
                    .to_string();
                return Err(
                    match event.pointer("/error/type").and_then(Value::as_str) {
                        Some("overloaded_error") => Error::ServerError { status: 529, message },
                        Some("rate_limit_error") => Error::RateLimited {
                            message,
                            retry_after: None,
                        },
                        _ => Error::malformed(message),
                    },
                );
            }
            _ => {}
        }
    }

    debug!(events = events.len(), chars = text.len(), "Folded Claude stream");
    finish(text, usage, stop_reason, model)
}

impl ProviderAdapter for ClaudeAdapter {
    fn limits(&self, config: &ClientConfig) -> AdapterLimits {
        AdapterLimits {
            min_images: if config.capability() == Capability::Vision { 1 } else { 0 },
            max_images: MAX_IMAGES,
            temperature_range: (0.0, 1.0),
            default_temperature: 0.7,
            max_output_tokens: max_output_tokens(config.model()),
            default_max_tokens: DEFAULT_MAX_TOKENS,
            context_window: context_window(config.model()),
            requires_image_urls: false,
        }
    }

    fn build(
        &self,
        request: &GenerationRequest,
        context: &ConversationState,
        config: &ClientConfig,
    ) -> Result<WireRequest> {
        let limits = self.limits(config);
        validate_request(request, &limits, config)?;

        let caching = config.caching();
        let mut body = json!({
            "model": config.model(),
            "max_tokens": limits.clamp_max_tokens(request.params.max_tokens),
            "temperature": limits.clamp_temperature(request.params.temperature),
            "messages": convert_messages(context, request.images(), caching),
        });

        if let Some(system) = context.system_instruction() {
            body["system"] = if caching {
                json!([{"type": "text", "text": system, "cache_control": ephemeral()}])
            } else {
                json!(system)
            };
        }
        if config.streaming() {
            body["stream"] = json!(true);
        }

        let mut wire = WireRequest::post(format!("{}/v1/messages", config.base_url()), body)
            .header("x-api-key", config.api_key().expose())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .streaming(config.streaming());
        if caching {
            wire = wire.header("anthropic-beta", PROMPT_CACHING_BETA);
        }
        Ok(wire)
    }

    fn parse(&self, response: WireResponse, config: &ClientConfig) -> Result<Parsed> {
        match response.body {
            WireBody::Json(value) => parse_message(value, config),
            WireBody::Events(events) => parse_events(events, config),
            WireBody::Text(_) => parse_message(response.into_json()?, config),
        }
    }

    fn build_count_tokens(
        &self,
        context: &ConversationState,
        config: &ClientConfig,
    ) -> Option<WireRequest> {
        let mut body = json!({
            "model": config.model(),
            "messages": convert_messages(context, &[], false),
        });
        if let Some(system) = context.system_instruction() {
            body["system"] = json!(system);
        }
        Some(
            WireRequest::post(format!("{}/v1/messages/count_tokens", config.base_url()), body)
                .header("x-api-key", config.api_key().expose())
                .header("anthropic-version", ANTHROPIC_VERSION),
        )
    }

    fn parse_count_tokens(&self, response: WireResponse) -> Result<usize> {
        let value = response.into_json()?;
        value
            .get("input_tokens")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .ok_or_else(|| Error::malformed("count_tokens response has no input_tokens"))
    }
}
