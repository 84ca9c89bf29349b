//! Gemini generateContent adapter (API key authentication).

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::gemini_types::{CountTokensResponse, GeminiResponse, UsageMetadata};
use super::media::{resolve_aspect_ratio, GEMINI_ASPECT_RATIOS};
use super::{
    validate_request, AdapterLimits, Capability, GenerationRequest, GenerationResult, ImageInput,
    ImageOutput, Parsed, ProviderAdapter, SafetySettings,
};
use crate::client::ClientConfig;
use crate::conversation::{ConversationState, Role};
use crate::error::{Error, Result};
use crate::transport::{WireBody, WireRequest, WireResponse};
use crate::usage::{context_window, Usage};

pub(crate) const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Finish reasons that mean the output was withheld.
const BLOCKED_FINISH_REASONS: &[&str] = &["SAFETY", "PROHIBITED_CONTENT", "IMAGE_SAFETY"];

/// Reference images past this count are accepted but degrade quality.
const RECOMMENDED_EDIT_IMAGES: usize = 3;

/// Whether `model` returns images.
pub(crate) fn is_image_model(model: &str) -> bool {
    model.contains("-image")
}

fn max_output_tokens(model: &str) -> u32 {
    if is_image_model(model) {
        8192
    } else if model.starts_with("gemini-2.5-pro") || model.starts_with("gemini-2.5-flash") {
        65_536
    } else {
        8192
    }
}

/// Adapter for `POST /v1beta/models/{model}:generateContent`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeminiAdapter;

fn image_part(image: &ImageInput) -> Value {
    match image {
        ImageInput::Inline { mime_type, .. } => json!({
            "inlineData": {
                "mimeType": mime_type,
                "data": image.to_base64().unwrap_or_default(),
            }
        }),
        ImageInput::Url(url) => json!({
            "fileData": {
                "mimeType": mime_for_url(url),
                "fileUri": url,
            }
        }),
    }
}

fn mime_for_url(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    if path.ends_with(".jpg") || path.ends_with(".jpeg") {
        "image/jpeg"
    } else if path.ends_with(".webp") {
        "image/webp"
    } else if path.ends_with(".gif") {
        "image/gif"
    } else {
        "image/png"
    }
}

/// Convert the conversation to Gemini `contents`. Images lead the final user turn.
fn convert_contents(context: &ConversationState, images: &[ImageInput]) -> Vec<Value> {
    let turns = context.turns();
    let last = turns.len().saturating_sub(1);

    turns
        .iter()
        .enumerate()
        .map(|(i, turn)| {
            let role = match turn.role {
                Role::User => "user",
                Role::Assistant => "model",
            };
            let mut parts: Vec<Value> = if i == last && turn.role == Role::User {
                images.iter().map(image_part).collect()
            } else {
                Vec::new()
            };
            parts.push(json!({"text": turn.content}));
            json!({"role": role, "parts": parts})
        })
        .collect()
}

fn convert_safety(safety: &SafetySettings) -> Value {
    safety
        .categories()
        .iter()
        .map(|(category, threshold)| {
            json!({"category": category, "threshold": threshold.as_api_str()})
        })
        .collect()
}

fn system_instruction(context: &ConversationState) -> Option<Value> {
    context
        .system_instruction()
        .map(|system| json!({"parts": [{"text": system}]}))
}

fn usage_from(meta: Option<UsageMetadata>) -> Usage {
    let meta = meta.unwrap_or_default();
    Usage {
        input_tokens: meta.prompt_token_count.unwrap_or(0),
        output_tokens: meta.candidates_token_count.unwrap_or(0),
        cache_read_tokens: meta.cached_content_token_count.unwrap_or(0),
        cache_creation_tokens: 0,
    }
}

/// Accumulates one or more response chunks into a result.
#[derive(Default)]
struct Fold {
    text: String,
    images: Vec<ImageOutput>,
    usage: Option<UsageMetadata>,
    finish_reason: Option<String>,
    model: Option<String>,
}

impl Fold {
    fn push(&mut self, response: GeminiResponse) -> Result<()> {
        if let Some(feedback) = response.prompt_feedback {
            if let Some(reason) = feedback.block_reason {
                let detail = feedback
                    .block_reason_message
                    .unwrap_or_else(|| format!("Prompt blocked: {}", reason));
                return Err(Error::blocked(reason, detail));
            }
        }

        if let Some(meta) = response.usage_metadata {
            self.usage = Some(meta);
        }
        if let Some(version) = response.model_version {
            self.model = Some(version);
        }

        let Some(candidate) = response.candidates.into_iter().next() else {
            return Ok(());
        };
        if let Some(reason) = candidate.finish_reason {
            self.finish_reason = Some(reason);
        }
        for part in candidate.content.parts {
            if part.thought {
                continue;
            }
            if let Some(text) = part.text {
                self.text.push_str(&text);
            }
            if let Some(inline) = part.inline_data {
                let data = STANDARD.decode(inline.data.as_bytes()).map_err(|e| {
                    Error::malformed(format!("invalid base64 image in response: {}", e))
                })?;
                self.images.push(ImageOutput::Inline {
                    data,
                    mime_type: inline.mime_type,
                });
            }
        }
        Ok(())
    }

    fn finish(self, config: &ClientConfig) -> Result<Parsed> {
        if let Some(reason) = self.finish_reason.as_deref() {
            if BLOCKED_FINISH_REASONS.contains(&reason) {
                return Err(Error::blocked(
                    reason,
                    format!("Response blocked by safety filters. Reason: {}", reason),
                ));
            }
        }

        if config.capability().produces_images() && self.images.is_empty() {
            let mut message = String::from("No image was generated.");
            if !self.text.is_empty() {
                message.push_str(&format!(" Model returned text: {}", self.text));
            }
            if let Some(reason) = &self.finish_reason {
                message.push_str(&format!(" Finish reason: {}", reason));
            }
            return Err(Error::malformed(message));
        }

        if self.text.is_empty() && self.images.is_empty() {
            return Err(Error::malformed("No candidates in response"));
        }

        Ok(Parsed::Done(GenerationResult {
            text: self.text,
            images: self.images,
            usage: usage_from(self.usage),
            stop_reason: self.finish_reason,
            model: self.model.unwrap_or_else(|| config.model().to_string()),
            task_id: None,
        }))
    }
}

fn decode(value: Value) -> Result<GeminiResponse> {
    serde_json::from_value(value)
        .map_err(|e| Error::malformed(format!("unexpected Gemini response: {}", e)))
}

impl ProviderAdapter for GeminiAdapter {
    fn limits(&self, config: &ClientConfig) -> AdapterLimits {
        let (min_images, max_images) = match config.capability() {
            Capability::Chat => (0, 16),
            Capability::Vision => (1, 16),
            Capability::ImageGenerate => (0, 3),
            Capability::ImageEdit => (1, 10),
        };
        AdapterLimits {
            min_images,
            max_images,
            temperature_range: (0.0, 2.0),
            default_temperature: if is_image_model(config.model()) { 1.0 } else { 0.7 },
            max_output_tokens: max_output_tokens(config.model()),
            default_max_tokens: max_output_tokens(config.model()),
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

        let params = &request.params;
        if config.capability() == Capability::ImageEdit
            && request.images().len() > RECOMMENDED_EDIT_IMAGES
        {
            warn!(
                images = request.images().len(),
                "More than {} reference images may reduce edit quality", RECOMMENDED_EDIT_IMAGES
            );
        }

        let mut generation_config = json!({
            "temperature": limits.clamp_temperature(params.temperature),
            "maxOutputTokens": limits.clamp_max_tokens(params.max_tokens),
        });
        if is_image_model(config.model()) {
            generation_config["responseModalities"] = json!(["TEXT", "IMAGE"]);
            let ratio = resolve_aspect_ratio(
                params.image.aspect_ratio.as_deref(),
                params.image.width,
                params.image.height,
                GEMINI_ASPECT_RATIOS,
            )?;
            if let Some(ratio) = ratio {
                generation_config["imageConfig"] = json!({"aspectRatio": ratio});
            }
        }

        let mut body = json!({
            "contents": convert_contents(context, request.images()),
            "generationConfig": generation_config,
        });
        if let Some(system) = system_instruction(context) {
            body["systemInstruction"] = system;
        }
        if let Some(safety) = params.safety.as_ref().or(config.safety()) {
            body["safetySettings"] = convert_safety(safety);
        }

        let url = if config.streaming() {
            format!(
                "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
                config.base_url(),
                config.model()
            )
        } else {
            format!("{}/v1beta/models/{}:generateContent", config.base_url(), config.model())
        };

        Ok(WireRequest::post(url, body)
            .header("x-goog-api-key", config.api_key().expose())
            .streaming(config.streaming()))
    }

    fn parse(&self, response: WireResponse, config: &ClientConfig) -> Result<Parsed> {
        let mut fold = Fold::default();
        match response.body {
            WireBody::Events(events) => {
                debug!(events = events.len(), "Folding Gemini stream");
                for event in events {
                    fold.push(decode(event)?)?;
                }
            }
            WireBody::Json(value) => fold.push(decode(value)?)?,
            WireBody::Text(_) => fold.push(decode(response.into_json()?)?)?,
        }
        fold.finish(config)
    }

    fn build_count_tokens(
        &self,
        context: &ConversationState,
        config: &ClientConfig,
    ) -> Option<WireRequest> {
        let mut generate = json!({
            "model": format!("models/{}", config.model()),
            "contents": convert_contents(context, &[]),
        });
        if let Some(system) = system_instruction(context) {
            generate["systemInstruction"] = system;
        }
        Some(
            WireRequest::post(
                format!("{}/v1beta/models/{}:countTokens", config.base_url(), config.model()),
                json!({"generateContentRequest": generate}),
            )
            .header("x-goog-api-key", config.api_key().expose()),
        )
    }

    fn parse_count_tokens(&self, response: WireResponse) -> Result<usize> {
        let count: CountTokensResponse = serde_json::from_value(response.into_json()?)
            .map_err(|e| Error::malformed(format!("unexpected countTokens response: {}", e)))?;
        Ok(count.total_tokens as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ApiKey;
    use crate::conversation::Turn;
    use crate::provider::{GenerationParams, ImageOptions, Provider, SafetyPreset, Threshold};

    fn config(model: &str) -> ClientConfig {
        ClientConfig::new(Provider::Gemini, model, ApiKey::new("AIza-test"))
    }

    fn context(prompt: &str) -> ConversationState {
        ConversationState::new().append(Turn::user(prompt))
    }

    fn done(parsed: Parsed) -> GenerationResult {
        match parsed {
            Parsed::Done(result) => result,
            Parsed::Pending(_) => panic!("expected a completed result"),
        }
    }

    #[test]
    fn test_build_text_request() {
        let config = config("gemini-2.5-pro").with_system_instruction("Be brief.");
        let state = context("Hello").with_system_instruction("Be brief.");
        let request = GenerationRequest::new("Hello", GenerationParams::new().temperature(5.0));
        let wire = GeminiAdapter.build(&request, &state, &config).unwrap();

        assert!(wire.url.ends_with("/v1beta/models/gemini-2.5-pro:generateContent"));
        assert_eq!(wire.header_value("x-goog-api-key"), Some("AIza-test"));
        assert!(!wire.url.contains("key="));

        let body = wire.body.unwrap();
        assert_eq!(body["generationConfig"]["temperature"], json!(2.0));
        assert_eq!(body["generationConfig"]["maxOutputTokens"], json!(65_536));
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert_eq!(body["contents"][0]["role"], "user");
        assert!(body.get("safetySettings").is_none());
    }

    #[test]
    fn test_build_streaming_url() {
        let config = config(DEFAULT_MODEL).with_streaming(true);
        let request = GenerationRequest::new("Hi", GenerationParams::new());
        let wire = GeminiAdapter.build(&request, &context("Hi"), &config).unwrap();
        assert!(wire.url.ends_with(":streamGenerateContent?alt=sse"));
        assert!(wire.stream);
    }

    #[test]
    fn test_build_safety_and_history_roles() {
        let config = config(DEFAULT_MODEL).with_safety(SafetySettings::preset(SafetyPreset::Strict));
        let state = context("one").append(Turn::assistant("two")).append(Turn::user("three"));
        let request = GenerationRequest::new("three", GenerationParams::new());
        let body = GeminiAdapter.build(&request, &state, &config).unwrap().body.unwrap();

        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["safetySettings"].as_array().unwrap().len(), 4);
        assert_eq!(body["safetySettings"][0]["threshold"], Threshold::Low.as_api_str());
    }

    #[test]
    fn test_build_image_model_snaps_aspect_ratio() {
        let config = config("gemini-2.5-flash-image");
        let params = GenerationParams::new().image_options(ImageOptions {
            width: Some(1920),
            height: Some(1000),
            ..ImageOptions::default()
        });
        let request = GenerationRequest::new("A lighthouse", params);
        let body = GeminiAdapter
            .build(&request, &context("A lighthouse"), &config)
            .unwrap()
            .body
            .unwrap();

        assert_eq!(body["generationConfig"]["responseModalities"], json!(["TEXT", "IMAGE"]));
        assert_eq!(body["generationConfig"]["imageConfig"]["aspectRatio"], "16:9");
        assert_eq!(body["generationConfig"]["temperature"], json!(1.0));
    }

    #[test]
    fn test_edit_requires_an_image() {
        let config = config("gemini-2.5-flash-image").with_capability(Capability::ImageEdit);
        let request = GenerationRequest::new("Make it blue", GenerationParams::new());
        let err = GeminiAdapter
            .build(&request, &context("Make it blue"), &config)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_parse_text_response() {
        let response = WireResponse::json(
            200,
            json!({
                "candidates": [{"content": {"parts": [{"text": "Hello"}]}, "finishReason": "STOP"}],
                "usageMetadata": {"promptTokenCount": 7, "candidatesTokenCount": 2, "totalTokenCount": 9}
            }),
        );
        let result = done(GeminiAdapter.parse(response, &config(DEFAULT_MODEL)).unwrap());
        assert_eq!(result.text, "Hello");
        assert_eq!(result.usage, Usage::new(7, 2));
        assert_eq!(result.stop_reason.as_deref(), Some("STOP"));
    }

    #[test]
    fn test_parse_prompt_block() {
        let response = WireResponse::json(
            200,
            json!({"promptFeedback": {"blockReason": "SAFETY"}}),
        );
        let err = GeminiAdapter.parse(response, &config(DEFAULT_MODEL)).unwrap_err();
        assert!(matches!(err, Error::Blocked { ref category, .. } if category == "SAFETY"));
    }

    #[test]
    fn test_parse_image_safety_finish_reason() {
        let response = WireResponse::json(
            200,
            json!({"candidates": [{"content": {"parts": []}, "finishReason": "IMAGE_SAFETY"}]}),
        );
        let err = GeminiAdapter
            .parse(response, &config("gemini-2.5-flash-image"))
            .unwrap_err();
        assert!(matches!(err, Error::Blocked { ref category, .. } if category == "IMAGE_SAFETY"));
    }

    #[test]
    fn test_parse_image_response() {
        let encoded = STANDARD.encode([1u8, 2, 3]);
        let response = WireResponse::json(
            200,
            json!({"candidates": [{"content": {"parts": [
                {"text": "Here you go"},
                {"inlineData": {"mimeType": "image/png", "data": encoded}}
            ]}, "finishReason": "STOP"}]}),
        );
        let result = done(
            GeminiAdapter
                .parse(response, &config("gemini-2.5-flash-image"))
                .unwrap(),
        );
        assert!(result.has_images());
        assert_eq!(result.images[0].bytes(), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn test_parse_missing_image_is_malformed() {
        let response = WireResponse::json(
            200,
            json!({"candidates": [{"content": {"parts": [{"text": "I cannot draw"}]}, "finishReason": "STOP"}]}),
        );
        let err = GeminiAdapter
            .parse(response, &config("gemini-2.5-flash-image"))
            .unwrap_err();
        let Error::Malformed(message) = err else {
            panic!("expected Malformed");
        };
        assert!(message.starts_with("No image was generated."));
        assert!(message.contains("I cannot draw"));
        assert!(message.contains("Finish reason: STOP"));
    }

    #[test]
    fn test_parse_stream_folds_chunks() {
        let events = vec![
            json!({"candidates": [{"content": {"parts": [{"text": "Hel"}]}}]}),
            json!({"candidates": [{"content": {"parts": [{"text": "lo"}]}, "finishReason": "STOP"}],
                   "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2}}),
        ];
        let result = done(
            GeminiAdapter
                .parse(WireResponse::events(200, events), &config(DEFAULT_MODEL))
                .unwrap(),
        );
        assert_eq!(result.text, "Hello");
        assert_eq!(result.usage, Usage::new(4, 2));
    }

    #[test]
    fn test_count_tokens() {
        let config = config(DEFAULT_MODEL);
        let wire = GeminiAdapter.build_count_tokens(&context("Hi"), &config).unwrap();
        assert!(wire.url.ends_with(":countTokens"));
        assert_eq!(
            GeminiAdapter
                .parse_count_tokens(WireResponse::json(200, json!({"totalTokens": 17})))
                .unwrap(),
            17
        );
    }
}
