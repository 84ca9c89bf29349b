//! WaveSpeed task API adapter (Seedream and Qwen image models).
//!
//! Generation is asynchronous: the submit call returns a task id, and the
//! result endpoint is polled until the task completes or fails.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::media::snap_dimension;
use super::{
    validate_request, AdapterLimits, Capability, GenerationRequest, GenerationResult, ImageInput,
    ImageOutput, Parsed, ProviderAdapter,
};
use crate::client::ClientConfig;
use crate::conversation::ConversationState;
use crate::error::{Error, Result};
use crate::transport::{WireRequest, WireResponse};
use crate::usage::Usage;

pub(crate) const DEFAULT_MODEL: &str = "bytedance/seedream-v4";

const SUBMIT_TIMEOUT: Duration = Duration::from_secs(60);
const POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest seed the API accepts; larger values are reduced modulo this.
const SEED_MODULUS: i64 = 9_999_999_999;

const DEFAULT_OUTPUT_FORMAT: &str = "jpeg";

/// Models served through the task API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaveSpeedModel {
    SeedreamV4,
    SeedreamV4Edit,
    SeedreamV4Sequential,
    SeedreamV4EditSequential,
    QwenImage,
    QwenImageEdit,
    QwenImageEditPlus,
}

impl WaveSpeedModel {
    pub const ALL: [WaveSpeedModel; 7] = [
        WaveSpeedModel::SeedreamV4,
        WaveSpeedModel::SeedreamV4Edit,
        WaveSpeedModel::SeedreamV4Sequential,
        WaveSpeedModel::SeedreamV4EditSequential,
        WaveSpeedModel::QwenImage,
        WaveSpeedModel::QwenImageEdit,
        WaveSpeedModel::QwenImageEditPlus,
    ];

    /// Model path, as used in `/api/v3/{id}`.
    pub fn id(&self) -> &'static str {
        match self {
            WaveSpeedModel::SeedreamV4 => "bytedance/seedream-v4",
            WaveSpeedModel::SeedreamV4Edit => "bytedance/seedream-v4/edit",
            WaveSpeedModel::SeedreamV4Sequential => "bytedance/seedream-v4/sequential",
            WaveSpeedModel::SeedreamV4EditSequential => "bytedance/seedream-v4/edit-sequential",
            WaveSpeedModel::QwenImage => "wavespeed-ai/qwen-image/text-to-image",
            WaveSpeedModel::QwenImageEdit => "wavespeed-ai/qwen-image/edit",
            WaveSpeedModel::QwenImageEditPlus => "wavespeed-ai/qwen-image/edit-plus",
        }
    }

    pub fn from_model(model: &str) -> Option<Self> {
        let model = model.trim().trim_matches('/');
        Self::ALL.into_iter().find(|m| m.id() == model)
    }

    pub fn capability(&self) -> Capability {
        match self {
            WaveSpeedModel::SeedreamV4
            | WaveSpeedModel::SeedreamV4Sequential
            | WaveSpeedModel::QwenImage => Capability::ImageGenerate,
            WaveSpeedModel::SeedreamV4Edit
            | WaveSpeedModel::SeedreamV4EditSequential
            | WaveSpeedModel::QwenImageEdit
            | WaveSpeedModel::QwenImageEditPlus => Capability::ImageEdit,
        }
    }

    /// Accepted reference image count.
    pub fn image_range(&self) -> (usize, usize) {
        match self {
            WaveSpeedModel::SeedreamV4
            | WaveSpeedModel::SeedreamV4Sequential
            | WaveSpeedModel::QwenImage => (0, 0),
            WaveSpeedModel::SeedreamV4Edit => (1, 10),
            WaveSpeedModel::SeedreamV4EditSequential => (0, 10),
            WaveSpeedModel::QwenImageEdit => (1, 1),
            WaveSpeedModel::QwenImageEditPlus => (1, 3),
        }
    }

    fn is_qwen(&self) -> bool {
        matches!(
            self,
            WaveSpeedModel::QwenImage
                | WaveSpeedModel::QwenImageEdit
                | WaveSpeedModel::QwenImageEditPlus
        )
    }

    fn is_sequential(&self) -> bool {
        matches!(
            self,
            WaveSpeedModel::SeedreamV4Sequential | WaveSpeedModel::SeedreamV4EditSequential
        )
    }

    /// `(min, max, default)` for each side of the output.
    fn size_range(&self) -> (u32, u32, u32) {
        if self.is_qwen() {
            (256, 1536, 1024)
        } else {
            (1024, 4096, 2048)
        }
    }

    /// `size` field for the payload. Edit models only send one when asked.
    fn size(&self, width: Option<u32>, height: Option<u32>) -> Option<String> {
        let (min, max, default) = self.size_range();
        let explicit = width.is_some() && height.is_some();
        if !explicit && self.capability() == Capability::ImageEdit && self.is_qwen() {
            return None;
        }
        let w = snap_dimension(width.unwrap_or(default), min, max, 8);
        let h = snap_dimension(height.unwrap_or(default), min, max, 8);
        Some(format!("{}*{}", w, h))
    }
}

/// Reduce a seed into the accepted range. -1 (random) passes through.
pub(crate) fn normalize_seed(seed: i64) -> i64 {
    if seed == -1 {
        -1
    } else {
        seed.rem_euclid(SEED_MODULUS)
    }
}

/// Adapter for `POST /api/v3/{model}` plus result polling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaveSpeedAdapter;

fn model_for(config: &ClientConfig) -> Result<WaveSpeedModel> {
    WaveSpeedModel::from_model(config.model()).ok_or_else(|| {
        Error::validation(format!("unsupported WaveSpeed model '{}'", config.model()))
    })
}

fn image_urls(images: &[ImageInput]) -> Result<Vec<&str>> {
    images
        .iter()
        .map(|image| match image {
            ImageInput::Url(url) => Ok(url.as_str()),
            ImageInput::Inline { .. } => Err(Error::validation(
                "WaveSpeed needs image URLs; upload inline images first",
            )),
        })
        .collect()
}

/// `{code, message, data}` envelope around every task API response.
#[derive(Debug, Deserialize)]
struct Envelope {
    code: Option<i64>,
    message: Option<String>,
    data: Option<TaskData>,
}

#[derive(Debug, Deserialize)]
struct TaskData {
    id: Option<String>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    outputs: Vec<String>,
    #[serde(default)]
    has_nsfw_contents: Vec<bool>,
    error: Option<String>,
    model: Option<String>,
}

impl WaveSpeedAdapter {
    fn poll_request(&self, config: &ClientConfig, task_id: &str) -> WireRequest {
        WireRequest::get(format!(
            "{}/api/v2/predictions/{}/result",
            config.base_url(),
            task_id
        ))
        .header("authorization", format!("Bearer {}", config.api_key().expose()))
        .with_timeout(POLL_TIMEOUT)
    }
}

impl ProviderAdapter for WaveSpeedAdapter {
    fn limits(&self, config: &ClientConfig) -> AdapterLimits {
        let (min_images, max_images) = WaveSpeedModel::from_model(config.model())
            .map(|m| m.image_range())
            .unwrap_or((0, 0));
        AdapterLimits {
            min_images,
            max_images,
            temperature_range: (0.0, 0.0),
            default_temperature: 0.0,
            max_output_tokens: 1,
            default_max_tokens: 1,
            context_window: 0,
            requires_image_urls: true,
        }
    }

    /// Builds the submit request from the prompt alone; history is not sent.
    fn build(
        &self,
        request: &GenerationRequest,
        _context: &ConversationState,
        config: &ClientConfig,
    ) -> Result<WireRequest> {
        let model = model_for(config)?;
        validate_request(request, &self.limits(config), config)?;

        let options = &request.params.image;
        let urls = image_urls(request.images())?;
        let mut payload = Map::new();

        let prompt = if model.is_sequential() {
            let count = options.max_images.unwrap_or(1).clamp(1, 15);
            payload.insert("max_images".into(), json!(count));
            format!("{}. Generate a set of {} consecutive.", request.prompt.trim_end_matches('.'), count)
        } else {
            request.prompt.clone()
        };
        payload.insert("prompt".into(), json!(prompt));

        match model {
            WaveSpeedModel::QwenImageEdit => {
                payload.insert("image".into(), json!(urls[0]));
            }
            _ if !urls.is_empty() => {
                payload.insert("images".into(), json!(urls));
            }
            _ => {}
        }

        if let Some(size) = model.size(options.width, options.height) {
            payload.insert("size".into(), json!(size));
        }

        if model.is_qwen() {
            payload.insert("seed".into(), json!(normalize_seed(options.seed.unwrap_or(-1))));
            payload.insert(
                "output_format".into(),
                json!(options.output_format.as_deref().unwrap_or(DEFAULT_OUTPUT_FORMAT)),
            );
        }

        payload.insert("enable_base64_output".into(), json!(false));
        payload.insert("enable_sync_mode".into(), json!(false));

        debug!(model = model.id(), images = urls.len(), "Built WaveSpeed task");
        Ok(WireRequest::post(
            format!("{}/api/v3/{}", config.base_url(), model.id()),
            Value::Object(payload),
        )
        .header("authorization", format!("Bearer {}", config.api_key().expose()))
        .with_timeout(SUBMIT_TIMEOUT))
    }

    fn parse(&self, response: WireResponse, config: &ClientConfig) -> Result<Parsed> {
        let envelope: Envelope = serde_json::from_value(response.into_json()?)
            .map_err(|e| Error::malformed(format!("unexpected WaveSpeed response: {}", e)))?;

        match envelope.code {
            Some(200) | None => {}
            Some(401) => {
                return Err(Error::Auth(
                    envelope.message.unwrap_or_else(|| "invalid API key".to_string()),
                ))
            }
            Some(code) => {
                return Err(Error::validation(format!(
                    "WaveSpeed error {}: {}",
                    code,
                    envelope.message.unwrap_or_default()
                )))
            }
        }

        let data = envelope
            .data
            .ok_or_else(|| Error::malformed("WaveSpeed response has no data"))?;

        match data.status.as_str() {
            "created" | "processing" => {
                let task_id = data
                    .id
                    .ok_or_else(|| Error::malformed("pending WaveSpeed task has no id"))?;
                debug!(task_id = %task_id, status = %data.status, "Task pending");
                Ok(Parsed::Pending(self.poll_request(config, &task_id)))
            }
            "completed" => {
                if data.outputs.is_empty() {
                    return Err(Error::malformed("No images were generated"));
                }
                if !data.has_nsfw_contents.is_empty() && data.has_nsfw_contents.iter().all(|f| *f) {
                    return Err(Error::blocked(
                        "nsfw",
                        "every generated image was flagged as NSFW",
                    ));
                }
                Ok(Parsed::Done(GenerationResult {
                    text: String::new(),
                    images: data
                        .outputs
                        .into_iter()
                        .map(|url| ImageOutput::Url { url })
                        .collect(),
                    usage: Usage::default(),
                    stop_reason: Some(data.status),
                    model: data.model.unwrap_or_else(|| config.model().to_string()),
                    task_id: data.id,
                }))
            }
            "failed" => Err(Error::ServerError {
                status: 500,
                message: format!(
                    "Task failed: {}",
                    data.error.unwrap_or_else(|| "Unknown error".to_string())
                ),
            }),
            other => Err(Error::malformed(format!("unknown task status '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ApiKey;
    use crate::provider::{GenerationParams, ImageOptions, Provider};

    fn config(model: &str) -> ClientConfig {
        ClientConfig::new(Provider::WaveSpeed, model, ApiKey::new("ws-test"))
    }

    fn build(model: &str, params: GenerationParams) -> Result<Value> {
        let request = GenerationRequest::new("A red fox", params);
        WaveSpeedAdapter
            .build(&request, &ConversationState::new(), &config(model))
            .map(|wire| wire.body.unwrap_or(Value::Null))
    }

    #[test]
    fn test_model_lookup() {
        for model in WaveSpeedModel::ALL {
            assert_eq!(WaveSpeedModel::from_model(model.id()), Some(model));
        }
        assert_eq!(WaveSpeedModel::from_model("bytedance/seedream-v3"), None);
    }

    #[test]
    fn test_seed_normalisation() {
        assert_eq!(normalize_seed(-1), -1);
        assert_eq!(normalize_seed(42), 42);
        assert_eq!(normalize_seed(SEED_MODULUS + 5), 5);
    }

    #[test]
    fn test_seedream_size_is_snapped() {
        let params = GenerationParams::new().image_options(ImageOptions {
            width: Some(5000),
            height: Some(1027),
            ..ImageOptions::default()
        });
        let body = build("bytedance/seedream-v4", params).unwrap();
        assert_eq!(body["size"], "4096*1024");
        assert_eq!(body["enable_sync_mode"], json!(false));
        assert!(body.get("seed").is_none());
    }

    #[test]
    fn test_sequential_prompt_and_count() {
        let params = GenerationParams::new().image_options(ImageOptions {
            max_images: Some(40),
            ..ImageOptions::default()
        });
        let body = build("bytedance/seedream-v4/sequential", params).unwrap();
        assert_eq!(body["max_images"], json!(15));
        assert_eq!(body["prompt"], "A red fox. Generate a set of 15 consecutive.");
    }

    #[test]
    fn test_qwen_edit_uses_single_image() {
        let params = GenerationParams::new().image(ImageInput::url("https://cdn.example/a.png"));
        let body = build("wavespeed-ai/qwen-image/edit", params).unwrap();
        assert_eq!(body["image"], "https://cdn.example/a.png");
        assert_eq!(body["seed"], json!(-1));
        assert_eq!(body["output_format"], "jpeg");
        assert!(body.get("size").is_none());
    }

    #[test]
    fn test_image_count_limits() {
        let too_many = (0..4).fold(GenerationParams::new(), |p, i| {
            p.image(ImageInput::url(format!("https://cdn.example/{}.png", i)))
        });
        let err = build("wavespeed-ai/qwen-image/edit-plus", too_many).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = build("bytedance/seedream-v4/edit", GenerationParams::new()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_inline_images_are_rejected() {
        let params = GenerationParams::new().image(ImageInput::inline(vec![1, 2, 3], "image/png"));
        let err = build("bytedance/seedream-v4/edit", params).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_parse_pending_then_completed() {
        let config = config("bytedance/seedream-v4");
        let pending = WireResponse::json(
            200,
            json!({"code": 200, "message": "success", "data": {"id": "task-1", "status": "created"}}),
        );
        let Parsed::Pending(poll) = WaveSpeedAdapter.parse(pending, &config).unwrap() else {
            panic!("expected a pending task");
        };
        assert!(poll.url.ends_with("/api/v2/predictions/task-1/result"));
        assert_eq!(poll.header_value("authorization"), Some("Bearer ws-test"));

        let completed = WireResponse::json(
            200,
            json!({"code": 200, "data": {
                "id": "task-1",
                "status": "completed",
                "outputs": ["https://cdn.example/out.png"],
                "has_nsfw_contents": [false]
            }}),
        );
        let Parsed::Done(result) = WaveSpeedAdapter.parse(completed, &config).unwrap() else {
            panic!("expected a completed task");
        };
        assert_eq!(result.image_urls(), vec!["https://cdn.example/out.png"]);
        assert_eq!(result.task_id.as_deref(), Some("task-1"));
    }

    #[test]
    fn test_parse_failures() {
        let config = config("bytedance/seedream-v4");
        let failed = WireResponse::json(
            200,
            json!({"code": 200, "data": {"id": "t", "status": "failed", "error": "boom"}}),
        );
        let err = WaveSpeedAdapter.parse(failed, &config).unwrap_err();
        assert!(err.to_string().contains("Task failed: boom"));

        let nsfw = WireResponse::json(
            200,
            json!({"code": 200, "data": {"id": "t", "status": "completed",
                   "outputs": ["u"], "has_nsfw_contents": [true]}}),
        );
        assert!(matches!(
            WaveSpeedAdapter.parse(nsfw, &config).unwrap_err(),
            Error::Blocked { .. }
        ));

        let rejected = WireResponse::json(200, json!({"code": 400, "message": "bad size"}));
        assert!(matches!(
            WaveSpeedAdapter.parse(rejected, &config).unwrap_err(),
            Error::Validation(_)
        ));
    }
}
