//! Client facade
//!
//! [`Client`] wires together credential resolution, the provider adapter,
//! the retrying transport and the usage accountant. It is cheap to clone;
//! clones and derived copies share one transport and one accountant.

mod config;

pub use config::ClientConfig;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::auth::CredentialResolver;
use crate::config::{self as settings, Settings};
use crate::conversation::{ConversationInfo, ConversationState, Turn};
use crate::error::{Error, Result};
use crate::provider::{
    Adapter, Capability, GenerationParams, GenerationRequest, GenerationResult, ImageInput,
    Parsed, Provider, ProviderAdapter, SafetySettings,
};
use crate::transport::{
    HttpTransport, MediaUploader, RetryPolicy, RetryingTransport, Transport, WaveSpeedUploader,
};
use crate::usage::{CostBreakdown, CountMethod, TokenReport, UsageAccountant, UsageStats};

/// Delay between polls of a pending task.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How long a task may stay pending before the call fails.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Stands in for a reply with no text so history never holds an empty turn.
pub const EMPTY_REPLY_PLACEHOLDER: &str = "(No text response)";

/// History text for a reply.
fn reply_text(result: &GenerationResult) -> String {
    if !result.text.trim().is_empty() {
        return result.text.clone();
    }
    match result.images.len() {
        0 => EMPTY_REPLY_PLACEHOLDER.to_string(),
        1 => "(Generated 1 image)".to_string(),
        n => format!("(Generated {} images)", n),
    }
}

/// Resilient session client for one provider and model.
#[derive(Clone)]
pub struct Client {
    config: Arc<ClientConfig>,
    adapter: Adapter,
    transport: RetryingTransport,
    accountant: Arc<UsageAccountant>,
    uploader: Option<Arc<dyn MediaUploader>>,
    reserve_buffer: usize,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Build a client for `model` with the default transport and settings.
    pub fn build(
        model: &str,
        explicit_key: Option<&str>,
        streaming: bool,
        caching: bool,
    ) -> Result<Client> {
        let mut builder = Client::builder(model).streaming(streaming).caching(caching);
        if let Some(key) = explicit_key {
            builder = builder.api_key(key);
        }
        builder.build()
    }

    pub fn builder(model: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(model)
    }

    /// Builder for a provider's configured (or built-in) default model.
    pub fn builder_for(provider: Provider) -> ClientBuilder {
        ClientBuilder {
            provider: Some(provider),
            ..ClientBuilder::new("")
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn provider(&self) -> Provider {
        self.config.provider()
    }

    pub fn model(&self) -> &str {
        self.config.model()
    }

    /// Derived client with a different system instruction, sharing usage totals.
    pub fn with_system_instruction(&self, instruction: impl Into<String>) -> Client {
        Client {
            config: Arc::new(self.config.with_system_instruction(instruction)),
            ..self.clone()
        }
    }

    /// Derived client with different safety thresholds, sharing usage totals.
    pub fn with_safety(&self, safety: SafetySettings) -> Client {
        Client {
            config: Arc::new(self.config.with_safety(safety)),
            ..self.clone()
        }
    }

    /// Single-shot generation. No history is kept.
    pub async fn generate(
        &self,
        prompt: impl Into<String>,
        params: GenerationParams,
    ) -> Result<GenerationResult> {
        let request = GenerationRequest::new(prompt, params);
        self.adapter.validate(&request, &self.config)?;

        let mut context = ConversationState::new();
        if let Some(system) = self.config.system_instruction() {
            context = context.with_system_instruction(system);
        }
        let context =
            context.append(Turn::user(request.prompt.clone()).with_images(request.images().len()));

        self.run(request, &context).await
    }

    /// One conversational exchange.
    ///
    /// Appends the prompt to `state`, trims the oldest exchanges until the
    /// history plus the reserved output fits the context window, sends it, and
    /// returns the result with the state extended by the reply. `state` itself
    /// is left untouched.
    pub async fn converse(
        &self,
        state: &ConversationState,
        prompt: impl Into<String>,
        params: GenerationParams,
    ) -> Result<(GenerationResult, ConversationState)> {
        let request = GenerationRequest::new(prompt, params);
        self.adapter.validate(&request, &self.config)?;

        let limits = self.adapter.limits(&self.config);
        let reserved = request.params.reserved_output.unwrap_or_else(|| {
            limits.clamp_max_tokens(request.params.max_tokens) as usize + self.reserve_buffer
        });
        let window = request.params.context_window.unwrap_or(limits.context_window);

        let mut context = state.clone();
        if context.system_instruction().is_none() {
            if let Some(system) = self.config.system_instruction() {
                context = context.with_system_instruction(system);
            }
        }
        context =
            context.append(Turn::user(request.prompt.clone()).with_images(request.images().len()));
        if window > 0 {
            context = context.trim_to_fit(reserved, window)?;
        }

        let result = self.run(request, &context).await?;

        let mut next = context
            .append(Turn::assistant(reply_text(&result)))
            .record_usage(&result.usage);
        if window > 0 {
            next = next.trim(reserved, window);
        }
        debug!(turns = next.len(), tokens = next.token_total(), "Conversation updated");
        Ok((result, next))
    }

    /// Token count from the provider's counting endpoint, falling back to
    /// the local estimate when there is none or the call fails.
    pub async fn count_tokens_exact(&self, text: &str) -> TokenReport {
        let context = ConversationState::new().append(Turn::user(text));
        let Some(request) = self.adapter.build_count_tokens(&context, &self.config) else {
            return TokenReport::estimate(text, self.model());
        };

        let counted = match self.transport.execute(&request, None).await {
            Ok(response) => self.adapter.parse_count_tokens(response),
            Err(e) => Err(e),
        };
        match counted {
            Ok(tokens) => TokenReport::new(text, self.model(), tokens, CountMethod::Provider),
            Err(e) => {
                warn!(model = self.model(), "Token counting failed, using estimate: {}", e);
                TokenReport::estimate(text, self.model())
            }
        }
    }

    /// Cumulative usage, zeroed in the same step when `reset` is set.
    pub fn usage(&self, reset: bool) -> UsageStats {
        self.accountant.take(reset)
    }

    /// Cost of the usage accumulated so far.
    pub fn cost(&self) -> CostBreakdown {
        self.accountant.snapshot().cost(self.model())
    }

    pub fn conversation_info(&self, state: &ConversationState) -> ConversationInfo {
        state.info(self.adapter.limits(&self.config).context_window)
    }

    async fn run(
        &self,
        request: GenerationRequest,
        context: &ConversationState,
    ) -> Result<GenerationResult> {
        let span = info_span!(
            "call",
            id = %Uuid::new_v4(),
            provider = %self.provider(),
            model = self.model(),
        );
        self.run_inner(request, context).instrument(span).await
    }

    async fn run_inner(
        &self,
        request: GenerationRequest,
        context: &ConversationState,
    ) -> Result<GenerationResult> {
        let cancel = request.params.cancel.clone();
        let request = self.upload_images(request, cancel.as_ref()).await?;

        let wire = self.adapter.build(&request, context, &self.config)?;
        let parsed = self
            .transport
            .execute_with(&wire, cancel.as_ref(), |response| {
                self.adapter.parse(response, &self.config)
            })
            .await?;
        let result = self.await_task(parsed, cancel.as_ref()).await?;

        self.accountant.record(&result.usage);
        info!(
            input_tokens = result.usage.input_tokens,
            output_tokens = result.usage.output_tokens,
            images = result.images.len(),
            stop_reason = result.stop_reason.as_deref().unwrap_or(""),
            "Call completed"
        );
        Ok(result)
    }

    /// Replace inline images with uploaded URLs for adapters that need them.
    async fn upload_images(
        &self,
        mut request: GenerationRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<GenerationRequest> {
        if !self.adapter.limits(&self.config).requires_image_urls {
            return Ok(request);
        }
        if !request
            .params
            .images
            .iter()
            .any(|i| matches!(i, ImageInput::Inline { .. }))
        {
            return Ok(request);
        }
        let uploader = self.uploader.as_ref().ok_or_else(|| {
            Error::Config(format!("{} needs image URLs but no uploader is configured", self.provider()))
        })?;

        let mut uploaded = Vec::with_capacity(request.params.images.len());
        for image in request.params.images {
            uploaded.push(match image {
                ImageInput::Inline { data, mime_type } => {
                    let url = uploader.upload(&data, &mime_type, cancel).await?;
                    debug!(bytes = data.len(), url = %url, "Uploaded inline image");
                    ImageInput::Url(url)
                }
                url => url,
            });
        }
        request.params.images = uploaded;
        Ok(request)
    }

    /// Poll a pending task until it finishes, fails, or runs out of time.
    async fn await_task(
        &self,
        mut parsed: Parsed,
        cancel: Option<&CancellationToken>,
    ) -> Result<GenerationResult> {
        let deadline = Instant::now() + self.poll_timeout;
        let mut polls = 0u32;

        loop {
            let poll = match parsed {
                Parsed::Done(result) => return Ok(result),
                Parsed::Pending(poll) => poll,
            };

            if Instant::now() >= deadline {
                return Err(Error::Timeout(self.poll_timeout));
            }
            match cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(self.poll_interval) => {}
                },
                None => tokio::time::sleep(self.poll_interval).await,
            }

            polls += 1;
            debug!(polls, url = %poll.url, "Polling task");
            let response = self.transport.execute(&poll, cancel).await?;
            parsed = self.adapter.parse(response, &self.config)?;
        }
    }
}

/// Step-by-step construction of a [`Client`].
pub struct ClientBuilder {
    model: String,
    provider: Option<Provider>,
    api_key: Option<String>,
    streaming: bool,
    caching: bool,
    capability: Option<Capability>,
    base_url: Option<String>,
    system_instruction: Option<String>,
    safety: Option<SafetySettings>,
    retry_policy: Option<RetryPolicy>,
    transport: Option<Arc<dyn Transport>>,
    uploader: Option<Arc<dyn MediaUploader>>,
    resolver: Option<CredentialResolver>,
    settings: Option<Settings>,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl ClientBuilder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            provider: None,
            api_key: None,
            streaming: false,
            caching: false,
            capability: None,
            base_url: None,
            system_instruction: None,
            safety: None,
            retry_policy: None,
            transport: None,
            uploader: None,
            resolver: None,
            settings: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn caching(mut self, caching: bool) -> Self {
        self.caching = caching;
        self
    }

    pub fn capability(mut self, capability: Capability) -> Self {
        self.capability = Some(capability);
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn safety(mut self, safety: SafetySettings) -> Self {
        self.safety = Some(safety);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn uploader(mut self, uploader: Arc<dyn MediaUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn resolver(mut self, resolver: CredentialResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Use these settings instead of loading the config file. Their
    /// provider `api_key` takes the config file's place in key resolution.
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<Client> {
        let injected = self.settings.is_some();
        let settings = match self.settings {
            Some(settings) => settings,
            None => settings::load()?,
        };

        let (provider, model) = match self.provider {
            Some(provider) if self.model.trim().is_empty() => {
                let model = settings
                    .section(provider.section())
                    .and_then(|s| s.default_model.clone())
                    .unwrap_or_else(|| provider.default_model().to_string());
                (provider, model)
            }
            _ => {
                let model = self.model.trim().to_string();
                if model.is_empty() {
                    return Err(Error::validation("model cannot be empty"));
                }
                (Provider::from_model(&model)?, model)
            }
        };

        let capability = self
            .capability
            .unwrap_or_else(|| provider.default_capability(&model));
        if !provider.supports(capability, &model) {
            return Err(Error::validation(format!(
                "{} does not support {}",
                model, capability
            )));
        }

        let mut resolver = self.resolver.unwrap_or_default();
        if injected {
            resolver = resolver.with_settings(settings.clone());
        }
        let (api_key, source) = resolver.resolve_with_source(provider, self.api_key.as_deref())?;

        let section = settings.section(provider.section());
        let base_url = self
            .base_url
            .or_else(|| section.and_then(|s| s.base_url.clone()))
            .unwrap_or_else(|| provider.default_base_url().to_string());
        url::Url::parse(&base_url)
            .map_err(|e| Error::Config(format!("invalid base URL '{}': {}", base_url, e)))?;

        let mut config = ClientConfig::new(provider, model, api_key)
            .with_capability(capability)
            .with_streaming(self.streaming)
            .with_caching(self.caching)
            .with_base_url(base_url);
        if let Some(instruction) = self.system_instruction {
            config = config.with_system_instruction(instruction);
        }
        if let Some(safety) = self.safety {
            config = config.with_safety(safety);
        }

        let policy = self
            .retry_policy
            .unwrap_or_else(|| settings.retry.to_policy());
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new()?),
        };

        let uploader = match self.uploader {
            Some(uploader) => Some(uploader),
            None if provider == Provider::WaveSpeed => {
                let uploader: Arc<dyn MediaUploader> = Arc::new(WaveSpeedUploader::new(
                    HttpTransport::new()?,
                    config.base_url(),
                    config.api_key().clone(),
                    policy.clone(),
                ));
                Some(uploader)
            }
            None => None,
        };

        info!(
            provider = %provider,
            model = config.model(),
            capability = %capability,
            streaming = config.streaming(),
            caching = config.caching(),
            key_source = ?source,
            "Client ready"
        );

        Ok(Client {
            adapter: provider.adapter(),
            config: Arc::new(config),
            transport: RetryingTransport::new(transport, policy),
            accountant: Arc::new(UsageAccountant::new()),
            uploader,
            reserve_buffer: settings.conversation.reserve_buffer,
            poll_interval: self.poll_interval,
            poll_timeout: self.poll_timeout,
        })
    }
}
