//! Chat-completions client for OpenAI-compatible endpoints.
//!
//! - Bearer auth, JSON request and response bodies
//! - Retries follow `GenerationError::is_retryable`: network errors, timeouts,
//!   429 and 5xx responses
//! - `retry-after` honoured on 429 (capped), exponential backoff otherwise
//! - Token and cost accounting across all calls

use crate::client::RateLimiter;
use crate::models::{GenerationError, LlmApiError, LlmConfig, ModelSpec};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Longest wait honoured from a `retry-after` header.
const MAX_RETRY_AFTER_SECS: f64 = 300.0;

/// Longest exponential backoff between attempts.
const MAX_BACKOFF_SECS: u64 = 60;

/// Message in a chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Response from a completion request.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Generated content
    pub content: String,
    /// Model used (may differ from requested)
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Estimated cost in USD
    pub cost_usd: f64,
    /// Request duration
    pub duration: Duration,
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct LlmClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
    max_retries: u32,
    rate_limiter: Arc<RateLimiter>,
    total_input_tokens: AtomicU64,
    total_output_tokens: AtomicU64,
    total_cost_micros: AtomicU64, // microdollars for atomic ops
}

impl LlmClient {
    /// Create a client from endpoint settings and a resolved API key.
    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self, GenerationError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout,
            max_retries: config.max_retries.max(1),
            rate_limiter: Arc::new(RateLimiter::new()),
            total_input_tokens: AtomicU64::new(0),
            total_output_tokens: AtomicU64::new(0),
            total_cost_micros: AtomicU64::new(0),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    fn headers(&self) -> Result<HeaderMap, GenerationError> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| GenerationError::Api(LlmApiError::AuthenticationFailed))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn calculate_cost(model: &ModelSpec, input_tokens: u32, output_tokens: u32) -> f64 {
        let input_cost = (input_tokens as f64 / 1_000_000.0) * model.input_price_per_1m;
        let output_cost = (output_tokens as f64 / 1_000_000.0) * model.output_price_per_1m;
        input_cost + output_cost
    }

    fn backoff(attempt: u32) -> Duration {
        Duration::from_secs(2u64.saturating_pow(attempt).min(MAX_BACKOFF_SECS))
    }

    /// Delay before the next attempt: the server's hint when it gave one,
    /// exponential backoff otherwise.
    fn retry_delay(error: &GenerationError, attempt: u32) -> Duration {
        error
            .retry_after()
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or_else(|| Self::backoff(attempt))
    }

    /// Complete a chat request using the model's token and temperature settings.
    pub async fn complete(
        &self,
        model: &ModelSpec,
        messages: Vec<Message>,
    ) -> Result<CompletionResponse, GenerationError> {
        let start = Instant::now();
        let request = ChatCompletionRequest {
            model: &model.id,
            messages,
            max_tokens: model.max_tokens,
            temperature: model.temperature,
        };
        let url = format!("{}/chat/completions", self.base_url);
        let headers = self.headers()?;
        let mut last_error: Option<GenerationError> = None;

        for attempt in 0..self.max_retries {
            self.rate_limiter.wait_if_needed(&model.id).await;

            let error = match self.attempt(model, &url, &headers, &request).await {
                Ok(body) => return self.account(model, body, start),
                Err(e) => e,
            };

            if !error.is_retryable() || attempt + 1 == self.max_retries {
                return Err(error);
            }
            let delay = Self::retry_delay(&error, attempt);
            debug!(
                attempt = attempt,
                delay_secs = delay.as_secs_f64(),
                error = %error,
                "Retrying request"
            );
            last_error = Some(error);
            tokio::time::sleep(delay).await;
        }

        Err(last_error.unwrap_or_else(|| {
            GenerationError::Api(LlmApiError::MaxRetriesExceeded {
                attempts: self.max_retries,
                last_error: "Unknown error".to_string(),
            })
        }))
    }

    /// Send one request and classify any failure.
    async fn attempt(
        &self,
        model: &ModelSpec,
        url: &str,
        headers: &HeaderMap,
        request: &ChatCompletionRequest<'_>,
    ) -> Result<ChatCompletionResponse, GenerationError> {
        let response = self
            .client
            .post(url)
            .headers(headers.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout(self.timeout)
                } else {
                    GenerationError::Network(e)
                }
            })?;

        let status = response.status().as_u16();
        self.rate_limiter
            .record_request(&model.id, status, response.headers());

        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<f64>().ok())
                .filter(|s| s.is_finite() && *s >= 0.0)
                .map_or(1.0, |s| s.min(MAX_RETRY_AFTER_SECS));
            return Err(GenerationError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = match status {
                401 => LlmApiError::AuthenticationFailed,
                404 => LlmApiError::ModelNotFound(model.id.clone()),
                _ => LlmApiError::ApiError {
                    status,
                    message: serde_json::from_str::<ApiErrorResponse>(&body)
                        .map(|e| e.error.message)
                        .unwrap_or(body),
                },
            };
            return Err(GenerationError::Api(error));
        }

        response
            .json()
            .await
            .map_err(|e| GenerationError::ParseError(format!("Failed to parse response: {e}")))
    }

    /// Turn a successful body into a response and add it to the totals.
    fn account(
        &self,
        model: &ModelSpec,
        body: ChatCompletionResponse,
        start: Instant,
    ) -> Result<CompletionResponse, GenerationError> {
        let content = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GenerationError::ParseError("No choices in response".to_string()))?
            .message
            .content
            .unwrap_or_default();

        let usage = body.usage.unwrap_or_default();
        let cost = Self::calculate_cost(model, usage.prompt_tokens, usage.completion_tokens);

        self.total_input_tokens
            .fetch_add(usage.prompt_tokens as u64, Ordering::Relaxed);
        self.total_output_tokens
            .fetch_add(usage.completion_tokens as u64, Ordering::Relaxed);
        self.total_cost_micros
            .fetch_add((cost * 1_000_000.0) as u64, Ordering::Relaxed);

        Ok(CompletionResponse {
            content,
            model: body.model.unwrap_or_else(|| model.id.clone()),
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            cost_usd: cost,
            duration: start.elapsed(),
        })
    }

    /// Complete with a system and a user prompt.
    pub async fn complete_with_system(
        &self,
        model: &ModelSpec,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<CompletionResponse, GenerationError> {
        let messages = vec![Message::system(system_prompt), Message::user(user_prompt)];
        self.complete(model, messages).await
    }

    /// Total cost tracked across all calls.
    pub fn total_cost_usd(&self) -> f64 {
        self.total_cost_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    /// Total (input, output) tokens tracked.
    pub fn total_tokens(&self) -> (u64, u64) {
        (
            self.total_input_tokens.load(Ordering::Relaxed),
            self.total_output_tokens.load(Ordering::Relaxed),
        )
    }
}
