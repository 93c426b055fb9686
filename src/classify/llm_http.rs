//! OpenAI-compatible chat-completions backend over blocking HTTP.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classify::llm::LlmBackend;
use crate::error::{ConfigError, ExternalError};

const BACKEND_ID: &str = "http-llm";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Chat-completions client with a per-request timeout.
#[derive(Debug)]
pub struct HttpLlmBackend {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

impl HttpLlmBackend {
    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Unsupported`] if the TLS client cannot be built.
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Unsupported {
                reason: format!("cannot build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
            timeout,
        })
    }

    fn transport_error(&self, e: &reqwest::Error) -> ExternalError {
        if e.is_timeout() {
            ExternalError::Timeout {
                backend: BACKEND_ID.to_string(),
                duration_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }
        } else {
            ExternalError::Network {
                backend: BACKEND_ID.to_string(),
                message: e.to_string(),
            }
        }
    }
}

fn status_error(status: StatusCode) -> ExternalError {
    let backend = BACKEND_ID.to_string();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ExternalError::Unauthorized {
            backend,
            status: status.as_u16(),
        },
        StatusCode::TOO_MANY_REQUESTS => ExternalError::RateLimited { backend },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ExternalError::Timeout {
            backend,
            duration_ms: 0,
        },
        s if s.is_server_error() => ExternalError::Unavailable { backend },
        s => ExternalError::InvalidResponse {
            backend,
            message: format!("unexpected status {s}"),
        },
    }
}

impl LlmBackend for HttpLlmBackend {
    fn backend_id(&self) -> &str {
        BACKEND_ID
    }

    fn complete(&self, prompt: &str) -> Result<String, ExternalError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: 4,
            temperature: 0.0,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        debug!(status = status.as_u16(), "LLM response");
        if !status.is_success() {
            return Err(status_error(status));
        }

        let body: ChatResponse = response.json().map_err(|e| {
            if e.is_timeout() {
                self.transport_error(&e)
            } else {
                ExternalError::InvalidResponse {
                    backend: BACKEND_ID.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ExternalError::InvalidResponse {
                backend: BACKEND_ID.to_string(),
                message: "no choices in response".to_string(),
            })
    }
}
