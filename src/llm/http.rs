//! HTTP chat-completions backend.
//!
//! One shared `reqwest::Client` per process. Each invocation makes up to
//! three attempts with a 300 s per-attempt timeout; 429, 5xx and transport
//! failures retry with exponential backoff (base 2 s, cap 30 s, full
//! jitter), any other 4xx fails immediately.

use crate::errors::LlmError;
use crate::llm::{LlmBackend, LlmInvocation};
use async_trait::async_trait;
use rand::Rng;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Per-attempt request timeout.
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(300);
/// Maximum attempts within this single backend.
const MAX_ATTEMPTS: u32 = 3;
/// Exponential backoff base.
const BACKOFF_BASE: Duration = Duration::from_secs(2);
/// Backoff ceiling.
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Chat-completions backend bound to one endpoint and API key; the model
/// name comes from each invocation so the cascade can reuse one instance
/// for primary and fallback models.
pub struct HttpBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpBackend {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| LlmError::Misconfiguration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint_url(base_url),
            api_key: api_key.into(),
        })
    }

    async fn attempt(&self, inv: &LlmInvocation) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: &inv.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &inv.prompt,
            }],
            max_tokens: inv.max_tokens,
            temperature: 0.0,
            stream: false,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(ATTEMPT_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        seconds: ATTEMPT_TIMEOUT.as_secs(),
                    }
                } else {
                    LlmError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited(format!("{status}")));
        }
        if status.is_server_error() {
            return Err(LlmError::ServerError(format!("{status}")));
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(LlmError::Auth(format!("{status}")));
        }
        if status.is_client_error() {
            return Err(LlmError::Transport(format!("client error: {status}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(format!("failed to parse response: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.is_empty())
            .ok_or(LlmError::MalformedResponse)?;

        Ok(content)
    }
}

#[async_trait]
impl LlmBackend for HttpBackend {
    fn label(&self) -> String {
        "http".to_string()
    }

    async fn invoke(
        &self,
        inv: &LlmInvocation,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }

            debug!(
                model = %inv.model,
                attempt,
                max_tokens = inv.max_tokens,
                "Sending chat-completions request"
            );

            let err = match self.attempt(inv).await {
                Ok(content) => return Ok(content),
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= MAX_ATTEMPTS {
                return Err(err);
            }

            let delay = backoff_delay(attempt);
            warn!(
                model = %inv.model,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retryable failure, backing off"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            }
        }
    }
}

/// Full-jitter backoff: uniform in `[0, min(cap, base · 2^(attempt−1))]`.
fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE.saturating_mul(1 << (attempt - 1).min(16));
    let ceiling = exp.min(BACKOFF_CAP);
    let ms = rand::thread_rng().gen_range(0..=ceiling.as_millis() as u64);
    Duration::from_millis(ms)
}

/// Accept either an API base or a full chat-completions URL.
fn endpoint_url(base_url: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    if trimmed.ends_with("/chat/completions") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/chat/completions")
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u64,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn invocation(model: &str) -> LlmInvocation {
        LlmInvocation {
            prompt: "describe the parser".to_string(),
            model: model.to_string(),
            max_tokens: 512,
        }
    }

    fn chat_body(content: &str) -> serde_json::Value {
        json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        })
    }

    #[test]
    fn endpoint_url_appends_suffix_once() {
        assert_eq!(
            endpoint_url("https://api.example.com/v1"),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            endpoint_url("https://api.example.com/v1/chat/completions"),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            endpoint_url("https://api.example.com/v1/"),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn backoff_respects_cap() {
        for attempt in 1..=10 {
            let delay = backoff_delay(attempt);
            assert!(delay <= BACKOFF_CAP, "attempt {attempt} exceeded cap");
        }
    }

    #[tokio::test]
    async fn success_extracts_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({
                "model": "main-model",
                "temperature": 0.0,
                "stream": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("# Parser\n")))
            .mount(&server)
            .await;

        let backend = HttpBackend::new(&format!("{}/v1", server.uri()), "test-key").unwrap();
        let out = backend
            .invoke(&invocation("main-model"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, "# Parser\n");
    }

    #[tokio::test]
    async fn server_errors_retry_up_to_three_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let backend = HttpBackend::new(&format!("{}/v1", server.uri()), "k").unwrap();
        let err = backend
            .invoke(&invocation("m"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::ServerError(_)));
    }

    #[tokio::test]
    async fn recovery_after_one_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("recovered")))
            .mount(&server)
            .await;

        let backend = HttpBackend::new(&format!("{}/v1", server.uri()), "k").unwrap();
        let out = backend
            .invoke(&invocation("m"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, "recovered");
    }

    #[tokio::test]
    async fn client_errors_do_not_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let backend = HttpBackend::new(&format!("{}/v1", server.uri()), "k").unwrap();
        let err = backend
            .invoke(&invocation("m"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Transport(_)));
    }

    #[tokio::test]
    async fn unauthorized_maps_to_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let backend = HttpBackend::new(&format!("{}/v1", server.uri()), "k").unwrap();
        let err = backend
            .invoke(&invocation("m"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Auth(_)));
    }

    #[tokio::test]
    async fn empty_content_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("")))
            .mount(&server)
            .await;

        let backend = HttpBackend::new(&format!("{}/v1", server.uri()), "k").unwrap();
        let err = backend
            .invoke(&invocation("m"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::MalformedResponse));
    }
}
