//! OpenAI-compatible chat-completions client
//!
//! Sends a single non-streaming completion request to an endpoint and
//! classifies every failure into the closed error taxonomy so the
//! executor can decide between retry, failover, and fast-fail.

use crate::endpoints::{AuthKind, Endpoint};
use crate::error::{RouteError, RouteResult};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Token accounting reported by the endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// One successful completion.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub usage: TokenUsage,
    pub latency_ms: u64,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Thin wrapper over a shared reqwest client.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
}

impl ChatClient {
    pub fn new() -> RouteResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| RouteError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    /// Issue one chat completion against `endpoint`.
    ///
    /// The call is bounded by `timeout` and aborts promptly when `cancel`
    /// fires; cancellation wins over any in-flight I/O.
    pub async fn complete(
        &self,
        endpoint: &Endpoint,
        prompt: &str,
        max_tokens: u32,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> RouteResult<ChatOutcome> {
        let url = format!("{}/chat/completions", endpoint.base_url());
        let body = ChatCompletionBody {
            model: endpoint.model(),
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: endpoint.temperature(),
            max_tokens,
            stream: false,
        };

        let mut request = self.http.post(&url).json(&body);
        if endpoint.auth() == AuthKind::Bearer {
            if let Some(token) = endpoint.bearer_token() {
                request = request.bearer_auth(token);
            }
        }

        tracing::debug!(
            endpoint_name = %endpoint.name(),
            url = %url,
            prompt_length = prompt.len(),
            max_tokens,
            timeout_ms = timeout.as_millis() as u64,
            "Issuing chat completion"
        );

        let started = Instant::now();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(RouteError::Cancelled),
            result = tokio::time::timeout(timeout, self.exchange(endpoint, request)) => {
                match result {
                    Ok(inner) => inner,
                    Err(_) => {
                        return Err(RouteError::Timeout {
                            endpoint: endpoint.name().to_string(),
                            timeout_ms: timeout.as_millis() as u64,
                        });
                    }
                }
            }
        }?;

        let latency_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            endpoint_name = %endpoint.name(),
            response_length = outcome.0.len(),
            latency_ms,
            "Chat completion succeeded"
        );

        Ok(ChatOutcome {
            content: outcome.0,
            usage: outcome.1,
            latency_ms,
        })
    }

    async fn exchange(
        &self,
        endpoint: &Endpoint,
        request: reqwest::RequestBuilder,
    ) -> RouteResult<(String, TokenUsage)> {
        let name = endpoint.name().to_string();

        let response = request.send().await.map_err(|e| classify_reqwest(&name, e))?;
        let status = response.status();

        if !status.is_success() {
            let detail = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(512)
                .collect::<String>();

            return Err(if status.as_u16() == 429 {
                RouteError::Capacity { endpoint: name }
            } else if status.is_server_error() {
                RouteError::Upstream5xx {
                    endpoint: name,
                    status: status.as_u16(),
                    detail,
                }
            } else {
                RouteError::Upstream4xx {
                    endpoint: name,
                    status: status.as_u16(),
                    detail,
                }
            });
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| classify_reqwest(&name, e))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or_else(|| RouteError::Network {
                endpoint: name,
                detail: "response contained no message content".to_string(),
            })?;

        Ok((content, parsed.usage.unwrap_or_default()))
    }
}

fn classify_reqwest(endpoint: &str, error: reqwest::Error) -> RouteError {
    if error.is_timeout() {
        RouteError::Timeout {
            endpoint: endpoint.to_string(),
            timeout_ms: 0,
        }
    } else {
        RouteError::Network {
            endpoint: endpoint.to_string(),
            detail: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;
    use crate::endpoints::test_support::two_endpoint_config;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn endpoint_for(server: &MockServer) -> Endpoint {
        let config = two_endpoint_config();
        let descriptor = EndpointConfig {
            base_url: format!("{}/v1", server.uri()),
            ..config.endpoints[0].clone()
        };
        Endpoint::from_config(&descriptor, &config.breaker).unwrap()
    }

    fn completion_json(content: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        })
    }

    #[tokio::test]
    async fn test_complete_success_parses_content_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(serde_json::json!({"stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_json("hello")))
            .mount(&server)
            .await;

        let endpoint = endpoint_for(&server).await;
        let client = ChatClient::new().unwrap();
        let outcome = client
            .complete(
                &endpoint,
                "hi",
                256,
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.content, "hello");
        assert_eq!(outcome.usage.total_tokens, 15);
    }

    #[tokio::test]
    async fn test_429_maps_to_capacity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let endpoint = endpoint_for(&server).await;
        let client = ChatClient::new().unwrap();
        let err = client
            .complete(
                &endpoint,
                "hi",
                256,
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "capacity");
    }

    #[tokio::test]
    async fn test_5xx_maps_to_upstream_5xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let endpoint = endpoint_for(&server).await;
        let client = ChatClient::new().unwrap();
        let err = client
            .complete(
                &endpoint,
                "hi",
                256,
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        match err {
            RouteError::Upstream5xx { status, detail, .. } => {
                assert_eq!(status, 503);
                assert!(detail.contains("overloaded"));
            }
            other => panic!("expected Upstream5xx, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_404_maps_to_upstream_4xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let endpoint = endpoint_for(&server).await;
        let client = ChatClient::new().unwrap();
        let err = client
            .complete(
                &endpoint,
                "hi",
                256,
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "upstream_4xx");
    }

    #[tokio::test]
    async fn test_connection_refused_maps_to_network() {
        let config = two_endpoint_config();
        // Port 9 (discard) is not listening.
        let descriptor = EndpointConfig {
            base_url: "http://127.0.0.1:9/v1".to_string(),
            ..config.endpoints[0].clone()
        };
        let endpoint = Endpoint::from_config(&descriptor, &config.breaker).unwrap();

        let client = ChatClient::new().unwrap();
        let err = client
            .complete(
                &endpoint,
                "hi",
                256,
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "network");
    }

    #[tokio::test]
    async fn test_slow_endpoint_maps_to_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion_json("late"))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let endpoint = endpoint_for(&server).await;
        let client = ChatClient::new().unwrap();
        let err = client
            .complete(
                &endpoint,
                "hi",
                256,
                Duration::from_millis(100),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "timeout");
    }

    #[tokio::test]
    async fn test_cancellation_wins_over_io() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion_json("late"))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let endpoint = endpoint_for(&server).await;
        let client = ChatClient::new().unwrap();
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_clone.cancel();
        });

        let err = client
            .complete(&endpoint, "hi", 256, Duration::from_secs(10), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "cancelled");
    }

    #[tokio::test]
    async fn test_empty_choices_maps_to_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let endpoint = endpoint_for(&server).await;
        let client = ChatClient::new().unwrap();
        let err = client
            .complete(
                &endpoint,
                "hi",
                256,
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "network");
    }
}
