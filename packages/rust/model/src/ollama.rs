//! Ollama `/api/generate` client.

use async_trait::async_trait;
use intake_shared::{IntakeError, ModelInvocationConfig, RawModelOutput, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::ModelInvoker;

/// User-Agent string for model requests.
const USER_AGENT: &str = concat!("intake/", env!("CARGO_PKG_VERSION"));

/// Longest slice of an error body kept in error messages.
const MAX_ERROR_BODY: usize = 512;

/// Non-streaming generation against an Ollama server.
pub struct OllamaInvoker {
    client: Client,
    generate_url: String,
    config: ModelInvocationConfig,
}

impl OllamaInvoker {
    pub fn new(config: &ModelInvocationConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| IntakeError::Invocation(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            generate_url: format!("{}/api/generate", config.endpoint.trim_end_matches('/')),
            config: config.clone(),
        })
    }

    async fn generate(&self, prompt: &str) -> Result<RawModelOutput> {
        let body = GenerateRequest {
            model: &self.config.model_name,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.config.temperature,
                top_p: self.config.top_p,
                num_predict: self.config.max_tokens,
                stop: &self.config.stop_sequences,
            },
        };

        let response = self
            .client
            .post(&self.generate_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    IntakeError::Invocation(format!(
                        "cannot reach model endpoint {}: {e}",
                        self.config.endpoint
                    ))
                } else {
                    IntakeError::Invocation(format!("{}: {e}", self.generate_url))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let mut text = response.text().await.unwrap_or_default();
            text.truncate(floor_char_boundary(&text, MAX_ERROR_BODY));
            return Err(IntakeError::Invocation(format!(
                "model endpoint returned HTTP {status}: {text}"
            )));
        }

        let text = response
            .text()
            .await
            .map_err(|e| IntakeError::Invocation(format!("failed to read model response: {e}")))?;

        let envelope: GenerateResponse = serde_json::from_str(&text)
            .map_err(|e| IntakeError::Invocation(format!("malformed response envelope: {e}")))?;

        Ok(RawModelOutput::new(envelope.response))
    }
}

#[async_trait]
impl ModelInvoker for OllamaInvoker {
    #[instrument(skip_all, fields(model = %self.config.model_name, timeout_ms = self.config.timeout_ms))]
    async fn invoke(&self, prompt: &str) -> Result<RawModelOutput> {
        // Dropping the request future on timeout aborts the connection.
        let output = tokio::time::timeout(self.config.timeout(), self.generate(prompt))
            .await
            .map_err(|_| IntakeError::InvocationTimeout {
                timeout_ms: self.config.timeout_ms,
            })??;

        debug!(chars = output.as_str().len(), "model responded");
        Ok(output)
    }
}

/// Request body for `/api/generate`.
#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions<'a>,
}

#[derive(Serialize)]
struct GenerateOptions<'a> {
    temperature: f64,
    top_p: f64,
    num_predict: u32,
    stop: &'a [String],
}

/// Response body from `/api/generate`.
#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    (0..=max).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(endpoint: &str, timeout_ms: u64) -> ModelInvocationConfig {
        ModelInvocationConfig {
            endpoint: endpoint.to_string(),
            model_name: "phi3".into(),
            timeout_ms,
            temperature: 0.1,
            top_p: 0.9,
            max_tokens: 500,
            stop_sequences: vec!["\n\n".into(), "```".into()],
        }
    }

    #[tokio::test]
    async fn sends_sampling_parameters_and_returns_raw_text() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({
                "model": "phi3",
                "prompt": "classify this",
                "stream": false,
                "options": {
                    "temperature": 0.1,
                    "top_p": 0.9,
                    "num_predict": 500,
                    "stop": ["\n\n", "```"]
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "phi3",
                "response": "{\"intent\":\"warranty_lookup\"}",
                "done": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let invoker = OllamaInvoker::new(&config_for(&server.uri(), 5_000)).unwrap();
        let output = invoker.invoke("classify this").await.unwrap();
        assert_eq!(output.as_str(), "{\"intent\":\"warranty_lookup\"}");
    }

    #[tokio::test]
    async fn trailing_slash_endpoint_is_normalized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"response": "ok"})),
            )
            .mount(&server)
            .await;

        let endpoint = format!("{}/", server.uri());
        let invoker = OllamaInvoker::new(&config_for(&endpoint, 5_000)).unwrap();
        assert_eq!(invoker.invoke("hi").await.unwrap().as_str(), "ok");
    }

    #[tokio::test]
    async fn non_success_status_is_invocation_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
            .mount(&server)
            .await;

        let invoker = OllamaInvoker::new(&config_for(&server.uri(), 5_000)).unwrap();
        let err = invoker.invoke("hi").await.unwrap_err();
        match err {
            IntakeError::Invocation(msg) => {
                assert!(msg.contains("500"));
                assert!(msg.contains("model not loaded"));
            }
            other => panic!("expected Invocation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_envelope_is_invocation_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json at all"))
            .mount(&server)
            .await;

        let invoker = OllamaInvoker::new(&config_for(&server.uri(), 5_000)).unwrap();
        let err = invoker.invoke("hi").await.unwrap_err();
        assert!(matches!(err, IntakeError::Invocation(ref m) if m.contains("malformed")));
    }

    #[tokio::test]
    async fn slow_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"response": "late"}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let invoker = OllamaInvoker::new(&config_for(&server.uri(), 50)).unwrap();
        let err = invoker.invoke("hi").await.unwrap_err();
        assert!(matches!(err, IntakeError::InvocationTimeout { timeout_ms: 50 }));
    }

    #[tokio::test]
    async fn connection_refused_is_invocation_error() {
        // Grab a free port, then release it so nothing is listening.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let invoker =
            OllamaInvoker::new(&config_for(&format!("http://127.0.0.1:{port}"), 5_000)).unwrap();
        let err = invoker.invoke("hi").await.unwrap_err();
        assert!(matches!(err, IntakeError::Invocation(ref m) if m.contains("cannot reach")));
    }

    #[test]
    fn error_body_truncation_respects_char_boundaries() {
        let s = "ééé";
        assert_eq!(floor_char_boundary(s, 3), 2);
        assert_eq!(floor_char_boundary(s, 100), s.len());
    }
}
