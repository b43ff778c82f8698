use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use super::provider::{LlmProvider, ProviderError};
use super::types::ChatRequest;
use crate::core::config::GeneratorSettings;
use crate::rag::RagError;

/// Chat completions against an OpenAI-compatible API (Groq, OpenAI, LM Studio).
#[derive(Clone)]
pub struct OpenAiCompatProvider {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl OpenAiCompatProvider {
    pub fn new(settings: &GeneratorSettings) -> Result<Self, RagError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| RagError::Configuration(format!("cannot build HTTP client: {e}")))?;

        let api_key = settings
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty());
        if api_key.is_none() {
            tracing::warn!("No generator API key configured; chat requests will fail");
        }

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }
}

/// Whether an HTTP status is worth retrying.
pub(crate) fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// Network trouble while sending or while reading the body is transient;
/// anything else, including an undecodable body, is permanent.
fn classify_transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() || err.is_connect() || err.is_body() {
        ProviderError::Transient(err.to_string())
    } else {
        ProviderError::Permanent(err.to_string())
    }
}

fn extract_content(payload: &Value) -> Result<String, ProviderError> {
    payload["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ProviderError::Permanent("completion has no message content".to_string()))
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai_compat"
    }

    async fn chat(&self, request: ChatRequest, model_id: &str) -> Result<String, ProviderError> {
        let Some(api_key) = &self.api_key else {
            return Err(ProviderError::Permanent(
                "generator API key is not configured".to_string(),
            ));
        };

        let url = format!("{}/chat/completions", self.base_url);
        let mut body = json!({
            "model": model_id,
            "messages": request.messages,
            "stream": false,
        });

        if let Some(obj) = body.as_object_mut() {
            if let Some(t) = request.temperature {
                obj.insert("temperature".to_string(), json!(t));
            }
            if let Some(t) = request.max_tokens {
                obj.insert("max_tokens".to_string(), json!(t));
            }
        }

        let res = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            let message = format!("chat completion returned {status}: {text}");
            return Err(if is_transient_status(status) {
                ProviderError::Transient(message)
            } else {
                ProviderError::Permanent(message)
            });
        }

        let payload: Value = res.json().await.map_err(|e| match classify_transport_error(e) {
            ProviderError::Permanent(msg) => {
                ProviderError::Permanent(format!("malformed completion: {msg}"))
            }
            transient => transient,
        })?;

        extract_content(&payload)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::llm::types::ChatMessage;

    /// Answers a single request with `response`, optionally keeping the
    /// connection open afterwards.
    async fn serve_once(response: &'static [u8], hold_open: bool) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response).await.unwrap();
            if hold_open {
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
        });
        format!("http://{addr}/v1")
    }

    fn provider_at(base_url: String) -> OpenAiCompatProvider {
        OpenAiCompatProvider::new(&GeneratorSettings {
            base_url,
            api_key: Some("test-key".to_string()),
            timeout_secs: 1,
            ..GeneratorSettings::default()
        })
        .unwrap()
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(StatusCode::REQUEST_TIMEOUT));
        assert!(is_transient_status(StatusCode::BAD_GATEWAY));
        assert!(is_transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_transient_status(StatusCode::UNAUTHORIZED));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
        assert!(!is_transient_status(StatusCode::NOT_FOUND));
    }

    #[test]
    fn content_is_returned_verbatim() {
        let payload = json!({
            "choices": [{"message": {"role": "assistant", "content": "  15 days. [Source: pto.md]\n"}}]
        });
        assert_eq!(
            extract_content(&payload).unwrap(),
            "  15 days. [Source: pto.md]\n"
        );
        assert!(extract_content(&json!({"choices": []})).is_err());
    }

    #[tokio::test]
    async fn missing_api_key_is_permanent() {
        let provider = OpenAiCompatProvider::new(&GeneratorSettings::default()).unwrap();
        let err = provider
            .chat(
                ChatRequest::new(vec![ChatMessage::user("hi")]),
                "llama-3.1-8b-instant",
            )
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn connection_failure_is_transient() {
        let settings = GeneratorSettings {
            base_url: "http://127.0.0.1:9/v1".to_string(),
            api_key: Some("test-key".to_string()),
            timeout_secs: 2,
            ..GeneratorSettings::default()
        };
        let provider = OpenAiCompatProvider::new(&settings).unwrap();
        let err = provider
            .chat(ChatRequest::new(vec![ChatMessage::user("hi")]), "m")
            .await
            .unwrap_err();
        assert!(err.is_transient(), "{err}");
    }

    #[tokio::test]
    async fn body_stalling_past_the_timeout_is_transient() {
        let base_url = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 200\r\n\r\n{\"choices\":",
            true,
        )
        .await;

        let err = provider_at(base_url)
            .chat(ChatRequest::new(vec![ChatMessage::user("hi")]), "m")
            .await
            .unwrap_err();

        assert!(err.is_transient(), "{err}");
    }

    #[tokio::test]
    async fn undecodable_body_is_permanent() {
        let base_url = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 8\r\nConnection: close\r\n\r\nnot json",
            false,
        )
        .await;

        let err = provider_at(base_url)
            .chat(ChatRequest::new(vec![ChatMessage::user("hi")]), "m")
            .await
            .unwrap_err();

        assert!(!err.is_transient(), "{err}");
        assert!(err.to_string().contains("malformed completion"));
    }
}
