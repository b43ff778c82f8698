use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::provider::Embedder;
use crate::core::config::EmbeddingSettings;
use crate::rag::RagError;

/// Embeddings from any OpenAI-compatible `/embeddings` endpoint
/// (LM Studio, Ollama, OpenAI, ...).
#[derive(Clone)]
pub struct OpenAiEmbedder {
    base_url: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
    client: Client,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    /// Connects and embeds one sample text to learn the vector width.
    ///
    /// Any failure here means the model is unavailable, which is fatal at startup.
    pub async fn connect(settings: &EmbeddingSettings) -> Result<Self, RagError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| RagError::Embedding(e.to_string()))?;

        let mut embedder = Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key: settings.api_key.clone().filter(|key| !key.trim().is_empty()),
            dimension: 0,
            client,
        };

        let sample = embedder.request(&["dimension check".to_string()]).await?;
        let dimension = sample.first().map(Vec::len).unwrap_or(0);
        if dimension == 0 {
            return Err(RagError::Embedding(format!(
                "model '{}' returned an empty vector for a sample text",
                embedder.model
            )));
        }
        embedder.dimension = dimension;
        tracing::info!(
            "Embedding model '{}' ready at {} (dimension {})",
            embedder.model,
            embedder.base_url,
            dimension
        );
        Ok(embedder)
    }

    async fn request(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let url = format!("{}/embeddings", self.base_url);
        let body = json!({
            "model": self.model,
            "input": inputs,
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let res = request
            .send()
            .await
            .map_err(|e| RagError::Embedding(format!("request to {url} failed: {e}")))?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(RagError::Embedding(format!(
                "embedding endpoint returned {status}: {text}"
            )));
        }

        let payload: EmbeddingsResponse = res
            .json()
            .await
            .map_err(|e| RagError::Embedding(format!("malformed embedding response: {e}")))?;

        order_embeddings(payload.data, inputs.len())
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), RagError> {
        if vector.len() != self.dimension {
            return Err(RagError::Embedding(format!(
                "model '{}' changed dimension: expected {}, got {}",
                self.model,
                self.dimension,
                vector.len()
            )));
        }
        Ok(())
    }
}

/// Restores request order (servers may return items out of order) and checks the count.
fn order_embeddings(
    mut items: Vec<EmbeddingItem>,
    expected: usize,
) -> Result<Vec<Vec<f32>>, RagError> {
    if items.len() != expected {
        return Err(RagError::Embedding(format!(
            "expected {} embeddings, got {}",
            expected,
            items.len()
        )));
    }
    if items.iter().all(|item| item.index.is_some()) {
        items.sort_by_key(|item| item.index);
    }
    Ok(items.into_iter().map(|item| item.embedding).collect())
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let mut vectors = self.request(&[text.to_string()]).await?;
        let vector = vectors
            .pop()
            .ok_or_else(|| RagError::Embedding("no embedding returned".to_string()))?;
        self.check_dimension(&vector)?;
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self.request(texts).await?;
        for vector in &vectors {
            self.check_dimension(vector)?;
        }
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(index: Option<usize>, value: f32) -> EmbeddingItem {
        EmbeddingItem {
            index,
            embedding: vec![value],
        }
    }

    #[test]
    fn order_embeddings_sorts_by_index() {
        let ordered =
            order_embeddings(vec![item(Some(1), 1.0), item(Some(0), 0.0)], 2).unwrap();
        assert_eq!(ordered, vec![vec![0.0], vec![1.0]]);
    }

    #[test]
    fn order_embeddings_keeps_response_order_without_indices() {
        let ordered = order_embeddings(vec![item(None, 5.0), item(None, 3.0)], 2).unwrap();
        assert_eq!(ordered, vec![vec![5.0], vec![3.0]]);
    }

    #[test]
    fn order_embeddings_rejects_count_mismatch() {
        let err = order_embeddings(vec![item(Some(0), 1.0)], 2).unwrap_err();
        assert!(matches!(err, RagError::Embedding(_)));
    }

    #[test]
    fn response_payload_parses() {
        let payload = r#"{"object":"list","data":[{"object":"embedding","index":0,"embedding":[0.1,0.2]}],"model":"m"}"#;
        let parsed: EmbeddingsResponse = serde_json::from_str(payload).unwrap();
        assert_eq!(parsed.data.len(), 1);
        assert_eq!(parsed.data[0].embedding, vec![0.1, 0.2]);
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_at_connect() {
        let settings = EmbeddingSettings {
            base_url: "http://127.0.0.1:9/v1".to_string(),
            timeout_secs: 2,
            ..EmbeddingSettings::default()
        };
        let result = OpenAiEmbedder::connect(&settings).await;
        assert!(matches!(result, Err(RagError::Embedding(_))));
    }
}
