//! Offline stand-in for a real embedding model, used by tests and by the
//! `hashing` backend when no model files are available.
//!
//! Signed feature hashing over a normalized bag of words: each token is
//! hashed with SHA-256 into one of `dimension` buckets with a +1/-1 sign,
//! and the result is L2-normalized. Texts sharing vocabulary score high under
//! cosine similarity; unrelated texts score near zero.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use sha2::{Digest, Sha256};

use super::provider::Embedder;
use crate::rag::RagError;
use crate::vector_math::normalize;

const STOPWORDS: [&str; 51] = [
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from", "get",
    "got", "has", "have", "how", "i", "if", "in", "is", "it", "its", "me", "my", "of", "on", "or",
    "our", "so", "that", "the", "their", "there", "this", "to", "was", "we", "what", "when",
    "where", "which", "who", "why", "will", "with", "you", "your", "s", "am",
];

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[a-z0-9]+").expect("static token pattern"))
}

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    model_name: String,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Result<Self, RagError> {
        if dimension == 0 {
            return Err(RagError::Configuration(
                "hashing embedder needs a non-zero dimension".to_string(),
            ));
        }
        Ok(Self {
            dimension,
            model_name: format!("hashing-v1-{dimension}"),
        })
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let (bucket, sign) = self.bucket(&token);
            vector[bucket] += sign;
        }
        normalize(&mut vector);
        vector
    }

    fn bucket(&self, token: &str) -> (usize, f32) {
        let digest = Sha256::digest(token.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        let hash = u64::from_le_bytes(prefix);
        let bucket = (hash % self.dimension as u64) as usize;
        let sign = if hash >> 63 == 1 { -1.0 } else { 1.0 };
        (bucket, sign)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        Ok(self.embed_sync(text))
    }
}

/// Lowercased alphanumeric tokens with stopwords removed and plural `s` stripped.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    token_pattern()
        .find_iter(&lowered)
        .map(|m| m.as_str())
        .filter(|token| !STOPWORDS.contains(token))
        .map(stem)
        .collect()
}

fn stem(token: &str) -> String {
    if token.len() > 3 && token.ends_with('s') && !token.ends_with("ss") {
        token[..token.len() - 1].to_string()
    } else {
        token.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_math::cosine_similarity;

    #[test]
    fn tokenize_drops_stopwords_and_plurals() {
        assert_eq!(
            tokenize("How many Vacation days do new employees get?"),
            vec!["many", "vacation", "day", "new", "employee"]
        );
        assert_eq!(tokenize("Business class"), vec!["business", "class"]);
    }

    #[tokio::test]
    async fn embedding_is_deterministic() {
        let embedder = HashingEmbedder::new(384).unwrap();
        let a = embedder.embed("Password requirements").await.unwrap();
        let b = embedder.embed("Password requirements").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 384);

        let other = HashingEmbedder::new(384).unwrap();
        assert_eq!(other.embed("Password requirements").await.unwrap(), a);
    }

    #[tokio::test]
    async fn related_texts_score_higher_than_unrelated() {
        let embedder = HashingEmbedder::new(384).unwrap();
        let doc = embedder
            .embed("Vacation days: new employees receive 15 days per year.")
            .await
            .unwrap();
        let related = embedder
            .embed("How many vacation days do new employees get?")
            .await
            .unwrap();
        let unrelated = embedder
            .embed("What's your favorite pizza topping?")
            .await
            .unwrap();

        let related_score = cosine_similarity(&related, &doc).unwrap();
        let unrelated_score = cosine_similarity(&unrelated, &doc).unwrap();
        assert!(related_score > 0.5, "related score {related_score}");
        assert!(unrelated_score < 0.1, "unrelated score {unrelated_score}");
    }

    #[tokio::test]
    async fn stopword_only_text_embeds_to_zero_vector() {
        let embedder = HashingEmbedder::new(16).unwrap();
        let v = embedder.embed("what is the").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn zero_dimension_is_rejected() {
        assert!(matches!(
            HashingEmbedder::new(0),
            Err(RagError::Configuration(_))
        ));
    }
}
