//! Sentence-transformer embeddings computed in-process with ONNX Runtime.
//!
//! The default model is `all-MiniLM-L6-v2`. Token states are mean-pooled over
//! the attention mask and L2-normalized, which reproduces the
//! sentence-transformers output the retrieval threshold is tuned for. Missing
//! model files are fetched once into the model directory.

use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ndarray::{Array2, ArrayD, ArrayView2, Axis, Ix2, Ix3};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionInputs};
use ort::value::{DynTensor, Tensor};
use reqwest::Client;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

use super::provider::Embedder;
use crate::core::config::EmbeddingSettings;
use crate::rag::RagError;
use crate::vector_math::normalize;

const MODEL_FILE: &str = "model.onnx";
const TOKENIZER_FILE: &str = "tokenizer.json";
/// (local file, path inside the model repository)
const MODEL_ASSETS: [(&str, &str); 2] = [
    (MODEL_FILE, "onnx/model.onnx"),
    (TOKENIZER_FILE, "tokenizer.json"),
];
const MAX_BATCH: usize = 32;

fn embedding_error(context: &str, err: impl Display) -> RagError {
    RagError::Embedding(format!("{context}: {err}"))
}

struct OnnxModel {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    input_names: Vec<String>,
}

impl OnnxModel {
    fn load(model_dir: &Path, max_length: usize) -> Result<Self, RagError> {
        let mut tokenizer = Tokenizer::from_file(model_dir.join(TOKENIZER_FILE))
            .map_err(|e| embedding_error("tokenizer load failed", e))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..PaddingParams::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                ..TruncationParams::default()
            }))
            .map_err(|e| embedding_error("tokenizer truncation failed", e))?;

        let session = Session::builder()
            .map_err(|e| embedding_error("ONNX session builder failed", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| embedding_error("failed to set optimization level", e))?
            .with_intra_threads(intra_threads())
            .map_err(|e| embedding_error("failed to set ONNX threads", e))?
            .commit_from_file(model_dir.join(MODEL_FILE))
            .map_err(|e| embedding_error("failed to load ONNX model", e))?;
        let input_names = session
            .inputs
            .iter()
            .map(|input| input.name.clone())
            .collect();

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            input_names,
        })
    }

    fn embed_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(MAX_BATCH) {
            let encodings = self
                .tokenizer
                .encode_batch(batch.to_vec(), true)
                .map_err(|e| embedding_error("tokenization failed", e))?;
            let Some(seq_len) = encodings.first().map(|encoding| encoding.len()) else {
                continue;
            };

            let rows = encodings.len();
            let mut ids = Vec::with_capacity(rows * seq_len);
            let mut mask = Vec::with_capacity(rows * seq_len);
            let mut type_ids = Vec::with_capacity(rows * seq_len);
            for encoding in &encodings {
                if encoding.len() != seq_len {
                    return Err(RagError::Embedding(
                        "inconsistent sequence lengths after padding".to_string(),
                    ));
                }
                ids.extend(encoding.get_ids().iter().map(|&v| i64::from(v)));
                mask.extend(encoding.get_attention_mask().iter().map(|&v| i64::from(v)));
                type_ids.extend(encoding.get_type_ids().iter().map(|&v| i64::from(v)));
            }

            let mut available: HashMap<&str, Array2<i64>> = HashMap::from([
                ("input_ids", to_array(rows, seq_len, ids)?),
                ("attention_mask", to_array(rows, seq_len, mask.clone())?),
                ("token_type_ids", to_array(rows, seq_len, type_ids)?),
            ]);
            let mut feed: HashMap<String, DynTensor> = HashMap::new();
            for name in &self.input_names {
                let array = available.remove(name.as_str()).ok_or_else(|| {
                    RagError::Embedding(format!("unsupported model input '{name}'"))
                })?;
                let tensor = Tensor::from_array(array.into_dyn())
                    .map_err(|e| embedding_error("failed to build input tensor", e))?
                    .upcast();
                feed.insert(name.clone(), tensor);
            }

            let output = {
                let mut session = self
                    .session
                    .lock()
                    .map_err(|_| RagError::Embedding("ONNX session lock poisoned".to_string()))?;
                let outputs = session
                    .run(SessionInputs::from(feed))
                    .map_err(|e| embedding_error("ONNX forward pass failed", e))?;
                if outputs.len() == 0 {
                    return Err(RagError::Embedding("ONNX model returned no outputs".into()));
                }
                let output = outputs[0]
                    .try_extract_array::<f32>()
                    .map_err(|e| embedding_error("failed to read ONNX output", e))?
                    .to_owned();
                drop(outputs);
                drop(session);
                output
            };

            vectors.extend(pool(output, &mask, seq_len)?);
        }
        Ok(vectors)
    }
}

fn to_array(rows: usize, seq_len: usize, values: Vec<i64>) -> Result<Array2<i64>, RagError> {
    Array2::from_shape_vec((rows, seq_len), values)
        .map_err(|e| embedding_error("input shape mismatch", e))
}

fn intra_threads() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cpus / 2).clamp(1, 4)
}

/// Turns the model output into one unit vector per input row. Token-level
/// output (`[rows, tokens, hidden]`) is mean-pooled over the attention mask;
/// sentence-level output (`[rows, hidden]`) is used as is.
fn pool(output: ArrayD<f32>, mask: &[i64], seq_len: usize) -> Result<Vec<Vec<f32>>, RagError> {
    let mut vectors: Vec<Vec<f32>> = match output.ndim() {
        2 => output
            .into_dimensionality::<Ix2>()
            .map_err(|e| embedding_error("bad output shape", e))?
            .outer_iter()
            .map(|row| row.to_vec())
            .collect(),
        3 => {
            let hidden = output
                .into_dimensionality::<Ix3>()
                .map_err(|e| embedding_error("bad output shape", e))?;
            hidden
                .outer_iter()
                .enumerate()
                .map(|(row, tokens)| {
                    let row_mask = mask
                        .get(row * seq_len..(row + 1) * seq_len)
                        .unwrap_or(&[]);
                    mean_pool(tokens, row_mask)
                })
                .collect()
        }
        _ => {
            return Err(RagError::Embedding(format!(
                "unexpected ONNX output shape {:?}",
                output.shape()
            )));
        }
    };

    for vector in &mut vectors {
        normalize(vector);
    }
    Ok(vectors)
}

fn mean_pool(tokens: ArrayView2<'_, f32>, mask: &[i64]) -> Vec<f32> {
    let mut sum = vec![0.0f32; tokens.len_of(Axis(1))];
    let mut count = 0.0f32;
    for (token, &keep) in tokens.outer_iter().zip(mask) {
        if keep == 0 {
            continue;
        }
        count += 1.0;
        for (acc, value) in sum.iter_mut().zip(token.iter()) {
            *acc += value;
        }
    }
    if count > 0.0 {
        for value in &mut sum {
            *value /= count;
        }
    }
    sum
}

/// Downloads whichever model assets are missing from `model_dir`.
async fn ensure_model_files(
    settings: &EmbeddingSettings,
    model_dir: &Path,
) -> Result<(), RagError> {
    let missing: Vec<(&str, &str)> = MODEL_ASSETS
        .into_iter()
        .filter(|(local, _)| !model_dir.join(local).is_file())
        .collect();
    if missing.is_empty() {
        return Ok(());
    }

    let repo = settings.model_repo_url.trim().trim_end_matches('/');
    if repo.is_empty() {
        return Err(RagError::Embedding(format!(
            "model files for '{}' are missing in {} and downloads are disabled",
            settings.model,
            model_dir.display()
        )));
    }

    tokio::fs::create_dir_all(model_dir)
        .await
        .map_err(|e| embedding_error("cannot create model directory", e))?;
    let client = Client::builder()
        .timeout(Duration::from_secs(settings.download_timeout_secs))
        .build()
        .map_err(|e| embedding_error("cannot build download client", e))?;

    for (local, remote) in missing {
        let url = format!("{}/{}/resolve/main/{}", repo, settings.model, remote);
        tracing::info!("Downloading {} from {}", local, url);
        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| embedding_error("model download failed", e))?;
        if !response.status().is_success() {
            return Err(RagError::Embedding(format!(
                "model download from {} returned {}",
                url,
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| embedding_error("model download failed", e))?;

        let target = model_dir.join(local);
        let partial = target.with_extension("part");
        tokio::fs::write(&partial, &bytes)
            .await
            .map_err(|e| embedding_error("cannot write model file", e))?;
        tokio::fs::rename(&partial, &target)
            .await
            .map_err(|e| embedding_error("cannot write model file", e))?;
    }
    Ok(())
}

async fn run_blocking(
    model: Arc<OnnxModel>,
    texts: Vec<String>,
) -> Result<Vec<Vec<f32>>, RagError> {
    tokio::task::spawn_blocking(move || model.embed_blocking(&texts))
        .await
        .map_err(|e| embedding_error("embedding task failed", e))?
}

pub struct OnnxEmbedder {
    model: Arc<OnnxModel>,
    model_name: String,
    dimension: usize,
}

impl OnnxEmbedder {
    /// Loads the model from `settings.model_dir` (or `<models_dir>/<model>`),
    /// downloading it first if needed, and embeds one sample text to learn its width.
    pub async fn load(settings: &EmbeddingSettings, models_dir: &Path) -> Result<Self, RagError> {
        let model_dir: PathBuf = settings
            .model_dir
            .clone()
            .unwrap_or_else(|| models_dir.join(&settings.model));
        ensure_model_files(settings, &model_dir).await?;

        let dir = model_dir.clone();
        let max_length = settings.max_length;
        let model = tokio::task::spawn_blocking(move || OnnxModel::load(&dir, max_length))
            .await
            .map_err(|e| embedding_error("model loading task failed", e))??;
        let model = Arc::new(model);

        let sample = run_blocking(model.clone(), vec!["dimension check".to_string()]).await?;
        let dimension = sample.first().map(Vec::len).unwrap_or(0);
        if dimension == 0 {
            return Err(RagError::Embedding(format!(
                "model '{}' produced an empty vector",
                settings.model
            )));
        }

        tracing::info!(
            "Embedding model '{}' loaded from {} (dimension {})",
            settings.model,
            model_dir.display(),
            dimension
        );
        Ok(Self {
            model,
            model_name: settings.model.clone(),
            dimension,
        })
    }
}

#[async_trait]
impl Embedder for OnnxEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        run_blocking(self.model.clone(), vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::Embedding("model returned no vector".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        run_blocking(self.model.clone(), texts.to_vec()).await
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{array, Array3};

    use super::*;

    #[test]
    fn mean_pool_ignores_padding_tokens() {
        let tokens = array![[1.0f32, 3.0], [3.0, 5.0], [100.0, 100.0]];

        let pooled = mean_pool(tokens.view(), &[1, 1, 0]);

        assert_eq!(pooled, vec![2.0, 4.0]);
    }

    #[test]
    fn token_level_output_is_pooled_per_row_and_normalized() {
        // Two rows, two tokens, two hidden units; the second row's last token is padding.
        let output = Array3::from_shape_vec(
            (2, 2, 2),
            vec![3.0f32, 0.0, 3.0, 0.0, 0.0, 2.0, 9.0, 9.0],
        )
        .unwrap()
        .into_dyn();

        let vectors = pool(output, &[1, 1, 1, 0], 2).unwrap();

        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn sentence_level_output_is_only_normalized() {
        let output = array![[3.0f32, 4.0]].into_dyn();

        let vectors = pool(output, &[1], 1).unwrap();

        assert!((vectors[0][0] - 0.6).abs() < 1e-6);
        assert!((vectors[0][1] - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn missing_files_without_a_repository_fail_as_embedding_error() {
        let dir = tempfile::tempdir().unwrap();
        let settings = EmbeddingSettings {
            model_repo_url: String::new(),
            ..EmbeddingSettings::default()
        };

        let result = ensure_model_files(&settings, dir.path()).await;

        assert!(matches!(
            result,
            Err(RagError::Embedding(msg)) if msg.contains("downloads are disabled")
        ));
    }

    #[tokio::test]
    async fn present_files_are_not_downloaded_again() {
        let dir = tempfile::tempdir().unwrap();
        for (local, _) in MODEL_ASSETS {
            std::fs::write(dir.path().join(local), b"cached").unwrap();
        }
        let settings = EmbeddingSettings {
            model_repo_url: "http://127.0.0.1:9".to_string(),
            ..EmbeddingSettings::default()
        };

        ensure_model_files(&settings, dir.path()).await.unwrap();

        let cached = std::fs::read(dir.path().join(MODEL_FILE)).unwrap();
        assert_eq!(cached, b"cached");
    }
}
