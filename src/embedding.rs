//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and two interchangeable backends:
//! - **[`RemoteProvider`]** — POSTs batches to a configured HTTP embedding
//!   service (`{model, texts, normalize}` → `{vectors}`), with a bounded
//!   request timeout.
//! - **[`LocalProvider`]** — runs a pretrained model in-process via fastembed;
//!   the model loads lazily on first use and stays resident.
//!
//! Selection happens once at construction time through [`create_provider`].
//! There is no internal retry: an unreachable backend surfaces as
//! [`KnowledgeError::ProviderUnavailable`] and the caller decides whether to
//! try again, so a systemic outage is never masked.
//!
//! Also provides the vector math used by the retriever:
//! [`cosine_similarity`], [`dot`], and [`normalize_in_place`].

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{KnowledgeError, Result};

/// A text-to-vector backend.
///
/// `embed` accepts a batch and returns one vector per input, in input order,
/// each of the fixed dimensionality reported by [`dims`](Self::dims). When
/// `normalize` is set, returned vectors have unit length.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;

    /// Embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;

    /// Backend identity recorded in the persisted index, e.g.
    /// `"remote:all-minilm-l6-v2:384d"`. An index built under one identity
    /// is rejected on load under another.
    fn identity(&self) -> String;

    async fn embed(&self, texts: &[String], normalize: bool) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
///
/// Convenience wrapper around [`EmbeddingProvider::embed`] for search-time
/// use.
pub async fn embed_query(
    provider: &dyn EmbeddingProvider,
    text: &str,
    normalize: bool,
) -> Result<Vec<f32>> {
    let vectors = provider.embed(&[text.to_string()], normalize).await?;
    vectors.into_iter().next().ok_or_else(|| {
        KnowledgeError::ProviderProtocolError("empty embedding response for query".to_string())
    })
}

/// Create the configured [`EmbeddingProvider`].
///
/// | Config value | Provider |
/// |--------------|----------|
/// | `"remote"` | [`RemoteProvider`] |
/// | `"local"` | [`LocalProvider`] (requires `local-embeddings-fastembed`) |
pub fn create_provider(config: &EmbeddingConfig) -> Result<std::sync::Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "remote" => Ok(std::sync::Arc::new(RemoteProvider::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(std::sync::Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => Err(KnowledgeError::Config(
            "local embedding provider requires --features local-embeddings-fastembed".to_string(),
        )),
        other => Err(KnowledgeError::Config(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

// ============ Remote provider ============

/// Embedding provider backed by an HTTP service.
///
/// Requests carry `{"model": ..., "texts": [...], "normalize": bool}`; the
/// service answers `{"vectors": [[f32, ...], ...]}`. Batches larger than
/// `batch_size` are split into sequential requests.
pub struct RemoteProvider {
    model: String,
    dims: usize,
    url: String,
    batch_size: usize,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct RemoteResponse {
    vectors: Vec<Vec<f32>>,
}

impl RemoteProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let url = config.url.clone().ok_or_else(|| {
            KnowledgeError::Config("embedding.url required for remote provider".to_string())
        })?;
        let dims = config.dims.ok_or_else(|| {
            KnowledgeError::Config("embedding.dims required for remote provider".to_string())
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| KnowledgeError::Config(format!("http client: {}", e)))?;

        Ok(Self {
            model: config.model.clone(),
            dims,
            url,
            batch_size: config.batch_size,
            client,
        })
    }

    async fn embed_batch(&self, texts: &[String], normalize: bool) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "texts": texts,
            "normalize": normalize,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                KnowledgeError::ProviderUnavailable(format!(
                    "request to {} failed (is the embedding service running?): {}",
                    self.url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            // Server-side trouble is retryable from outside; a 4xx means the
            // request itself is wrong.
            if status.is_server_error() || status.as_u16() == 429 {
                return Err(KnowledgeError::ProviderUnavailable(format!(
                    "embedding service error {}: {}",
                    status, body_text
                )));
            }
            return Err(KnowledgeError::ProviderProtocolError(format!(
                "embedding service rejected request {}: {}",
                status, body_text
            )));
        }

        let parsed: RemoteResponse = response.json().await.map_err(|e| {
            KnowledgeError::ProviderProtocolError(format!("invalid embedding response: {}", e))
        })?;

        check_vectors(&parsed.vectors, texts.len(), self.dims)?;
        Ok(parsed.vectors)
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn identity(&self) -> String {
        format!("remote:{}:{}d", self.model, self.dims)
    }

    async fn embed(&self, texts: &[String], normalize: bool) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            all.extend(self.embed_batch(chunk, normalize).await?);
        }
        Ok(all)
    }
}

/// Validate count and dimensionality of a provider response.
fn check_vectors(vectors: &[Vec<f32>], expected_count: usize, dims: usize) -> Result<()> {
    if vectors.len() != expected_count {
        return Err(KnowledgeError::ProviderProtocolError(format!(
            "expected {} vectors, got {}",
            expected_count,
            vectors.len()
        )));
    }
    for v in vectors {
        if v.len() != dims {
            return Err(KnowledgeError::ProviderProtocolError(format!(
                "expected {}-dimensional vectors, got {}",
                dims,
                v.len()
            )));
        }
    }
    Ok(())
}

// ============ Local provider (fastembed) ============

/// Embedding provider for in-process inference via fastembed.
///
/// The model downloads on first use and is cached; after that, embeddings
/// run entirely offline. The loaded model stays resident for the process
/// lifetime, so the cold-start cost is paid once.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    fastembed_model: fastembed::EmbeddingModel,
    batch_size: usize,
    model: std::sync::Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (fastembed_model, default_dims) = resolve_local_model(&config.model)?;
        Ok(Self {
            model_name: config.model.clone(),
            dims: config.dims.unwrap_or(default_dims),
            fastembed_model,
            batch_size: config.batch_size,
            model: std::sync::Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn resolve_local_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
    match name {
        "all-minilm-l6-v2" => Ok((fastembed::EmbeddingModel::AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" => Ok((fastembed::EmbeddingModel::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Ok((fastembed::EmbeddingModel::BGEBaseENV15, 768)),
        "bge-large-en-v1.5" => Ok((fastembed::EmbeddingModel::BGELargeENV15, 1024)),
        "nomic-embed-text-v1" => Ok((fastembed::EmbeddingModel::NomicEmbedTextV1, 768)),
        "nomic-embed-text-v1.5" => Ok((fastembed::EmbeddingModel::NomicEmbedTextV15, 768)),
        "multilingual-e5-small" => Ok((fastembed::EmbeddingModel::MultilingualE5Small, 384)),
        "multilingual-e5-base" => Ok((fastembed::EmbeddingModel::MultilingualE5Base, 768)),
        "multilingual-e5-large" => Ok((fastembed::EmbeddingModel::MultilingualE5Large, 1024)),
        other => Err(KnowledgeError::Config(format!(
            "unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ))),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn identity(&self) -> String {
        format!("local:{}:{}d", self.model_name, self.dims)
    }

    async fn embed(&self, texts: &[String], normalize: bool) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let texts = texts.to_vec();
        let model_cell = self.model.clone();
        let fastembed_model = self.fastembed_model.clone();
        let batch_size = self.batch_size;
        let expected_count = texts.len();
        let dims = self.dims;

        let mut vectors = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
            let mut guard = model_cell
                .lock()
                .map_err(|_| KnowledgeError::ProviderUnavailable("model lock poisoned".into()))?;

            if guard.is_none() {
                let model = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(fastembed_model).with_show_download_progress(false),
                )
                .map_err(|e| {
                    KnowledgeError::ProviderUnavailable(format!(
                        "failed to initialize local embedding model: {}",
                        e
                    ))
                })?;
                *guard = Some(model);
            }

            let Some(model) = guard.as_mut() else {
                return Err(KnowledgeError::ProviderUnavailable(
                    "local embedding model not loaded".to_string(),
                ));
            };
            model.embed(texts, Some(batch_size)).map_err(|e| {
                KnowledgeError::ProviderProtocolError(format!("local embedding failed: {}", e))
            })
        })
        .await
        .map_err(|e| KnowledgeError::ProviderUnavailable(format!("embedding task failed: {}", e)))??;

        check_vectors(&vectors, expected_count, dims)?;

        if normalize {
            for v in &mut vectors {
                normalize_in_place(v);
            }
        }

        Ok(vectors)
    }
}

// ============ Vector math ============

/// Scale a vector to unit length in place. Zero vectors are left untouched.
pub fn normalize_in_place(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Plain dot product; the similarity of choice when both vectors are
/// pre-normalized.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`; `0.0` for empty vectors or vectors of
/// different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_empty_and_mismatched() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_normalize_unit_length() {
        let mut v = vec![3.0, 4.0];
        normalize_in_place(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector_untouched() {
        let mut v = vec![0.0, 0.0];
        normalize_in_place(&mut v);
        assert_eq!(v, vec![0.0, 0.0]);
    }

    #[test]
    fn test_dot_equals_cosine_for_normalized() {
        let mut a = vec![1.0, 2.0, 2.0];
        let mut b = vec![2.0, 1.0, 0.5];
        let cos = cosine_similarity(&a, &b);
        normalize_in_place(&mut a);
        normalize_in_place(&mut b);
        assert!((dot(&a, &b) - cos).abs() < 1e-5);
    }

    #[test]
    fn test_check_vectors_count_mismatch() {
        let vectors = vec![vec![0.0; 4]];
        let err = check_vectors(&vectors, 2, 4).unwrap_err();
        assert!(matches!(err, KnowledgeError::ProviderProtocolError(_)));
    }

    #[test]
    fn test_check_vectors_dims_mismatch() {
        let vectors = vec![vec![0.0; 3]];
        let err = check_vectors(&vectors, 1, 4).unwrap_err();
        assert!(matches!(err, KnowledgeError::ProviderProtocolError(_)));
    }
}
