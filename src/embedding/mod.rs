//! Embedding providers.
//!
//! [`EmbeddingProvider`] is built once from `[embedding]` config and
//! implements [`Embedder`]. The backend is fixed at construction:
//!
//! | Config Value | Backend |
//! |-------------|---------|
//! | `"hash"` | Offline feature hashing (sha2), deterministic, no model |
//! | `"openai"` | `POST /v1/embeddings`, needs `OPENAI_API_KEY` |
//! | `"ollama"` | `POST {url}/api/embed` on a local Ollama |
//! | `"local"` | fastembed, with `--features local-embeddings-fastembed` |
//!
//! Every backend sees the same preprocessing (whitespace collapsed) and
//! the same batching (`batch_size` texts per call). Responses are checked
//! for count and dimensionality before they reach the store.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use libris_core::embedding::{normalize, Embedder};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::{EmbeddingConfig, EmbeddingProviderKind};
use crate::http;

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_HASH_DIMS: usize = 256;
#[cfg(feature = "local-embeddings-fastembed")]
const DEFAULT_LOCAL_MODEL: &str = "all-minilm-l6-v2";

enum Backend {
    Hash,
    OpenAI {
        client: reqwest::Client,
        api_key: String,
        max_retries: u32,
    },
    Ollama {
        client: reqwest::Client,
        url: String,
        max_retries: u32,
    },
    #[cfg(feature = "local-embeddings-fastembed")]
    Local(local::LocalModel),
}

/// The configured embedder.
pub struct EmbeddingProvider {
    backend: Backend,
    model: String,
    dims: usize,
    batch_size: usize,
}

impl EmbeddingProvider {
    /// Create the provider selected by `config.provider`.
    ///
    /// # Errors
    ///
    /// Missing `model`/`dims` for remote providers, a missing
    /// `OPENAI_API_KEY`, or `local` without the fastembed feature.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let batch_size = config.batch_size.max(1);

        let (backend, model, dims) = match config.provider {
            EmbeddingProviderKind::Hash => (
                Backend::Hash,
                config
                    .model
                    .clone()
                    .unwrap_or_else(|| "feature-hash".to_string()),
                config.dims.unwrap_or(DEFAULT_HASH_DIMS),
            ),
            EmbeddingProviderKind::OpenAI => {
                let api_key = std::env::var("OPENAI_API_KEY")
                    .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
                (
                    Backend::OpenAI {
                        client: http::client(config.timeout_secs)?,
                        api_key,
                        max_retries: config.max_retries,
                    },
                    required_model(config)?,
                    required_dims(config)?,
                )
            }
            EmbeddingProviderKind::Ollama => (
                Backend::Ollama {
                    client: http::client(config.timeout_secs)?,
                    url: config
                        .url
                        .clone()
                        .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
                    max_retries: config.max_retries,
                },
                required_model(config)?,
                required_dims(config)?,
            ),
            #[cfg(feature = "local-embeddings-fastembed")]
            EmbeddingProviderKind::Local => {
                let model = config
                    .model
                    .clone()
                    .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string());
                let dims = config.dims.unwrap_or_else(|| local_model_dims(&model));
                (
                    Backend::Local(local::LocalModel::new(&model, batch_size)?),
                    model,
                    dims,
                )
            }
            #[cfg(not(feature = "local-embeddings-fastembed"))]
            EmbeddingProviderKind::Local => bail!(
                "Local embedding provider requires --features local-embeddings-fastembed"
            ),
        };

        Ok(Self {
            backend,
            model,
            dims,
            batch_size,
        })
    }

    /// Offline hashing embedder with `dims` dimensions.
    pub fn hash(dims: usize) -> Self {
        Self {
            backend: Backend::Hash,
            model: "feature-hash".to_string(),
            dims: dims.max(1),
            batch_size: 32,
        }
    }

    async fn embed_one_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        match &self.backend {
            Backend::Hash => Ok(texts.iter().map(|t| hash_embed(t, self.dims)).collect()),
            Backend::OpenAI {
                client,
                api_key,
                max_retries,
            } => {
                let body = serde_json::json!({ "model": self.model, "input": texts });
                let json = http::post_json(
                    client,
                    OPENAI_EMBEDDINGS_URL,
                    Some(api_key),
                    &body,
                    *max_retries,
                    "OpenAI",
                )
                .await?;
                parse_openai_response(&json)
            }
            Backend::Ollama {
                client,
                url,
                max_retries,
            } => {
                let body = serde_json::json!({ "model": self.model, "input": texts });
                let endpoint = format!("{}/api/embed", url.trim_end_matches('/'));
                let json =
                    http::post_json(client, &endpoint, None, &body, *max_retries, "Ollama")
                        .await?;
                parse_ollama_response(&json)
            }
            #[cfg(feature = "local-embeddings-fastembed")]
            Backend::Local(model) => model.embed(texts.to_vec()).await,
        }
    }
}

#[async_trait]
impl Embedder for EmbeddingProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let prepared: Vec<String> = batch.iter().map(|t| preprocess(t)).collect();
            let embedded = self.embed_one_batch(&prepared).await?;
            if embedded.len() != prepared.len() {
                bail!(
                    "embedding count mismatch: sent {} texts, got {} vectors",
                    prepared.len(),
                    embedded.len()
                );
            }
            if let Some(bad) = embedded.iter().find(|v| v.len() != self.dims) {
                bail!(
                    "embedding dimension mismatch: expected {}, got {}",
                    self.dims,
                    bad.len()
                );
            }
            vectors.extend(embedded);
        }

        Ok(vectors)
    }
}

fn required_model(config: &EmbeddingConfig) -> Result<String> {
    config
        .model
        .clone()
        .ok_or_else(|| anyhow!("embedding.model required for {:?} provider", config.provider))
}

fn required_dims(config: &EmbeddingConfig) -> Result<usize> {
    config
        .dims
        .ok_or_else(|| anyhow!("embedding.dims required for {:?} provider", config.provider))
}

/// Collapse runs of whitespace to single spaces and trim.
pub fn preprocess(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Signed feature hashing over lowercase word tokens, L2-normalized.
///
/// Texts sharing words land near each other, which is enough for offline
/// runs and tests. Text with no words maps to the zero vector.
pub fn hash_embed(text: &str, dims: usize) -> Vec<f32> {
    let mut vec = vec![0.0f32; dims];
    if dims == 0 {
        return vec;
    }

    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let digest = Sha256::digest(token.to_lowercase().as_bytes());
        let mut index_bytes = [0u8; 8];
        index_bytes.copy_from_slice(&digest[..8]);
        let index = (u64::from_le_bytes(index_bytes) % dims as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vec[index] += sign;
    }

    normalize(&mut vec);
    vec
}

/// Extract `data[].embedding`, ordered by `index` when present.
fn parse_openai_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(Value::as_u64)
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        indexed.push((index, number_array(embedding)?));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn parse_ollama_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?
        .iter()
        .map(number_array)
        .collect()
}

fn number_array(value: &Value) -> Result<Vec<f32>> {
    value
        .as_array()
        .ok_or_else(|| anyhow!("Invalid embedding response: embedding is not an array"))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| anyhow!("Invalid embedding response: non-numeric value"))
        })
        .collect()
}

#[cfg(feature = "local-embeddings-fastembed")]
fn local_model_dims(name: &str) -> usize {
    match name {
        "bge-base-en-v1.5" | "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
        "multilingual-e5-base" => 768,
        "bge-large-en-v1.5" | "multilingual-e5-large" => 1024,
        _ => 384,
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
mod local {
    use anyhow::{anyhow, bail, Result};
    use std::sync::{Arc, Mutex};

    /// A fastembed model, loaded once and shared across batches.
    ///
    /// Inference runs on the blocking pool; the mutex serializes calls.
    pub struct LocalModel {
        model: Arc<Mutex<fastembed::TextEmbedding>>,
        batch_size: usize,
    }

    impl LocalModel {
        pub fn new(name: &str, batch_size: usize) -> Result<Self> {
            let model = fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(fastembed_model(name)?)
                    .with_show_download_progress(true),
            )
            .map_err(|e| anyhow!("Failed to initialize local embedding model: {}", e))?;

            Ok(Self {
                model: Arc::new(Mutex::new(model)),
                batch_size,
            })
        }

        pub async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            let model = Arc::clone(&self.model);
            let batch_size = self.batch_size;

            tokio::task::spawn_blocking(move || {
                let mut model = model
                    .lock()
                    .map_err(|_| anyhow!("local embedding model lock poisoned"))?;
                model
                    .embed(texts, Some(batch_size))
                    .map_err(|e| anyhow!("Local embedding failed: {}", e))
            })
            .await?
        }
    }

    fn fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
        match name {
            "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
            "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
            "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
            "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
            "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
            "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
            other => bail!(
                "Unknown local embedding model: '{}'. Supported models: \
                 all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
                 nomic-embed-text-v1, nomic-embed-text-v1.5, \
                 multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
                other
            ),
        }
    }
}
