//! TOML configuration parsing and validation.
//!
//! Strategy choices (embedding provider, generation provider, merge policy)
//! deserialize straight into enums, so an unknown name fails at load time
//! and nothing downstream dispatches on strings.

use anyhow::{bail, Context, Result};
use libris_core::chunk::{ChunkConfigError, ChunkSplitter};
use libris_core::merge::DedupPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub library: LibraryConfig,
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub parsing: ParsingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LibraryConfig {
    pub root: PathBuf,
    /// Defaults to `manifest.json` next to the database.
    #[serde(default)]
    pub manifest_path: Option<PathBuf>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.pdf".to_string(),
        "**/*.md".to_string(),
        "**/*.txt".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Chunk sizes in tokens; scaled to characters by the splitter.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl ChunkingConfig {
    pub fn splitter(&self) -> Result<ChunkSplitter, ChunkConfigError> {
        ChunkSplitter::from_tokens(self.chunk_size, self.chunk_overlap)
    }
}

fn default_chunk_size() -> usize {
    512
}
fn default_chunk_overlap() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct ParsingConfig {
    /// Page length in characters for sources without page breaks.
    #[serde(default = "default_page_chars")]
    pub page_chars: usize,
}

impl Default for ParsingConfig {
    fn default() -> Self {
        Self {
            page_chars: default_page_chars(),
        }
    }
}

fn default_page_chars() -> usize {
    3000
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// Offline feature hashing; no model download.
    #[default]
    Hash,
    OpenAI,
    Ollama,
    /// fastembed, behind the `local-embeddings-fastembed` feature.
    Local,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProviderKind,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Hash,
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Nearest neighbors fetched per query variant.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Extra query variants requested from the generator.
    #[serde(default = "default_query_variants")]
    pub query_variants: usize,
    #[serde(default)]
    pub dedup: DedupPolicy,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            query_variants: default_query_variants(),
            dedup: DedupPolicy::default(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_query_variants() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GenerationProviderKind {
    #[default]
    Disabled,
    OpenAI,
    Ollama,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default)]
    pub provider: GenerationProviderKind,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: GenerationProviderKind::Disabled,
            model: None,
            url: None,
            timeout_secs: default_generation_timeout(),
            max_retries: default_generation_retries(),
            temperature: default_temperature(),
        }
    }
}

fn default_generation_timeout() -> u64 {
    60
}
fn default_generation_retries() -> u32 {
    3
}
fn default_temperature() -> f32 {
    0.2
}

impl Config {
    /// Where the manifest lives: `library.manifest_path`, or
    /// `manifest.json` beside the database file.
    pub fn manifest_path(&self) -> PathBuf {
        match &self.library.manifest_path {
            Some(path) => path.clone(),
            None => self
                .db
                .path
                .parent()
                .map(|dir| dir.join("manifest.json"))
                .unwrap_or_else(|| PathBuf::from("manifest.json")),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Chunking parameters are fatal before any work starts.
    config
        .chunking
        .splitter()
        .with_context(|| "Invalid [chunking] configuration")?;

    if config.parsing.page_chars == 0 {
        bail!("parsing.page_chars must be > 0");
    }

    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }

    let embedding = &config.embedding;
    if embedding.batch_size == 0 {
        bail!("embedding.batch_size must be >= 1");
    }
    if embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    match embedding.provider {
        EmbeddingProviderKind::OpenAI | EmbeddingProviderKind::Ollama => {
            if embedding.dims.is_none() {
                bail!(
                    "embedding.dims must be set when provider is '{:?}'",
                    embedding.provider
                );
            }
            if embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{:?}'",
                    embedding.provider
                );
            }
        }
        EmbeddingProviderKind::Hash | EmbeddingProviderKind::Local => {}
    }

    if config.generation.provider != GenerationProviderKind::Disabled
        && config.generation.model.is_none()
    {
        bail!("generation.model must be specified when a generation provider is enabled");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    const MINIMAL: &str = r#"
[library]
root = "./books"

[db]
path = "./data/libris.sqlite"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let file = write_config(MINIMAL);
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.chunking.chunk_size, 512);
        assert_eq!(config.chunking.chunk_overlap, 50);
        assert_eq!(config.embedding.provider, EmbeddingProviderKind::Hash);
        assert_eq!(config.retrieval.dedup, DedupPolicy::FirstSeen);
        assert_eq!(config.generation.provider, GenerationProviderKind::Disabled);
        assert_eq!(config.manifest_path(), PathBuf::from("./data/manifest.json"));
        assert_eq!(config.library.include_globs.len(), 3);
    }

    #[test]
    fn test_overlap_not_smaller_than_size_is_rejected() {
        let file = write_config(&format!(
            "{MINIMAL}\n[chunking]\nchunk_size = 10\nchunk_overlap = 10\n"
        ));
        let err = load_config(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("must be smaller than chunk size"));
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        let file = write_config(&format!("{MINIMAL}\n[embedding]\nprovider = \"magic\"\n"));
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_openai_requires_dims_and_model() {
        let file = write_config(&format!(
            "{MINIMAL}\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\n"
        ));
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_best_score_policy_parses() {
        let file = write_config(&format!("{MINIMAL}\n[retrieval]\ndedup = \"best_score\"\n"));
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.retrieval.dedup, DedupPolicy::BestScore);
    }

    #[test]
    fn test_explicit_manifest_path() {
        let file = write_config(
            r#"
[library]
root = "./books"
manifest_path = "/tmp/elsewhere.json"

[db]
path = "./data/libris.sqlite"
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.manifest_path(), PathBuf::from("/tmp/elsewhere.json"));
    }
}
