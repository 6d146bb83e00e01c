//! Construction-time configuration for the RAG service
//!
//! Values come from `RagConfig::default()`, optionally overlaid by a YAML
//! file. The binary applies environment and command-line overrides on top.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::llm::GenerationConfig;
use crate::policy::{DEFAULT_CLOSING, DEFAULT_DOMAIN, DEFAULT_REFUSAL};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;
pub const DEFAULT_RETRIEVAL_K: usize = 10;
pub const DEFAULT_EMBEDDING_MODEL: &str = "models/embedding-001";
pub const DEFAULT_GENERATION_MODEL: &str = "models/gemini-2.5-flash";
pub const DEFAULT_API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_HASHING_DIMENSIONS: usize = 768;
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 100;

/// Which embedding backend computes chunk and query vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    Gemini,
    Hashing,
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "gemini" | "google" => Ok(EmbeddingProvider::Gemini),
            "hashing" | "local" => Ok(EmbeddingProvider::Hashing),
            other => Err(Error::Config(format!("unknown embedding provider '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub source_document_path: PathBuf,
    pub index_store_path: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub retrieval_k: usize,
    pub generation_temperature: f32,
    pub generation_max_tokens: usize,
    pub embedding_provider: EmbeddingProvider,
    pub embedding_model_id: String,
    /// Only used by the hashing provider; remote models fix their own size.
    pub embedding_dimensions: usize,
    pub embed_batch_size: usize,
    pub generation_model_id: String,
    pub api_base_url: String,
    /// Below this best-chunk similarity the question is refused without a model call.
    pub min_similarity: Option<f32>,
    pub force_rebuild: bool,
    pub domain: String,
    pub refusal_sentence: String,
    pub closing_sentence: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            source_document_path: PathBuf::from("docs/reference.pdf"),
            index_store_path: default_index_dir(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            retrieval_k: DEFAULT_RETRIEVAL_K,
            generation_temperature: 0.3,
            generation_max_tokens: 500,
            embedding_provider: EmbeddingProvider::Gemini,
            embedding_model_id: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_dimensions: DEFAULT_HASHING_DIMENSIONS,
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            generation_model_id: DEFAULT_GENERATION_MODEL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            min_similarity: None,
            force_rebuild: false,
            domain: DEFAULT_DOMAIN.to_string(),
            refusal_sentence: DEFAULT_REFUSAL.to_string(),
            closing_sentence: DEFAULT_CLOSING.to_string(),
        }
    }
}

impl RagConfig {
    /// Load a YAML config file; missing keys keep their defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| Error::Config(format!("invalid config: {e}")))
    }

    /// Reject parameter combinations the pipeline cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be greater than zero".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.retrieval_k == 0 {
            return Err(Error::Config("retrieval_k must be at least 1".into()));
        }
        if !(0.0..=2.0).contains(&self.generation_temperature) {
            return Err(Error::Config(format!(
                "generation_temperature {} is outside 0.0..=2.0",
                self.generation_temperature
            )));
        }
        if self.generation_max_tokens == 0 {
            return Err(Error::Config("generation_max_tokens must be at least 1".into()));
        }
        if self.embed_batch_size == 0 {
            return Err(Error::Config("embed_batch_size must be at least 1".into()));
        }
        if self.embedding_provider == EmbeddingProvider::Hashing && self.embedding_dimensions == 0 {
            return Err(Error::Config("embedding_dimensions must be at least 1".into()));
        }
        if let Some(min) = self.min_similarity {
            if !(-1.0..=1.0).contains(&min) {
                return Err(Error::Config(format!("min_similarity {min} is outside -1.0..=1.0")));
            }
        }
        if self.embedding_model_id.trim().is_empty() || self.generation_model_id.trim().is_empty() {
            return Err(Error::Config("model identifiers must not be empty".into()));
        }
        if self.index_store_path.as_os_str().is_empty() {
            return Err(Error::Config("index_store_path must not be empty".into()));
        }
        Ok(())
    }

    pub fn generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            temperature: self.generation_temperature,
            max_tokens: self.generation_max_tokens,
        }
    }
}

fn default_index_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("docrag").join("index"))
        .unwrap_or_else(|| PathBuf::from("docrag_index"))
}
