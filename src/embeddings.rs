//! Embedding models.
//!
//! `GeminiEmbedder` calls the Google Generative Language API. `HashingEmbedder`
//! is an offline, deterministic bag-of-words model used for local runs and
//! tests.

use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use ndarray::Array1;
use reqwest::Client;
use rustc_hash::{FxHashMap, FxHasher};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::llm::{Content, http_client, model_path, post_json, resolve_api_key};
use crate::utils::tokenize;

/// Computes vectors for stored chunks and incoming queries.
///
/// Implementations must return vectors of one fixed dimension, and the same
/// model must be used at build time and query time.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> &str;

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Array1<f32>>>;

    async fn embed_query(&self, text: &str) -> Result<Array1<f32>>;
}

/// Feature-hashing embedder: normalized tokens are hashed into a fixed number
/// of buckets with sublinear term frequency, then L2-normalized.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
    model_id: String,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            model_id: format!("hashing-{dimensions}"),
        }
    }

    pub fn vectorize(&self, text: &str) -> Array1<f32> {
        let mut counts: FxHashMap<usize, f32> = FxHashMap::default();
        for token in tokenize(text) {
            let mut hasher = FxHasher::default();
            token.hash(&mut hasher);
            let bucket = (hasher.finish() % self.dimensions as u64) as usize;
            *counts.entry(bucket).or_insert(0.0) += 1.0;
        }

        let mut vector = Array1::<f32>::zeros(self.dimensions);
        for (bucket, count) in counts {
            vector[bucket] = 1.0 + count.ln();
        }

        let norm = vector.dot(&vector).sqrt();
        if norm > 0.0 {
            vector /= norm;
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Array1<f32>>> {
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Array1<f32>> {
        Ok(self.vectorize(text))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest {
    model: String,
    content: Content,
    task_type: &'static str,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest {
    requests: Vec<EmbedContentRequest>,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    #[serde(default)]
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbedContentResponse {
    embedding: ContentEmbedding,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

/// Google Gemini embedding client (`embedContent` / `batchEmbedContents`).
#[derive(Debug, Clone)]
pub struct GeminiEmbedder {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiEmbedder {
    /// Create a client; `api_key` falls back to `GOOGLE_API_KEY`.
    pub fn new(api_key: Option<String>, model: &str, base_url: &str) -> Result<Self> {
        let api_key = resolve_api_key(api_key).map_err(Error::Config)?;
        let http = http_client().map_err(Error::Config)?;
        Ok(Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model_path(model),
        })
    }

    fn request(&self, text: &str, task_type: &'static str) -> EmbedContentRequest {
        EmbedContentRequest {
            model: self.model.clone(),
            content: Content::text(None, text),
            task_type,
        }
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}:{method}", self.base_url, self.model)
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Array1<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Embedding {} texts with {}", texts.len(), self.model);

        let payload = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|t| self.request(t, "RETRIEVAL_DOCUMENT"))
                .collect(),
        };
        let response: BatchEmbedResponse =
            post_json(&self.http, &self.url("batchEmbedContents"), &self.api_key, &payload)
                .await
                .map_err(|e| Error::Embed(format!("{}: {e}", self.model)))?;

        if response.embeddings.len() != texts.len() {
            return Err(Error::Embed(format!(
                "{} returned {} embeddings for {} texts",
                self.model,
                response.embeddings.len(),
                texts.len()
            )));
        }

        info!("Generated {} embeddings", response.embeddings.len());
        Ok(response
            .embeddings
            .into_iter()
            .map(|e| Array1::from(e.values))
            .collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Array1<f32>> {
        let payload = self.request(text, "RETRIEVAL_QUERY");
        let response: EmbedContentResponse =
            post_json(&self.http, &self.url("embedContent"), &self.api_key, &payload)
                .await
                .map_err(|e| Error::Embed(format!("{}: {e}", self.model)))?;

        if response.embedding.values.is_empty() {
            return Err(Error::Embed(format!("{} returned an empty embedding", self.model)));
        }
        Ok(Array1::from(response.embedding.values))
    }
}
