//! Document-grounded question answering.
//!
//! Loads one reference document, splits it into overlapping chunks, embeds
//! them into a persistent index, and answers questions strictly from the
//! retrieved context:
//! - `loader` / `chunker`: document text and chunks
//! - `embeddings` / `vector_db` / `retriever`: vectors, storage, top-k search
//! - `llm` / `policy` / `generator`: constrained answer generation
//! - `service`: the `RagService::answer` entry point

pub mod chunker;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod generator;
pub mod history;
pub mod llm;
pub mod loader;
pub mod policy;
pub mod retriever;
pub mod service;
pub mod utils;
pub mod vector_db;

pub use chunker::Chunk;
pub use config::{EmbeddingProvider, RagConfig};
pub use embeddings::{Embedder, GeminiEmbedder, HashingEmbedder};
pub use error::{Error, Result};
pub use generator::AnswerGenerator;
pub use llm::{CompletionModel, CompletionRequest, GeminiClient, GenerationConfig};
pub use loader::Document;
pub use policy::PromptPolicy;
pub use retriever::Retriever;
pub use service::{Answer, AnswerKind, RagService};
pub use vector_db::{BuildOptions, EmbeddingIndex, RetrievedContext, ScoredChunk, VectorStore};
