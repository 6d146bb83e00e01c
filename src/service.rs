//! The question-answering entry point.
//!
//! `RagService` is built once (document load, chunking, index build or load)
//! and then shared read-only. Each call is independent: retrieve, apply the
//! deterministic guards, generate.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::chunker::{self, Chunk};
use crate::config::{EmbeddingProvider, RagConfig};
use crate::embeddings::{Embedder, GeminiEmbedder, HashingEmbedder};
use crate::error::{Error, Result};
use crate::generator::AnswerGenerator;
use crate::llm::{CompletionModel, GeminiClient};
use crate::loader;
use crate::policy::{Courtesy, PromptPolicy};
use crate::retriever::Retriever;
use crate::vector_db::{BuildOptions, EmbeddingIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerKind {
    /// Produced by the model from retrieved context.
    Grounded,
    /// The fixed refusal sentence, from the model or the similarity guard.
    Refusal,
    /// Closing sentence for a thanks-only message.
    Closing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub kind: AnswerKind,
}

#[derive(Clone)]
pub struct RagService {
    retriever: Retriever,
    generator: AnswerGenerator,
    min_similarity: Option<f32>,
}

impl RagService {
    pub fn new(retriever: Retriever, generator: AnswerGenerator, min_similarity: Option<f32>) -> Self {
        Self {
            retriever,
            generator,
            min_similarity,
        }
    }

    /// Build the service with the embedding and generation backends named in
    /// `config`. The document is loaded before any client is created, so a
    /// missing document fails with `Error::Load` regardless of credentials.
    pub async fn build(config: &RagConfig) -> Result<Self> {
        let chunks = prepare_chunks(config)?;

        let embedder: Arc<dyn Embedder> = match config.embedding_provider {
            EmbeddingProvider::Gemini => Arc::new(GeminiEmbedder::new(
                None,
                &config.embedding_model_id,
                &config.api_base_url,
            )?),
            EmbeddingProvider::Hashing => Arc::new(HashingEmbedder::new(config.embedding_dimensions)),
        };
        let model: Arc<dyn CompletionModel> = Arc::new(GeminiClient::new(
            None,
            &config.generation_model_id,
            &config.api_base_url,
        )?);

        Self::assemble(config, chunks, embedder, model).await
    }

    /// Like `build`, with caller-provided backends.
    pub async fn build_with(
        config: &RagConfig,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn CompletionModel>,
    ) -> Result<Self> {
        let chunks = prepare_chunks(config)?;
        Self::assemble(config, chunks, embedder, model).await
    }

    async fn assemble(
        config: &RagConfig,
        chunks: Vec<Chunk>,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn CompletionModel>,
    ) -> Result<Self> {
        let options = BuildOptions {
            batch_size: config.embed_batch_size,
            force_rebuild: config.force_rebuild,
        };
        let index = EmbeddingIndex::build(&config.index_store_path, chunks, embedder, &options).await?;
        if index.is_empty() {
            return Err(Error::Load("index holds no chunks".into()));
        }
        debug!("Index at {} holds {} chunks", index.store_dir().display(), index.len());

        let retriever = Retriever::new(Arc::new(index), config.retrieval_k)?;
        let policy = PromptPolicy::new(
            config.domain.clone(),
            config.refusal_sentence.clone(),
            config.closing_sentence.clone(),
        );
        let generator = AnswerGenerator::new(model, policy, config.generation_config());

        info!(
            "RAG service ready (k={}, chunks={}, min_similarity={:?})",
            retriever.top_k(),
            retriever.store_len(),
            config.min_similarity
        );
        Ok(Self::new(retriever, generator, config.min_similarity))
    }

    pub fn policy(&self) -> &PromptPolicy {
        self.generator.policy()
    }

    /// Answer text only; see `respond` for the answer kind.
    pub async fn answer(&self, question: &str) -> Result<String> {
        self.respond(question).await.map(|answer| answer.text)
    }

    pub async fn respond(&self, question: &str) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::InvalidInput("question cannot be empty".into()));
        }

        let policy = self.policy();
        let courtesy = policy.courtesy(question);
        if courtesy == Courtesy::Only {
            return Ok(Answer {
                text: policy.closing.clone(),
                kind: AnswerKind::Closing,
            });
        }

        let context = self.retriever.retrieve(question).await?;
        let best = context.best_similarity();
        debug!("Best similarity {:?} over {} chunks", best, context.len());

        let below_threshold = match (best, self.min_similarity) {
            (None, _) => true,
            (Some(best), Some(min)) => best < min,
            (Some(_), None) => false,
        };
        if below_threshold {
            warn!("No sufficiently similar context (best {:?}), refusing", best);
            return Ok(self.with_closing(policy.refusal.clone(), AnswerKind::Refusal, courtesy));
        }

        let text = self.generator.generate(question, &context).await?;
        let kind = if policy.is_refusal(&text) {
            AnswerKind::Refusal
        } else {
            AnswerKind::Grounded
        };
        Ok(self.with_closing(text, kind, courtesy))
    }

    fn with_closing(&self, text: String, kind: AnswerKind, courtesy: Courtesy) -> Answer {
        let policy = self.policy();
        let text = if courtesy == Courtesy::WithQuestion && !policy.contains_closing(&text) {
            format!("{text} {}", policy.closing)
        } else {
            text
        };
        Answer { text, kind }
    }
}

fn prepare_chunks(config: &RagConfig) -> Result<Vec<Chunk>> {
    config.validate()?;
    let document = loader::load(&config.source_document_path)?;
    let chunks = chunker::split(document.text(), config.chunk_size, config.chunk_overlap)?;
    info!(
        "Split {} into {} chunks (size {}, overlap {})",
        document.source.display(),
        chunks.len(),
        config.chunk_size,
        config.chunk_overlap
    );
    Ok(chunks)
}
