//! End-to-end scenarios for the RAG service: construction, refusal,
//! grounding, courtesy and error reporting.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use ndarray::Array1;
use tempfile::{TempDir, tempdir};

use docrag::policy::{DEFAULT_CLOSING, DEFAULT_REFUSAL};
use docrag::utils::tokenize;
use docrag::{
    AnswerKind, CompletionModel, CompletionRequest, Embedder, EmbeddingProvider, Error,
    HashingEmbedder, RagConfig, RagService, Result,
};

const GUIDE: &str = "What is breast cancer?\n\
Breast cancer is a disease in which cells in the breast grow out of control.\n\n\
Symptoms\n\
Warning signs include a new lump in the breast or underarm, and nipple discharge.\n\n\
Risk factors\n\
Getting older and inherited changes in certain genes raise the risk.\n\n\
Screening\n\
A mammogram is an x-ray picture of the breast used to find tumors early.\n\n\
Treatment\n\
Treatment options include surgery, chemotherapy, hormonal therapy and radiation therapy.\n";

/// Answers with the first sentence of the highest ranked chunk.
#[derive(Default)]
struct ExtractiveModel {
    calls: AtomicUsize,
    last: Mutex<Option<CompletionRequest>>,
}

impl ExtractiveModel {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionModel for ExtractiveModel {
    fn model_id(&self) -> &str {
        "extractive"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(request.clone());

        let context = request
            .system
            .split_once("plain language.\n\n")
            .map(|(_, ctx)| ctx)
            .unwrap_or("");
        let sentence = match context.find('.') {
            Some(end) => &context[..=end],
            None => DEFAULT_REFUSAL,
        };
        Ok(sentence.to_string())
    }
}

/// Always replies with a fixed string.
struct FixedModel(&'static str);

#[async_trait]
impl CompletionModel for FixedModel {
    fn model_id(&self) -> &str {
        "fixed"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        Ok(self.0.to_string())
    }
}

struct FailingModel;

#[async_trait]
impl CompletionModel for FailingModel {
    fn model_id(&self) -> &str {
        "failing"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        Err(Error::Generation("deadline exceeded".into()))
    }
}

/// Hashing embedder that counts document embedding calls.
struct CountingEmbedder {
    inner: HashingEmbedder,
    calls: AtomicUsize,
}

#[async_trait]
impl Embedder for CountingEmbedder {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Array1<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed_documents(texts).await
    }

    async fn embed_query(&self, text: &str) -> Result<Array1<f32>> {
        self.inner.embed_query(text).await
    }
}

fn write_guide(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("guide.txt");
    fs::write(&path, GUIDE).unwrap();
    path
}

fn config(dir: &TempDir, min_similarity: Option<f32>) -> RagConfig {
    RagConfig {
        source_document_path: write_guide(dir.path()),
        index_store_path: dir.path().join("index"),
        chunk_size: 200,
        chunk_overlap: 20,
        retrieval_k: 3,
        embedding_provider: EmbeddingProvider::Hashing,
        min_similarity,
        ..RagConfig::default()
    }
}

fn hashing() -> Arc<dyn Embedder> {
    Arc::new(HashingEmbedder::new(768))
}

#[tokio::test]
async fn missing_document_fails_with_load_error() {
    let dir = tempdir().unwrap();
    let config = RagConfig {
        source_document_path: dir.path().join("does-not-exist.pdf"),
        ..config(&dir, None)
    };

    let result = RagService::build_with(&config, hashing(), Arc::new(FailingModel)).await;

    assert!(matches!(result, Err(Error::Load(_))));
    assert!(!dir.path().join("index").join("index.json").exists());
}

#[tokio::test]
async fn invalid_chunking_fails_with_config_error() {
    let dir = tempdir().unwrap();
    let config = RagConfig {
        chunk_size: 50,
        chunk_overlap: 50,
        ..config(&dir, None)
    };

    let result = RagService::build_with(&config, hashing(), Arc::new(FailingModel)).await;
    assert!(matches!(result, Err(Error::Config(_))));
}

#[tokio::test]
async fn unrelated_question_is_refused_without_model_call() {
    let dir = tempdir().unwrap();
    let model = Arc::new(ExtractiveModel::default());
    let service = RagService::build_with(&config(&dir, Some(0.25)), hashing(), model.clone())
        .await
        .unwrap();

    let answer = service
        .respond("What is the boiling point of mercury?")
        .await
        .unwrap();

    assert_eq!(answer.kind, AnswerKind::Refusal);
    assert_eq!(answer.text, DEFAULT_REFUSAL);
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn model_refusal_is_classified_as_refusal() {
    let dir = tempdir().unwrap();
    let service = RagService::build_with(
        &config(&dir, None),
        hashing(),
        Arc::new(FixedModel("I'm sorry, I can't help with that topic.")),
    )
    .await
    .unwrap();

    let answer = service.respond("Is coffee healthy?").await.unwrap();
    assert_eq!(answer.kind, AnswerKind::Refusal);
}

#[tokio::test]
async fn grounded_answer_stays_within_document() {
    let dir = tempdir().unwrap();
    let model = Arc::new(ExtractiveModel::default());
    let service = RagService::build_with(&config(&dir, Some(0.25)), hashing(), model.clone())
        .await
        .unwrap();

    let answer = service.respond("What is breast cancer?").await.unwrap();

    assert_eq!(answer.kind, AnswerKind::Grounded);
    assert!(answer.text.contains("disease"));

    let source_words: HashSet<String> = tokenize(GUIDE).into_iter().collect();
    for word in tokenize(&answer.text) {
        assert!(source_words.contains(&word), "'{word}' is not in the document");
    }
    assert!(!answer.text.chars().any(|c| c.is_ascii_digit()));

    let request = model.last.lock().unwrap().clone().unwrap();
    assert_eq!(request.user, "What is breast cancer?");
    assert!(request.system.contains("only from the given context"));
    assert!(request.system.contains("Breast cancer is a disease"));
    assert!((request.temperature - 0.3).abs() < f32::EPSILON);
    assert_eq!(request.max_tokens, 500);
}

#[tokio::test]
async fn thanks_after_exchange_gets_closing_sentence() {
    let dir = tempdir().unwrap();
    let model = Arc::new(ExtractiveModel::default());
    let service = RagService::build_with(&config(&dir, Some(0.25)), hashing(), model.clone())
        .await
        .unwrap();

    service.answer("What are the symptoms?").await.unwrap();
    let calls_before = model.calls();

    let answer = service.respond("Thank you").await.unwrap();
    assert_eq!(answer.kind, AnswerKind::Closing);
    assert!(answer.text.contains(DEFAULT_CLOSING));
    assert_eq!(model.calls(), calls_before);

    let mixed = service
        .answer("Thanks! What is a mammogram used for?")
        .await
        .unwrap();
    assert!(mixed.ends_with(DEFAULT_CLOSING));
}

#[tokio::test]
async fn model_failure_is_an_error_not_a_refusal() {
    let dir = tempdir().unwrap();
    let service = RagService::build_with(&config(&dir, None), hashing(), Arc::new(FailingModel))
        .await
        .unwrap();

    let err = service.answer("What is breast cancer?").await.unwrap_err();

    assert!(matches!(err, Error::Generation(_)));
    assert_eq!(err.kind(), "generation");
}

#[tokio::test]
async fn second_startup_reuses_persisted_index() {
    let dir = tempdir().unwrap();
    let config = config(&dir, None);
    let embedder = Arc::new(CountingEmbedder {
        inner: HashingEmbedder::new(768),
        calls: AtomicUsize::new(0),
    });

    RagService::build_with(&config, embedder.clone(), Arc::new(FixedModel("ok")))
        .await
        .unwrap();
    let after_first = embedder.calls.load(Ordering::SeqCst);
    assert!(after_first > 0);

    let service = RagService::build_with(&config, embedder.clone(), Arc::new(FixedModel("ok")))
        .await
        .unwrap();
    assert_eq!(embedder.calls.load(Ordering::SeqCst), after_first);
    assert_eq!(service.answer("What is screening?").await.unwrap(), "ok");
}

#[tokio::test]
async fn switching_embedding_model_fails_fast() {
    let dir = tempdir().unwrap();
    let config = config(&dir, None);

    RagService::build_with(&config, hashing(), Arc::new(FixedModel("ok")))
        .await
        .unwrap();
    let result =
        RagService::build_with(&config, Arc::new(HashingEmbedder::new(64)), Arc::new(FixedModel("ok")))
            .await;

    assert!(matches!(result, Err(Error::Config(_))));
}

#[tokio::test]
async fn concurrent_answers_share_one_service() {
    let dir = tempdir().unwrap();
    let service = Arc::new(
        RagService::build_with(
            &config(&dir, None),
            hashing(),
            Arc::new(ExtractiveModel::default()),
        )
        .await
        .unwrap(),
    );

    let questions = [
        "What is breast cancer?",
        "What are the symptoms?",
        "Who is at risk?",
        "How is it treated?",
    ];
    let handles: Vec<_> = questions
        .iter()
        .map(|q| {
            let service = Arc::clone(&service);
            let q = q.to_string();
            tokio::spawn(async move { service.answer(&q).await })
        })
        .collect();

    for handle in handles {
        let answer = handle.await.unwrap().unwrap();
        assert!(!answer.is_empty());
    }
}
