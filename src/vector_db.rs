//! Persistent embedding index with exact nearest-neighbour search.
//!
//! The store directory holds `index.json` (manifest plus chunk/vector pairs)
//! and a `.build.lock` file that serializes builds across processes. The
//! embedding model id is recorded in the manifest and checked on every load.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use fs2::FileExt;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chunker::Chunk;
use crate::embeddings::Embedder;
use crate::error::{Error, Result};
use crate::utils::{ensure_dir, write_json_atomic};

pub const INDEX_FILE: &str = "index.json";
const LOCK_FILE: &str = ".build.lock";
const FORMAT_VERSION: u32 = 1;
const CORPUS_NAMESPACE: Uuid = Uuid::from_u128(0x0d9e_41a2_77c5_4b38_a1f6_2e90_c4b7_5d63);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    pub embedding_model: String,
    pub dimensions: usize,
    pub corpus_fingerprint: Uuid,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Array1<f32>,
}

#[derive(Serialize)]
struct PersistedIndexRef<'a> {
    manifest: &'a IndexManifest,
    entries: &'a [IndexEntry],
}

#[derive(Deserialize)]
struct PersistedIndex {
    manifest: IndexManifest,
    entries: Vec<IndexEntry>,
}

/// A retrieved chunk and its cosine distance to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub distance: f32,
}

impl ScoredChunk {
    pub fn similarity(&self) -> f32 {
        1.0 - self.distance
    }
}

/// Chunks ranked by ascending distance to a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievedContext {
    chunks: Vec<ScoredChunk>,
}

impl RetrievedContext {
    pub fn new(chunks: Vec<ScoredChunk>) -> Self {
        Self { chunks }
    }

    pub fn chunks(&self) -> &[ScoredChunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn best_similarity(&self) -> Option<f32> {
        self.chunks.first().map(ScoredChunk::similarity)
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.chunks.iter().map(|c| c.chunk.text.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Texts per embedding request.
    pub batch_size: usize,
    /// Re-embed even when a matching index exists, replacing it.
    pub force_rebuild: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            force_rebuild: false,
        }
    }
}

/// Similarity store the retriever queries.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn query(&self, text: &str, k: usize) -> Result<RetrievedContext>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct EmbeddingIndex {
    store_dir: PathBuf,
    manifest: IndexManifest,
    entries: Vec<IndexEntry>,
    embedder: Arc<dyn Embedder>,
}

impl std::fmt::Debug for EmbeddingIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingIndex")
            .field("store_dir", &self.store_dir)
            .field("manifest", &self.manifest)
            .finish_non_exhaustive()
    }
}

impl EmbeddingIndex {
    /// Load the persisted index for `chunks` if it matches, otherwise embed
    /// every chunk and persist a fresh index.
    pub async fn build(
        store_dir: impl Into<PathBuf>,
        chunks: Vec<Chunk>,
        embedder: Arc<dyn Embedder>,
        options: &BuildOptions,
    ) -> Result<Self> {
        if chunks.is_empty() {
            return Err(Error::Load("cannot build an index from zero chunks".into()));
        }
        if options.batch_size == 0 {
            return Err(Error::Config("embed batch size must be at least 1".into()));
        }

        let store_dir = store_dir.into();
        ensure_dir(&store_dir)
            .map_err(|e| Error::Store(format!("cannot create {}: {e}", store_dir.display())))?;
        let _lock = BuildLock::acquire(&store_dir).await?;

        let fingerprint = corpus_fingerprint(&chunks);
        let index_path = store_dir.join(INDEX_FILE);

        if index_path.exists() {
            match read_index(&index_path) {
                Ok(persisted) => {
                    let manifest = &persisted.manifest;
                    if !options.force_rebuild {
                        check_model(manifest, embedder.as_ref())?;
                        if manifest.corpus_fingerprint == fingerprint {
                            info!(
                                "Loaded existing index from {} ({} chunks)",
                                store_dir.display(),
                                manifest.chunk_count
                            );
                            return Ok(Self {
                                store_dir,
                                manifest: persisted.manifest,
                                entries: persisted.entries,
                                embedder,
                            });
                        }
                        info!("Corpus changed since last build, rebuilding index");
                    }
                }
                Err(e) if options.force_rebuild => {
                    warn!("Discarding unreadable index at {}: {e}", index_path.display());
                }
                Err(e) => return Err(e),
            }
        }

        let entries = embed_chunks(chunks, embedder.as_ref(), options.batch_size).await?;
        let manifest = IndexManifest {
            format_version: FORMAT_VERSION,
            embedding_model: embedder.model_id().to_string(),
            dimensions: entries[0].embedding.len(),
            corpus_fingerprint: fingerprint,
            chunk_count: entries.len(),
        };

        write_json_atomic(
            &index_path,
            &PersistedIndexRef {
                manifest: &manifest,
                entries: &entries,
            },
        )
        .map_err(|e| Error::Store(format!("failed to write {}: {e}", index_path.display())))?;

        info!(
            "Built index with {} chunks ({} dims, {}) at {}",
            manifest.chunk_count,
            manifest.dimensions,
            manifest.embedding_model,
            store_dir.display()
        );

        Ok(Self {
            store_dir,
            manifest,
            entries,
            embedder,
        })
    }

    /// Open an index that was built earlier, without re-embedding anything.
    pub fn open(store_dir: impl Into<PathBuf>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let store_dir = store_dir.into();
        let index_path = store_dir.join(INDEX_FILE);
        if !index_path.is_file() {
            return Err(Error::Store(format!("no index at {}", index_path.display())));
        }

        let persisted = read_index(&index_path)?;
        check_model(&persisted.manifest, embedder.as_ref())?;
        Ok(Self {
            store_dir,
            manifest: persisted.manifest,
            entries: persisted.entries,
            embedder,
        })
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Embed `text` and return the `k` nearest chunks.
    pub async fn query(&self, text: &str, k: usize) -> Result<RetrievedContext> {
        if k == 0 {
            return Err(Error::Config("k must be at least 1".into()));
        }
        let vector = self.embedder.embed_query(text).await?;
        self.search(&vector, k)
    }

    /// Rank stored chunks against an already computed query vector.
    pub fn search(&self, vector: &Array1<f32>, k: usize) -> Result<RetrievedContext> {
        if k == 0 {
            return Err(Error::Config("k must be at least 1".into()));
        }
        if vector.len() != self.manifest.dimensions {
            return Err(Error::Embed(format!(
                "query vector has {} dimensions, index has {}",
                vector.len(),
                self.manifest.dimensions
            )));
        }

        let mut ranked: Vec<(f32, usize)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(pos, entry)| (cosine_distance(&entry.embedding, vector), pos))
            .collect();
        ranked.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then_with(|| self.entries[a.1].chunk.index.cmp(&self.entries[b.1].chunk.index))
        });
        ranked.truncate(k);

        debug!(
            "Retrieved {} chunks (best distance {:?})",
            ranked.len(),
            ranked.first().map(|r| r.0)
        );

        Ok(RetrievedContext::new(
            ranked
                .into_iter()
                .map(|(distance, pos)| ScoredChunk {
                    chunk: self.entries[pos].chunk.clone(),
                    distance,
                })
                .collect(),
        ))
    }
}

#[async_trait]
impl VectorStore for EmbeddingIndex {
    async fn query(&self, text: &str, k: usize) -> Result<RetrievedContext> {
        EmbeddingIndex::query(self, text, k).await
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Exclusive advisory lock on the store directory, held for one build.
struct BuildLock {
    file: File,
}

impl BuildLock {
    async fn acquire(store_dir: &Path) -> Result<Self> {
        let path = store_dir.join(LOCK_FILE);
        let display = path.display().to_string();

        let file = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?;
            FileExt::lock_exclusive(&file)?;
            Ok(file)
        })
        .await
        .map_err(|e| Error::Store(format!("lock task failed: {e}")))?
        .map_err(|e| Error::Store(format!("failed to lock {display}: {e}")))?;

        Ok(Self { file })
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

async fn embed_chunks(
    chunks: Vec<Chunk>,
    embedder: &dyn Embedder,
    batch_size: usize,
) -> Result<Vec<IndexEntry>> {
    let mut vectors = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let embedded = embedder.embed_documents(&texts).await?;
        if embedded.len() != batch.len() {
            return Err(Error::Embed(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                embedded.len()
            )));
        }
        vectors.extend(embedded);
    }

    let dimensions = vectors.first().map(|v| v.len()).unwrap_or(0);
    if dimensions == 0 {
        return Err(Error::Embed("embedding model returned empty vectors".into()));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimensions) {
        return Err(Error::Embed(format!(
            "inconsistent embedding dimensions: {} vs {}",
            dimensions,
            bad.len()
        )));
    }

    Ok(chunks
        .into_iter()
        .zip(vectors)
        .map(|(chunk, embedding)| IndexEntry { chunk, embedding })
        .collect())
}

fn read_index(path: &Path) -> Result<PersistedIndex> {
    let raw = fs::read(path)
        .map_err(|e| Error::Store(format!("failed to read {}: {e}", path.display())))?;
    let persisted: PersistedIndex = serde_json::from_slice(&raw)
        .map_err(|e| Error::Store(format!("corrupt index {}: {e}", path.display())))?;

    let manifest = &persisted.manifest;
    if manifest.format_version != FORMAT_VERSION {
        return Err(Error::Store(format!(
            "unsupported index format {} (expected {FORMAT_VERSION})",
            manifest.format_version
        )));
    }
    if manifest.chunk_count != persisted.entries.len()
        || persisted
            .entries
            .iter()
            .any(|e| e.embedding.len() != manifest.dimensions)
    {
        return Err(Error::Store(format!(
            "index {} does not match its manifest",
            path.display()
        )));
    }
    Ok(persisted)
}

fn check_model(manifest: &IndexManifest, embedder: &dyn Embedder) -> Result<()> {
    if manifest.embedding_model != embedder.model_id() {
        return Err(Error::Config(format!(
            "index was built with embedding model '{}' but '{}' is configured; rebuild the index",
            manifest.embedding_model,
            embedder.model_id()
        )));
    }
    Ok(())
}

/// Stable identifier of a chunk sequence; chunk ids already cover index and text.
pub fn corpus_fingerprint(chunks: &[Chunk]) -> Uuid {
    let mut bytes = Vec::with_capacity(chunks.len() * 16);
    for chunk in chunks {
        bytes.extend_from_slice(chunk.id.as_bytes());
    }
    Uuid::new_v5(&CORPUS_NAMESPACE, &bytes)
}

fn cosine_distance(a: &Array1<f32>, b: &Array1<f32>) -> f32 {
    let dot_product = a.dot(b);
    let norm_a = a.dot(a).sqrt();
    let norm_b = b.dot(b).sqrt();

    let similarity = if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    };
    1.0 - similarity
}
