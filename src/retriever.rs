use std::sync::Arc;

use crate::error::{Error, Result};
use crate::vector_db::{RetrievedContext, VectorStore};

pub const DEFAULT_TOP_K: usize = 10;

/// Binds a fixed `k` to a vector store.
#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn VectorStore>,
    top_k: usize,
}

impl Retriever {
    pub fn new(store: Arc<dyn VectorStore>, top_k: usize) -> Result<Self> {
        if top_k == 0 {
            return Err(Error::Config("retrieval k must be at least 1".into()));
        }
        Ok(Retriever { store, top_k })
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn store_len(&self) -> usize {
        self.store.len()
    }

    pub async fn retrieve(&self, query: &str) -> Result<RetrievedContext> {
        self.store.query(query, self.top_k).await
    }
}
