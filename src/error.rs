//! Error types for the RAG pipeline

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Source document missing, unreadable or without extractable text.
    #[error("Load error: {0}")]
    Load(String),

    /// Invalid construction parameters (chunking, k, model mismatch).
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Embedding error: {0}")]
    Embed(String),

    #[error("Index store error: {0}")]
    Store(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Short category name, used by hosts for user-facing messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Load(_) => "load",
            Error::Config(_) => "config",
            Error::Embed(_) => "embed",
            Error::Store(_) => "store",
            Error::Generation(_) => "generation",
            Error::InvalidInput(_) => "input",
        }
    }
}
