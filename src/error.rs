use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("corrupt index at '{}': {reason}", path.display())]
    CorruptIndex { path: PathBuf, reason: String },

    #[error("knowledge base is empty; ingest documents first")]
    EmptyKnowledgeBase,

    #[error("no context retrieved for query")]
    NoContext,

    #[error("cannot read document '{name}': {reason}")]
    Parse { name: String, reason: String },

    #[error("chunk size {size} must be greater than overlap {overlap}")]
    InvalidChunking { size: usize, overlap: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("metadata sidecar: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("index header: {0}")]
    Header(#[from] bincode::Error),
}

impl Error {
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::CorruptIndex {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
