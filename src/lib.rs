//! Retrieval core for grounded test-case generation: a persistent
//! exact-search vector index, a retrieval pipeline that turns hits into
//! prompt context, and an extractor that recovers test-case records from
//! generated text.

pub mod chunker;
pub mod config;
pub mod database;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod logging;
pub mod markdown;
pub mod parser;
pub mod rag;
pub mod search;
pub mod vector_entry;
pub mod vector_ops;

pub use chunker::Chunker;
pub use config::Settings;
pub use database::{IndexStats, VectorIndex};
pub use embedding::{EmbeddingProvider, HashEmbedder};
pub use error::{Error, Result};
pub use extractor::{clean_script, ExtractedResponse, ResponseExtractor, TestCaseRecord};
pub use rag::{source_documents, Document, RetrievalPipeline};
pub use search::SearchResult;
pub use vector_entry::{Chunk, IndexEntry, Metadata};
