//! Query-side orchestration: retrieve, format context, fill a prompt.

use std::sync::Arc;
use tracing::{debug, info};

use crate::chunker::Chunker;
use crate::config::Settings;
use crate::database::{IndexStats, VectorIndex};
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::search::SearchResult;

const UNKNOWN_SOURCE: &str = "unknown";

/// A parsed document ready for chunking.
#[derive(Debug, Clone)]
pub struct Document {
    pub text: String,
    pub source: String,
    pub doc_type: String,
}

/// Constructed once at startup and handed to whatever serves requests.
/// Cloning shares the same underlying index.
#[derive(Clone)]
pub struct RetrievalPipeline {
    index: Arc<VectorIndex>,
    chunker: Chunker,
    max_context_chars: Option<usize>,
}

impl RetrievalPipeline {
    pub fn new(settings: &Settings, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let chunker = Chunker::new(settings.chunk_size, settings.chunk_overlap)?;
        let index = VectorIndex::open(&settings.path, provider)?;
        Ok(Self::from_parts(
            Arc::new(index),
            chunker,
            settings.max_context_chars,
        ))
    }

    pub fn from_parts(
        index: Arc<VectorIndex>,
        chunker: Chunker,
        max_context_chars: Option<usize>,
    ) -> Self {
        Self {
            index,
            chunker,
            max_context_chars,
        }
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Chunks one document and adds its chunks as a single batch.
    pub fn ingest(&self, text: &str, source: &str, doc_type: &str) -> Result<usize> {
        let chunks = self.chunker.chunk_document(text, source, doc_type);
        let count = chunks.len();
        self.index.add(chunks)?;
        Ok(count)
    }

    /// Knowledge-base build: every non-blank document is chunked and the
    /// whole set goes into the index as one batch.
    pub fn ingest_documents(&self, documents: &[Document]) -> Result<usize> {
        let chunks: Vec<_> = documents
            .iter()
            .flat_map(|doc| {
                let chunks = self.chunker.chunk_document(&doc.text, &doc.source, &doc.doc_type);
                if chunks.is_empty() {
                    debug!(source = %doc.source, "document has no content; skipped");
                }
                chunks
            })
            .collect();

        let count = chunks.len();
        self.index.add(chunks)?;
        info!(documents = documents.len(), chunks = count, "built knowledge base");
        Ok(count)
    }

    pub fn retrieve(&self, query: &str, k: usize) -> Result<Vec<SearchResult>> {
        self.index.search(query, k)
    }

    pub fn retrieve_context(&self, query: &str, k: usize) -> Result<Vec<SearchResult>> {
        self.retrieve(query, k)
    }

    /// Numbered blocks labelled with their source, in rank order. With a
    /// context bound, whole blocks are kept while they fit; the first block
    /// is always kept.
    pub fn format_context(&self, results: &[SearchResult]) -> String {
        let mut blocks: Vec<String> = Vec::with_capacity(results.len());
        let mut used = 0;

        for (i, result) in results.iter().enumerate() {
            let source = result.source().unwrap_or(UNKNOWN_SOURCE);
            let block = format!("[Document {} from {}]\n{}\n", i + 1, source, result.text);
            let cost = block.chars().count() + usize::from(!blocks.is_empty());

            if let Some(limit) = self.max_context_chars {
                if !blocks.is_empty() && used + cost > limit {
                    debug!(kept = blocks.len(), dropped = results.len() - i, "context bound reached");
                    break;
                }
            }
            used += cost;
            blocks.push(block);
        }

        blocks.join("\n")
    }

    /// Retrieves context for `query` and fills `template`. Fails with
    /// `EmptyKnowledgeBase` before anything was ingested and with
    /// `NoContext` when retrieval comes back empty.
    pub fn generate_with_rag(
        &self,
        query: &str,
        k: usize,
        template: &str,
    ) -> Result<(String, Vec<SearchResult>)> {
        if self.index.is_empty() {
            return Err(Error::EmptyKnowledgeBase);
        }

        let results = self.retrieve(query, k)?;
        if results.is_empty() {
            return Err(Error::NoContext);
        }

        let context = self.format_context(&results);
        let prompt = render_template(template, &context, query);
        Ok((prompt, results))
    }

    pub fn stats(&self) -> IndexStats {
        self.index.stats()
    }

    pub fn clear(&self) -> Result<()> {
        self.index.clear()
    }
}

/// Distinct sources in rank order.
pub fn source_documents(results: &[SearchResult]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for result in results {
        let source = result.source().unwrap_or(UNKNOWN_SOURCE);
        if !sources.iter().any(|s| s == source) {
            sources.push(source.to_string());
        }
    }
    sources
}

/// Substitutes `{context}` and `{query}`. `{{` and `}}` render as single
/// braces; anything else is copied through.
pub fn render_template(template: &str, context: &str, query: &str) -> String {
    let mut out = String::with_capacity(template.len() + context.len() + query.len());
    let mut rest = template;

    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix("{{") {
            out.push('{');
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("}}") {
            out.push('}');
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("{context}") {
            out.push_str(context);
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("{query}") {
            out.push_str(query);
            rest = tail;
        } else {
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                out.push(c);
            }
            rest = chars.as_str();
        }
    }

    out
}
