//! Persistent exact-search vector index.
//!
//! Vectors live in one flat row-major array next to a parallel array of
//! metadata entries; an entry's position is its identity. Every successful
//! `add` is written through to two artifacts at the base path:
//!
//! - `<path>.index`: bincode header (magic, version, dimension, count)
//!   followed by `count * dimension` little-endian `f32`.
//! - `<path>.metadata.json`: array of flat objects (chunk metadata + `text`)
//!   in insertion order.

use memmap2::Mmap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::mem::size_of;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Number;
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::search::{exact_search, SearchResult};
use crate::vector_entry::{Chunk, IndexEntry};

const INDEX_MAGIC: [u8; 4] = *b"VKRG";
const INDEX_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Default, Debug, PartialEq)]
struct IndexHeader {
    magic: [u8; 4],
    version: u32,
    dimension: u32,
    count: u64,
}

#[derive(Default)]
struct IndexState {
    vectors: Vec<Number>,
    entries: Vec<IndexEntry>,
}

impl IndexState {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn truncate(&mut self, len: usize, dimension: usize) {
        self.vectors.truncate(len * dimension);
        self.entries.truncate(len);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub total_entries: usize,
    pub dimension: usize,
    pub backing_path: String,
    pub model_identifier: String,
}

/// Reads share the lock; `add`, `persist`, `load` and `clear` hold it
/// exclusively, so readers see either the pre- or post-batch state.
pub struct VectorIndex {
    base_path: PathBuf,
    dimension: usize,
    provider: Arc<dyn EmbeddingProvider>,
    state: RwLock<IndexState>,
}

impl VectorIndex {
    /// Opens the index at `path`, loading existing artifacts if
    /// `<path>.index` is present and starting empty otherwise.
    pub fn open(path: impl AsRef<Path>, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let base_path = path.as_ref().to_path_buf();
        if let Some(parent) = base_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let index = Self {
            base_path,
            dimension: provider.dimension(),
            provider,
            state: RwLock::new(IndexState::default()),
        };

        if index.index_path().exists() {
            index.load()?;
            debug!(
                path = %index.base_path.display(),
                entries = index.len(),
                "loaded existing index"
            );
        }

        Ok(index)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn path(&self) -> &Path {
        &self.base_path
    }

    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn index_path(&self) -> PathBuf {
        with_suffix(&self.base_path, ".index")
    }

    pub fn metadata_path(&self) -> PathBuf {
        with_suffix(&self.base_path, ".metadata.json")
    }

    /// Embeds and appends a batch, then writes it through to disk. The batch
    /// is all-or-nothing: a bad embedding or a failed write leaves the index
    /// as it was.
    pub fn add(&self, chunks: Vec<Chunk>) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let texts: Vec<&str> = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
        let embeddings = self.provider.embed_batch(&texts)?;
        if let Err(err) = self.check_batch(&embeddings, chunks.len()) {
            warn!(error = %err, batch = chunks.len(), "rejected batch");
            return Err(err);
        }

        let mut state = self.state.write();
        let committed = state.len();
        for (chunk, vector) in chunks.into_iter().zip(embeddings) {
            state.vectors.extend_from_slice(&vector);
            state.entries.push(IndexEntry::from(chunk));
        }

        if let Err(err) = self.write_artifacts(&state) {
            warn!(error = %err, "failed to persist batch; rolling back");
            state.truncate(committed, self.dimension);
            if let Err(restore_err) = self.write_artifacts(&state) {
                warn!(error = %restore_err, "failed to restore artifacts after rollback");
            }
            return Err(err);
        }

        info!(
            added = state.len() - committed,
            total = state.len(),
            "appended batch to index"
        );
        Ok(())
    }

    /// The `k` nearest entries to `query`, closest first. An empty index
    /// yields an empty list.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<SearchResult>> {
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self.provider.embed(query)?;
        if query_vector.len() != self.dimension {
            return Err(Error::Embedding(format!(
                "query embedding has dimension {}, index expects {}",
                query_vector.len(),
                self.dimension
            )));
        }

        let start = Instant::now();
        let state = self.state.read();
        let results: Vec<SearchResult> =
            exact_search(&state.vectors, self.dimension, &query_vector, k)
                .into_iter()
                .map(|(position, score)| SearchResult::from_entry(&state.entries[position], score))
                .collect();

        debug!(
            scanned = state.len(),
            returned = results.len(),
            elapsed = ?start.elapsed(),
            "exact search"
        );
        Ok(results)
    }

    pub fn persist(&self) -> Result<()> {
        let state = self.state.write();
        self.write_artifacts(&state)
    }

    /// Replaces the in-memory state with what is on disk. On failure the
    /// current state is kept.
    pub fn load(&self) -> Result<()> {
        let mut state = self.state.write();
        match self.read_artifacts() {
            Ok(loaded) => {
                *state = loaded;
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, path = %self.base_path.display(), "failed to load index");
                Err(err)
            }
        }
    }

    /// Deletes both artifacts and resets to an empty index of the same
    /// dimension.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.state.write();
        remove_if_exists(&self.index_path())?;
        remove_if_exists(&self.metadata_path())?;
        *state = IndexState::default();
        info!(path = %self.base_path.display(), "cleared index");
        Ok(())
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            total_entries: self.len(),
            dimension: self.dimension,
            backing_path: self.base_path.display().to_string(),
            model_identifier: self.provider.model_id().to_string(),
        }
    }

    fn check_batch(&self, embeddings: &[Vec<Number>], expected: usize) -> Result<()> {
        if embeddings.len() != expected {
            return Err(Error::Embedding(format!(
                "provider returned {} vectors for {} chunks",
                embeddings.len(),
                expected
            )));
        }
        if let Some((i, vector)) = embeddings
            .iter()
            .enumerate()
            .find(|(_, vector)| vector.len() != self.dimension)
        {
            return Err(Error::Embedding(format!(
                "vector {} has dimension {}, index expects {}",
                i,
                vector.len(),
                self.dimension
            )));
        }
        Ok(())
    }

    /// Stages both artifacts before renaming either, so a failed write leaves
    /// the previous pair in place.
    fn write_artifacts(&self, state: &IndexState) -> Result<()> {
        let header = IndexHeader {
            magic: INDEX_MAGIC,
            version: INDEX_VERSION,
            dimension: self.dimension as u32,
            count: state.len() as u64,
        };

        let index_path = self.index_path();
        let metadata_path = self.metadata_path();

        let index_tmp = stage(&index_path, |writer| {
            bincode::serialize_into(&mut *writer, &header)?;
            for value in &state.vectors {
                writer.write_all(&value.to_le_bytes())?;
            }
            Ok(())
        })?;

        let metadata_tmp = match stage(&metadata_path, |writer| {
            serde_json::to_writer_pretty(&mut *writer, &state.entries)?;
            Ok(())
        }) {
            Ok(tmp) => tmp,
            Err(err) => {
                discard(&index_tmp);
                return Err(err);
            }
        };

        if let Err(err) = fs::rename(&index_tmp, &index_path) {
            discard(&index_tmp);
            discard(&metadata_tmp);
            return Err(err.into());
        }
        if let Err(err) = fs::rename(&metadata_tmp, &metadata_path) {
            discard(&metadata_tmp);
            return Err(err.into());
        }
        Ok(())
    }

    fn read_artifacts(&self) -> Result<IndexState> {
        let index_path = self.index_path();
        let file = File::open(&index_path)?;
        let header_len = bincode::serialized_size(&IndexHeader::default())? as usize;

        let file_len = file.metadata()?.len() as usize;
        if file_len < header_len {
            return Err(Error::corrupt(
                &index_path,
                format!("file is {} bytes, header needs {}", file_len, header_len),
            ));
        }

        let mmap = unsafe { Mmap::map(&file)? };
        let header: IndexHeader = bincode::deserialize(&mmap[..header_len])
            .map_err(|err| Error::corrupt(&index_path, format!("unreadable header: {}", err)))?;

        if header.magic != INDEX_MAGIC {
            return Err(Error::corrupt(&index_path, "not a vekta index file"));
        }
        if header.version != INDEX_VERSION {
            return Err(Error::corrupt(
                &index_path,
                format!("unsupported format version {}", header.version),
            ));
        }
        if header.dimension as usize != self.dimension {
            return Err(Error::corrupt(
                &index_path,
                format!(
                    "stored dimension {} does not match configured dimension {}",
                    header.dimension, self.dimension
                ),
            ));
        }

        let count = usize::try_from(header.count)
            .map_err(|_| Error::corrupt(&index_path, "vector count overflows"))?;
        let expected_len = count
            .checked_mul(self.dimension * size_of::<Number>())
            .and_then(|body| body.checked_add(header_len))
            .ok_or_else(|| Error::corrupt(&index_path, "vector count overflows"))?;
        if mmap.len() != expected_len {
            return Err(Error::corrupt(
                &index_path,
                format!(
                    "expected {} bytes for {} vectors, found {}",
                    expected_len,
                    count,
                    mmap.len()
                ),
            ));
        }

        let vectors: Vec<Number> = mmap[header_len..]
            .chunks_exact(size_of::<Number>())
            .map(|b| Number::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        let metadata_path = self.metadata_path();
        let entries: Vec<IndexEntry> = match fs::read(&metadata_path) {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|err| {
                Error::corrupt(&metadata_path, format!("unreadable metadata: {}", err))
            })?,
            Err(err) if err.kind() == ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };

        if entries.len() != count {
            return Err(Error::corrupt(
                &index_path,
                format!(
                    "{} vectors but {} metadata entries",
                    count,
                    entries.len()
                ),
            ));
        }

        Ok(IndexState { vectors, entries })
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Writes a synced sibling `.tmp` file for `path` and returns its location.
fn stage<F>(path: &Path, write: F) -> Result<PathBuf>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let tmp_path = with_suffix(path, ".tmp");
    let file = File::create(&tmp_path)?;
    let mut writer = BufWriter::new(file);
    if let Err(err) = write(&mut writer) {
        drop(writer);
        discard(&tmp_path);
        return Err(err);
    }
    let file = writer.into_inner().map_err(|err| err.into_error())?;
    file.sync_all()?;
    Ok(tmp_path)
}

fn discard(tmp_path: &Path) {
    if let Err(err) = remove_if_exists(tmp_path) {
        debug!(error = %err, path = %tmp_path.display(), "could not remove temp file");
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}
