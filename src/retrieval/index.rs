//! In-process vector index over regulation chunks.
//!
//! The index stores each chunk with its embedding and is persisted as JSON
//! next to the name of the embedding model that produced it. Search is a
//! brute-force cosine similarity scan, which is plenty for a plant's
//! regulation library.

use crate::llm::Embedder;
use crate::models::RegulationDoc;
use crate::retrieval::chunker::TextSplitter;
use crate::retrieval::loader::{RegulationLoader, RegulationSource};
use crate::retrieval::Retriever;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Number of chunks sent per embedding request.
const EMBED_BATCH_SIZE: usize = 32;

/// A chunk of a regulation document with its embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub source: String,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// Persisted similarity index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    /// Embedding model the vectors were produced with.
    pub embedding_model: String,
    pub created_at: DateTime<Utc>,
    pub chunks: Vec<IndexedChunk>,
}

/// Cosine similarity of two vectors; 0.0 for mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

impl VectorIndex {
    pub fn new(embedding_model: impl Into<String>) -> Self {
        Self {
            embedding_model: embedding_model.into(),
            created_at: Utc::now(),
            chunks: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read index: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse index: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = serde_json::to_string(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write index: {}", path.display()))
    }

    /// Chunk and embed the given documents.
    pub async fn build(
        sources: &[RegulationSource],
        splitter: &TextSplitter,
        embedder: &dyn Embedder,
        show_progress: bool,
    ) -> Result<Self> {
        let pieces: Vec<(String, String)> = sources
            .iter()
            .flat_map(|source| {
                splitter
                    .split_text(&source.content)
                    .into_iter()
                    .map(move |chunk| (source.path.clone(), chunk))
            })
            .collect();

        info!(
            "Embedding {} chunks from {} documents with {}",
            pieces.len(),
            sources.len(),
            embedder.embedding_model()
        );

        let progress = if show_progress && !pieces.is_empty() {
            let pb = ProgressBar::new(pieces.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({eta})")
                    .context("Invalid progress bar template")?
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        let mut index = Self::new(embedder.embedding_model());
        for batch in pieces.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();
            let vectors = embedder
                .embed(&texts)
                .await
                .context("Failed to embed regulation chunks")?;

            for ((source, content), embedding) in batch.iter().cloned().zip(vectors) {
                index.chunks.push(IndexedChunk {
                    source,
                    content,
                    embedding,
                });
            }

            if let Some(ref pb) = progress {
                pb.inc(batch.len() as u64);
            }
        }

        if let Some(pb) = progress {
            pb.finish_with_message("Index built");
        }

        Ok(index)
    }

    /// The `top_k` most similar chunks scoring at least `min_score`.
    /// A `min_score` of 0.0 or below disables the filter.
    pub fn search(&self, query: &[f32], top_k: usize, min_score: f32) -> Vec<RegulationDoc> {
        let mut scored: Vec<(f32, &IndexedChunk)> = self
            .chunks
            .iter()
            .map(|chunk| (cosine_similarity(query, &chunk.embedding), chunk))
            .filter(|(score, _)| min_score <= 0.0 || *score >= min_score)
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
        scored.truncate(top_k);

        scored
            .into_iter()
            .map(|(score, chunk)| RegulationDoc::new(&chunk.source, &chunk.content, score))
            .collect()
    }
}

/// Where the index lives and how to build it.
#[derive(Debug, Clone)]
pub struct IndexSettings {
    pub index_path: PathBuf,
    pub rebuild: bool,
    pub show_progress: bool,
}

/// Load the persisted index, or build and persist a fresh one.
///
/// A persisted index built with a different embedding model, or one that
/// cannot be read, is discarded and rebuilt.
pub async fn open_or_build(
    settings: &IndexSettings,
    loader: &RegulationLoader,
    splitter: &TextSplitter,
    embedder: &dyn Embedder,
) -> Result<VectorIndex> {
    let path = &settings.index_path;

    if path.exists() && !settings.rebuild {
        match VectorIndex::load(path) {
            Ok(index) if index.embedding_model == embedder.embedding_model() => {
                info!(
                    "Loaded index with {} chunks from {}",
                    index.len(),
                    path.display()
                );
                return Ok(index);
            }
            Ok(index) => {
                warn!(
                    "Index at {} was built with {}, not {}. Rebuilding.",
                    path.display(),
                    index.embedding_model,
                    embedder.embedding_model()
                );
            }
            Err(e) => {
                warn!("Failed to load index ({:#}). Rebuilding.", e);
            }
        }
    }

    loader.ensure_dir()?;
    let sources = loader.load()?;
    if sources.is_empty() {
        warn!(
            "No regulation documents in {}; retrieval will return nothing",
            loader.root().display()
        );
        // A persisted index would bring the withdrawn documents back next run.
        if path.exists() {
            std::fs::remove_file(path)
                .with_context(|| format!("Failed to remove stale index: {}", path.display()))?;
            info!("Removed stale index at {}", path.display());
        }
        return Ok(VectorIndex::new(embedder.embedding_model()));
    }

    let index = VectorIndex::build(&sources, splitter, embedder, settings.show_progress).await?;
    index.save(path)?;
    info!("Saved index with {} chunks to {}", index.len(), path.display());

    Ok(index)
}

/// Similarity search over a [`VectorIndex`].
pub struct VectorRetriever {
    index: VectorIndex,
    embedder: Arc<dyn Embedder>,
    top_k: usize,
    min_score: f32,
}

impl VectorRetriever {
    pub fn new(index: VectorIndex, embedder: Arc<dyn Embedder>, top_k: usize, min_score: f32) -> Self {
        Self {
            index,
            embedder,
            top_k,
            min_score,
        }
    }
}

#[async_trait]
impl Retriever for VectorRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<RegulationDoc>> {
        if self.index.is_empty() {
            debug!("Index is empty, nothing to retrieve");
            return Ok(Vec::new());
        }

        let vectors = self
            .embedder
            .embed(&[query.to_string()])
            .await
            .context("Failed to embed query")?;
        let Some(query_vector) = vectors.into_iter().next() else {
            return Ok(Vec::new());
        };

        let docs = self.index.search(&query_vector, self.top_k, self.min_score);
        debug!("Query matched {} chunks", docs.len());
        Ok(docs)
    }
}
