//! Regulation retrieval.
//!
//! Regulation documents are loaded from disk, split into chunks, embedded
//! and searched by cosine similarity. The pipeline only sees the
//! [`Retriever`] trait and the [`RegulationFinder`] built on it.

pub mod chunker;
pub mod finder;
pub mod index;
pub mod loader;

use crate::models::RegulationDoc;
use anyhow::Result;
use async_trait::async_trait;

pub use chunker::TextSplitter;
pub use finder::{format_context, RegulationFinder, NO_REGULATIONS_FOUND};
pub use index::{open_or_build, IndexSettings, VectorIndex, VectorRetriever};
pub use loader::{LoaderConfig, RegulationLoader};

/// Query in, ranked regulation excerpts out.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<Vec<RegulationDoc>>;
}
