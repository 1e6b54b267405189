//! Dual-query regulation search.
//!
//! A plain similarity search tends to surface statutes and guidebooks over
//! the company's own procedures. The finder therefore runs a second search
//! with the company name and "internal procedure" terms appended, and puts
//! the best company hits in front of the general results.

use crate::models::RegulationDoc;
use crate::retrieval::Retriever;
use anyhow::Result;
use futures::future::try_join;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Context text used when nothing relevant was found.
pub const NO_REGULATIONS_FOUND: &str = "No relevant regulations were found.";

/// Separator between documents in the context text.
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Number of leading characters that identify a duplicate excerpt.
const DEDUP_PREFIX_CHARS: usize = 50;

/// Combines a general and a company-focused search.
pub struct RegulationFinder {
    retriever: Arc<dyn Retriever>,
    company: String,
    company_priority: usize,
    max_documents: usize,
}

impl RegulationFinder {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        company: impl Into<String>,
        company_priority: usize,
        max_documents: usize,
    ) -> Self {
        Self {
            retriever,
            company: company.into(),
            company_priority,
            max_documents,
        }
    }

    /// The query used for the company-focused search.
    pub fn company_query(&self, query: &str) -> String {
        format!(
            "{} {} internal safety work regulations procedures",
            query, self.company
        )
    }

    /// Find the regulations relevant to a task description.
    pub async fn find(&self, query: &str) -> Result<Vec<RegulationDoc>> {
        let company_query = self.company_query(query);
        let (general, company) = try_join(
            self.retriever.retrieve(query),
            self.retriever.retrieve(&company_query),
        )
        .await?;

        debug!(
            "General search: {} hits, company search: {} hits",
            general.len(),
            company.len()
        );

        let merged = merge_results(company, general, self.company_priority, self.max_documents);
        info!("Retrieved {} regulation excerpts", merged.len());
        Ok(merged)
    }
}

fn dedup_key(content: &str) -> String {
    content.chars().take(DEDUP_PREFIX_CHARS).collect()
}

/// Put the first `company_priority` company hits before the general hits,
/// drop empty and duplicate excerpts, and keep at most `max_documents`.
pub fn merge_results(
    company: Vec<RegulationDoc>,
    general: Vec<RegulationDoc>,
    company_priority: usize,
    max_documents: usize,
) -> Vec<RegulationDoc> {
    let mut seen = HashSet::new();

    company
        .into_iter()
        .take(company_priority)
        .chain(general)
        .filter(|doc| !doc.content.trim().is_empty())
        .filter(|doc| seen.insert(dedup_key(&doc.content)))
        .take(max_documents)
        .collect()
}

/// Render excerpts as the context passed to the later stages.
pub fn format_context(docs: &[RegulationDoc]) -> String {
    if docs.is_empty() {
        return NO_REGULATIONS_FOUND.to_string();
    }

    docs.iter()
        .map(|doc| format!("📄 [Source: {}]\n{}", doc.file_name(), doc.content.trim()))
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}
