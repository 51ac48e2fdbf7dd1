//! Document retrieval for handlers.
//!
//! Handlers consult a [`Retriever`] when the upstream classification asks for
//! document context. The routing core never calls it directly.
//!
//! [`DocumentIndex`] is a small in-process BM25 index over plain-text policy
//! documents, loaded from a directory of `.md`/`.txt` files.

use crate::types::{AppError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

/// A passage returned by a retriever.
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub source: String,
    pub text: String,
    pub score: f32,
}

#[async_trait]
pub trait Retriever: Send + Sync {
    /// Returns up to `top_k` passages relevant to `query`, best first.
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<Passage>>;
}

/// In-memory BM25 index over whole documents.
#[derive(Debug, Default)]
pub struct DocumentIndex {
    documents: HashMap<String, (String, Vec<String>)>,
    document_frequencies: HashMap<String, usize>,
    avg_doc_length: f32,
}

impl DocumentIndex {
    const K1: f32 = 1.2;
    const B: f32 = 0.75;

    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every `.md` and `.txt` file directly under `dir`.
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|e| {
            AppError::Configuration(format!("Cannot read documents dir {}: {}", dir.display(), e))
        })?;

        let mut index = Self::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let is_text = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("txt"));
            if !is_text {
                continue;
            }
            let content = std::fs::read_to_string(&path).map_err(|e| {
                AppError::Configuration(format!("Cannot read {}: {}", path.display(), e))
            })?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            index.add_document(&name, &content);
        }

        info!(documents = index.len(), dir = %dir.display(), "Loaded policy documents");
        Ok(index)
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| s.len() > 1)
            .map(String::from)
            .collect()
    }

    pub fn add_document(&mut self, source: &str, content: &str) {
        let tokens = Self::tokenize(content);
        if let Some((_, old)) = self.documents.remove(source) {
            for term in old.into_iter().collect::<HashSet<_>>() {
                if let Some(df) = self.document_frequencies.get_mut(&term) {
                    *df = df.saturating_sub(1);
                }
            }
        }
        for term in tokens.iter().collect::<HashSet<_>>() {
            *self.document_frequencies.entry(term.clone()).or_insert(0) += 1;
        }
        self.documents
            .insert(source.to_string(), (content.to_string(), tokens));

        let total: usize = self.documents.values().map(|(_, t)| t.len()).sum();
        self.avg_doc_length = total as f32 / self.documents.len() as f32;
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn idf(&self, term: &str) -> f32 {
        let df = self.document_frequencies.get(term).copied().unwrap_or(0) as f32;
        let n = self.documents.len() as f32;
        if df == 0.0 {
            return 0.0;
        }
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    fn score(&self, tokens: &[String], query_terms: &[String]) -> f32 {
        let doc_len = tokens.len() as f32;
        let norm = if self.avg_doc_length > 0.0 {
            doc_len / self.avg_doc_length
        } else {
            1.0
        };

        query_terms
            .iter()
            .map(|term| {
                let tf = tokens.iter().filter(|t| *t == term).count() as f32;
                let idf = self.idf(term);
                idf * tf * (Self::K1 + 1.0) / (tf + Self::K1 * (1.0 - Self::B + Self::B * norm))
            })
            .sum()
    }

    pub fn search(&self, query: &str, top_k: usize) -> Vec<Passage> {
        let query_terms: Vec<String> = Self::tokenize(query)
            .into_iter()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let mut results: Vec<Passage> = self
            .documents
            .iter()
            .map(|(source, (text, tokens))| Passage {
                source: source.clone(),
                text: text.clone(),
                score: self.score(tokens, &query_terms),
            })
            .filter(|p| p.score > 0.0)
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.source.cmp(&b.source))
        });
        results.truncate(top_k);
        debug!(query, hits = results.len(), "Document search");
        results
    }
}

#[async_trait]
impl Retriever for DocumentIndex {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<Passage>> {
        Ok(self.search(query, top_k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn index() -> DocumentIndex {
        let mut index = DocumentIndex::new();
        index.add_document("returns.md", "Returns are accepted within 30 days of delivery.");
        index.add_document("shipping.md", "Late delivery compensation applies after 10 days of delay.");
        index.add_document("privacy.md", "Customer data is never sold.");
        index
    }

    #[test]
    fn test_search_ranks_matching_document_first() {
        let results = index().search("returns accepted policy", 2);
        assert_eq!(results[0].source, "returns.md");
    }

    #[test]
    fn test_search_without_overlap_is_empty() {
        assert!(index().search("quarterly forecast", 3).is_empty());
    }

    #[test]
    fn test_readding_a_document_replaces_it() {
        let mut index = index();
        index.add_document("privacy.md", "Updated privacy rules.");
        assert_eq!(index.len(), 3);
        assert!(index.search("sold", 3).is_empty());
    }

    #[tokio::test]
    async fn test_from_dir_loads_text_files_only() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("policy.md"), "Refunds take five business days.").unwrap();
        fs::write(dir.path().join("notes.txt"), "Warehouse closes at six.").unwrap();
        fs::write(dir.path().join("data.csv"), "refunds,1").unwrap();

        let index = DocumentIndex::from_dir(dir.path()).unwrap();
        assert_eq!(index.len(), 2);

        let passages = index.retrieve("refunds", 1).await.unwrap();
        assert_eq!(passages[0].source, "policy.md");
    }
}
