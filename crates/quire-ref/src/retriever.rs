//! `DocumentRetriever`: keyword-overlap lookup over an in-memory corpus.
//!
//! A document's score for a topic is the fraction of the topic's keywords
//! that appear in the document. Results below `min_score` are dropped, the
//! rest are ranked and cut to `top_k`. A retrieval is sufficient when at
//! least `min_results` documents survive.

use std::collections::HashSet;

use tracing::debug;

use quire_contracts::{
    error::QuireResult,
    stage::{RetrievalResult, RetrievedDocument},
};
use quire_core::traits::Retriever;

use crate::corpus::{sample_documents, CorpusDocument};

/// Keywords shorter than this are ignored.
const MIN_KEYWORD_LEN: usize = 3;

#[derive(Debug, Clone)]
pub struct DocumentRetriever {
    documents: Vec<CorpusDocument>,
    min_score: f64,
    min_results: usize,
    top_k: usize,
}

impl DocumentRetriever {
    pub fn new(documents: Vec<CorpusDocument>) -> Self {
        Self {
            documents,
            min_score: 0.3,
            min_results: 1,
            top_k: 5,
        }
    }

    /// A retriever over the built-in sample corpus.
    pub fn sample() -> Self {
        Self::new(sample_documents())
    }

    /// A retriever that never finds anything.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn with_min_results(mut self, min_results: usize) -> Self {
        self.min_results = min_results;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    fn score(topic_keywords: &HashSet<String>, document: &CorpusDocument) -> f64 {
        if topic_keywords.is_empty() {
            return 0.0;
        }
        let doc_keywords = keywords(&format!("{} {}", document.id, document.content));
        let hits = topic_keywords.intersection(&doc_keywords).count();
        hits as f64 / topic_keywords.len() as f64
    }
}

impl Default for DocumentRetriever {
    fn default() -> Self {
        Self::sample()
    }
}

impl Retriever for DocumentRetriever {
    fn retrieve(&self, topic: &str) -> QuireResult<RetrievalResult> {
        let topic_keywords = keywords(topic);

        let mut scored: Vec<(f64, &CorpusDocument)> = self
            .documents
            .iter()
            .map(|d| (Self::score(&topic_keywords, d), d))
            .filter(|(score, _)| *score > 0.0 && *score >= self.min_score)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
        scored.truncate(self.top_k);

        let results: Vec<RetrievedDocument> = scored
            .into_iter()
            .map(|(score, d)| RetrievedDocument {
                id: d.id.clone(),
                source: d.source.clone(),
                content: d.content.clone(),
                score,
            })
            .collect();
        let sufficient = !results.is_empty() && results.len() >= self.min_results;

        debug!(topic, hits = results.len(), sufficient, "corpus searched");

        Ok(RetrievalResult {
            query: topic.to_string(),
            results,
            sufficient,
        })
    }
}

/// Lowercased alphanumeric words of at least `MIN_KEYWORD_LEN` chars.
fn keywords(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= MIN_KEYWORD_LEN)
        .map(str::to_lowercase)
        .collect()
}
