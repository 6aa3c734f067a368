//! TF-IDF vectorization of event text
//!
//! Each candidate becomes one weighted document:
//! - title repeated 3x
//! - description once
//! - interest names repeated 2x
//! - owner display name once
//!
//! Title and interests carry most of an event's identity, so they are
//! repeated to bias similarity toward them over free-form description text.
//!
//! The model is fit over the whole corpus of a single batch run. Unigrams and
//! bigrams are counted, English stop words are dropped, and no document
//! frequency pruning is applied so small corpora still produce a vocabulary.
//! Rows are L2-normalised, which makes cosine similarity a plain dot product.

mod stop_words;

pub use stop_words::StopWords;

use crate::error::{AppError, Result};
use crate::models::Candidate;
use ndarray::{Array2, ArrayView1};
use std::collections::{HashMap, HashSet};
use tracing::debug;

const TITLE_WEIGHT: usize = 3;
const INTEREST_WEIGHT: usize = 2;

/// Build the weighted text document for one candidate
pub fn candidate_document(candidate: &Candidate) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(
        TITLE_WEIGHT + 2 + candidate.interests.len() * INTEREST_WEIGHT,
    );

    for _ in 0..TITLE_WEIGHT {
        parts.push(&candidate.title);
    }
    parts.push(&candidate.description);
    for _ in 0..INTEREST_WEIGHT {
        for interest in &candidate.interests {
            parts.push(&interest.name);
        }
    }
    parts.push(&candidate.owner_name);

    parts.join(" ")
}

/// Serialize a dense vector row for write-back onto the candidate record
pub fn encode_feature_vector(row: ArrayView1<f32>) -> Result<Vec<u8>> {
    let values: Vec<f32> = row.to_vec();
    Ok(bincode::serialize(&values)?)
}

/// TF-IDF vectorizer with a capped vocabulary
#[derive(Debug, Clone)]
pub struct TfidfVectorizer {
    max_features: usize,
    ngram_range: (usize, usize),
    stop_words: Option<StopWords>,
    vocabulary: HashMap<String, usize>,
    idf: Vec<f32>,
}

impl TfidfVectorizer {
    pub fn new(max_features: usize) -> Self {
        Self {
            max_features: max_features.max(1),
            ngram_range: (1, 2),
            stop_words: Some(StopWords::english()),
            vocabulary: HashMap::new(),
            idf: Vec::new(),
        }
    }

    pub fn with_ngram_range(mut self, min_n: usize, max_n: usize) -> Self {
        let min_n = min_n.max(1);
        self.ngram_range = (min_n, max_n.max(min_n));
        self
    }

    pub fn without_stop_words(mut self) -> Self {
        self.stop_words = None;
        self
    }

    pub fn vocabulary_size(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn vocabulary(&self) -> &HashMap<String, usize> {
        &self.vocabulary
    }

    /// Fit the vocabulary and idf weights, then transform the same corpus.
    ///
    /// Returns an `N x D` matrix where `D` is the fitted vocabulary size.
    pub fn fit_transform<S: AsRef<str>>(&mut self, documents: &[S]) -> Result<Array2<f32>> {
        if documents.is_empty() {
            return Err(AppError::Build("cannot vectorize an empty corpus".to_string()));
        }

        let doc_terms: Vec<Vec<String>> = documents
            .iter()
            .map(|doc| self.terms(doc.as_ref()))
            .collect();

        let mut term_freq: HashMap<&str, usize> = HashMap::new();
        let mut doc_freq: HashMap<&str, usize> = HashMap::new();
        for terms in &doc_terms {
            let mut seen: HashSet<&str> = HashSet::new();
            for term in terms {
                *term_freq.entry(term.as_str()).or_insert(0) += 1;
                if seen.insert(term.as_str()) {
                    *doc_freq.entry(term.as_str()).or_insert(0) += 1;
                }
            }
        }

        if term_freq.is_empty() {
            return Err(AppError::Build(
                "empty vocabulary: documents contain only stop words".to_string(),
            ));
        }

        // Keep the most frequent terms, ties broken alphabetically, then index
        // the kept terms in alphabetical order so columns are stable across runs.
        let mut ranked: Vec<(&str, usize)> = term_freq.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(self.max_features);

        let mut kept: Vec<&str> = ranked.into_iter().map(|(term, _)| term).collect();
        kept.sort_unstable();

        let n_docs = documents.len() as f32;
        self.idf = kept
            .iter()
            .map(|term| {
                let df = doc_freq.get(term).copied().unwrap_or(0) as f32;
                ((1.0 + n_docs) / (1.0 + df)).ln() + 1.0
            })
            .collect();
        self.vocabulary = kept
            .into_iter()
            .enumerate()
            .map(|(idx, term)| (term.to_string(), idx))
            .collect();

        let vocab_size = self.vocabulary.len();
        let mut matrix = Array2::<f32>::zeros((doc_terms.len(), vocab_size));

        for (row_idx, terms) in doc_terms.iter().enumerate() {
            let mut row = matrix.row_mut(row_idx);
            for term in terms {
                if let Some(&col) = self.vocabulary.get(term) {
                    row[col] += 1.0;
                }
            }
            for (col, value) in row.iter_mut().enumerate() {
                *value *= self.idf[col];
            }
            let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt();
            if norm > 0.0 {
                row.mapv_inplace(|v| v / norm);
            }
        }

        debug!(
            documents = doc_terms.len(),
            vocabulary_size = vocab_size,
            "TF-IDF model fitted"
        );

        Ok(matrix)
    }

    /// Tokens plus n-grams for one document
    fn terms(&self, text: &str) -> Vec<String> {
        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.chars().count() >= 2)
            .map(|t| t.to_lowercase())
            .filter(|t| {
                self.stop_words
                    .as_ref()
                    .map_or(true, |sw| !sw.contains(t))
            })
            .collect();

        let mut terms = Vec::new();
        for n in self.ngram_range.0..=self.ngram_range.1 {
            for window in tokens.windows(n) {
                terms.push(window.join(" "));
            }
        }
        terms
    }
}

/// Vectorize a candidate set with the standard document weighting
pub fn vectorize_candidates(candidates: &[Candidate], max_features: usize) -> Result<Array2<f32>> {
    let documents: Vec<String> = candidates.iter().map(candidate_document).collect();
    TfidfVectorizer::new(max_features).fit_transform(&documents)
}

/// Pairwise cosine similarity of L2-normalised rows
pub fn cosine_similarity_matrix(vectors: &Array2<f32>) -> Array2<f32> {
    vectors.dot(&vectors.t())
}
