//! English stop words dropped before n-gram generation.

use std::collections::HashSet;

const ENGLISH_STOP_WORDS: &[&str] = &[
    // articles
    "a", "an", "the",
    // pronouns
    "i", "me", "my", "myself", "we", "our", "ours", "ourselves", "you", "your", "yours",
    "yourself", "yourselves", "he", "him", "his", "himself", "she", "her", "hers", "herself",
    "it", "its", "itself", "they", "them", "their", "theirs", "themselves",
    // questions
    "what", "which", "who", "whom", "whose", "why", "when", "where", "how",
    // prepositions
    "about", "above", "across", "after", "against", "along", "among", "around", "at",
    "before", "behind", "below", "beneath", "beside", "between", "beyond", "by", "down",
    "during", "for", "from", "in", "inside", "into", "near", "of", "off", "on", "onto", "out",
    "outside", "over", "through", "throughout", "to", "toward", "under", "underneath",
    "until", "up", "upon", "with", "within", "without",
    // conjunctions
    "and", "as", "because", "but", "if", "or", "since", "so", "than", "that", "though",
    "unless", "while",
    // auxiliaries
    "am", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had", "having",
    "do", "does", "did", "doing", "would", "should", "could", "ought", "can", "may", "might",
    "must", "will", "shall",
    // quantifiers and fillers
    "all", "any", "both", "each", "every", "few", "more", "most", "much", "neither", "no",
    "none", "not", "one", "other", "same", "several", "some", "such", "very", "too", "only",
    "own", "then", "there", "these", "this", "those", "just", "now", "here", "also", "again",
    "once", "further", "nor",
];

#[derive(Debug, Clone)]
pub struct StopWords {
    words: HashSet<&'static str>,
}

impl StopWords {
    pub fn english() -> Self {
        Self {
            words: ENGLISH_STOP_WORDS.iter().copied().collect(),
        }
    }

    /// Expects an already lowercased token
    pub fn contains(&self, token: &str) -> bool {
        self.words.contains(token)
    }
}
