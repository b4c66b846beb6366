//! Sentence segmentation of document text into passages.

use once_cell::sync::Lazy;
use regex::Regex;

use super::types::Passage;

/// Sentence-terminal punctuation followed by whitespace. The punctuation stays
/// with the sentence it ends.
static SENTENCE_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]\s+").expect("sentence boundary pattern is valid"));

pub const DEFAULT_MIN_PASSAGE_CHARS: usize = 20;

/// Splits text at sentence boundaries and drops short fragments (headers,
/// page numbers, stray whitespace).
#[derive(Debug, Clone)]
pub struct Segmenter {
    min_chars: usize,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_PASSAGE_CHARS)
    }
}

impl Segmenter {
    /// Fragments whose trimmed length is `min_chars` characters or fewer are discarded.
    pub fn new(min_chars: usize) -> Self {
        Self { min_chars }
    }

    pub fn min_chars(&self) -> usize {
        self.min_chars
    }

    pub fn segment(&self, text: &str) -> Vec<Passage> {
        let mut fragments = Vec::new();
        let mut start = 0;
        for boundary in SENTENCE_BOUNDARY.find_iter(text) {
            // punctuation is a single ASCII byte
            fragments.push(&text[start..boundary.start() + 1]);
            start = boundary.end();
        }
        fragments.push(&text[start..]);

        let passages: Vec<Passage> = fragments
            .into_iter()
            .map(str::trim)
            .filter(|fragment| fragment.chars().count() > self.min_chars)
            .enumerate()
            .map(|(id, fragment)| Passage {
                id,
                text: fragment.to_string(),
            })
            .collect();

        tracing::debug!(
            "Segmented {} bytes into {} passages (min_chars: {})",
            text.len(),
            passages.len(),
            self.min_chars
        );
        passages
    }
}
