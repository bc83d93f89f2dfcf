#[cfg(test)]
mod tests;

use std::hash::Hasher;

use async_trait::async_trait;
use twox_hash::XxHash64;

use super::{EmbeddingError, EmbeddingProvider};
use crate::math;

pub const LOCAL_DIMENSION: usize = 384;

const UNIGRAM_WEIGHT: f32 = 1.0;
const BIGRAM_WEIGHT: f32 = 0.5;
const TRIGRAM_WEIGHT: f32 = 0.25;

const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "am", "an", "and", "any", "are", "as", "at", "be",
    "because", "been", "before", "being", "but", "by", "can", "could", "did", "do", "does",
    "doing", "for", "from", "had", "has", "have", "having", "he", "her", "here", "hers", "him",
    "his", "how", "i", "if", "in", "into", "is", "it", "its", "just", "me", "my", "no", "nor",
    "not", "of", "on", "or", "our", "ours", "out", "over", "she", "so", "some", "such", "than",
    "that", "the", "their", "theirs", "them", "then", "there", "these", "they", "this", "those",
    "through", "to", "too", "under", "until", "up", "very", "was", "we", "were", "what", "when",
    "where", "which", "while", "who", "whom", "why", "will", "with", "would", "you", "your",
    "yours",
];

/// Deterministic feature-hashing embedder that needs no model and no network
///
/// Features are word unigrams, adjacent word bigrams and character trigrams of each
/// word. Each feature is hashed into one bucket with a hash-derived sign and the result
/// is L2 normalized, so text made only of stop words maps to the zero vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalEmbedder {
    dimension: usize,
}

impl Default for LocalEmbedder {
    #[inline]
    fn default() -> Self {
        Self {
            dimension: LOCAL_DIMENSION,
        }
    }
}

impl LocalEmbedder {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let tokens = tokenize(text);
        let mut vector = vec![0.0f32; self.dimension];

        for token in &tokens {
            self.add_feature(&mut vector, b'w', token, UNIGRAM_WEIGHT);

            let padded: Vec<char> = std::iter::once('^')
                .chain(token.chars())
                .chain(std::iter::once('$'))
                .collect();
            for trigram in padded.windows(3) {
                let trigram: String = trigram.iter().collect();
                self.add_feature(&mut vector, b'c', &trigram, TRIGRAM_WEIGHT);
            }
        }

        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.add_feature(&mut vector, b'b', &bigram, BIGRAM_WEIGHT);
        }

        math::normalize_in_place(&mut vector);
        vector
    }

    fn add_feature(&self, vector: &mut [f32], namespace: u8, feature: &str, weight: f32) {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write_u8(namespace);
        hasher.write(feature.as_bytes());
        let hash = hasher.finish();

        let bucket = (hash % self.dimension as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

/// Lower-cased alphanumeric words with stop words removed
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .filter(|word| !STOP_WORDS.contains(&word.as_str()))
        .collect()
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedder {
    fn name(&self) -> &str {
        "local"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_text(text))
    }
}
