//! Deterministic, dependency-free default [`Embedder`].
//!
//! Not semantically meaningful the way a trained model is, but stable,
//! instant, and always available, so unit tests and environments without
//! the `embeddings` feature get a real (if crude) vector space rather than
//! a stub. Grounded in the teacher's own truncate+L2-normalize discipline
//! (`embeddings::local::matryoshka_truncate`): token hashes are scattered
//! into buckets, summed, then normalized the same way.

use super::{l2_normalize, Embedder, EmbedderError, EMBEDDING_DIMENSIONS};

pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new() -> Self {
        Self { dimensions: EMBEDDING_DIMENSIONS }
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for HashingEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        Ok(texts.iter().map(|t| embed_one(t, self.dimensions)).collect())
    }
}

fn embed_one(text: &str, dimensions: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimensions];
    for token in text.split_whitespace() {
        let h = fnv1a(token.as_bytes());
        let bucket = (h % dimensions as u64) as usize;
        let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }
    l2_normalize(&mut vector);
    vector
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_unit_vectors() {
        let e = HashingEmbedder::new();
        let v = e.embed("hello world").unwrap();
        assert_eq!(v.len(), EMBEDDING_DIMENSIONS);
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn is_deterministic() {
        let e = HashingEmbedder::new();
        assert_eq!(e.embed("same text").unwrap(), e.embed("same text").unwrap());
    }

    #[test]
    fn differing_text_yields_differing_vectors() {
        let e = HashingEmbedder::new();
        assert_ne!(e.embed("fix deployment issue with nginx").unwrap(), e.embed("random unrelated text").unwrap());
    }

    #[test]
    fn empty_text_yields_zero_vector() {
        let e = HashingEmbedder::new();
        let v = e.embed("").unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
