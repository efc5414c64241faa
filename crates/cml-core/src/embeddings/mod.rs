//! Embedding model as an external collaborator: a pure function
//! `text -> vector` (spec.md §1). `cml-core` depends only on the `Embedder`
//! trait; concrete implementations are swappable.

#[cfg(feature = "embeddings")]
mod fastembed_backend;
mod hashing;

#[cfg(feature = "embeddings")]
pub use fastembed_backend::FastEmbedder;
pub use hashing::HashingEmbedder;

/// Default vector width used by the bundled hashing embedder. The
/// `fastembed` backend truncates its native 768-dim output to the same
/// width via Matryoshka truncation so the two backends are interchangeable.
pub const EMBEDDING_DIMENSIONS: usize = 256;

pub const MAX_TEXT_LENGTH: usize = 8192;
pub const BATCH_SIZE: usize = 32;

#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum EmbedderError {
    ModelInit(String),
    EmbeddingFailed(String),
    InvalidInput(String),
}

impl std::fmt::Display for EmbedderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbedderError::ModelInit(e) => write!(f, "embedder initialization failed: {e}"),
            EmbedderError::EmbeddingFailed(e) => write!(f, "embedding generation failed: {e}"),
            EmbedderError::InvalidInput(e) => write!(f, "invalid input: {e}"),
        }
    }
}

impl std::error::Error for EmbedderError {}

impl From<EmbedderError> for crate::error::MemoryError {
    fn from(e: EmbedderError) -> Self {
        crate::error::MemoryError::Embedder(e.to_string())
    }
}

/// A pure `text -> vector` collaborator (spec.md §1, §4.3).
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError>;

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        Ok(self.embed_batch(&[text])?.into_iter().next().unwrap_or_default())
    }
}

/// Apply Matryoshka truncation (truncate then L2-normalize), the teacher's
/// `embeddings::local::matryoshka_truncate` pattern, reused here so any
/// backend producing a wider native embedding can be folded down to
/// [`EMBEDDING_DIMENSIONS`].
#[inline]
pub fn matryoshka_truncate(mut vector: Vec<f32>, dimensions: usize) -> Vec<f32> {
    if vector.len() > dimensions {
        vector.truncate(dimensions);
    }
    l2_normalize(&mut vector);
    vector
}

#[inline]
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector {
            *x /= norm;
        }
    }
}

#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0_f32, 0.0_f32, 0.0_f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let denom = (na * nb).sqrt();
    if denom > 0.0 {
        dot / denom
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matryoshka_truncate_normalizes() {
        let v = matryoshka_truncate(vec![3.0, 4.0, 0.0, 0.0], 2);
        assert_eq!(v.len(), 2);
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cosine_similarity_identical_is_one() {
        assert!((cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]) - 1.0).abs() < 1e-4);
    }
}
