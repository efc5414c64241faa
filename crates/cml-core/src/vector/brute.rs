//! Brute-force cosine index used when the `vector-search` (usearch) feature
//! is disabled. Exact, not approximate; fine at the event volumes a single
//! project's memory store sees.

use std::collections::HashMap;

use super::VectorSearchError;

pub struct BruteForceIndex {
    dimensions: usize,
    vectors: HashMap<String, Vec<f32>>,
}

impl BruteForceIndex {
    pub fn new(dimensions: usize) -> Result<Self, VectorSearchError> {
        Ok(Self { dimensions, vectors: HashMap::new() })
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn add(&mut self, key: &str, vector: &[f32]) -> Result<(), VectorSearchError> {
        if vector.len() != self.dimensions {
            return Err(VectorSearchError::InvalidDimensions(self.dimensions, vector.len()));
        }
        self.vectors.insert(key.to_string(), vector.to_vec());
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Result<bool, VectorSearchError> {
        Ok(self.vectors.remove(key).is_some())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vectors.contains_key(key)
    }

    pub fn search(&self, query: &[f32], limit: usize) -> Result<Vec<(String, f32)>, VectorSearchError> {
        if query.len() != self.dimensions {
            return Err(VectorSearchError::InvalidDimensions(self.dimensions, query.len()));
        }

        let mut scored: Vec<(String, f32)> = self
            .vectors
            .iter()
            .map(|(key, v)| (key.clone(), cosine_similarity(query, v)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_ranks_by_cosine_similarity() {
        let mut idx = BruteForceIndex::new(3).unwrap();
        idx.add("a", &[1.0, 0.0, 0.0]).unwrap();
        idx.add("b", &[0.0, 1.0, 0.0]).unwrap();
        let results = idx.search(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(results[0].0, "a");
    }
}
