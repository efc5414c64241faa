//! HNSW-backed index, adapted from the teacher's
//! `search::vector::VectorIndex` almost verbatim (USearch, cosine metric,
//! `key_to_id`/`id_to_key` maps, reserve-before-add discipline).

use std::collections::HashMap;

use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use super::VectorSearchError;

pub const DEFAULT_CONNECTIVITY: usize = 16;
const DEFAULT_EXPANSION_ADD: usize = 128;
const DEFAULT_EXPANSION_SEARCH: usize = 64;

pub struct HnswIndex {
    index: Index,
    dimensions: usize,
    key_to_id: HashMap<String, u64>,
    id_to_key: HashMap<u64, String>,
    next_id: u64,
}

impl HnswIndex {
    pub fn new(dimensions: usize) -> Result<Self, VectorSearchError> {
        let options = IndexOptions {
            dimensions,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F32,
            connectivity: DEFAULT_CONNECTIVITY,
            expansion_add: DEFAULT_EXPANSION_ADD,
            expansion_search: DEFAULT_EXPANSION_SEARCH,
            multi: false,
        };
        let index = Index::new(&options).map_err(|e| VectorSearchError::IndexCreation(e.to_string()))?;
        Ok(Self {
            index,
            dimensions,
            key_to_id: HashMap::new(),
            id_to_key: HashMap::new(),
            next_id: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.index.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn reserve(&self, capacity: usize) -> Result<(), VectorSearchError> {
        self.index
            .reserve(capacity)
            .map_err(|e| VectorSearchError::IndexCreation(e.to_string()))
    }

    pub fn add(&mut self, key: &str, vector: &[f32]) -> Result<(), VectorSearchError> {
        if vector.len() != self.dimensions {
            return Err(VectorSearchError::InvalidDimensions(self.dimensions, vector.len()));
        }

        if let Some(&existing_id) = self.key_to_id.get(key) {
            self.index.remove(existing_id).map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;
            self.reserve(self.index.size() + 1)?;
            self.index
                .add(existing_id, vector)
                .map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;
            return Ok(());
        }

        let current_capacity = self.index.capacity();
        let current_size = self.index.size();
        if current_size >= current_capacity {
            let new_capacity = std::cmp::max(current_capacity * 2, 16);
            self.reserve(new_capacity)?;
        }

        let id = self.next_id;
        self.next_id += 1;
        self.index.add(id, vector).map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;
        self.key_to_id.insert(key.to_string(), id);
        self.id_to_key.insert(id, key.to_string());
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Result<bool, VectorSearchError> {
        if let Some(id) = self.key_to_id.remove(key) {
            self.id_to_key.remove(&id);
            self.index.remove(id).map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.key_to_id.contains_key(key)
    }

    pub fn search(&self, query: &[f32], limit: usize) -> Result<Vec<(String, f32)>, VectorSearchError> {
        if query.len() != self.dimensions {
            return Err(VectorSearchError::InvalidDimensions(self.dimensions, query.len()));
        }
        if self.is_empty() {
            return Ok(vec![]);
        }

        let results = self.index.search(query, limit).map_err(|e| VectorSearchError::IndexSearch(e.to_string()))?;

        let mut out = Vec::with_capacity(results.keys.len());
        for (key, distance) in results.keys.iter().zip(results.distances.iter()) {
            if let Some(string_key) = self.id_to_key.get(key) {
                out.push((string_key.clone(), 1.0 - distance));
            }
        }
        Ok(out)
    }
}
