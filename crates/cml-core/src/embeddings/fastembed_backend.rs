//! Local ONNX embedding inference via `fastembed`, adapted from the
//! teacher's `embeddings::local::EmbeddingService` (OnceLock-guarded model
//! singleton, `MAX_TEXT_LENGTH` truncation, `BATCH_SIZE` chunking).

use std::sync::{Mutex, MutexGuard, OnceLock};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::{matryoshka_truncate, Embedder, EmbedderError, BATCH_SIZE, EMBEDDING_DIMENSIONS, MAX_TEXT_LENGTH};

static MODEL: OnceLock<Result<Mutex<TextEmbedding>, String>> = OnceLock::new();

fn cache_dir() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("FASTEMBED_CACHE_PATH") {
        return std::path::PathBuf::from(path);
    }
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "claude-code", "memory") {
        return proj_dirs.cache_dir().join("fastembed");
    }
    std::path::PathBuf::from(".cml_fastembed_cache")
}

fn get_model() -> Result<MutexGuard<'static, TextEmbedding>, EmbedderError> {
    let result = MODEL.get_or_init(|| {
        let dir = cache_dir();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!(error = %e, ?dir, "failed to create fastembed cache dir");
        }
        let options = InitOptions::new(EmbeddingModel::NomicEmbedTextV15)
            .with_show_download_progress(false)
            .with_cache_dir(dir);
        TextEmbedding::try_new(options)
            .map(Mutex::new)
            .map_err(|e| format!("failed to initialize nomic-embed-text-v1.5: {e}"))
    });

    match result {
        Ok(model) => model.lock().map_err(|e| EmbedderError::ModelInit(format!("lock poisoned: {e}"))),
        Err(err) => Err(EmbedderError::ModelInit(err.clone())),
    }
}

pub struct FastEmbedder;

impl FastEmbedder {
    pub fn new() -> Self {
        Self
    }

    pub fn check_ready(&self) -> Result<(), EmbedderError> {
        get_model().map(|_| ())
    }
}

impl Default for FastEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for FastEmbedder {
    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut model = get_model()?;
        let mut out = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(BATCH_SIZE) {
            let truncated: Vec<&str> = chunk
                .iter()
                .map(|t| if t.len() > MAX_TEXT_LENGTH { &t[..MAX_TEXT_LENGTH] } else { *t })
                .collect();

            let embeddings = model
                .embed(truncated, None)
                .map_err(|e| EmbedderError::EmbeddingFailed(e.to_string()))?;

            out.extend(embeddings.into_iter().map(|v| matryoshka_truncate(v, EMBEDDING_DIMENSIONS)));
        }

        Ok(out)
    }
}
