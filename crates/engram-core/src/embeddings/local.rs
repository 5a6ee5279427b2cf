//! Local text encoder
//!
//! fastembed-backed implementation of the [`Embedder`] contract using
//! multilingual-e5-large: 1024 dimensions, 100+ languages, long context.
//! The model is a process-wide lazy singleton; a failed download or ONNX
//! init is reported to the caller and retried on the next call rather than
//! being latched for the lifetime of the process.

use std::sync::{Mutex, MutexGuard};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::{normalize, Embedder, EmbeddingError, EMBEDDING_DIMENSIONS};

/// Maximum text length passed to the encoder; longer inputs are truncated
pub const MAX_TEXT_LENGTH: usize = 8192;

/// Batch size for embed_batch
pub const BATCH_SIZE: usize = 32;

static EMBED_MODEL: Mutex<Option<TextEmbedding>> = Mutex::new(None);

/// Resolve the model cache directory.
/// `FASTEMBED_CACHE_PATH` wins, then the platform cache dir.
pub(crate) fn model_cache_dir() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("FASTEMBED_CACHE_PATH") {
        return std::path::PathBuf::from(path);
    }

    if let Some(proj_dirs) = directories::ProjectDirs::from("dev", "engram", "engram") {
        return proj_dirs.cache_dir().join("fastembed");
    }

    if let Some(base_dirs) = directories::BaseDirs::new() {
        return base_dirs.home_dir().join(".cache/engram/fastembed");
    }

    std::path::PathBuf::from(".fastembed_cache")
}

/// Lock the global model slot, initializing it on first use.
/// Init errors are returned without poisoning the slot.
fn model_guard() -> Result<MutexGuard<'static, Option<TextEmbedding>>, EmbeddingError> {
    let mut slot = EMBED_MODEL
        .lock()
        .map_err(|_| EmbeddingError::ModelInit("embedding model lock poisoned".into()))?;

    if slot.is_none() {
        let cache_dir = model_cache_dir();
        if let Err(e) = std::fs::create_dir_all(&cache_dir) {
            tracing::warn!("failed to create model cache dir {:?}: {}", cache_dir, e);
        }

        let options = InitOptions::new(EmbeddingModel::MultilingualE5Large)
            .with_show_download_progress(true)
            .with_cache_dir(cache_dir);

        match TextEmbedding::try_new(options) {
            Ok(model) => *slot = Some(model),
            Err(e) => {
                return Err(EmbeddingError::ModelInit(format!(
                    "failed to initialize multilingual-e5-large: {}. \
                     Ensure ONNX runtime is available and model files can be downloaded.",
                    e
                )));
            }
        }
    }

    Ok(slot)
}

/// Truncate on a char boundary at or below `max_bytes`
fn truncate_utf8(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Encoder backed by the shared local model
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalEmbedder;

impl LocalEmbedder {
    pub fn new() -> Self {
        Self
    }

    /// Eagerly load the model; useful at startup to surface download errors
    pub fn init(&self) -> Result<(), EmbeddingError> {
        model_guard().map(|_| ())
    }

    /// Whether the model is loaded or loadable
    pub fn is_ready(&self) -> bool {
        match model_guard() {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("embedding model not ready: {}", e);
                false
            }
        }
    }

    /// Test hook: drop the shared model so the next call re-initializes
    pub fn reset() {
        if let Ok(mut slot) = EMBED_MODEL.lock() {
            *slot = None;
        }
    }
}

impl Embedder for LocalEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.is_empty() {
            return Err(EmbeddingError::InvalidInput("text cannot be empty".into()));
        }

        let mut guard = model_guard()?;
        let model = guard
            .as_mut()
            .expect("model slot populated by model_guard");

        let text = truncate_utf8(text, MAX_TEXT_LENGTH);
        let mut embeddings = model
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        let mut vector = embeddings
            .pop()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("no embedding generated".into()))?;

        if vector.len() != EMBEDDING_DIMENSIONS {
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "model returned {} dimensions, expected {}",
                vector.len(),
                EMBEDDING_DIMENSIONS
            )));
        }

        normalize(&mut vector);
        Ok(vector)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut guard = model_guard()?;
        let model = guard
            .as_mut()
            .expect("model slot populated by model_guard");

        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(BATCH_SIZE) {
            let truncated: Vec<&str> = chunk
                .iter()
                .map(|t| truncate_utf8(t, MAX_TEXT_LENGTH))
                .collect();

            let embeddings = model
                .embed(truncated, None)
                .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

            for mut vector in embeddings {
                normalize(&mut vector);
                all.push(vector);
            }
        }

        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "ааааа"; // 2 bytes per char
        let cut = truncate_utf8(s, 5);
        assert!(cut.len() <= 5);
        assert!(s.starts_with(cut));
    }

    #[test]
    fn truncate_noop_for_short_text() {
        assert_eq!(truncate_utf8("short", 100), "short");
    }
}
