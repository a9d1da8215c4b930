use anyhow::{Context, Result};
use model2vec_rs::model::StaticModel;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

pub const DEFAULT_EMBEDDING_MODEL_ID: &str = "minishlab/potion-base-32M";

/// Output size of the default model. Loaded models report their own size.
pub const EMBEDDING_DIMENSION: usize = 512;

const WARMUP_TEXT: &str = "warmup";

/// Text to fixed-length vector oracle used for nearest-neighbour lookups.
pub trait TextEmbedder: Send + Sync {
    fn dimension(&self) -> usize;

    /// Identifies the model behind the vectors; part of every stored vector's fingerprint.
    fn model_id(&self) -> &str {
        "unnamed"
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>>;

    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.encode(text)).collect()
    }
}

pub struct EmbeddingEngine {
    model: StaticModel,
    model_id: String,
    dimension: usize,
}

impl EmbeddingEngine {
    /// Loads the model and runs the warm-up encode, which also fixes the dimension.
    pub fn new(model_id: &str) -> Result<Self> {
        let model = StaticModel::from_pretrained(model_id, None, None, None)
            .with_context(|| format!("Failed to load embedding model '{}'", model_id))?;
        let warmup = model.encode(&[WARMUP_TEXT.to_string()]);
        let dimension = warmup
            .first()
            .map(Vec::len)
            .filter(|&dim| dim > 0)
            .ok_or_else(|| anyhow::anyhow!("Embedding model '{}' produced no warm-up vector", model_id))?;
        info!(model = model_id, dimension, "embedding model loaded");
        Ok(Self {
            model,
            model_id: model_id.to_string(),
            dimension,
        })
    }
}

impl TextEmbedder for EmbeddingEngine {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.model.encode(&[text.to_string()]);
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Failed to generate embedding for single text: {}", text))
    }

    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(self.model.encode(texts))
    }
}

/// Owned handle that loads the embedding model on first use.
///
/// Cloning shares the same underlying model. A failed load is not remembered, so the next call
/// retries.
#[derive(Clone)]
pub struct EmbeddingService {
    model_id: String,
    engine: Arc<Mutex<Option<Arc<EmbeddingEngine>>>>,
}

impl EmbeddingService {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            engine: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.engine.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }

    /// Loads the model now instead of on first use, surfacing a load failure to the caller.
    pub fn load(&self) -> Result<()> {
        self.engine().map(|_| ())
    }

    fn engine(&self) -> Result<Arc<EmbeddingEngine>> {
        let mut guard = self
            .engine
            .lock()
            .map_err(|_| anyhow::anyhow!("embedding service lock poisoned"))?;
        if let Some(engine) = guard.as_ref() {
            return Ok(Arc::clone(engine));
        }
        let engine = Arc::new(EmbeddingEngine::new(&self.model_id)?);
        *guard = Some(Arc::clone(&engine));
        Ok(engine)
    }
}

impl TextEmbedder for EmbeddingService {
    fn dimension(&self) -> usize {
        match self.engine() {
            Ok(engine) => engine.dimension(),
            Err(e) => {
                warn!(model = %self.model_id, error = %e, "embedding model unavailable, assuming default dimension");
                EMBEDDING_DIMENSION
            }
        }
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        self.engine()?.encode(text)
    }

    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.engine()?.encode_batch(texts)
    }
}
