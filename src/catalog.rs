use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use crate::models::DishMatch;
use crate::search::ann_engine::AnnEngine;
use crate::search::data_loader::{load_dish_catalog, CatalogRecord};
use crate::search::embedding_engine::TextEmbedder;

/// Read-only source of known dishes.
pub trait CatalogStore: Send + Sync {
    /// Dishes whose name or alias equals `name_lower` (already lower-cased), similarity 1.0.
    fn lookup_exact(&self, name_lower: &str) -> Result<Vec<DishMatch>>;

    /// Up to `k` dishes nearest to `query`, highest similarity first.
    fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<DishMatch>>;
}

/// In-process dish catalog: seed records plus a vector index over their embedding text.
pub struct DishCatalog {
    records: Vec<CatalogRecord>,
    positions: HashMap<String, usize>,
    ann_engine: AnnEngine,
}

impl DishCatalog {
    /// Embeds every record and builds an in-memory index.
    pub fn build(records: Vec<CatalogRecord>, embedder: &dyn TextEmbedder) -> Result<Self> {
        let ann_engine = AnnEngine::in_memory(embedder.dimension());
        Self::populate(records, embedder, ann_engine)
    }

    /// Loads the seed CSV and indexes it, reusing the persisted index at `vector_db_path` if given.
    pub fn from_csv(
        csv_path: &Path,
        vector_db_path: Option<&Path>,
        embedder: &dyn TextEmbedder,
    ) -> Result<Self> {
        info!(path = ?csv_path, "loading dish catalog");
        let records = load_dish_catalog(csv_path)
            .with_context(|| format!("Failed to load dish catalog from {:?}", csv_path))?;
        info!(dishes = records.len(), "dish catalog loaded");

        let ann_engine = match vector_db_path {
            Some(path) => AnnEngine::persistent(embedder.dimension(), path)?,
            None => AnnEngine::in_memory(embedder.dimension()),
        };
        Self::populate(records, embedder, ann_engine)
    }

    fn populate(
        records: Vec<CatalogRecord>,
        embedder: &dyn TextEmbedder,
        mut ann_engine: AnnEngine,
    ) -> Result<Self> {
        let ids: Vec<String> = records.iter().map(|r| r.entry.dish_id.clone()).collect();

        let pruned = ann_engine
            .retain_only(&ids)
            .with_context(|| "Failed to prune vector index")?;
        if pruned > 0 {
            info!(pruned, "dropped vectors of dishes no longer in the catalog");
        }

        // Re-embed every dish whose stored vector was built from other text or another model.
        let fingerprints: Vec<String> = records
            .iter()
            .map(|r| embedding_fingerprint(embedder.model_id(), &r.entry.embedding_text()))
            .collect();
        let stale: Vec<usize> = {
            let stored = ann_engine.fingerprints();
            (0..records.len())
                .filter(|&i| stored.get(ids[i].as_str()).copied().flatten() != Some(fingerprints[i].as_str()))
                .collect()
        };

        if stale.is_empty() {
            info!(items = ann_engine.item_count(), "reusing persisted dish vectors");
        } else {
            let texts: Vec<String> = stale.iter().map(|&i| records[i].entry.embedding_text()).collect();
            let stale_ids: Vec<String> = stale.iter().map(|&i| ids[i].clone()).collect();
            let stale_fingerprints: Vec<String> = stale.iter().map(|&i| fingerprints[i].clone()).collect();
            info!(count = texts.len(), total = records.len(), "embedding dish catalog");
            let embeddings = embedder
                .encode_batch(&texts)
                .with_context(|| "Failed to generate embeddings for dish catalog")?;
            check_embeddings(&embeddings, ann_engine.dimension())?;
            ann_engine
                .add_items_batch(&embeddings, &stale_ids, &stale_fingerprints)
                .with_context(|| "Failed to add dish embeddings to vector index")?;
        }

        let positions = ids.into_iter().enumerate().map(|(i, id)| (id, i)).collect();
        Ok(Self {
            records,
            positions,
            ann_engine,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn to_match(record: &CatalogRecord, similarity: f64) -> DishMatch {
        DishMatch {
            entry: record.entry.clone(),
            nutrients: record.nutrients.clone(),
            similarity,
        }
    }
}

/// Hex SHA-256 over the model id and the text a vector was computed from.
fn embedding_fingerprint(model_id: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn check_embeddings(embeddings: &[Vec<f32>], dimension: usize) -> Result<()> {
    if let Some((idx, emb)) = embeddings.iter().enumerate().find(|(_, e)| e.len() != dimension) {
        anyhow::bail!(
            "Embedding at index {} has incorrect dimension: {}. Expected: {}",
            idx,
            emb.len(),
            dimension
        );
    }
    if let Some(idx) = embeddings
        .iter()
        .position(|e| e.iter().any(|v| !v.is_finite()))
    {
        anyhow::bail!("Embedding at index {} contains NaN or Infinity", idx);
    }
    let zero_vectors = embeddings.iter().filter(|e| e.iter().all(|&v| v == 0.0)).count();
    if zero_vectors > 0 {
        warn!(zero_vectors, "dish catalog contains all-zero embeddings");
    }
    Ok(())
}

impl CatalogStore for DishCatalog {
    fn lookup_exact(&self, name_lower: &str) -> Result<Vec<DishMatch>> {
        Ok(self
            .records
            .iter()
            .filter(|record| record.entry.matches_exactly(name_lower))
            .map(|record| Self::to_match(record, 1.0))
            .collect())
    }

    fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<DishMatch>> {
        let hits = self.ann_engine.search(query, k)?;
        Ok(hits
            .into_iter()
            .filter_map(|(id, similarity)| {
                let record = self.positions.get(&id).map(|&i| &self.records[i]);
                if record.is_none() {
                    warn!(dish_id = %id, "vector index returned an id missing from the catalog");
                }
                record.map(|r| Self::to_match(r, similarity))
            })
            .collect())
    }
}
