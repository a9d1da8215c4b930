use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::search::nano_vector_db::{NanoVectorDB, VectorItem};

/// Maps the cosine of two unit vectors onto `[0, 1]` via their squared distance:
/// `d² = 2 - 2cos`, `sim = 1 - d²/4`.
pub fn similarity_from_cosine(cosine: f32) -> f64 {
    let cosine = f64::from(cosine);
    if cosine.is_nan() {
        return 0.0;
    }
    let squared_distance = (2.0 - 2.0 * cosine).max(0.0);
    (1.0 - squared_distance / 4.0).clamp(0.0, 1.0)
}

/// Nearest-neighbour index over dish embeddings, keyed by dish id.
pub struct AnnEngine {
    db: NanoVectorDB,
    dimension: usize,
}

impl AnnEngine {
    pub fn in_memory(dimension: usize) -> Self {
        Self {
            db: NanoVectorDB::in_memory(dimension),
            dimension,
        }
    }

    pub fn persistent(dimension: usize, db_path: &Path) -> Result<Self> {
        let db = NanoVectorDB::open(dimension, db_path)
            .with_context(|| format!("Failed to open vector index at {:?}", db_path))?;
        Ok(Self { db, dimension })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Upserts one embedding per id, tagged with the fingerprint of its source, and saves.
    pub fn add_items_batch(
        &mut self,
        embeddings: &[Vec<f32>],
        ids: &[String],
        fingerprints: &[String],
    ) -> Result<()> {
        if embeddings.len() != ids.len() || fingerprints.len() != ids.len() {
            return Err(anyhow::anyhow!(
                "Embeddings, IDs and fingerprints count mismatch: {} vs {} vs {}",
                embeddings.len(),
                ids.len(),
                fingerprints.len()
            ));
        }
        if embeddings.is_empty() {
            return Ok(());
        }

        let items = ids
            .iter()
            .zip(embeddings)
            .zip(fingerprints)
            .map(|((id, embedding), fingerprint)| {
                VectorItem::new(id.clone(), embedding.clone()).with_fingerprint(fingerprint.clone())
            })
            .collect();
        self.db
            .upsert(items)
            .with_context(|| "Failed to upsert batch to vector index")?;
        self.db
            .save()
            .with_context(|| "Failed to save vector index after batch upsert")?;
        Ok(())
    }

    /// Fingerprint recorded for every indexed id. Entries stored without one map to `None`.
    pub fn fingerprints(&self) -> HashMap<&str, Option<&str>> {
        self.db
            .entries()
            .iter()
            .map(|data| (data.id.as_str(), data.fingerprint.as_deref()))
            .collect()
    }

    /// Drops every indexed id not in `keep` and saves if anything changed. Returns the number dropped.
    pub fn retain_only(&mut self, keep: &[String]) -> Result<usize> {
        let keep: HashSet<&str> = keep.iter().map(String::as_str).collect();
        let orphans: Vec<String> = self
            .db
            .entries()
            .iter()
            .filter(|data| !keep.contains(data.id.as_str()))
            .map(|data| data.id.clone())
            .collect();
        if orphans.is_empty() {
            return Ok(0);
        }
        let removed = self.db.delete(&orphans);
        self.db
            .save()
            .with_context(|| "Failed to save vector index after pruning")?;
        Ok(removed)
    }

    /// Up to `k` `(dish_id, similarity)` pairs, highest similarity first.
    pub fn search(&self, query_embedding: &[f32], k: usize) -> Result<Vec<(String, f64)>> {
        let hits = self
            .db
            .query(query_embedding, k)
            .with_context(|| "Vector index query failed")?;
        Ok(hits
            .into_iter()
            .map(|hit| (hit.id, similarity_from_cosine(hit.cosine)))
            .collect())
    }

    pub fn item_count(&self) -> usize {
        self.db.len()
    }
}
