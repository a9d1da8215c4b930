//! A lightweight vector store holding unit-normalised dish embeddings.
#![forbid(unsafe_code)]

use anyhow::Result;
use base64::{engine::general_purpose, Engine as _};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

type Float = f32;

/// A single vector entry keyed by dish id.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Data {
    #[serde(rename = "__id__")]
    pub id: String,
    /// Normalised vector; persisted through the packed matrix, not per entry.
    #[serde(skip)]
    pub vector: Vec<Float>,
    /// Digest of whatever produced the vector. Lets a reload tell stale entries apart.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

/// Input row for [`NanoVectorDB::upsert`].
#[derive(Debug, Clone)]
pub struct VectorItem {
    pub id: String,
    pub vector: Vec<Float>,
    pub fingerprint: Option<String>,
}

impl VectorItem {
    pub fn new(id: impl Into<String>, vector: Vec<Float>) -> Self {
        Self {
            id: id.into(),
            vector,
            fingerprint: None,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct DataBase {
    embedding_dim: usize,
    data: Vec<Data>,
    #[serde(with = "base64_bytes")]
    matrix: Vec<Float>,
}

mod base64_bytes {
    use super::*;
    use bytemuck::cast_slice;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(vec: &[Float], serializer: S) -> Result<S::Ok, S::Error> {
        let bytes = cast_slice(vec);
        let b64 = general_purpose::STANDARD.encode(bytes);
        serializer.serialize_str(&b64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Float>, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = general_purpose::STANDARD
            .decode(s)
            .map_err(serde::de::Error::custom)?;
        if bytes.len() % 4 != 0 {
            return Err(serde::de::Error::custom("matrix byte length is not a multiple of 4"));
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|chunk| Float::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }
}

/// One search result: the stored id and its cosine similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: String,
    pub cosine: Float,
}

/// Cosine-similarity vector store, optionally persisted as JSON.
#[derive(Debug)]
pub struct NanoVectorDB {
    pub embedding_dim: usize,
    storage_file: Option<PathBuf>,
    storage: DataBase,
}

#[derive(PartialEq)]
struct ScoredIndex {
    score: Float,
    index: usize,
}

impl Eq for ScoredIndex {}

impl PartialOrd for ScoredIndex {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredIndex {
    // Reversed so the BinaryHeap pops the lowest score first; NaN ranks below every number.
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.score.is_nan(), other.score.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => other
                .score
                .total_cmp(&self.score)
                .then_with(|| self.index.cmp(&other.index)),
        }
    }
}

impl NanoVectorDB {
    /// Store that lives only in memory; `save` is a no-op.
    pub fn in_memory(embedding_dim: usize) -> Self {
        Self {
            embedding_dim,
            storage_file: None,
            storage: DataBase {
                embedding_dim,
                data: Vec::new(),
                matrix: Vec::new(),
            },
        }
    }

    /// Opens the store at `storage_file`, loading it when the file exists and is non-empty.
    pub fn open(embedding_dim: usize, storage_file: &Path) -> Result<Self> {
        let mut db = Self::in_memory(embedding_dim);
        db.storage_file = Some(storage_file.to_path_buf());

        if storage_file.exists() && storage_file.metadata()?.len() > 0 {
            let contents = fs::read_to_string(storage_file)?;
            let mut stored: DataBase = serde_json::from_str(&contents)?;

            if stored.embedding_dim != embedding_dim {
                anyhow::bail!(
                    "Embedding dimension mismatch: DB has {}, expected {}",
                    stored.embedding_dim,
                    embedding_dim
                );
            }

            let expected_len = stored.data.len() * stored.embedding_dim;
            if stored.matrix.len() != expected_len {
                anyhow::bail!(
                    "Matrix size mismatch: expected {}, got {}",
                    expected_len,
                    stored.matrix.len()
                );
            }

            for (data, row) in stored.data.iter_mut().zip(stored.matrix.chunks_exact(embedding_dim)) {
                data.vector = row.to_vec();
            }
            db.storage = stored;
        }
        Ok(db)
    }

    /// Inserts new ids and overwrites existing ones. Returns `(updated, inserted)` ids.
    pub fn upsert(&mut self, items: Vec<VectorItem>) -> Result<(Vec<String>, Vec<String>)> {
        let mut updates = Vec::new();
        let mut inserts = Vec::new();

        let mut positions: HashMap<String, usize> = self
            .storage
            .data
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id.clone(), i))
            .collect();

        for VectorItem { id, vector, fingerprint } in items {
            if vector.len() != self.embedding_dim {
                anyhow::bail!(
                    "Embedding dimension mismatch for item '{}'. Expected {}, got {}.",
                    id,
                    self.embedding_dim,
                    vector.len()
                );
            }
            let norm_vec = normalize(&vector);

            if let Some(&pos) = positions.get(&id) {
                let start = pos * self.embedding_dim;
                self.storage.matrix[start..start + self.embedding_dim].copy_from_slice(&norm_vec);
                self.storage.data[pos].vector = norm_vec;
                self.storage.data[pos].fingerprint = fingerprint;
                updates.push(id);
            } else {
                positions.insert(id.clone(), self.storage.data.len());
                self.storage.matrix.extend_from_slice(&norm_vec);
                self.storage.data.push(Data {
                    id: id.clone(),
                    vector: norm_vec,
                    fingerprint,
                });
                inserts.push(id);
            }
        }

        Ok((updates, inserts))
    }

    /// Returns up to `top_k` entries ordered by descending cosine similarity.
    pub fn query(&self, query: &[Float], top_k: usize) -> Result<Vec<VectorHit>> {
        if query.len() != self.embedding_dim {
            anyhow::bail!(
                "Search query embedding dimension mismatch. Expected {}, got {}.",
                self.embedding_dim,
                query.len()
            );
        }
        if self.storage.data.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let query_norm = normalize(query);

        let scores: Vec<Float> = self
            .storage
            .matrix
            .par_chunks_exact(self.embedding_dim)
            .map(|row| simple_dot_product(row, &query_norm))
            .collect();

        let mut heap = BinaryHeap::with_capacity(top_k + 1);
        for (index, score) in scores.into_iter().enumerate() {
            heap.push(ScoredIndex { score, index });
            if heap.len() > top_k {
                heap.pop();
            }
        }

        Ok(heap
            .into_sorted_vec()
            .into_iter()
            .map(|si| VectorHit {
                id: self.storage.data[si.index].id.clone(),
                cosine: si.score,
            })
            .collect())
    }

    pub fn entries(&self) -> &[Data] {
        &self.storage.data
    }

    /// Removes the given ids and repacks the matrix. Returns how many were removed.
    pub fn delete(&mut self, ids_to_delete: &[String]) -> usize {
        let id_set_to_delete: HashSet<_> = ids_to_delete.iter().map(|s| s.as_str()).collect();
        let original_len = self.storage.data.len();
        self.storage
            .data
            .retain(|data| !id_set_to_delete.contains(data.id.as_str()));
        self.storage.matrix = self
            .storage
            .data
            .iter()
            .flat_map(|data| data.vector.iter().copied())
            .collect();
        original_len - self.storage.data.len()
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.storage_file else {
            return Ok(());
        };
        let serialized = serde_json::to_string(&self.storage)?;
        fs::write(path, serialized)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.storage.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.data.is_empty()
    }
}

#[inline]
fn simple_dot_product(vec1: &[Float], vec2: &[Float]) -> Float {
    vec1.iter().zip(vec2.iter()).map(|(a, b)| a * b).sum()
}

/// Normalize a vector to unit length. The zero vector stays zero.
pub fn normalize(vector: &[Float]) -> Vec<Float> {
    let norm_sq: Float = vector.iter().map(|&x| x * x).sum();
    if norm_sq == 0.0 || !norm_sq.is_finite() {
        return vec![0.0; vector.len()];
    }
    let inv_norm = 1.0 / norm_sq.sqrt();
    vector.iter().map(|&x| x * inv_norm).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn item(id: &str, vector: &[Float]) -> VectorItem {
        VectorItem::new(id, vector.to_vec())
    }

    #[test]
    fn test_invalid_base64_is_rejected() {
        let invalid_json = r#"{
            "embedding_dim": 2,
            "data": [{"__id__": "test"}],
            "matrix": "INVALID_BASE64!!"
        }"#;
        let result: Result<DataBase, _> = serde_json::from_str(invalid_json);
        assert!(result.is_err());
    }

    #[test]
    fn test_matrix_size_validation_on_load() {
        let temp_file = NamedTempFile::new().unwrap();
        let corrupt = DataBase {
            embedding_dim: 2,
            data: vec![Data { id: "entry1".to_string(), vector: vec![], fingerprint: None }],
            matrix: vec![1.0],
        };
        fs::write(temp_file.path(), serde_json::to_string(&corrupt).unwrap()).unwrap();

        let err_msg = NanoVectorDB::open(2, temp_file.path()).unwrap_err().to_string();
        assert!(err_msg.contains("Matrix size mismatch"), "Error message mismatch: {}", err_msg);
        assert!(err_msg.contains("expected 2"), "Error message mismatch: {}", err_msg);
        assert!(err_msg.contains("got 1"), "Error message mismatch: {}", err_msg);
    }

    #[test]
    fn test_embedding_dim_validation_on_load() {
        let temp_file = NamedTempFile::new().unwrap();
        let stored = DataBase {
            embedding_dim: 2,
            data: vec![Data { id: "entry1".to_string(), vector: vec![], fingerprint: None }],
            matrix: vec![0.0, 0.0],
        };
        fs::write(temp_file.path(), serde_json::to_string(&stored).unwrap()).unwrap();

        let err_msg = NanoVectorDB::open(3, temp_file.path()).unwrap_err().to_string();
        assert!(err_msg.contains("Embedding dimension mismatch"), "Error message mismatch: {}", err_msg);
        assert!(err_msg.contains("DB has 2"), "Error message mismatch: {}", err_msg);
    }

    #[test]
    fn test_scored_index_ordering_pops_lowest_score() {
        let mut heap = BinaryHeap::new();
        heap.push(ScoredIndex { score: 0.8, index: 0 });
        heap.push(ScoredIndex { score: 0.9, index: 1 });
        heap.push(ScoredIndex { score: 0.7, index: 2 });
        heap.push(ScoredIndex { score: 1.0, index: 3 });
        heap.push(ScoredIndex { score: Float::NAN, index: 4 });

        while heap.len() > 2 {
            heap.pop();
        }
        let sorted_k = heap.into_sorted_vec();
        assert_eq!(sorted_k[0].score, 1.0);
        assert_eq!(sorted_k[1].score, 0.9);
    }

    #[test]
    fn test_upsert_and_query() -> Result<()> {
        let mut db = NanoVectorDB::in_memory(3);
        let (_, inserted) = db.upsert(vec![item("vec1", &[1.0, 2.0, 3.0]), item("vec2", &[-4.0, 5.0, 6.0])])?;
        assert_eq!(inserted.len(), 2);

        let (updated, inserted) = db.upsert(vec![item("vec1", &[1.1, 2.1, 3.1]), item("vec3", &[7.0, 8.0, -9.0])])?;
        assert_eq!(updated, vec!["vec1".to_string()]);
        assert_eq!(inserted, vec!["vec3".to_string()]);
        assert_eq!(db.len(), 3);

        let results = db.query(&[1.0, 2.0, 3.0], 2)?;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "vec1");
        assert!(results[0].cosine > 0.95);
        assert!(results[0].cosine >= results[1].cosine);
        Ok(())
    }

    #[test]
    fn test_query_rejects_wrong_dimension() {
        let db = NanoVectorDB::in_memory(3);
        assert!(db.query(&[1.0, 0.0], 1).is_err());
    }

    #[test]
    fn test_upsert_rejects_wrong_dimension() {
        let mut db = NanoVectorDB::in_memory(3);
        assert!(db.upsert(vec![item("bad", &[1.0])]).is_err());
    }

    #[test]
    fn test_persistence_round_trip() -> Result<()> {
        let temp_file = NamedTempFile::new()?;
        let mut db = NanoVectorDB::open(3, temp_file.path())?;
        db.upsert(vec![
            item("a", &[1.0, 0.0, 0.0]).with_fingerprint("fp-a"),
            item("b", &[0.0, 1.0, 0.0]),
        ])?;
        db.save()?;

        let reloaded = NanoVectorDB::open(3, temp_file.path())?;
        assert_eq!(reloaded.len(), 2);
        let results = reloaded.query(&[0.0, 2.0, 0.0], 1)?;
        assert_eq!(results[0].id, "b");
        let a = &reloaded.entries()[0];
        assert_eq!(a.vector, vec![1.0, 0.0, 0.0]);
        assert_eq!(a.fingerprint.as_deref(), Some("fp-a"));
        assert_eq!(reloaded.entries()[1].fingerprint, None);
        Ok(())
    }

    #[test]
    fn test_delete() -> Result<()> {
        let mut db = NanoVectorDB::in_memory(3);
        db.upsert(vec![
            item("v1", &[1., 0., 0.]),
            item("v2", &[0., 1., 0.]),
            item("v3", &[0., 0., 1.]),
        ])?;

        assert_eq!(db.delete(&["v2".into()]), 1);
        assert_eq!(db.len(), 2);
        assert_eq!(db.storage.matrix.len(), 2 * db.embedding_dim);
        let results = db.query(&[0., 0., 1.], 1)?;
        assert_eq!(results[0].id, "v3");
        Ok(())
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(&[0.0, 0.0, 0.0]), vec![0.0, 0.0, 0.0]);
        let normalized = normalize(&[3.0, 4.0]);
        assert!((normalized[0] - 0.6).abs() < 1e-6);
        assert!((normalized[1] - 0.8).abs() < 1e-6);
    }
}
