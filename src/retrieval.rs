use lru::LruCache;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::catalog::CatalogStore;
use crate::error::LabelError;
use crate::models::{Candidate, DishMatch, RetrievedCandidate};
use crate::search::embedding_engine::TextEmbedder;

pub const DEFAULT_CACHE_CAPACITY: usize = 256;

const FALLBACK_CAPACITY: NonZeroUsize = match NonZeroUsize::new(DEFAULT_CACHE_CAPACITY) {
    Some(n) => n,
    None => unreachable!(),
};

/// Immutable result shared by every cache hit.
pub type CandidateList = Arc<Vec<RetrievedCandidate>>;

type CacheKey = (String, usize);

/// Turns a dish name into ranked, de-duplicated catalog matches.
///
/// Exact name/alias hits come first with similarity 1.0, followed by nearest neighbours of the
/// name's embedding. Results are memoised per `(name, k)` in a bounded LRU cache.
pub struct CandidateRetriever {
    embedder: Arc<dyn TextEmbedder>,
    catalog: Arc<dyn CatalogStore>,
    cache: Mutex<LruCache<CacheKey, CandidateList>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CandidateRetriever {
    pub fn new(
        embedder: Arc<dyn TextEmbedder>,
        catalog: Arc<dyn CatalogStore>,
        cache_capacity: usize,
    ) -> Self {
        // A zero capacity falls back to the default rather than disabling the cache.
        let capacity = NonZeroUsize::new(cache_capacity).unwrap_or(FALLBACK_CAPACITY);
        Self {
            embedder,
            catalog,
            cache: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        let entries = self.cache.lock().map(|cache| cache.len()).unwrap_or(0);
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries,
        }
    }

    /// Up to `k` candidates for `dish_name`. An empty name yields an empty list.
    pub fn retrieve(&self, dish_name: &str, k: usize) -> Result<CandidateList, LabelError> {
        let name = dish_name.trim();
        if name.is_empty() || k == 0 {
            return Ok(Arc::new(Vec::new()));
        }

        let key: CacheKey = (name.to_string(), k);
        if let Some(cached) = self.cache_get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(dish = name, k, "retrieval cache hit");
            return Ok(cached);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let candidates = Arc::new(self.retrieve_uncached(name, k)?);
        self.cache_put(key, Arc::clone(&candidates));
        Ok(candidates)
    }

    fn cache_get(&self, key: &CacheKey) -> Option<CandidateList> {
        let mut cache = self.cache.lock().ok()?;
        cache.get(key).cloned()
    }

    fn cache_put(&self, key: CacheKey, value: CandidateList) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, value);
        }
    }

    fn retrieve_uncached(&self, name: &str, k: usize) -> Result<Vec<RetrievedCandidate>, LabelError> {
        let exact = self
            .catalog
            .lookup_exact(&name.to_lowercase())
            .map_err(LabelError::retrieval)?;

        let query = self.embedder.encode(name).map_err(LabelError::retrieval)?;
        let mut nearest = self.catalog.nearest(&query, k).map_err(LabelError::retrieval)?;
        nearest.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.entry.dish_id.cmp(&b.entry.dish_id))
        });

        let merged = merge_matches(exact, nearest, k);
        debug!(dish = name, k, candidates = merged.len(), "retrieved candidates");
        Ok(merged)
    }
}

/// Exact matches first, then vector matches not already seen, capped at `k`.
fn merge_matches(exact: Vec<DishMatch>, nearest: Vec<DishMatch>, k: usize) -> Vec<RetrievedCandidate> {
    let mut seen = HashSet::new();
    exact
        .into_iter()
        .map(|m| (m, 1.0))
        .chain(nearest.into_iter().map(|m| {
            let sim = m.similarity;
            (m, sim)
        }))
        .filter(|(m, _)| seen.insert(m.entry.dish_id.clone()))
        .take(k)
        .map(|(m, sim)| RetrievedCandidate {
            candidate: Candidate::new(m.entry.dish_id, m.entry.name, sim),
            nutrients: m.nutrients,
            macro_priors: m.entry.macro_priors,
        })
        .collect()
}
