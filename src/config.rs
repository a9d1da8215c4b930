use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;

use crate::pipeline::PipelineConfig;
use crate::rebalance::DEFAULT_LAMBDA;
use crate::retrieval::DEFAULT_CACHE_CAPACITY;
use crate::search::embedding_engine::DEFAULT_EMBEDDING_MODEL_ID;

const CATALOG_CSV_ENV_VAR: &str = "NUTRI_CATALOG_CSV";
const VECTOR_DB_ENV_VAR: &str = "NUTRI_VECTOR_DB";
const EMBEDDING_MODEL_ENV_VAR: &str = "NUTRI_EMBEDDING_MODEL";
const TOP_K_ENV_VAR: &str = "NUTRI_TOP_K";
const CACHE_CAPACITY_ENV_VAR: &str = "NUTRI_CACHE_CAPACITY";
const REBALANCE_LAMBDA_ENV_VAR: &str = "NUTRI_REBALANCE_LAMBDA";
const USE_PRIORS_ENV_VAR: &str = "NUTRI_USE_PRIORS";
const AUDIT_LOG_ENV_VAR: &str = "NUTRI_AUDIT_LOG";

pub const DEFAULT_CATALOG_CSV: &str = "dishes.csv";
pub const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct LabelConfig {
    pub catalog_csv: PathBuf,
    /// Where dish vectors are persisted. `None` keeps the index in memory.
    pub vector_db: Option<PathBuf>,
    pub embedding_model: String,
    pub top_k: usize,
    pub cache_capacity: usize,
    pub rebalance_lambda: f64,
    pub use_priors: bool,
    pub audit_log: Option<PathBuf>,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            catalog_csv: PathBuf::from(DEFAULT_CATALOG_CSV),
            vector_db: None,
            embedding_model: DEFAULT_EMBEDDING_MODEL_ID.to_string(),
            top_k: DEFAULT_TOP_K,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            rebalance_lambda: DEFAULT_LAMBDA,
            use_priors: false,
            audit_log: None,
        }
    }
}

impl LabelConfig {
    /// Reads the process environment after loading `.env`, if one exists.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key/value source. Unset or blank keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(path) = get(CATALOG_CSV_ENV_VAR) {
            config.catalog_csv = PathBuf::from(path);
        }
        config.vector_db = get(VECTOR_DB_ENV_VAR).map(PathBuf::from);
        if let Some(model) = get(EMBEDDING_MODEL_ENV_VAR) {
            config.embedding_model = model;
        }
        if let Some(raw) = get(TOP_K_ENV_VAR) {
            config.top_k = parse_var(TOP_K_ENV_VAR, &raw)?;
        }
        if let Some(raw) = get(CACHE_CAPACITY_ENV_VAR) {
            config.cache_capacity = parse_var(CACHE_CAPACITY_ENV_VAR, &raw)?;
        }
        if let Some(raw) = get(REBALANCE_LAMBDA_ENV_VAR) {
            config.rebalance_lambda = parse_var(REBALANCE_LAMBDA_ENV_VAR, &raw)?;
        }
        if let Some(raw) = get(USE_PRIORS_ENV_VAR) {
            config.use_priors = parse_flag(USE_PRIORS_ENV_VAR, &raw)?;
        }
        config.audit_log = get(AUDIT_LOG_ENV_VAR).map(PathBuf::from);

        config.check()?;
        Ok(config)
    }

    pub fn check(&self) -> Result<()> {
        if self.top_k == 0 {
            anyhow::bail!("{} must be at least 1", TOP_K_ENV_VAR);
        }
        if !(0.0..=1.0).contains(&self.rebalance_lambda) {
            anyhow::bail!(
                "{} must be within [0, 1], got {}",
                REBALANCE_LAMBDA_ENV_VAR,
                self.rebalance_lambda
            );
        }
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            rebalance_lambda: self.rebalance_lambda,
            use_priors: self.use_priors,
            ..PipelineConfig::default()
        }
    }
}

fn parse_var<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse::<T>()
        .with_context(|| format!("Invalid value '{}' for {}", raw, key))
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("Invalid value '{}' for {}", raw, key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let config = LabelConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, LabelConfig::default());
        assert_eq!(config.top_k, 5);
        assert_eq!(config.cache_capacity, 256);
        assert_eq!(config.rebalance_lambda, 0.35);
        assert!(!config.use_priors);
        assert!(config.audit_log.is_none());
    }

    #[test]
    fn test_reads_every_variable() {
        let config = LabelConfig::from_lookup(lookup_from(&[
            ("NUTRI_CATALOG_CSV", "/data/seed.csv"),
            ("NUTRI_VECTOR_DB", "/data/vectors.json"),
            ("NUTRI_EMBEDDING_MODEL", "minishlab/potion-base-8M"),
            ("NUTRI_TOP_K", "8"),
            ("NUTRI_CACHE_CAPACITY", "32"),
            ("NUTRI_REBALANCE_LAMBDA", "0.5"),
            ("NUTRI_USE_PRIORS", "yes"),
            ("NUTRI_AUDIT_LOG", "/tmp/audit.jsonl"),
        ]))
        .unwrap();

        assert_eq!(config.catalog_csv, PathBuf::from("/data/seed.csv"));
        assert_eq!(config.vector_db, Some(PathBuf::from("/data/vectors.json")));
        assert_eq!(config.embedding_model, "minishlab/potion-base-8M");
        assert_eq!(config.top_k, 8);
        assert_eq!(config.cache_capacity, 32);
        assert_eq!(config.rebalance_lambda, 0.5);
        assert!(config.use_priors);
        assert_eq!(config.audit_log, Some(PathBuf::from("/tmp/audit.jsonl")));

        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.rebalance_lambda, 0.5);
        assert!(pipeline.use_priors);
    }

    #[test]
    fn test_blank_values_keep_defaults() {
        let config = LabelConfig::from_lookup(lookup_from(&[("NUTRI_TOP_K", "  "), ("NUTRI_VECTOR_DB", "")])).unwrap();
        assert_eq!(config.top_k, DEFAULT_TOP_K);
        assert!(config.vector_db.is_none());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(LabelConfig::from_lookup(lookup_from(&[("NUTRI_TOP_K", "many")])).is_err());
        assert!(LabelConfig::from_lookup(lookup_from(&[("NUTRI_TOP_K", "0")])).is_err());
        assert!(LabelConfig::from_lookup(lookup_from(&[("NUTRI_REBALANCE_LAMBDA", "1.5")])).is_err());
        assert!(LabelConfig::from_lookup(lookup_from(&[("NUTRI_USE_PRIORS", "maybe")])).is_err());
    }
}
