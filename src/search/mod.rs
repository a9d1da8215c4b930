pub mod ann_engine;
pub mod data_loader;
pub mod embedding_engine;
pub mod nano_vector_db;

pub use ann_engine::AnnEngine;
pub use data_loader::{load_dish_catalog, CatalogRecord};
pub use embedding_engine::{EmbeddingEngine, EmbeddingService, TextEmbedder, EMBEDDING_DIMENSION};
pub use nano_vector_db::NanoVectorDB;
