pub mod audit;
pub mod catalog;
pub mod cli;
pub mod confidence;
pub mod config;
pub mod error;
pub mod mixture;
pub mod models;
pub mod pipeline;
pub mod rebalance;
pub mod retrieval;
pub mod search;
