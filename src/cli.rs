use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::warn;

use crate::audit::FeedbackRecord;
use crate::config::LabelConfig;
use crate::models::LabelRequest;

pub const MAX_SEARCH_K: usize = 50;

#[derive(Parser, Debug)]
#[command(author, version, about = "Estimate nutrition labels for dishes at a target calorie count", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub overrides: ConfigOverrides,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags that take precedence over the `NUTRI_*` environment.
#[derive(Args, Debug, Default, Clone)]
pub struct ConfigOverrides {
    /// Dish catalog seed CSV
    #[arg(long, global = true)]
    pub catalog: Option<PathBuf>,

    /// JSON file the dish vectors are persisted to
    #[arg(long, global = true)]
    pub vector_db: Option<PathBuf>,

    /// Hugging Face id of the embedding model
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Retrieval cache size
    #[arg(long, global = true)]
    pub cache_capacity: Option<usize>,

    /// Pull towards per-dish macro priors, in [0, 1]
    #[arg(long, global = true)]
    pub lambda: Option<f64>,

    /// Rebalance with per-dish macro priors
    #[arg(long, global = true)]
    pub use_priors: bool,

    /// JSON-lines audit file
    #[arg(long, global = true)]
    pub audit_log: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Label a single dish
    Label {
        #[arg(short, long)]
        dish: String,
        #[arg(short, long)]
        calories: f64,
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Use the top match only
        #[arg(long)]
        no_mixture: bool,
    },
    /// List catalog candidates for a query
    Search {
        #[arg(short, long)]
        query: String,
        #[arg(short, long, default_value_t = 10, value_parser = clap::value_parser!(u16).range(1..=MAX_SEARCH_K as i64))]
        k: u16,
    },
    /// Label every request in a JSON-lines file
    Batch {
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Record a correction for a label
    Feedback {
        #[arg(short, long)]
        dish: String,
        #[arg(short, long)]
        calories: f64,
        #[arg(long)]
        correction: String,
        #[arg(long)]
        too_salty: bool,
        #[arg(long)]
        too_oily: bool,
        /// Catalog id the user picked instead
        #[arg(long)]
        selected: Option<String>,
    },
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut LabelConfig) {
        if let Some(path) = &self.catalog {
            config.catalog_csv = path.clone();
        }
        if let Some(path) = &self.vector_db {
            config.vector_db = Some(path.clone());
        }
        if let Some(model) = &self.model {
            config.embedding_model = model.clone();
        }
        if let Some(capacity) = self.cache_capacity {
            config.cache_capacity = capacity;
        }
        if let Some(lambda) = self.lambda {
            config.rebalance_lambda = lambda;
        }
        if self.use_priors {
            config.use_priors = true;
        }
        if let Some(path) = &self.audit_log {
            config.audit_log = Some(path.clone());
        }
    }
}

pub fn label_request(dish: &str, calories: f64, top_k: Option<usize>, no_mixture: bool, config: &LabelConfig) -> LabelRequest {
    let mut request = LabelRequest::new(dish, calories);
    request.top_k = top_k.unwrap_or(config.top_k);
    request.use_mixture = !no_mixture;
    request
}

pub fn feedback_record(
    dish: &str,
    calories: f64,
    correction: &str,
    too_salty: bool,
    too_oily: bool,
    selected: Option<&str>,
) -> FeedbackRecord {
    FeedbackRecord {
        dish_name: dish.to_string(),
        target_calories: calories,
        correction: correction.to_string(),
        too_salty,
        too_oily,
        selected_dish_id: selected.map(str::to_string),
    }
}

/// Valid requests of a JSON-lines batch with their 1-based line numbers. Bad lines are logged and skipped.
pub fn parse_batch_requests(content: &str) -> Vec<(usize, LabelRequest)> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(idx, line)| {
            let line_no = idx + 1;
            let request: LabelRequest = match serde_json::from_str(line) {
                Ok(request) => request,
                Err(e) => {
                    warn!(line = line_no, error = %e, "skipping unparseable batch request");
                    return None;
                }
            };
            if let Err(e) = request.validate() {
                warn!(line = line_no, error = %e, "skipping invalid batch request");
                return None;
            }
            Some((line_no, request))
        })
        .collect()
}

pub fn parse_args() -> Cli {
    Cli::parse()
}
