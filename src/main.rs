use anyhow::{Context, Result};
use nutri_label::audit::AuditLog;
use nutri_label::catalog::DishCatalog;
use nutri_label::cli::{feedback_record, label_request, parse_args, parse_batch_requests, Command};
use nutri_label::config::LabelConfig;
use nutri_label::models::{LabelRequest, LabelResult};
use nutri_label::pipeline::{LabelOutcome, LabelPipeline};
use nutri_label::retrieval::CandidateRetriever;
use nutri_label::search::{EmbeddingService, TextEmbedder};
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_pipeline(config: &LabelConfig) -> Result<LabelPipeline> {
    let embedder = Arc::new(EmbeddingService::new(config.embedding_model.clone()));
    embedder.load()?;
    let catalog = DishCatalog::from_csv(&config.catalog_csv, config.vector_db.as_deref(), embedder.as_ref())
        .with_context(|| format!("Failed to initialize dish catalog from {:?}", config.catalog_csv))?;
    info!(dishes = catalog.len(), model = embedder.model_id(), "label pipeline ready");

    let retriever = CandidateRetriever::new(embedder, Arc::new(catalog), config.cache_capacity);
    Ok(LabelPipeline::new(Arc::new(retriever), config.pipeline_config()))
}

async fn record_label(audit: Option<&AuditLog>, request: &LabelRequest, result: &LabelResult) {
    if let Some(audit) = audit {
        if let Err(e) = audit.append_label(request, result).await {
            warn!(error = %e, "failed to append label to audit log");
        }
    }
}

async fn run_batch(pipeline: Arc<LabelPipeline>, audit: Option<&AuditLog>, input: &Path) -> Result<()> {
    let content = fs::read_to_string(input)
        .await
        .with_context(|| format!("Failed to read batch file {:?}", input))?;

    let mut handles = Vec::new();
    for (line_no, request) in parse_batch_requests(&content) {
        let pipeline = Arc::clone(&pipeline);
        handles.push(tokio::task::spawn_blocking(move || {
            let report = pipeline.label_with_outcome(&request);
            (line_no, request, report)
        }));
    }

    let total = handles.len();
    let mut degraded = 0;
    for handle in handles {
        let (line_no, request, report) = handle.await.context("Batch labelling task failed")?;
        if matches!(report.outcome, LabelOutcome::Degraded { .. }) {
            degraded += 1;
        }
        record_label(audit, &request, &report.result).await;
        let json = serde_json::to_string(&report.result)?;
        println!("{{\"line\":{},\"result\":{}}}", line_no, json);
    }
    info!(total, degraded, "batch complete");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = parse_args();
    let mut config = LabelConfig::from_env().context("Invalid NUTRI_* configuration")?;
    cli.overrides.apply(&mut config);
    config.check()?;
    let audit = config.audit_log.as_ref().map(AuditLog::new);

    match cli.command {
        Command::Label { dish, calories, top_k, no_mixture } => {
            let request = label_request(&dish, calories, top_k, no_mixture, &config);
            request.validate()?;
            let pipeline = Arc::new(build_pipeline(&config)?);

            let worker = Arc::clone(&pipeline);
            let job = request.clone();
            let result = tokio::task::spawn_blocking(move || worker.label(&job))
                .await
                .context("Labelling task failed")?;
            record_label(audit.as_ref(), &request, &result).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Search { query, k } => {
            let pipeline = build_pipeline(&config)?;
            let candidates = pipeline.search(&query, usize::from(k)).unwrap_or_else(|e| {
                warn!(error = %e, "search failed");
                Vec::new()
            });
            println!("{}", serde_json::to_string_pretty(&candidates)?);
        }
        Command::Batch { input } => {
            let pipeline = Arc::new(build_pipeline(&config)?);
            run_batch(pipeline, audit.as_ref(), &input).await?;
        }
        Command::Feedback { dish, calories, correction, too_salty, too_oily, selected } => {
            let record = feedback_record(&dish, calories, &correction, too_salty, too_oily, selected.as_deref());
            record.validate()?;
            let audit = audit.context("Feedback needs an audit log (set NUTRI_AUDIT_LOG or --audit-log)")?;
            audit.append_feedback(&record).await?;
            println!("{{\"ok\":true}}");
        }
    }

    Ok(())
}
