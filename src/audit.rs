use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::LabelError;
use crate::models::{Candidate, LabelRequest, LabelResult, NutrientProfile};

const MAX_DISH_NAME_LEN: usize = 100;
const MAX_CORRECTION_LEN: usize = 500;

/// User correction to a previously returned label.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FeedbackRecord {
    pub dish_name: String,
    pub target_calories: f64,
    pub correction: String,
    #[serde(default)]
    pub too_salty: bool,
    #[serde(default)]
    pub too_oily: bool,
    #[serde(default)]
    pub selected_dish_id: Option<String>,
}

impl FeedbackRecord {
    pub fn validate(&self) -> Result<(), LabelError> {
        if self.dish_name.trim().is_empty() || self.dish_name.chars().count() > MAX_DISH_NAME_LEN {
            return Err(LabelError::InvalidRequest(format!(
                "dish_name must be 1..={} characters",
                MAX_DISH_NAME_LEN
            )));
        }
        if self.correction.chars().count() > MAX_CORRECTION_LEN {
            return Err(LabelError::InvalidRequest(format!(
                "correction must be at most {} characters",
                MAX_CORRECTION_LEN
            )));
        }
        if !self.target_calories.is_finite() || self.target_calories <= 0.0 {
            return Err(LabelError::InvalidRequest("target_calories must be > 0".into()));
        }
        Ok(())
    }
}

/// One line of the audit file.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEntry {
    Label {
        created_at: DateTime<Utc>,
        query_text: String,
        target_calories: f64,
        chosen_dishes: Vec<Candidate>,
        final_label: NutrientProfile,
        confidence: f64,
    },
    Feedback {
        created_at: DateTime<Utc>,
        #[serde(flatten)]
        feedback: FeedbackRecord,
    },
}

/// Append-only JSON-lines log of labels served and feedback received.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append_label(&self, request: &LabelRequest, result: &LabelResult) -> Result<()> {
        self.append(&AuditEntry::Label {
            created_at: Utc::now(),
            query_text: request.dish_name.clone(),
            target_calories: request.target_calories,
            chosen_dishes: result.candidates.clone(),
            final_label: result.nutrients.clone(),
            confidence: result.confidence,
        })
        .await
    }

    pub async fn append_feedback(&self, feedback: &FeedbackRecord) -> Result<()> {
        self.append(&AuditEntry::Feedback {
            created_at: Utc::now(),
            feedback: feedback.clone(),
        })
        .await
    }

    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry).context("Failed to serialize audit entry")?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open audit log {:?}", self.path))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to write audit log {:?}", self.path))?;
        file.flush().await?;
        debug!(path = ?self.path, "audit entry appended");
        Ok(())
    }
}

/// Reads every entry back. Blank lines are ignored.
pub async fn read_entries(path: &Path) -> Result<Vec<AuditEntry>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read audit log {:?}", path))?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(idx, line)| {
            serde_json::from_str(line).with_context(|| format!("Malformed audit entry on line {}", idx + 1))
        })
        .collect()
}
