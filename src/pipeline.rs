use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::confidence::confidence;
use crate::error::LabelError;
use crate::mixture::{anchor_only_weights, try_solve_weights, DEFAULT_EPSILON};
use crate::models::{
    Candidate, LabelRequest, LabelResult, MacroTriple, NutrientProfile, RetrievedCandidate,
};
use crate::rebalance::{rebalance, DEFAULT_LAMBDA};
use crate::retrieval::CandidateRetriever;

pub const FALLBACK_CONFIDENCE: f64 = 0.5;
pub const FALLBACK_CANDIDATE_ID: &str = "fallback";
pub const ERROR_CANDIDATE_ID: &str = "error";

const NO_MATCH_ASSUMPTION: &str = "Fallback response - no matching dishes found.";

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub rebalance_lambda: f64,
    /// Pass each dish's macro priors to the rebalancer instead of scaling base macros only.
    pub use_priors: bool,
    pub solver_epsilon: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rebalance_lambda: DEFAULT_LAMBDA,
            use_priors: false,
            solver_epsilon: DEFAULT_EPSILON,
        }
    }
}

/// How a [`LabelResult`] came about. Callers only ever see the result; this is for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub enum LabelOutcome {
    /// Candidates were blended. `solver_fault` is set when the mixture fell back to the anchor.
    Matched { solver_fault: Option<LabelError> },
    /// Nothing in the catalog resembled the dish.
    NoMatch,
    /// An internal fault was masked by the fallback result.
    Degraded { fault: LabelError },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelReport {
    pub result: LabelResult,
    pub outcome: LabelOutcome,
}

pub struct LabelPipeline {
    retriever: Arc<CandidateRetriever>,
    config: PipelineConfig,
}

impl LabelPipeline {
    pub fn new(retriever: Arc<CandidateRetriever>, config: PipelineConfig) -> Self {
        Self { retriever, config }
    }

    pub fn retriever(&self) -> &CandidateRetriever {
        &self.retriever
    }

    /// Always answers. Faults degrade to the fallback label.
    pub fn label(&self, request: &LabelRequest) -> LabelResult {
        self.label_with_outcome(request).result
    }

    pub fn label_with_outcome(&self, request: &LabelRequest) -> LabelReport {
        let attempt = panic::catch_unwind(AssertUnwindSafe(|| self.try_label(request)));
        let attempt = attempt.unwrap_or_else(|payload| {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic while labelling".to_string());
            Err(LabelError::Internal(message))
        });

        match attempt {
            Ok(Some((result, solver_fault))) => {
                if let Some(fault) = &solver_fault {
                    warn!(dish = %request.dish_name, error = %fault, "mixture solver fault masked by anchor-only weights");
                }
                LabelReport {
                    result,
                    outcome: LabelOutcome::Matched { solver_fault },
                }
            }
            Ok(None) => {
                info!(dish = %request.dish_name, "no catalog match, returning fallback label");
                LabelReport {
                    result: fallback_result(request, FALLBACK_CANDIDATE_ID, NO_MATCH_ASSUMPTION.to_string()),
                    outcome: LabelOutcome::NoMatch,
                }
            }
            Err(fault) => {
                warn!(dish = %request.dish_name, error = %fault, "label computation failed, returning fallback label");
                let assumption = format!("Fallback response - estimate unavailable ({}).", fault);
                LabelReport {
                    result: fallback_result(request, ERROR_CANDIDATE_ID, assumption),
                    outcome: LabelOutcome::Degraded { fault },
                }
            }
        }
    }

    /// Candidates only, without blending. Used by search front ends.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<Candidate>, LabelError> {
        let retrieved = self.retriever.retrieve(query, k)?;
        Ok(retrieved.iter().map(|r| r.candidate.clone()).collect())
    }

    /// `Ok(None)` means no candidates were found.
    fn try_label(&self, request: &LabelRequest) -> Result<Option<(LabelResult, Option<LabelError>)>, LabelError> {
        let retrieved = self.retriever.retrieve(&request.dish_name, request.top_k)?;
        let Some(anchor) = retrieved.first() else {
            return Ok(None);
        };
        let target = request.target_calories;

        let macros: Vec<MacroTriple> = retrieved
            .iter()
            .map(|candidate| self.rebalance_candidate(candidate, target))
            .collect();

        let mut solver_fault = None;
        let weights = if request.use_mixture && retrieved.len() >= 2 {
            try_solve_weights(&macros, macros[0], self.config.solver_epsilon).unwrap_or_else(|fault| {
                solver_fault = Some(fault);
                anchor_only_weights(retrieved.len())
            })
        } else {
            anchor_only_weights(retrieved.len())
        };

        let nutrients = blend_profile(target, &retrieved, &macros, &weights);
        if !nutrients.is_finite() {
            return Err(LabelError::Internal("blended profile is not finite".into()));
        }

        let score = confidence(anchor.candidate.sim, &weights, anchor.nutrients.calories, target);
        let candidates = retrieved
            .iter()
            .zip(&weights)
            .map(|(r, &w)| r.candidate.clone().with_weight(w))
            .collect();

        let assumptions = self.describe(request, &retrieved, &weights, solver_fault.is_some());
        debug!(dish = %request.dish_name, confidence = score, "label computed");

        Ok(Some((
            LabelResult {
                nutrients,
                confidence: score,
                candidates,
                assumptions,
            },
            solver_fault,
        )))
    }

    fn rebalance_candidate(&self, candidate: &RetrievedCandidate, target: f64) -> MacroTriple {
        let (protein, carbs, fat) = candidate.nutrients.macros();
        let priors = if self.config.use_priors {
            candidate.macro_priors.as_ref()
        } else {
            None
        };
        rebalance(target, protein, carbs, fat, priors, self.config.rebalance_lambda)
    }

    fn describe(
        &self,
        request: &LabelRequest,
        retrieved: &[RetrievedCandidate],
        weights: &[f64],
        solver_failed: bool,
    ) -> String {
        let anchor_name = &retrieved[0].candidate.name;
        let mut text = format!("Rebalanced macros to {:.0} kcal", request.target_calories);
        if self.config.use_priors && retrieved.iter().any(|r| r.macro_priors.is_some()) {
            text.push_str(" with dish macro priors");
        }
        let contributors = weights.iter().filter(|&&w| w > 0.0).count();
        if request.use_mixture && retrieved.len() >= 2 && !solver_failed {
            text.push_str(&format!(
                "; weighted mixture applied across {} candidates ({} contributing), anchored on '{}'.",
                retrieved.len(),
                contributors,
                anchor_name
            ));
        } else if solver_failed {
            text.push_str(&format!(
                "; mixture could not be solved, using top match '{}' only.",
                anchor_name
            ));
        } else {
            text.push_str(&format!("; based on top match '{}'.", anchor_name));
        }
        text
    }
}

/// Weighted sum of rebalanced macros and the remaining nutrient fields.
fn blend_profile(
    target: f64,
    retrieved: &[RetrievedCandidate],
    macros: &[MacroTriple],
    weights: &[f64],
) -> NutrientProfile {
    let macro_sum = |pick: fn(&MacroTriple) -> f64| -> f64 {
        macros.iter().zip(weights).map(|(m, w)| w * pick(m)).sum()
    };

    // A field stays None only when no contributing candidate reports it.
    let field_sum = |pick: fn(&NutrientProfile) -> Option<f64>| -> Option<f64> {
        let contributing: Vec<(f64, Option<f64>)> = retrieved
            .iter()
            .zip(weights)
            .filter(|(_, &w)| w > 0.0)
            .map(|(r, &w)| (w, pick(&r.nutrients)))
            .collect();
        if contributing.iter().all(|(_, v)| v.is_none()) {
            return None;
        }
        Some(contributing.iter().map(|(w, v)| w * v.unwrap_or(0.0)).sum())
    };

    NutrientProfile {
        calories: target,
        protein_g: Some(macro_sum(|m| m.0)),
        carbs_g: Some(macro_sum(|m| m.1)),
        fat_g: Some(macro_sum(|m| m.2)),
        fiber_g: field_sum(|n| n.fiber_g),
        sugar_g: field_sum(|n| n.sugar_g),
        sodium_mg: field_sum(|n| n.sodium_mg),
    }
}

fn fallback_result(request: &LabelRequest, candidate_id: &str, assumptions: String) -> LabelResult {
    LabelResult {
        nutrients: NutrientProfile::placeholder(request.target_calories),
        confidence: FALLBACK_CONFIDENCE,
        candidates: vec![Candidate::new(candidate_id, request.dish_name.clone(), FALLBACK_CONFIDENCE).with_weight(1.0)],
        assumptions,
    }
}
