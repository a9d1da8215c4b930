use serde::{Deserialize, Serialize};

use crate::error::LabelError;

/// Macro triple in grams: (protein, carbs, fat).
pub type MacroTriple = (f64, f64, f64);

/// Atwater factors used everywhere calories are derived from macros.
pub const KCAL_PER_G_PROTEIN: f64 = 4.0;
pub const KCAL_PER_G_CARBS: f64 = 4.0;
pub const KCAL_PER_G_FAT: f64 = 9.0;

pub fn macro_calories((p, c, f): MacroTriple) -> f64 {
    KCAL_PER_G_PROTEIN * p + KCAL_PER_G_CARBS * c + KCAL_PER_G_FAT * f
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct NutrientProfile {
    pub calories: f64,
    pub protein_g: Option<f64>,
    pub carbs_g: Option<f64>,
    pub fat_g: Option<f64>,
    pub fiber_g: Option<f64>,
    pub sugar_g: Option<f64>,
    pub sodium_mg: Option<f64>,
}

impl NutrientProfile {
    pub fn macros(&self) -> (Option<f64>, Option<f64>, Option<f64>) {
        (self.protein_g, self.carbs_g, self.fat_g)
    }

    /// Placeholder profile derived from fixed ratios of the calorie target.
    pub fn placeholder(target_calories: f64) -> Self {
        Self {
            calories: target_calories,
            protein_g: Some(target_calories * 0.05),
            carbs_g: Some(target_calories * 0.10),
            fat_g: Some(target_calories * 0.03),
            fiber_g: Some(target_calories * 0.01),
            sugar_g: Some(target_calories * 0.02),
            sodium_mg: Some(target_calories * 1.6),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.calories.is_finite()
            && [
                self.protein_g,
                self.carbs_g,
                self.fat_g,
                self.fiber_g,
                self.sugar_g,
                self.sodium_mg,
            ]
            .iter()
            .all(|v| v.map_or(true, f64::is_finite))
    }
}

/// Protein/carbs/fat ratio a dish is expected to follow.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct MacroPriors {
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
}

impl MacroPriors {
    pub fn as_triple(&self) -> MacroTriple {
        (self.protein, self.carbs, self.fat)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DishCatalogEntry {
    pub dish_id: String,
    pub name: String,
    #[serde(default)]
    pub cuisine: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub macro_priors: Option<MacroPriors>,
}

impl DishCatalogEntry {
    /// Case-insensitive match against the name or any alias. `name_lower` must already be lower-cased.
    pub fn matches_exactly(&self, name_lower: &str) -> bool {
        self.name.to_lowercase() == name_lower
            || self.aliases.iter().any(|alias| alias.to_lowercase() == name_lower)
    }

    /// Text handed to the embedding model when indexing this dish.
    pub fn embedding_text(&self) -> String {
        format!(
            "{}. Cuisine: {}. Aliases: {}",
            self.name,
            self.cuisine.as_deref().unwrap_or("unknown"),
            self.aliases.join("; ")
        )
    }
}

/// A catalog dish returned by a store lookup, with its profile and raw similarity.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DishMatch {
    pub entry: DishCatalogEntry,
    pub nutrients: NutrientProfile,
    pub similarity: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Candidate {
    pub dish_id: String,
    pub name: String,
    pub sim: f64,
    pub weight: Option<f64>,
}

impl Candidate {
    pub fn new(dish_id: impl Into<String>, name: impl Into<String>, sim: f64) -> Self {
        Self {
            dish_id: dish_id.into(),
            name: name.into(),
            sim: clamp_similarity(sim),
            weight: None,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }
}

/// Retrieval output: a candidate plus what the pipeline needs to blend it.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedCandidate {
    pub candidate: Candidate,
    pub nutrients: NutrientProfile,
    pub macro_priors: Option<MacroPriors>,
}

pub fn clamp_similarity(sim: f64) -> f64 {
    if sim.is_nan() {
        0.0
    } else {
        sim.clamp(0.0, 1.0)
    }
}

fn default_top_k() -> usize {
    5
}

fn default_use_mixture() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LabelRequest {
    pub dish_name: String,
    #[serde(alias = "calories")]
    pub target_calories: f64,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_use_mixture")]
    pub use_mixture: bool,
}

impl LabelRequest {
    pub fn new(dish_name: impl Into<String>, target_calories: f64) -> Self {
        Self {
            dish_name: dish_name.into(),
            target_calories,
            top_k: default_top_k(),
            use_mixture: default_use_mixture(),
        }
    }

    /// Boundary check run before a request may enter the pipeline.
    pub fn validate(&self) -> Result<(), LabelError> {
        if self.dish_name.trim().is_empty() {
            return Err(LabelError::InvalidRequest("dish_name must not be empty".into()));
        }
        if !self.target_calories.is_finite() || self.target_calories <= 0.0 {
            return Err(LabelError::InvalidRequest(format!(
                "target_calories must be > 0, got {}",
                self.target_calories
            )));
        }
        if self.top_k == 0 {
            return Err(LabelError::InvalidRequest("top_k must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LabelResult {
    pub nutrients: NutrientProfile,
    pub confidence: f64,
    pub candidates: Vec<Candidate>,
    pub assumptions: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macro_calories_uses_atwater_factors() {
        assert_eq!(macro_calories((10.0, 20.0, 5.0)), 40.0 + 80.0 + 45.0);
    }

    #[test]
    fn test_placeholder_ratios() {
        let profile = NutrientProfile::placeholder(600.0);
        assert_eq!(profile.calories, 600.0);
        assert_eq!(profile.protein_g, Some(30.0));
        assert_eq!(profile.carbs_g, Some(60.0));
        assert_eq!(profile.fat_g, Some(18.0));
        assert_eq!(profile.fiber_g, Some(6.0));
        assert_eq!(profile.sugar_g, Some(12.0));
        assert_eq!(profile.sodium_mg, Some(960.0));
    }

    #[test]
    fn test_candidate_similarity_is_clamped() {
        assert_eq!(Candidate::new("a", "A", 1.7).sim, 1.0);
        assert_eq!(Candidate::new("a", "A", -0.2).sim, 0.0);
        assert_eq!(Candidate::new("a", "A", f64::NAN).sim, 0.0);
    }

    #[test]
    fn test_exact_match_checks_aliases_case_insensitively() {
        let entry = DishCatalogEntry {
            dish_id: "d1".into(),
            name: "Chicken Tikka Masala".into(),
            cuisine: Some("Indian".into()),
            aliases: vec!["CTM".into(), "tikka masala".into()],
            macro_priors: None,
        };
        assert!(entry.matches_exactly("chicken tikka masala"));
        assert!(entry.matches_exactly("ctm"));
        assert!(!entry.matches_exactly("butter chicken"));
    }

    #[test]
    fn test_validate_rejects_bad_requests() {
        assert!(LabelRequest::new("", 500.0).validate().is_err());
        assert!(LabelRequest::new("   ", 500.0).validate().is_err());
        assert!(LabelRequest::new("pho", 0.0).validate().is_err());
        assert!(LabelRequest::new("pho", -10.0).validate().is_err());
        assert!(LabelRequest::new("pho", f64::NAN).validate().is_err());
        let mut zero_k = LabelRequest::new("pho", 500.0);
        zero_k.top_k = 0;
        assert!(zero_k.validate().is_err());
        assert!(LabelRequest::new("pho", 500.0).validate().is_ok());
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let req: LabelRequest = serde_json::from_str(r#"{"dish_name": "ramen", "calories": 650}"#).unwrap();
        assert_eq!(req.target_calories, 650.0);
        assert_eq!(req.top_k, 5);
        assert!(req.use_mixture);
    }
}
