const SIMILARITY_WEIGHT: f64 = 0.5;
const ENTROPY_WEIGHT: f64 = 0.3;
const CALORIE_WEIGHT: f64 = 0.2;

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// `1 - H/H_max` over the strictly positive weights. A single weight scores 1.
fn concentration(weights: &[f64]) -> f64 {
    if weights.len() <= 1 {
        return 1.0;
    }
    let entropy: f64 = -weights
        .iter()
        .filter(|&&w| w > 0.0)
        .map(|&w| w * w.log2())
        .sum::<f64>();
    let max_entropy = (weights.len() as f64).log2();
    1.0 - entropy / max_entropy
}

fn calorie_alignment(kcal0: f64, target_cal: f64) -> f64 {
    (1.0 - (target_cal - kcal0).abs() / target_cal.max(1.0)).max(0.0)
}

/// Blends match similarity, mixture concentration and calorie plausibility into one score in `[0, 1]`.
pub fn confidence(sim: f64, weights: &[f64], kcal0: f64, target_cal: f64) -> f64 {
    let score = SIMILARITY_WEIGHT * clamp_unit(sim)
        + ENTROPY_WEIGHT * concentration(weights)
        + CALORIE_WEIGHT * calorie_alignment(kcal0, target_cal);
    clamp_unit(score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_confidence_perfect_match_is_one() {
        assert_eq!(confidence(1.0, &[1.0], 600.0, 600.0), 1.0);
    }

    #[test]
    fn test_confidence_single_weight_high_similarity() {
        let score = confidence(0.9, &[1.0], 600.0, 600.0);
        assert!((0.8..=1.0).contains(&score), "score out of range: {}", score);
    }

    #[test]
    fn test_uniform_mixture_has_zero_concentration() {
        assert!(concentration(&[0.25, 0.25, 0.25, 0.25]).abs() < 1e-12);
        assert_eq!(concentration(&[1.0, 0.0, 0.0]), 1.0);
    }

    #[test]
    fn test_calorie_alignment_floors_at_zero() {
        assert_eq!(calorie_alignment(5000.0, 500.0), 0.0);
        assert_eq!(calorie_alignment(500.0, 500.0), 1.0);
        // Targets under 1 kcal divide by 1.
        assert!((calorie_alignment(0.0, 0.5) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_confidence_example_mixture() {
        let score = confidence(0.8, &[0.4, 0.3, 0.3], 500.0, 600.0);
        let entropy = -(0.4f64 * 0.4f64.log2() + 2.0 * 0.3 * 0.3f64.log2());
        let expected = 0.5 * 0.8 + 0.3 * (1.0 - entropy / 3f64.log2()) + 0.2 * (1.0 - 100.0 / 600.0);
        assert!((score - expected).abs() < 1e-12);
    }

    #[test]
    fn test_confidence_clamps_similarity() {
        assert_eq!(confidence(3.0, &[1.0], 100.0, 100.0), 1.0);
        assert!((confidence(-1.0, &[1.0], 100.0, 100.0) - 0.5).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn prop_confidence_in_unit_range(
            sim in 0.0f64..=1.0,
            raw in proptest::collection::vec(0.0f64..1.0, 1..8),
            kcal0 in 0.1f64..5000.0,
            target in 0.1f64..5000.0,
        ) {
            let total: f64 = raw.iter().sum();
            let weights: Vec<f64> = if total > 0.0 {
                raw.iter().map(|w| w / total).collect()
            } else {
                let mut w = vec![0.0; raw.len()];
                w[0] = 1.0;
                w
            };
            let score = confidence(sim, &weights, kcal0, target);
            prop_assert!((0.0..=1.0).contains(&score));
        }
    }
}
