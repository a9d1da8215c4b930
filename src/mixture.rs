use crate::error::LabelError;
use crate::models::MacroTriple;

/// Ridge term added to the diagonal of the normal equations.
pub const DEFAULT_EPSILON: f64 = 1e-6;

fn triple_as_array((p, c, f): MacroTriple) -> [f64; 3] {
    [p, c, f]
}

/// Weight vector putting everything on the first candidate.
pub fn anchor_only_weights(n: usize) -> Vec<f64> {
    let mut weights = vec![0.0; n];
    if let Some(first) = weights.first_mut() {
        *first = 1.0;
    }
    weights
}

/// Non-negative blend weights (summing to 1) that best reproduce `target` from the candidate
/// triples. Any solver failure degrades to [`anchor_only_weights`].
pub fn solve_weights(candidates: &[MacroTriple], target: MacroTriple, epsilon: f64) -> Vec<f64> {
    try_solve_weights(candidates, target, epsilon).unwrap_or_else(|err| {
        tracing::debug!(error = %err, "mixture solve fell back to anchor-only weights");
        anchor_only_weights(candidates.len())
    })
}

/// Same as [`solve_weights`] but reports why a solve failed.
pub fn try_solve_weights(
    candidates: &[MacroTriple],
    target: MacroTriple,
    epsilon: f64,
) -> Result<Vec<f64>, LabelError> {
    match candidates.len() {
        0 => return Err(LabelError::SolverFailure("no candidates to blend".into())),
        1 => return Ok(vec![1.0]),
        _ => {}
    }

    let columns: Vec<[f64; 3]> = candidates.iter().copied().map(triple_as_array).collect();
    let b = triple_as_array(target);
    if columns.iter().flatten().chain(b.iter()).any(|v| !v.is_finite()) {
        return Err(LabelError::SolverFailure("non-finite macro input".into()));
    }

    let n = columns.len();
    let ridge = if epsilon.is_finite() && epsilon > 0.0 { epsilon } else { DEFAULT_EPSILON };

    // Normal equations of min ||A w - b||^2 + ridge ||w||^2, A being 3 x n.
    let mut gram = vec![vec![0.0; n]; n];
    let mut rhs = vec![0.0; n];
    for i in 0..n {
        for j in 0..n {
            gram[i][j] = dot3(&columns[i], &columns[j]);
        }
        gram[i][i] += ridge;
        rhs[i] = dot3(&columns[i], &b);
    }

    let raw = nnls(&gram, &rhs)?;
    let total: f64 = raw.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        return Err(LabelError::SolverFailure(format!(
            "weights sum to {}, cannot normalise",
            total
        )));
    }
    Ok(raw.into_iter().map(|w| w / total).collect())
}

fn dot3(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Lawson-Hanson active set method on the quadratic `1/2 wᵀGw - hᵀw`, `w >= 0`.
fn nnls(gram: &[Vec<f64>], rhs: &[f64]) -> Result<Vec<f64>, LabelError> {
    let n = rhs.len();
    let scale = rhs.iter().fold(1.0_f64, |acc, v| acc.max(v.abs()));
    let tol = 1e-10 * scale;
    let max_iterations = 3 * n + 30;

    let mut w = vec![0.0; n];
    let mut passive = vec![false; n];
    let mut iterations = 0;

    loop {
        let gradient: Vec<f64> = (0..n)
            .map(|i| rhs[i] - (0..n).map(|j| gram[i][j] * w[j]).sum::<f64>())
            .collect();

        let entering = (0..n)
            .filter(|&i| !passive[i] && gradient[i] > tol)
            .max_by(|&a, &b| gradient[a].total_cmp(&gradient[b]));
        let Some(entering) = entering else {
            return Ok(w);
        };
        passive[entering] = true;

        loop {
            iterations += 1;
            if iterations > max_iterations {
                return Err(LabelError::SolverFailure(format!(
                    "no convergence after {} iterations",
                    max_iterations
                )));
            }

            let z = solve_passive(gram, rhs, &passive)?;
            if (0..n).filter(|&i| passive[i]).all(|i| z[i] > 0.0) {
                w = z;
                break;
            }

            // Step towards z until the first passive weight hits zero.
            let alpha = (0..n)
                .filter(|&i| passive[i] && z[i] <= 0.0)
                .map(|i| {
                    let gap = w[i] - z[i];
                    if gap > 0.0 { w[i] / gap } else { 0.0 }
                })
                .fold(f64::INFINITY, f64::min);
            for i in 0..n {
                w[i] += alpha * (z[i] - w[i]);
                if passive[i] && w[i] <= tol {
                    passive[i] = false;
                    w[i] = 0.0;
                }
            }
        }
    }
}

/// Solves the unconstrained problem restricted to the passive set; other entries are zero.
fn solve_passive(gram: &[Vec<f64>], rhs: &[f64], passive: &[bool]) -> Result<Vec<f64>, LabelError> {
    let index: Vec<usize> = (0..rhs.len()).filter(|&i| passive[i]).collect();
    let sub_matrix: Vec<Vec<f64>> = index
        .iter()
        .map(|&i| index.iter().map(|&j| gram[i][j]).collect())
        .collect();
    let sub_rhs: Vec<f64> = index.iter().map(|&i| rhs[i]).collect();

    let sub_solution = gaussian_solve(sub_matrix, sub_rhs)?;
    let mut z = vec![0.0; rhs.len()];
    for (k, &i) in index.iter().enumerate() {
        z[i] = sub_solution[k];
    }
    Ok(z)
}

fn gaussian_solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>, LabelError> {
    let n = b.len();
    let scale = a
        .iter()
        .flatten()
        .fold(0.0_f64, |acc, v| acc.max(v.abs()))
        .max(f64::MIN_POSITIVE);

    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&r1, &r2| a[r1][col].abs().total_cmp(&a[r2][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() <= 1e-14 * scale {
            return Err(LabelError::SolverFailure("singular system".into()));
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(LabelError::SolverFailure("non-finite solution".into()));
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assert_distribution(weights: &[f64]) {
        assert!(weights.iter().all(|&w| w >= 0.0), "negative weight in {:?}", weights);
        let sum: f64 = weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6, "weights sum to {}", sum);
    }

    #[test]
    fn test_single_candidate_gets_full_weight() {
        assert_eq!(solve_weights(&[(10.0, 20.0, 5.0)], (1.0, 1.0, 1.0), DEFAULT_EPSILON), vec![1.0]);
    }

    #[test]
    fn test_recovers_planted_mixture() {
        let candidates = [(30.0, 0.0, 0.0), (0.0, 30.0, 0.0), (0.0, 0.0, 30.0)];
        let target = (15.0, 9.0, 6.0);
        let weights = solve_weights(&candidates, target, DEFAULT_EPSILON);
        assert_distribution(&weights);
        assert!((weights[0] - 0.5).abs() < 1e-6);
        assert!((weights[1] - 0.3).abs() < 1e-6);
        assert!((weights[2] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_target_equal_to_anchor_concentrates_on_anchor() {
        let candidates = [(30.0, 60.0, 20.0), (50.0, 40.0, 18.0), (10.0, 90.0, 15.0)];
        let weights = solve_weights(&candidates, candidates[0], DEFAULT_EPSILON);
        assert_distribution(&weights);
        assert!(weights[0] > 0.99, "anchor weight {}", weights[0]);
    }

    #[test]
    fn test_negative_least_squares_component_is_clipped() {
        // Unconstrained least squares would want a negative first weight.
        let candidates = [(10.0, 0.0, 0.0), (0.0, 10.0, 0.0)];
        let weights = solve_weights(&candidates, (-1.0, 5.0, 0.0), DEFAULT_EPSILON);
        assert_eq!(weights[0], 0.0);
        assert!((weights[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_system_falls_back_to_anchor() {
        let candidates = [(0.0, 0.0, 0.0), (0.0, 0.0, 0.0)];
        let err = try_solve_weights(&candidates, (0.0, 0.0, 0.0), DEFAULT_EPSILON).unwrap_err();
        assert!(matches!(err, LabelError::SolverFailure(_)));
        assert_eq!(solve_weights(&candidates, (0.0, 0.0, 0.0), DEFAULT_EPSILON), vec![1.0, 0.0]);
    }

    #[test]
    fn test_non_finite_input_falls_back_to_anchor() {
        let candidates = [(f64::NAN, 1.0, 1.0), (1.0, 1.0, 1.0), (2.0, 2.0, 2.0)];
        assert_eq!(
            solve_weights(&candidates, (1.0, 1.0, 1.0), DEFAULT_EPSILON),
            vec![1.0, 0.0, 0.0]
        );
    }

    #[test]
    fn test_empty_candidates() {
        assert!(try_solve_weights(&[], (1.0, 1.0, 1.0), DEFAULT_EPSILON).is_err());
        assert!(solve_weights(&[], (1.0, 1.0, 1.0), DEFAULT_EPSILON).is_empty());
    }

    #[test]
    fn test_duplicate_candidates_stay_solvable() {
        // Identical columns make AᵀA singular; the ridge keeps it invertible.
        let candidates = [(20.0, 50.0, 10.0), (20.0, 50.0, 10.0)];
        let weights = try_solve_weights(&candidates, (20.0, 50.0, 10.0), DEFAULT_EPSILON).unwrap();
        assert_distribution(&weights);
    }

    proptest! {
        #[test]
        fn prop_weights_form_a_distribution(
            triples in proptest::collection::vec((0.5f64..100.0, 0.5f64..150.0, 0.5f64..60.0), 2..7),
            anchor in 0usize..6,
        ) {
            let target = triples[anchor % triples.len()];
            let weights = solve_weights(&triples, target, DEFAULT_EPSILON);
            prop_assert_eq!(weights.len(), triples.len());
            prop_assert!(weights.iter().all(|&w| w >= 0.0));
            let sum: f64 = weights.iter().sum();
            prop_assert!((sum - 1.0).abs() < 1e-6);
        }
    }
}
