use crate::models::{macro_calories, MacroPriors, MacroTriple};

/// Default pull towards the dish priors when they are supplied.
pub const DEFAULT_LAMBDA: f64 = 0.35;

fn scale_to(target_calories: f64, triple: MacroTriple) -> MacroTriple {
    let base_cal = macro_calories(triple);
    let scale = if base_cal > 0.0 { target_calories / base_cal } else { 0.0 };
    (triple.0 * scale, triple.1 * scale, triple.2 * scale)
}

/// Rescales a macro triple so that `4(P + C) + 9F == target_calories`.
///
/// Without priors the base macros are scaled uniformly. With priors, the prior ratio and the base
/// macros are each scaled to the target on their own and then blended as
/// `lam * prior + (1 - lam) * base`. Both halves are calorie-exact, so the blend is too.
///
/// Missing macros count as zero. When the base carries no calories at all the base half is the
/// zero triple, which means the no-priors result is `(0, 0, 0)`.
pub fn rebalance(
    target_calories: f64,
    protein_g: Option<f64>,
    carbs_g: Option<f64>,
    fat_g: Option<f64>,
    priors: Option<&MacroPriors>,
    lam: f64,
) -> MacroTriple {
    let base = (
        protein_g.unwrap_or(0.0),
        carbs_g.unwrap_or(0.0),
        fat_g.unwrap_or(0.0),
    );
    let base_scaled = scale_to(target_calories, base);

    let Some(priors) = priors else {
        return base_scaled;
    };

    let ratio = priors.as_triple();
    if macro_calories(ratio) <= 0.0 {
        return base_scaled;
    }
    let prior_scaled = scale_to(target_calories, ratio);

    let lam = if lam.is_nan() { DEFAULT_LAMBDA } else { lam.clamp(0.0, 1.0) };
    let blend = |prior: f64, base: f64| (lam * prior + (1.0 - lam) * base).max(0.0);

    (
        blend(prior_scaled.0, base_scaled.0),
        blend(prior_scaled.1, base_scaled.1),
        blend(prior_scaled.2, base_scaled.2),
    )
}
