use orcatrail_core::{clamp_unit, combine_confidence, SustainabilityReport, SustainabilityWeights, ViewingMode};

/// Relative wildlife impact of each way of getting close.
#[must_use]
pub const fn mode_multiplier(mode: ViewingMode) -> f32 {
    match mode {
        ViewingMode::Land | ViewingMode::Flexible => 0.1,
        ViewingMode::Kayak => 0.6,
        ViewingMode::Boat => 1.0,
    }
}

/// Mode actually used at a stop. A flexible request takes the gentlest access the site offers.
#[must_use]
pub fn effective_mode(requested: ViewingMode, access: &[ViewingMode]) -> ViewingMode {
    if requested != ViewingMode::Flexible {
        return requested;
    }
    access
        .iter()
        .copied()
        .map(|mode| {
            if mode == ViewingMode::Flexible {
                ViewingMode::Land
            } else {
                mode
            }
        })
        .min_by(|a, b| mode_multiplier(*a).total_cmp(&mode_multiplier(*b)))
        .unwrap_or(ViewingMode::Land)
}

/// Disturbance of one stop in `[0, 1]`.
#[must_use]
pub fn disturbance_score(
    factor: f32,
    viewing_minutes: u32,
    optimal_window_minutes: u32,
    mode: ViewingMode,
) -> f32 {
    #[allow(clippy::cast_precision_loss)]
    let exposure = viewing_minutes as f32 / optimal_window_minutes.max(1) as f32;
    clamp_unit(clamp_unit(factor * exposure) * mode_multiplier(mode))
}

/// Per-stop inputs to the score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopImpact {
    /// Disturbance score.
    pub disturbance: f32,
    /// Community partner on site.
    pub community_partner: bool,
    /// Interpretive programming.
    pub interpretive: bool,
}

/// Weighted sustainability of a route.
#[must_use]
pub fn score(
    stops: &[StopImpact],
    total_distance_km: f64,
    distance_limit_km: f64,
    weights: &SustainabilityWeights,
) -> SustainabilityReport {
    if stops.is_empty() {
        return SustainabilityReport::default();
    }
    #[allow(clippy::cast_possible_truncation)]
    let distance_efficiency = if distance_limit_km > 0.0 {
        clamp_unit((1.0 - total_distance_km / distance_limit_km) as f32)
    } else {
        0.0
    };
    #[allow(clippy::cast_precision_loss)]
    let count = stops.len() as f32;
    #[allow(clippy::cast_precision_loss)]
    let share = |hits: usize| hits as f32 / count;
    let mean_disturbance = stops.iter().map(|s| s.disturbance).sum::<f32>() / count;
    let disturbance_minimization = clamp_unit(1.0 - mean_disturbance);
    let community = share(stops.iter().filter(|s| s.community_partner).count());
    let education = share(stops.iter().filter(|s| s.interpretive).count());
    let overall = combine_confidence(
        &[distance_efficiency, disturbance_minimization, community, education],
        &[
            weights.environmental,
            weights.disturbance,
            weights.community,
            weights.education,
        ],
    );
    SustainabilityReport {
        distance_efficiency,
        disturbance_minimization,
        community,
        education,
        overall,
    }
}
