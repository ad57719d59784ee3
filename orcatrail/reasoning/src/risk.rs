use orcatrail_core::{
    mean_confidence, ContingencyTrigger, LikelihoodTier, ResearchFinding, RiskEntry, RoutePlan,
    Season, ViewingMode,
};

use crate::unit::ReasoningContext;

/// Mean stop disturbance above which the disturbance risk is listed.
const DISTURBANCE_ALERT: f32 = 0.4;
/// In-season sighting share below which timing is flagged.
const SEASON_ALERT: f32 = 0.3;

/// Risk table, most likely first.
#[must_use]
pub fn assess_risks(
    finding: &ResearchFinding,
    plan: &RoutePlan,
    context: &ReasoningContext<'_>,
) -> Vec<RiskEntry> {
    let mitigation = |trigger: ContingencyTrigger, otherwise: &str| {
        plan.contingencies
            .get(&trigger)
            .filter(|variant| !variant.location_ids.is_empty())
            .map_or_else(|| otherwise.to_owned(), |variant| variant.description.clone())
    };
    let mut risks = Vec::new();

    let mode = context.constraints.map(|c| c.viewing_mode);
    let winter = context
        .constraints
        .is_some_and(|c| Season::of(c.date_range.start) == Season::Winter);
    let weather = match mode {
        Some(ViewingMode::Land) => LikelihoodTier::Low,
        Some(ViewingMode::Kayak) if winter => LikelihoodTier::High,
        _ => LikelihoodTier::Moderate,
    };
    risks.push(RiskEntry {
        condition: "Wind, fog or swell unsafe for the planned outing".into(),
        likelihood: weather,
        mitigation: mitigation(
            ContingencyTrigger::AdverseWeather,
            "Check the marine forecast the evening before and hold a shore day in reserve",
        ),
    });

    let success = plan.best().map_or(0.0, |route| route.estimated_success_rate);
    let quiet = if success < 0.5 {
        LikelihoodTier::High
    } else if success < 0.7 {
        LikelihoodTier::Moderate
    } else {
        LikelihoodTier::Low
    };
    risks.push(RiskEntry {
        condition: "No animals present at the planned stops".into(),
        likelihood: quiet,
        mitigation: mitigation(
            ContingencyTrigger::LowSightings,
            "Stay longer at the strongest stop and follow local sighting reports",
        ),
    });

    if finding.degraded {
        risks.push(RiskEntry {
            condition: "Live predictions were unavailable; sites come from the built-in list".into(),
            likelihood: LikelihoodTier::High,
            mitigation: "Confirm recent sightings with local operators before departure".into(),
        });
    }

    if let Some(constraints) = context.constraints {
        if constraints.accessibility_required {
            let blocked = plan
                .best()
                .into_iter()
                .flat_map(|route| route.stops.iter())
                .filter_map(|stop| finding.candidates().find(|c| c.id == stop.location_id))
                .any(|candidate| !candidate.accessible);
            risks.push(RiskEntry {
                condition: "A planned stop lacks step-free access".into(),
                likelihood: if blocked {
                    LikelihoodTier::High
                } else {
                    LikelihoodTier::Low
                },
                mitigation: mitigation(
                    ContingencyTrigger::AccessibilityNeed,
                    "Call ahead to arrange assisted access",
                ),
            });
        }
    }

    if let Some(route) = plan.best() {
        let disturbance =
            mean_confidence(&route.stops.iter().map(|s| s.disturbance).collect::<Vec<_>>());
        if disturbance > DISTURBANCE_ALERT {
            risks.push(RiskEntry {
                condition: "Visits may disturb the animals".into(),
                likelihood: LikelihoodTier::Moderate,
                mitigation: "Keep the regulated distance and cut viewing short if behaviour changes"
                    .into(),
            });
        }
    }

    if let Some(analytics) = context.analytics.filter(|a| !a.degraded) {
        if analytics.sightings_in_region > 0 && analytics.in_season_share < SEASON_ALERT {
            risks.push(RiskEntry {
                condition: "Trip dates fall outside the months with most sightings".into(),
                likelihood: LikelihoodTier::Moderate,
                mitigation: "Consider shifting the trip into peak season".into(),
            });
        }
    }

    risks.sort_by(|a, b| b.likelihood.cmp(&a.likelihood));
    risks
}
