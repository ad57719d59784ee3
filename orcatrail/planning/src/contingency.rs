use std::collections::HashSet;

use indexmap::IndexMap;
use orcatrail_core::{
    ContingencyPlan, ContingencyTrigger, LocationCandidate, ResearchFinding, RouteOption,
    RouteStrategy, ViewingMode,
};

use crate::route::RouteBuilder;

/// Contingency variants for every trigger, in a fixed order.
#[must_use]
pub fn contingency_table(
    builder: &RouteBuilder<'_>,
    finding: &ResearchFinding,
    best: Option<&RouteOption>,
) -> IndexMap<ContingencyTrigger, ContingencyPlan> {
    let mode = builder.constraints().viewing_mode;
    let capacity = builder.capacity();
    let mut table = IndexMap::new();

    let shore: Vec<_> = finding
        .candidates()
        .filter(|c| c.reachable_by(ViewingMode::Land))
        .take(capacity)
        .collect();
    table.insert(
        ContingencyTrigger::AdverseWeather,
        variant(
            builder,
            ContingencyTrigger::AdverseWeather,
            &shore,
            ViewingMode::Land,
            RouteStrategy::ConservativeAccessible,
            "Move to shore-based lookouts",
            "No shore-based site is available; postpone the outing",
        ),
    );

    let planned: HashSet<&str> = best
        .map(|route| route.stops.iter().map(|s| s.location_id.as_str()).collect())
        .unwrap_or_default();
    let mut reliable: Vec<_> = finding
        .candidates()
        .filter(|c| c.reachable_by(mode) && !planned.contains(c.id.as_str()))
        .collect();
    reliable.sort_by(|a, b| {
        b.sightings
            .cmp(&a.sightings)
            .then(b.confidence.total_cmp(&a.confidence))
    });
    reliable.truncate(capacity);
    table.insert(
        ContingencyTrigger::LowSightings,
        variant(
            builder,
            ContingencyTrigger::LowSightings,
            &reliable,
            mode,
            RouteStrategy::Exploratory,
            "Relocate to sites with a stronger sighting record",
            "No unvisited site remains; extend time at the strongest planned stop",
        ),
    );

    let mut step_free: Vec<_> = finding
        .candidates()
        .filter(|c| c.accessible && c.reachable_by(mode))
        .take(capacity)
        .collect();
    let mut step_free_mode = mode;
    if step_free.is_empty() {
        step_free = finding
            .candidates()
            .filter(|c| c.accessible && c.reachable_by(ViewingMode::Land))
            .take(capacity)
            .collect();
        step_free_mode = ViewingMode::Land;
    }
    table.insert(
        ContingencyTrigger::AccessibilityNeed,
        variant(
            builder,
            ContingencyTrigger::AccessibilityNeed,
            &step_free,
            step_free_mode,
            RouteStrategy::ConservativeAccessible,
            "Use step-free sites",
            "No step-free site is known in the region; contact the operator before departure",
        ),
    );
    table
}

fn variant(
    builder: &RouteBuilder<'_>,
    trigger: ContingencyTrigger,
    stops: &[&LocationCandidate],
    mode: ViewingMode,
    strategy: RouteStrategy,
    action: &str,
    none: &str,
) -> ContingencyPlan {
    if stops.is_empty() {
        return ContingencyPlan {
            trigger,
            description: none.to_owned(),
            location_ids: Vec::new(),
            route: None,
        };
    }
    let names: Vec<&str> = stops.iter().map(|c| c.name.as_str()).collect();
    ContingencyPlan {
        trigger,
        description: format!("{action}: {}", names.join(", ")),
        location_ids: stops.iter().map(|c| c.id.clone()).collect(),
        route: builder.build(strategy, stops, mode).ok(),
    }
}
