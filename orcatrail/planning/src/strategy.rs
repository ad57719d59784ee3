use std::collections::{BTreeSet, HashSet};

use orcatrail_core::{BehaviorTag, LocationCandidate, RouteStrategy};

/// Strategies tried for every plan, in order.
pub const STRATEGIES: [RouteStrategy; 4] = [
    RouteStrategy::HighestConfidence,
    RouteStrategy::DiverseBehavior,
    RouteStrategy::ConservativeAccessible,
    RouteStrategy::Exploratory,
];

/// Disturbance factor up to which a site counts as low-impact.
const GENTLE_SITE: f32 = 0.3;

/// Candidates a strategy may draw from.
#[derive(Debug, Clone)]
pub struct CandidatePool<'a> {
    eligible: Vec<&'a LocationCandidate>,
    backup_ids: HashSet<&'a str>,
    interests: &'a BTreeSet<BehaviorTag>,
    capacity: usize,
}

impl<'a> CandidatePool<'a> {
    /// Creates a pool. `eligible` is expected best first.
    #[must_use]
    pub fn new(
        eligible: Vec<&'a LocationCandidate>,
        backup: &'a [LocationCandidate],
        interests: &'a BTreeSet<BehaviorTag>,
        capacity: usize,
    ) -> Self {
        Self {
            eligible,
            backup_ids: backup.iter().map(|c| c.id.as_str()).collect(),
            interests,
            capacity,
        }
    }

    /// Eligible candidates, best first.
    #[must_use]
    pub fn eligible(&self) -> &[&'a LocationCandidate] {
        &self.eligible
    }

    /// Stops picked by `strategy`, at most `capacity`.
    #[must_use]
    pub fn select(&self, strategy: RouteStrategy) -> Vec<&'a LocationCandidate> {
        match strategy {
            RouteStrategy::HighestConfidence => self.take(self.eligible.clone()),
            RouteStrategy::DiverseBehavior => self.diverse(),
            RouteStrategy::ConservativeAccessible => {
                let mut gentle: Vec<_> = self
                    .eligible
                    .iter()
                    .copied()
                    .filter(|c| c.accessible || c.disturbance_factor <= GENTLE_SITE)
                    .collect();
                gentle.sort_by(|a, b| {
                    a.disturbance_factor
                        .total_cmp(&b.disturbance_factor)
                        .then(b.confidence.total_cmp(&a.confidence))
                });
                self.take(gentle)
            }
            RouteStrategy::Exploratory => {
                let mut quiet: Vec<_> = self
                    .eligible
                    .iter()
                    .copied()
                    .filter(|c| self.backup_ids.contains(c.id.as_str()))
                    .collect();
                if quiet.is_empty() {
                    quiet = self.eligible.clone();
                }
                quiet.sort_by(|a, b| {
                    a.sightings
                        .cmp(&b.sightings)
                        .then(b.confidence.total_cmp(&a.confidence))
                });
                self.take(quiet)
            }
            RouteStrategy::MinimalFallback => Vec::new(),
        }
    }

    fn take(&self, mut picked: Vec<&'a LocationCandidate>) -> Vec<&'a LocationCandidate> {
        picked.truncate(self.capacity);
        picked
    }

    /// Greedy cover: each pick adds the most unseen behaviours, requested interests counting double.
    fn diverse(&self) -> Vec<&'a LocationCandidate> {
        let mut remaining = self.eligible.clone();
        let mut covered = BTreeSet::new();
        let mut picked = Vec::new();
        while picked.len() < self.capacity && !remaining.is_empty() {
            let gain = |candidate: &LocationCandidate| -> usize {
                candidate
                    .behaviors
                    .iter()
                    .filter(|tag| !covered.contains(*tag))
                    .map(|tag| if self.interests.contains(tag) { 2 } else { 1 })
                    .sum()
            };
            let mut best = 0;
            for idx in 1..remaining.len() {
                let (g, best_g) = (gain(remaining[idx]), gain(remaining[best]));
                if g > best_g
                    || (g == best_g && remaining[idx].confidence > remaining[best].confidence)
                {
                    best = idx;
                }
            }
            let chosen = remaining.remove(best);
            if gain(chosen) == 0 && !picked.is_empty() {
                break;
            }
            covered.extend(chosen.behaviors.iter().copied());
            picked.push(chosen);
        }
        picked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orcatrail_core::{GeoPoint, ViewingMode};

    fn candidate(id: &str, confidence: f32, behaviors: &[BehaviorTag]) -> LocationCandidate {
        LocationCandidate {
            id: id.into(),
            name: id.into(),
            point: GeoPoint::new(48.5, -123.1),
            access: vec![ViewingMode::Land],
            behaviors: behaviors.iter().copied().collect(),
            model_confidence: confidence,
            historical_confidence: confidence,
            confidence,
            interval: None,
            sightings: 3,
            disturbance_factor: 0.5,
            accessible: false,
            community_partner: false,
            interpretive: false,
        }
    }

    #[test]
    fn diverse_prefers_new_behaviours() {
        use BehaviorTag::{Foraging, Resting, Socializing, Traveling};
        let a = candidate("a", 0.9, &[Foraging]);
        let b = candidate("b", 0.85, &[Foraging]);
        let c = candidate("c", 0.6, &[Resting, Socializing]);
        let d = candidate("d", 0.5, &[Traveling]);
        let interests = BTreeSet::from([Traveling]);
        let pool = CandidatePool::new(vec![&a, &b, &c, &d], &[], &interests, 3);
        let ids: Vec<_> = pool
            .select(RouteStrategy::DiverseBehavior)
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(ids, vec!["c", "d", "a"]);
        let top: Vec<_> = pool
            .select(RouteStrategy::HighestConfidence)
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(top, vec!["a", "b", "c"]);
    }

    #[test]
    fn conservative_keeps_gentle_or_accessible_sites() {
        let mut calm = candidate("calm", 0.5, &[]);
        calm.disturbance_factor = 0.1;
        let mut ramp = candidate("ramp", 0.7, &[]);
        ramp.accessible = true;
        let rough = candidate("rough", 0.9, &[]);
        let interests = BTreeSet::new();
        let pool = CandidatePool::new(vec![&rough, &ramp, &calm], &[], &interests, 5);
        let ids: Vec<_> = pool
            .select(RouteStrategy::ConservativeAccessible)
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(ids, vec!["calm", "ramp"]);
    }

    #[test]
    fn exploratory_draws_from_backup_by_fewest_sightings() {
        let top = candidate("top", 0.9, &[]);
        let mut quiet = candidate("quiet", 0.5, &[]);
        quiet.sightings = 0;
        let busy = candidate("busy", 0.6, &[]);
        let backup = vec![busy.clone(), quiet.clone()];
        let interests = BTreeSet::new();
        let pool = CandidatePool::new(vec![&top, &busy, &quiet], &backup, &interests, 5);
        let ids: Vec<_> = pool
            .select(RouteStrategy::Exploratory)
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(ids, vec!["quiet", "busy"]);
    }
}
