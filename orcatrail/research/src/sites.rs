//! Known viewing sites around the San Juan and southern Gulf Islands.
//!
//! The catalog seeds the simulated services and the synthetic corpus. Sites
//! flagged `fallback` form the built-in set returned when external services
//! cannot be reached.

use std::collections::BTreeSet;

use orcatrail_core::{BehaviorTag, GeoPoint, LocationCandidate, ViewingMode};

use crate::services::Hotspot;

/// Static description of a site.
#[derive(Debug, Clone, Copy)]
pub struct SiteProfile {
    /// Stable slug.
    pub id: &'static str,
    /// Display name.
    pub name: &'static str,
    /// Latitude.
    pub lat: f64,
    /// Longitude.
    pub lon: f64,
    /// Access modes.
    pub access: &'static [ViewingMode],
    /// Behaviours usually seen.
    pub behaviors: &'static [BehaviorTag],
    /// Typical model confidence in peak season.
    pub base_confidence: f32,
    /// Sensitivity to visitors.
    pub disturbance_factor: f32,
    /// Step-free access.
    pub accessible: bool,
    /// Community partner on site.
    pub community_partner: bool,
    /// Interpretive programming.
    pub interpretive: bool,
    /// Part of the built-in fallback set.
    pub fallback: bool,
}

impl SiteProfile {
    /// Position.
    #[must_use]
    pub const fn point(&self) -> GeoPoint {
        GeoPoint {
            lat: self.lat,
            lon: self.lon,
        }
    }

    /// Hotspot carrying this site's metadata.
    #[must_use]
    pub fn hotspot(&self, confidence: f32) -> Hotspot {
        Hotspot {
            id: self.id.to_owned(),
            name: self.name.to_owned(),
            point: self.point(),
            confidence,
            behaviors: self.behaviors.iter().copied().collect::<BTreeSet<_>>(),
            access: self.access.to_vec(),
            disturbance_factor: self.disturbance_factor,
            accessible: self.accessible,
            community_partner: self.community_partner,
            interpretive: self.interpretive,
        }
    }
}

/// Every known site.
pub const SITES: &[SiteProfile] = &[
    SiteProfile {
        id: "lime-kiln-point",
        name: "Lime Kiln Point State Park",
        lat: 48.5159,
        lon: -123.1524,
        access: &[ViewingMode::Land],
        behaviors: &[BehaviorTag::Foraging, BehaviorTag::Traveling],
        base_confidence: 0.82,
        disturbance_factor: 0.2,
        accessible: true,
        community_partner: true,
        interpretive: true,
        fallback: true,
    },
    SiteProfile {
        id: "cattle-point",
        name: "Cattle Point",
        lat: 48.4508,
        lon: -122.9630,
        access: &[ViewingMode::Land],
        behaviors: &[BehaviorTag::Traveling, BehaviorTag::Resting],
        base_confidence: 0.64,
        disturbance_factor: 0.25,
        accessible: true,
        community_partner: false,
        interpretive: true,
        fallback: true,
    },
    SiteProfile {
        id: "east-point-saturna",
        name: "East Point, Saturna Island",
        lat: 48.7836,
        lon: -123.0453,
        access: &[ViewingMode::Land],
        behaviors: &[BehaviorTag::Foraging, BehaviorTag::Socializing],
        base_confidence: 0.7,
        disturbance_factor: 0.2,
        accessible: false,
        community_partner: true,
        interpretive: true,
        fallback: true,
    },
    SiteProfile {
        id: "haro-strait-west",
        name: "Haro Strait, west side",
        lat: 48.5000,
        lon: -123.2000,
        access: &[ViewingMode::Boat],
        behaviors: &[BehaviorTag::Foraging, BehaviorTag::SurfaceActive],
        base_confidence: 0.78,
        disturbance_factor: 0.5,
        accessible: false,
        community_partner: true,
        interpretive: true,
        fallback: true,
    },
    SiteProfile {
        id: "boundary-pass",
        name: "Boundary Pass",
        lat: 48.7700,
        lon: -123.0200,
        access: &[ViewingMode::Boat],
        behaviors: &[BehaviorTag::Traveling, BehaviorTag::Socializing],
        base_confidence: 0.66,
        disturbance_factor: 0.45,
        accessible: false,
        community_partner: false,
        interpretive: true,
        fallback: true,
    },
    SiteProfile {
        id: "san-juan-county-park",
        name: "San Juan County Park",
        lat: 48.5465,
        lon: -123.1405,
        access: &[ViewingMode::Kayak, ViewingMode::Land],
        behaviors: &[BehaviorTag::Foraging, BehaviorTag::Resting],
        base_confidence: 0.68,
        disturbance_factor: 0.55,
        accessible: false,
        community_partner: true,
        interpretive: false,
        fallback: true,
    },
    SiteProfile {
        id: "turn-point-stuart",
        name: "Turn Point, Stuart Island",
        lat: 48.6889,
        lon: -123.2372,
        access: &[ViewingMode::Land, ViewingMode::Boat],
        behaviors: &[BehaviorTag::Traveling, BehaviorTag::SurfaceActive],
        base_confidence: 0.74,
        disturbance_factor: 0.3,
        accessible: false,
        community_partner: false,
        interpretive: true,
        fallback: false,
    },
    SiteProfile {
        id: "eagle-point",
        name: "Eagle Point",
        lat: 48.4595,
        lon: -123.0123,
        access: &[ViewingMode::Land],
        behaviors: &[BehaviorTag::Resting, BehaviorTag::Traveling],
        base_confidence: 0.58,
        disturbance_factor: 0.15,
        accessible: false,
        community_partner: false,
        interpretive: false,
        fallback: false,
    },
    SiteProfile {
        id: "spieden-channel",
        name: "Spieden Channel",
        lat: 48.6280,
        lon: -123.1500,
        access: &[ViewingMode::Boat, ViewingMode::Kayak],
        behaviors: &[BehaviorTag::Foraging, BehaviorTag::Socializing, BehaviorTag::SurfaceActive],
        base_confidence: 0.72,
        disturbance_factor: 0.6,
        accessible: false,
        community_partner: false,
        interpretive: false,
        fallback: false,
    },
    SiteProfile {
        id: "friday-harbor-whale-museum",
        name: "Friday Harbor waterfront",
        lat: 48.5343,
        lon: -123.0171,
        access: &[ViewingMode::Land, ViewingMode::Boat],
        behaviors: &[BehaviorTag::Traveling],
        base_confidence: 0.45,
        disturbance_factor: 0.1,
        accessible: true,
        community_partner: true,
        interpretive: true,
        fallback: false,
    },
];

/// Fallback candidates, each at `confidence`.
#[must_use]
pub fn fallback_candidates(confidence: f32) -> Vec<LocationCandidate> {
    SITES
        .iter()
        .filter(|site| site.fallback)
        .map(|site| site.hotspot(confidence).into_candidate(confidence, confidence))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_set_covers_every_mode() {
        let candidates = fallback_candidates(0.6);
        assert_eq!(candidates.len(), 6);
        for mode in [ViewingMode::Land, ViewingMode::Boat, ViewingMode::Kayak] {
            assert!(candidates.iter().any(|c| c.reachable_by(mode)), "{mode}");
        }
        assert!(candidates.iter().all(|c| (c.confidence - 0.6).abs() < f32::EPSILON));
    }

    #[test]
    fn slugs_are_unique() {
        let ids: BTreeSet<_> = SITES.iter().map(|site| site.id).collect();
        assert_eq!(ids.len(), SITES.len());
    }
}
